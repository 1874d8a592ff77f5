//! Wire-compatible data model for the ride tracker backend.
//!
//! These types match the JSON the backend produces over both the live
//! WebSocket stream and the REST ride history endpoints. Key adaptations:
//!
//! - Go `time.Time` → [`DateTime<Utc>`] (RFC 3339)
//! - The backend's zero `time.Time` (`0001-01-01T00:00:00Z`) stands in for
//!   "no end time" and is decoded as `None`
//! - Payload field names differ between the two frame dialects; serde
//!   aliases accept both

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Server-assigned ride identifier.
pub type RideId = i64;

/// Conversion factor used for speed display.
pub const MPH_PER_KNOT: f64 = 1.15078;

/// Largest page size the backend accepts.
pub const MAX_LIST_LIMIT: u32 = 100;

/// Page size used when none is specified.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Convert a speed in knots to miles per hour.
pub fn knots_to_mph(knots: f64) -> f64 {
    knots * MPH_PER_KNOT
}

// ── Core records ────────────────────────────────────────────────────

/// A single GPS fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    /// Ground speed. The backend omits zero speeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_knots: Option<f64>,
}

impl Position {
    /// Create a position without speed information.
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            speed_knots: None,
        }
    }

    /// Attach a ground speed in knots.
    #[must_use]
    pub fn with_speed_knots(mut self, speed_knots: f64) -> Self {
        self.speed_knots = Some(speed_knots);
        self
    }

    /// Speed converted to miles per hour, if known.
    pub fn speed_mph(&self) -> Option<f64> {
        self.speed_knots.map(knots_to_mph)
    }
}

/// Brief overview of a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSummary {
    pub id: RideId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    /// `None` while the ride is ongoing.
    #[serde(
        default,
        deserialize_with = "deserialize_end_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,
}

impl RideSummary {
    /// Create a summary for a ride that has not ended.
    pub fn new(id: RideId, name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            start_time,
            end_time: None,
        }
    }

    /// Returns `true` once an end time has been recorded.
    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    /// Record the end time unless one is already set.
    ///
    /// Returns `true` if the summary changed. An end time, once recorded,
    /// is never replaced.
    pub fn mark_ended(&mut self, end_time: DateTime<Utc>) -> bool {
        if self.end_time.is_some() {
            return false;
        }
        self.end_time = Some(end_time);
        true
    }

    /// End time to use for display.
    ///
    /// The recorded end time when it is not before the start time, otherwise
    /// the timestamp of the latest position, otherwise `None`.
    pub fn effective_end_time(&self, positions: &[Position]) -> Option<DateTime<Utc>> {
        if let Some(end) = self.end_time {
            if end >= self.start_time {
                return Some(end);
            }
        }
        positions.last().map(|p| p.timestamp)
    }
}

/// A ride together with its recorded positions, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideDetail {
    #[serde(flatten)]
    pub summary: RideSummary,
    #[serde(default)]
    pub positions: Vec<Position>,
}

impl RideDetail {
    pub fn new(summary: RideSummary, positions: Vec<Position>) -> Self {
        Self { summary, positions }
    }

    pub fn id(&self) -> RideId {
        self.summary.id
    }

    /// The most recent position, if any.
    pub fn last_position(&self) -> Option<&Position> {
        self.positions.last()
    }

    /// See [`RideSummary::effective_end_time`].
    pub fn effective_end_time(&self) -> Option<DateTime<Utc>> {
        self.summary.effective_end_time(&self.positions)
    }

    pub fn stats(&self) -> RideStats {
        RideStats::compute(&self.summary, &self.positions)
    }
}

/// Aggregate figures shown alongside a ride.
#[derive(Debug, Clone, PartialEq)]
pub struct RideStats {
    pub point_count: usize,
    /// Start time to effective end time.
    pub duration: Option<chrono::Duration>,
    /// Mean over positions that carry a speed.
    pub average_speed_knots: Option<f64>,
    pub max_speed_knots: Option<f64>,
}

impl RideStats {
    pub fn compute(summary: &RideSummary, positions: &[Position]) -> Self {
        let speeds: Vec<f64> = positions.iter().filter_map(|p| p.speed_knots).collect();
        let (average_speed_knots, max_speed_knots) = if speeds.is_empty() {
            (None, None)
        } else {
            let sum: f64 = speeds.iter().sum();
            let max = speeds.iter().copied().fold(f64::MIN, f64::max);
            #[allow(clippy::cast_precision_loss)]
            let avg = sum / speeds.len() as f64;
            (Some(avg), Some(max))
        };

        Self {
            point_count: positions.len(),
            duration: summary
                .effective_end_time(positions)
                .map(|end| end - summary.start_time),
            average_speed_knots,
            max_speed_knots,
        }
    }
}

// ── Queries ─────────────────────────────────────────────────────────

/// Parameters for the paginated ride history query.
///
/// Values are clamped to what the backend accepts: `page >= 1` and
/// `1 <= limit <= 100`.
///
/// # Example
///
/// ```
/// use b3_ride_tracker::protocol::RideListQuery;
///
/// let query = RideListQuery::new(0, 500);
/// assert_eq!(query.page, 1);
/// assert_eq!(query.limit, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideListQuery {
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
    /// Only rides that started on this calendar date (UTC).
    pub date: Option<NaiveDate>,
}

impl RideListQuery {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_LIST_LIMIT),
            date: None,
        }
    }

    /// The single most recent ride.
    pub fn latest() -> Self {
        Self::new(1, 1)
    }

    /// Restrict results to rides that started on `date`.
    #[must_use]
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Query-string pairs in the order the backend documents them.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(date) = self.date {
            pairs.push(("date", date.format("%Y-%m-%d").to_string()));
        }
        pairs
    }
}

impl Default for RideListQuery {
    fn default() -> Self {
        Self::new(1, DEFAULT_LIST_LIMIT)
    }
}

// ── Frame payloads ──────────────────────────────────────────────────

/// Payload of a `current_location` frame.
pub type CurrentLocationPayload = Position;

/// Payload of a `ride_started` / `RIDE_STARTED` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideStartedPayload {
    pub ride_id: RideId,
    #[serde(default, alias = "ride_name")]
    pub name: String,
    #[serde(alias = "timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(alias = "position")]
    pub initial_position: Position,
}

/// Payload of a `ride_position_added` / `RIDE_POSITION_UPDATE` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidePositionPayload {
    pub ride_id: RideId,
    pub position: Position,
}

/// Payload of a `ride_ended` / `RIDE_ENDED` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideEndedPayload {
    pub ride_id: RideId,
    #[serde(alias = "timestamp")]
    pub end_time: DateTime<Utc>,
}

fn deserialize_end_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|t| t.year() > 1))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::float_cmp
)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn zero_end_time_from_backend_is_absent() {
        let json = r#"{
            "id": 3,
            "name": "Morning Ride",
            "start_time": "2025-06-01T08:00:00Z",
            "end_time": "0001-01-01T00:00:00Z"
        }"#;
        let ride: RideSummary = serde_json::from_str(json).unwrap();
        assert_eq!(ride.id, 3);
        assert!(ride.end_time.is_none());
    }

    #[test]
    fn missing_and_null_end_time_are_absent() {
        let missing: RideSummary =
            serde_json::from_str(r#"{"id":1,"name":"a","start_time":"2025-06-01T08:00:00Z"}"#)
                .unwrap();
        let null: RideSummary = serde_json::from_str(
            r#"{"id":1,"name":"a","start_time":"2025-06-01T08:00:00Z","end_time":null}"#,
        )
        .unwrap();
        assert!(missing.end_time.is_none());
        assert!(null.end_time.is_none());
    }

    #[test]
    fn ride_detail_flattens_summary_fields() {
        let json = r#"{
            "id": 9,
            "name": "Evening Ride",
            "start_time": "2025-06-01T18:00:00Z",
            "end_time": "2025-06-01T18:30:00Z",
            "positions": [
                {"latitude": 37.77, "longitude": -122.41, "timestamp": "2025-06-01T18:00:05Z"},
                {"latitude": 37.78, "longitude": -122.42, "timestamp": "2025-06-01T18:00:10Z", "speed_knots": 7.5}
            ]
        }"#;
        let detail: RideDetail = serde_json::from_str(json).unwrap();
        assert_eq!(detail.id(), 9);
        assert!(detail.summary.is_ended());
        assert_eq!(detail.positions.len(), 2);
        assert_eq!(detail.positions[0].speed_knots, None);
        assert_eq!(detail.positions[1].speed_knots, Some(7.5));
    }

    #[test]
    fn mark_ended_sets_once() {
        let mut ride = RideSummary::new(1, "r", at(0));
        assert!(ride.mark_ended(at(60)));
        assert!(!ride.mark_ended(at(120)));
        assert_eq!(ride.end_time, Some(at(60)));
    }

    #[test]
    fn effective_end_time_prefers_valid_end_time() {
        let mut ride = RideSummary::new(1, "r", at(0));
        let positions = vec![Position::new(0.0, 0.0, at(30))];
        ride.mark_ended(at(90));
        assert_eq!(ride.effective_end_time(&positions), Some(at(90)));
    }

    #[test]
    fn effective_end_time_falls_back_to_latest_position() {
        let ride = RideSummary::new(1, "r", at(0));
        let positions = vec![
            Position::new(0.0, 0.0, at(10)),
            Position::new(0.0, 0.0, at(40)),
        ];
        assert_eq!(ride.effective_end_time(&positions), Some(at(40)));
        assert_eq!(ride.effective_end_time(&[]), None);
    }

    #[test]
    fn effective_end_time_ignores_end_before_start() {
        let mut ride = RideSummary::new(1, "r", at(100));
        ride.end_time = Some(at(50));
        let positions = vec![Position::new(0.0, 0.0, at(130))];
        assert_eq!(ride.effective_end_time(&positions), Some(at(130)));
    }

    #[test]
    fn stats_over_positions_with_speed() {
        let detail = RideDetail::new(
            RideSummary::new(1, "r", at(0)),
            vec![
                Position::new(0.0, 0.0, at(0)).with_speed_knots(4.0),
                Position::new(0.0, 0.0, at(60)),
                Position::new(0.0, 0.0, at(120)).with_speed_knots(8.0),
            ],
        );
        let stats = detail.stats();
        assert_eq!(stats.point_count, 3);
        assert_eq!(stats.duration, Some(chrono::Duration::seconds(120)));
        assert_eq!(stats.average_speed_knots, Some(6.0));
        assert_eq!(stats.max_speed_knots, Some(8.0));
    }

    #[test]
    fn stats_without_speed_data() {
        let stats = RideStats::compute(&RideSummary::new(1, "r", at(0)), &[]);
        assert_eq!(stats.point_count, 0);
        assert!(stats.duration.is_none());
        assert!(stats.average_speed_knots.is_none());
        assert!(stats.max_speed_knots.is_none());
    }

    #[test]
    fn knots_convert_to_mph() {
        assert!((knots_to_mph(10.0) - 11.5078).abs() < 1e-9);
        let p = Position::new(0.0, 0.0, at(0)).with_speed_knots(1.0);
        assert_eq!(p.speed_mph(), Some(MPH_PER_KNOT));
    }

    #[test]
    fn list_query_clamps_and_formats_date() {
        let query = RideListQuery::new(3, 0).with_date(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(query.limit, 1);
        assert_eq!(
            query.to_query_pairs(),
            vec![
                ("page", "3".to_string()),
                ("limit", "1".to_string()),
                ("date", "2025-06-01".to_string()),
            ]
        );
        assert_eq!(RideListQuery::default().limit, DEFAULT_LIST_LIMIT);
    }

    #[test]
    fn ride_started_payload_accepts_both_dialects() {
        let lower = r#"{
            "ride_id": 5,
            "name": "Ride 5",
            "start_time": "2025-06-01T08:00:00Z",
            "initial_position": {"latitude": 1.0, "longitude": 2.0, "timestamp": "2025-06-01T08:00:00Z"}
        }"#;
        let upper = r#"{
            "ride_id": 5,
            "ride_name": "Ride 5",
            "timestamp": "2025-06-01T08:00:00Z",
            "position": {"latitude": 1.0, "longitude": 2.0, "timestamp": "2025-06-01T08:00:00Z"}
        }"#;
        let a: RideStartedPayload = serde_json::from_str(lower).unwrap();
        let b: RideStartedPayload = serde_json::from_str(upper).unwrap();
        assert_eq!(a.name, b.name);
        assert_eq!(a.start_time, b.start_time);
        assert_eq!(a.initial_position, b.initial_position);
    }
}

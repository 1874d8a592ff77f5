//! Request/response access to ride history.
//!
//! [`RideApi`] is the seam the reconciler fetches through. [`HttpRideApi`]
//! implements it against the backend's REST endpoints (feature `http-api`);
//! tests and alternative backends provide their own implementation.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{RideDetail, RideId, RideListQuery, RideSummary};

/// Default REST base URL of a locally running backend.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Ride history queries.
#[async_trait]
pub trait RideApi: Send + Sync + 'static {
    /// One page of rides, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is not a list
    /// of rides.
    async fn list_rides(&self, query: &RideListQuery) -> Result<Vec<RideSummary>>;

    /// A single ride with its positions.
    ///
    /// # Errors
    ///
    /// Returns [`RideTrackerError::RideNotFound`](crate::RideTrackerError::RideNotFound)
    /// if the backend has no such ride.
    async fn ride_detail(&self, ride_id: RideId) -> Result<RideDetail>;
}

/// Configuration for [`HttpRideApi`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL the `/rides` paths are appended to.
    pub base_url: String,
    /// Per-request timeout. Defaults to none.
    pub request_timeout: Option<Duration>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL)
    }
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: None,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[cfg(feature = "http-api")]
pub use http::HttpRideApi;

#[cfg(feature = "http-api")]
mod http {
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use serde::de::DeserializeOwned;
    use tracing::debug;

    use super::{ApiConfig, RideApi};
    use crate::error::{Result, RideTrackerError};
    use crate::protocol::{RideDetail, RideId, RideListQuery, RideSummary};

    /// [`RideApi`] over HTTP using `reqwest`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn example() -> b3_ride_tracker::Result<()> {
    /// use b3_ride_tracker::api::{ApiConfig, HttpRideApi, RideApi};
    /// use b3_ride_tracker::protocol::RideListQuery;
    ///
    /// let api = HttpRideApi::new(ApiConfig::default())?;
    /// let rides = api.list_rides(&RideListQuery::default()).await?;
    /// println!("{} rides", rides.len());
    /// # Ok(())
    /// # }
    /// ```
    #[derive(Debug, Clone)]
    pub struct HttpRideApi {
        client: reqwest::Client,
        base_url: String,
    }

    impl HttpRideApi {
        /// Build a client for `config`.
        ///
        /// # Errors
        ///
        /// Returns [`RideTrackerError::Request`] if the HTTP client cannot be
        /// constructed.
        pub fn new(config: ApiConfig) -> Result<Self> {
            let mut builder = reqwest::Client::builder();
            if let Some(timeout) = config.request_timeout {
                builder = builder.timeout(timeout);
            }
            let client = builder.build().map_err(map_reqwest_error)?;
            Ok(Self::with_client(client, config.base_url))
        }

        /// Use an existing `reqwest` client.
        pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
            let base_url = base_url.into().trim_end_matches('/').to_string();
            Self { client, base_url }
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        /// Send `request` and decode a JSON body.
        ///
        /// A 404 maps to [`RideTrackerError::RideNotFound`] when the request
        /// was for `ride_id`.
        async fn get_json<T: DeserializeOwned>(
            &self,
            request: reqwest::RequestBuilder,
            ride_id: Option<RideId>,
        ) -> Result<T> {
            let response = request.send().await.map_err(map_reqwest_error)?;
            let status = response.status();
            let body = response.text().await.map_err(map_reqwest_error)?;

            if status == StatusCode::NOT_FOUND {
                if let Some(ride_id) = ride_id {
                    return Err(RideTrackerError::RideNotFound { ride_id });
                }
            }
            if !status.is_success() {
                return Err(RideTrackerError::Http {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(serde_json::from_str(&body)?)
        }
    }

    #[async_trait]
    impl RideApi for HttpRideApi {
        async fn list_rides(&self, query: &RideListQuery) -> Result<Vec<RideSummary>> {
            let url = format!("{}/rides", self.base_url);
            debug!(%url, page = query.page, limit = query.limit, "listing rides");

            let request = self.client.get(&url).query(&query.to_query_pairs());
            self.get_json(request, None).await
        }

        async fn ride_detail(&self, ride_id: RideId) -> Result<RideDetail> {
            let url = format!("{}/rides/{ride_id}", self.base_url);
            debug!(%url, ride_id, "fetching ride detail");

            self.get_json(self.client.get(&url), Some(ride_id)).await
        }
    }

    fn map_reqwest_error(e: reqwest::Error) -> RideTrackerError {
        if e.is_timeout() {
            RideTrackerError::Timeout
        } else {
            RideTrackerError::Request(e.to_string())
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.base_url, "http://localhost:8080/api");
        assert!(config.request_timeout.is_none());

        let config = ApiConfig::new("http://example.test/api")
            .with_request_timeout(Duration::from_secs(3));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(3)));
    }

    #[cfg(feature = "http-api")]
    #[test]
    fn trailing_slash_is_trimmed() {
        let api = HttpRideApi::with_client(reqwest::Client::new(), "http://example.test/api/");
        assert_eq!(api.base_url(), "http://example.test/api");
    }
}

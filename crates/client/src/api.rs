//! REST client for the job status, cancel and create endpoints.
//!
//! [`JobService`] is the seam the transport coordinator and tracker talk
//! to; [`HttpJobService`] implements it with [`reqwest`]. The status
//! route is tried against several aliases in priority order because
//! deployments expose the same data under different paths.

use std::sync::Arc;

use async_trait::async_trait;
use jobpulse_core::classify::RawError;
use jobpulse_core::job::{JobSnapshot, StatusPayload};
use jobpulse_core::types::ProgressId;
use serde::Deserialize;

/// Header carrying the request-authentication token on state-mutating
/// requests.
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Placeholder substituted with the progress id in status routes.
pub const ROUTE_ID_PLACEHOLDER: &str = "{id}";

/// Status route aliases, most preferred first.
pub const DEFAULT_STATUS_ROUTES: &[&str] = &["/progress/{id}", "/api/progress/{id}", "/status/{id}"];

/// Server operations the client depends on.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Fetch the current snapshot of a job.
    async fn fetch_status(&self, progress_id: &str) -> Result<JobSnapshot, RawError>;

    /// Ask the server to cancel a job.
    async fn cancel(&self, progress_id: &str) -> Result<(), RawError>;

    /// Submit a job-creation request and return the new progress id.
    async fn create(&self, request: &serde_json::Value) -> Result<ProgressId, RawError>;
}

/// Supplies the request-authentication token. Owned by the embedding
/// application; the client only reads it.
pub trait AuthTokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Fixed token, e.g. read once from configuration.
pub struct StaticTokenProvider(pub String);

impl AuthTokenProvider for StaticTokenProvider {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The server answered 2xx but reported `success: false`.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// No status route was configured.
    #[error("No status routes configured")]
    NoRoutes,

    /// The base URL cannot be combined with a route.
    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Failures where trying another route on the same host is pointless.
    fn is_transport(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_connect() || e.is_timeout())
    }
}

impl From<ApiError> for RawError {
    fn from(err: ApiError) -> Self {
        let text = err.to_string();
        match err {
            ApiError::Request(e) if e.is_timeout() => {
                RawError::message(format!("request timed out: {e}"))
            }
            ApiError::Request(e) if e.is_connect() || e.is_request() => RawError::transport(text),
            ApiError::Request(e) => match e.status() {
                Some(status) => RawError::http(status.as_u16(), text),
                None => RawError::message(text),
            },
            ApiError::ApiError { status, body } => RawError::http(status, body),
            ApiError::Rejected(message) => RawError::message(message),
            ApiError::NoRoutes | ApiError::InvalidUrl(_) => RawError::message(text),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default = "default_true")]
    success: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(default = "default_true")]
    success: bool,
    progress_id: Option<String>,
    error: Option<String>,
}

fn default_true() -> bool {
    true
}

/// HTTP implementation of [`JobService`].
pub struct HttpJobService {
    client: reqwest::Client,
    base_url: String,
    status_routes: Vec<String>,
    auth: Option<Arc<dyn AuthTokenProvider>>,
}

impl HttpJobService {
    /// Create a service for `base_url` (no trailing slash) using the
    /// default status route aliases.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a service reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            status_routes: DEFAULT_STATUS_ROUTES.iter().map(|r| r.to_string()).collect(),
            auth: None,
        }
    }

    /// Replace the status route aliases (priority order).
    pub fn with_status_routes(mut self, routes: Vec<String>) -> Self {
        self.status_routes = routes;
        self
    }

    /// Attach the request-authentication token provider.
    pub fn with_auth(mut self, auth: Arc<dyn AuthTokenProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn status_routes(&self) -> &[String] {
        &self.status_routes
    }

    /// `route` appended to the base URL with `{id}` replaced. Each route
    /// segment is percent-encoded, so an id cannot change the path.
    fn endpoint(&self, route: &str, progress_id: &str) -> Result<reqwest::Url, ApiError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(
                route
                    .split('/')
                    .filter(|segment| !segment.is_empty())
                    .map(|segment| segment.replace(ROUTE_ID_PLACEHOLDER, progress_id)),
            );
        Ok(url)
    }

    /// Fetch the raw status payload, walking the route aliases.
    ///
    /// The first route that answers with a 2xx JSON body wins. Transport
    /// failures abort the walk immediately; any other failure falls
    /// through to the next alias and the last error is returned.
    pub async fn fetch_payload(&self, progress_id: &str) -> Result<StatusPayload, ApiError> {
        let mut last_error = ApiError::NoRoutes;

        for route in &self.status_routes {
            let url = self.endpoint(route, progress_id)?;
            let result = async {
                let response = self.client.get(url).send().await?;
                Self::parse_response::<StatusPayload>(response).await
            }
            .await;

            match result {
                Ok(payload) => {
                    tracing::trace!(progress_id, route = %route, "Status fetched");
                    return Ok(payload);
                }
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        progress_id,
                        route = %route,
                        error = %e,
                        "Status route failed, trying next alias",
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// POST with the authentication header attached, if available.
    fn post(&self, url: reqwest::Url) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        match self.auth.as_ref().and_then(|a| a.token()) {
            Some(token) => builder.header(CSRF_HEADER, token),
            None => builder,
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn fetch_status(&self, progress_id: &str) -> Result<JobSnapshot, RawError> {
        let payload = self.fetch_payload(progress_id).await?;
        if !payload.success {
            let reason = payload
                .error
                .clone()
                .unwrap_or_else(|| "status request was not successful".to_string());
            return Err(ApiError::Rejected(reason).into());
        }
        Ok(payload.into_snapshot())
    }

    async fn cancel(&self, progress_id: &str) -> Result<(), RawError> {
        let url = self.endpoint("/cancel/{id}", progress_id)?;
        let response = self.post(url).send().await.map_err(ApiError::from)?;
        let body: CancelResponse = Self::parse_response(response).await?;
        if !body.success {
            return Err(ApiError::Rejected(
                body.error.unwrap_or_else(|| "cancel was not accepted".to_string()),
            )
            .into());
        }
        Ok(())
    }

    async fn create(&self, request: &serde_json::Value) -> Result<ProgressId, RawError> {
        let url = self.endpoint("/process", "")?;
        let response = self
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(ApiError::from)?;
        let body: CreateResponse = Self::parse_response(response).await?;

        match (body.success, body.progress_id) {
            (true, Some(id)) if !id.is_empty() => Ok(id),
            (true, _) => Err(ApiError::Rejected("response carried no progress_id".into()).into()),
            (false, _) => Err(ApiError::Rejected(
                body.error.unwrap_or_else(|| "job creation was rejected".to_string()),
            )
            .into()),
        }
    }
}

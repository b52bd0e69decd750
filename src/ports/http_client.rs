use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response};
use thiserror::Error;

/// Errors raised while forwarding a request to a backend service.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    #[error("connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("request to {url} timed out after {millis} ms")]
    Timeout { url: String, millis: u64 },

    #[error("invalid backend request: {0}")]
    InvalidRequest(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Outbound port used by the dispatch step to reach backend services.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send `req` to the backend named by its absolute URI.
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>>;
}

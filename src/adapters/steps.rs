//! Built-in chain steps.
//!
//! | type id            | step                     |
//! |--------------------|--------------------------|
//! | `request-id`       | [`RequestIdStep`]        |
//! | `webappsec`        | [`SecurityHeadersStep`]  |
//! | `deny`             | [`DenyStep`]             |
//! | `dispatch`         | [`DispatchStep`]         |
//!
//! `webappsec` and `deny` are keyed by provider role so that an enabled
//! provider of that role adds the step to every chain of its topology.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use http::{HeaderName, HeaderValue, Request, Response, StatusCode, Uri};
use uuid::Uuid;

use crate::{
    core::dispatch::{Exchange, Next, Step, StepConfig, StepError, StepRegistry},
    ports::http_client::{HttpClient, HttpClientError},
};

pub const REQUEST_ID: &str = "request-id";
pub const SECURITY_HEADERS: &str = "webappsec";
pub const DENY: &str = "deny";
pub const DISPATCH: &str = "dispatch";

static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Registry holding every built-in step, dispatching through `client`.
pub fn builtin_registry(client: Arc<dyn HttpClient>) -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry
        .register(REQUEST_ID, |_: &StepConfig<'_>| {
            Ok(Arc::new(RequestIdStep) as Arc<dyn Step>)
        })
        .register(SECURITY_HEADERS, |config: &StepConfig<'_>| {
            Ok(Arc::new(SecurityHeadersStep::from_config(config)?) as Arc<dyn Step>)
        })
        .register(DENY, |config: &StepConfig<'_>| {
            Ok(Arc::new(DenyStep::from_config(config)?) as Arc<dyn Step>)
        })
        .register(DISPATCH, move |config: &StepConfig<'_>| {
            Ok(Arc::new(DispatchStep::from_config(config, client.clone())?) as Arc<dyn Step>)
        });
    registry
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, StepError> {
    HeaderValue::from_str(value).map_err(|_| StepError::Init {
        step: name.to_string(),
        reason: format!("'{value}' is not a valid header value"),
    })
}

fn status_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(message.into()));
    *response.status_mut() = status;
    response
}

/// Tags the request with an `x-request-id` (keeping a caller-supplied one)
/// and echoes it on the response.
pub struct RequestIdStep;

#[async_trait]
impl Step for RequestIdStep {
    async fn handle(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), StepError> {
        let id = match exchange.request().headers().get(&X_REQUEST_ID) {
            Some(id) => id.clone(),
            None => {
                let id = HeaderValue::from_str(&Uuid::new_v4().to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
                exchange
                    .request_mut()
                    .headers_mut()
                    .insert(X_REQUEST_ID.clone(), id.clone());
                id
            }
        };

        next.run(exchange).await?;

        if let Some(response) = exchange.response_mut() {
            response.headers_mut().insert(X_REQUEST_ID.clone(), id);
        }
        Ok(())
    }
}

/// Response hardening headers. Each header can be overridden through the
/// provider parameters `xframe.options.value`, `xcontent-type.options` and
/// `xss.protection`; the value `none` omits the header.
pub struct SecurityHeadersStep {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeadersStep {
    pub fn from_config(config: &StepConfig<'_>) -> Result<Self, StepError> {
        let settings = [
            ("xframe.options.value", "x-frame-options", "DENY"),
            ("xcontent-type.options", "x-content-type-options", "nosniff"),
            ("xss.protection", "x-xss-protection", "1; mode=block"),
        ];
        let mut headers = Vec::new();
        for (param, header, default) in settings {
            let value = config.param(param).unwrap_or(default);
            if value.eq_ignore_ascii_case("none") {
                continue;
            }
            headers.push((
                HeaderName::from_static(header),
                header_value(config.name, value)?,
            ));
        }
        Ok(Self { headers })
    }
}

#[async_trait]
impl Step for SecurityHeadersStep {
    async fn handle(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), StepError> {
        next.run(exchange).await?;
        if let Some(response) = exchange.response_mut() {
            for (name, value) in &self.headers {
                response.headers_mut().insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }
}

/// Ends every chain it is part of with a fixed status (`status`, default
/// 403) and optional `message`.
pub struct DenyStep {
    status: StatusCode,
    message: String,
}

impl DenyStep {
    pub fn from_config(config: &StepConfig<'_>) -> Result<Self, StepError> {
        let status = match config.param("status") {
            Some(raw) => raw
                .parse::<u16>()
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .ok_or_else(|| StepError::Init {
                    step: config.name.to_string(),
                    reason: format!("invalid status '{raw}'"),
                })?,
            None => StatusCode::FORBIDDEN,
        };
        Ok(Self {
            status,
            message: config.param("message").unwrap_or_default().to_string(),
        })
    }
}

#[async_trait]
impl Step for DenyStep {
    async fn handle(&self, exchange: &mut Exchange, _next: Next<'_>) -> Result<(), StepError> {
        tracing::debug!("Denied {} with {}", exchange.request().uri(), self.status);
        exchange.respond(status_response(self.status, self.message.clone()));
        Ok(())
    }
}

/// Forwards the request to the service's backend.
///
/// Parameters: `url` (backend base URL, required) and `prefix` (the chain's
/// mount path, stripped from the request path before it is appended to
/// `url`).
pub struct DispatchStep {
    url: String,
    prefix: String,
    client: Arc<dyn HttpClient>,
}

impl DispatchStep {
    pub fn from_config(config: &StepConfig<'_>, client: Arc<dyn HttpClient>) -> Result<Self, StepError> {
        let url = config.required_param("url")?;
        url.parse::<Uri>().map_err(|e| StepError::Init {
            step: config.name.to_string(),
            reason: format!("invalid backend url '{url}': {e}"),
        })?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            prefix: config
                .param("prefix")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    fn backend_uri(&self, request: &Request<Body>) -> Result<Uri, StepError> {
        let path = request.uri().path();
        let remainder = match path.strip_prefix(&self.prefix) {
            Some(rest) if self.prefix.is_empty() || rest.is_empty() || rest.starts_with('/') => rest,
            _ => path,
        };
        let target = match request.uri().query() {
            Some(query) => format!("{}{}?{}", self.url, remainder, query),
            None => format!("{}{}", self.url, remainder),
        };
        target.parse().map_err(|e| StepError::Failed {
            step: DISPATCH.to_string(),
            reason: format!("invalid backend uri '{target}': {e}"),
        })
    }
}

#[async_trait]
impl Step for DispatchStep {
    async fn handle(&self, exchange: &mut Exchange, _next: Next<'_>) -> Result<(), StepError> {
        let uri = self.backend_uri(exchange.request())?;
        let mut outbound = Request::new(exchange.take_request_body());
        *outbound.method_mut() = exchange.request().method().clone();
        *outbound.headers_mut() = exchange.request().headers().clone();
        *outbound.uri_mut() = uri;

        let response = match self.client.send_request(outbound).await {
            Ok(response) => response,
            Err(HttpClientError::Timeout { url, millis }) => {
                tracing::warn!("Backend {} timed out after {} ms", url, millis);
                status_response(StatusCode::GATEWAY_TIMEOUT, "backend timed out")
            }
            Err(HttpClientError::Connection { url, reason }) => {
                tracing::warn!("Backend {} unreachable: {}", url, reason);
                status_response(StatusCode::BAD_GATEWAY, "backend unavailable")
            }
            Err(e) => {
                return Err(StepError::Failed {
                    step: DISPATCH.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        exchange.respond(response);
        Ok(())
    }
}

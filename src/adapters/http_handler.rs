use std::{sync::Arc, time::Instant};

use axum::{
    Router,
    body::Body as AxumBody,
    http::{StatusCode, Uri, header},
};
use eyre::{Result, WrapErr};
use hyper::{Request, Response};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    adapters::deployer::GatewayDeployer,
    core::dispatch::DispatchOutcome,
    metrics::{RequestTimer, increment_request_total},
    ports::auditor::{AuditAction, AuditOutcome, AuditRecord, Auditor, ResourceType},
    tracing_setup::create_request_span,
};

/// HTTP entry point of the gateway.
///
/// Requests to `/{gateway_path}/{topology}/...` are handed to that topology's
/// dispatch engine with the prefix removed. `/health` reports the deployed
/// topologies.
pub struct HttpHandler {
    deployer: Arc<GatewayDeployer>,
    auditor: Arc<dyn Auditor>,
    prefix: String,
    started: Instant,
}

impl HttpHandler {
    pub fn new(deployer: Arc<GatewayDeployer>, auditor: Arc<dyn Auditor>, gateway_path: &str) -> Self {
        let gateway_path = gateway_path.trim_matches('/');
        let prefix = if gateway_path.is_empty() {
            "/".to_string()
        } else {
            format!("/{gateway_path}/")
        };
        Self {
            deployer,
            auditor,
            prefix,
            started: Instant::now(),
        }
    }

    /// Axum router sending every request through [`HttpHandler::handle_request`].
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(move |req: Request<AxumBody>| {
            let handler = self.clone();
            async move { handler.handle_request(req).await }
        })
    }

    pub async fn handle_request(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let result = if req.uri().path() == "/health" {
            self.handle_health_check()
        } else {
            self.handle_gateway_request(req).await
        };
        result.unwrap_or_else(|e| {
            tracing::error!("Request handling failed: {:#}", e);
            let mut response = Response::new(AxumBody::from("Internal Server Error"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
    }

    fn handle_health_check(&self) -> Result<Response<AxumBody>> {
        let health_data = serde_json::json!({
            "status": "healthy",
            "topologies": self.deployer.deployed(),
            "uptime_secs": self.started.elapsed().as_secs(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(health_data.to_string()))
            .wrap_err("Failed to build health check response")
    }

    /// Split `/{gateway_path}/{topology}/rest` into the topology name and the
    /// path handed to its engine.
    fn split_target<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        let (topology, remainder) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, ""),
        };
        (!topology.is_empty()).then_some((topology, remainder))
    }

    async fn handle_gateway_request(&self, mut req: Request<AxumBody>) -> Result<Response<AxumBody>> {
        let original = req.uri().clone();
        let Some((topology, remainder)) = self.split_target(original.path()) else {
            return not_found();
        };
        let topology = topology.to_string();
        let path = if remainder.is_empty() { "/" } else { remainder }.to_string();
        let Some(engine) = self.deployer.engine(&topology) else {
            tracing::debug!("No topology '{}' deployed for {}", topology, original.path());
            return not_found();
        };

        let request_id = req
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = create_request_span(req.method().as_str(), original.path(), &request_id);

        let path_and_query = match original.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        };
        *req.uri_mut() = path_and_query
            .parse::<Uri>()
            .wrap_err_with(|| format!("Invalid dispatch path '{path_and_query}'"))?;

        let role = engine
            .resolve(&path)
            .and_then(|chain| chain.role())
            .map(str::to_string);

        async move {
            let _timer = RequestTimer::new(&topology);
            let outcome = engine.dispatch(req).await;
            let status = outcome.status();
            increment_request_total(&topology, status.as_u16());
            tracing::Span::current().record("http.status_code", status.as_u16());

            let audit_outcome = match &outcome {
                DispatchOutcome::Completed(_) => AuditOutcome::Success,
                DispatchOutcome::NotFound => AuditOutcome::Unavailable,
                DispatchOutcome::Failed(_) => AuditOutcome::Failure,
            };
            let mut record = AuditRecord::new(
                AuditAction::Access,
                original.path(),
                ResourceType::Uri,
                audit_outcome,
            );
            record = match role {
                Some(role) => record.with_detail(format!("topology={topology} role={role} status={status}")),
                None => record.with_detail(format!("topology={topology} status={status}")),
            };
            self.auditor.audit(&record);

            Ok(outcome.into_response())
        }
        .instrument(span)
        .await
    }
}

fn not_found() -> Result<Response<AxumBody>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(AxumBody::from("Not Found"))
        .wrap_err("Failed to build not found response")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        adapters::steps::builtin_registry,
        core::{
            reconcile::{TopologyEvent, TopologyEventKind},
            topology::{Service, Topology},
        },
        ports::{
            http_client::{HttpClient, HttpClientResult},
            topology_listener::TopologyListener,
        },
    };

    struct EchoClient;

    #[async_trait]
    impl HttpClient for EchoClient {
        async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
            Ok(Response::new(AxumBody::from(req.uri().to_string())))
        }
    }

    #[derive(Default)]
    struct RecordingAuditor(Mutex<Vec<String>>);

    impl Auditor for RecordingAuditor {
        fn audit(&self, record: &AuditRecord) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{} {} {}", record.action, record.resource, record.outcome));
        }
    }

    fn create_test_router(default_service_path: Option<&str>) -> (Router, Arc<RecordingAuditor>) {
        let deployer = Arc::new(GatewayDeployer::new(Arc::new(builtin_registry(Arc::new(
            EchoClient,
        )))));
        let topology = Topology {
            default_service_path: default_service_path.map(str::to_string),
            ..Topology::new("sandbox")
                .with_service(Service::new("WEBHDFS").with_url("http://nn:50070/webhdfs"))
        };
        deployer
            .handle_topology_events(&[TopologyEvent::new(
                TopologyEventKind::Created,
                Arc::new(topology),
            )])
            .unwrap();

        let auditor = Arc::new(RecordingAuditor::default());
        let handler = Arc::new(HttpHandler::new(deployer, auditor.clone(), "/gateway/"));
        (handler.router(), auditor)
    }

    async fn send(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_check_handler() {
        let (router, _) = create_test_router(Some("webhdfs"));
        let (status, body) = send(router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["topologies"][0], "sandbox");
    }

    #[tokio::test]
    async fn test_dispatch_through_topology() {
        let (router, auditor) = create_test_router(Some("webhdfs"));
        let (status, body) = send(router, "/gateway/sandbox/webhdfs/v1/tmp?op=LISTSTATUS").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "http://nn:50070/webhdfs/v1/tmp?op=LISTSTATUS");
        assert_eq!(
            *auditor.0.lock().unwrap(),
            vec!["access /gateway/sandbox/webhdfs/v1/tmp success"]
        );
    }

    #[tokio::test]
    async fn test_default_service_path_fallback() {
        let (router, _) = create_test_router(Some("webhdfs"));
        let (status, body) = send(router, "/gateway/sandbox/v1/tmp").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "http://nn:50070/webhdfs/v1/tmp");
    }

    #[tokio::test]
    async fn test_unknown_topology_is_not_found() {
        let (router, auditor) = create_test_router(Some("webhdfs"));
        let (status, _) = send(router.clone(), "/gateway/production/webhdfs").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(router, "/elsewhere").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(auditor.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_path_is_audited_unavailable() {
        let (router, auditor) = create_test_router(None);
        let (status, _) = send(router, "/gateway/sandbox").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            *auditor.0.lock().unwrap(),
            vec!["access /gateway/sandbox unavailable"]
        );
    }
}

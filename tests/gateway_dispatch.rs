// End-to-end: topology directory -> deployer -> HTTP handler
#[cfg(test)]
mod test {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use axum::{Router, body::Body};
    use http::{Request, Response, StatusCode};
    use tempfile::TempDir;
    use topogate::{
        DirectoryTopologyService, GatewayDeployer, HttpHandler, TracingAuditor, builtin_registry,
        config::models::TopologySettings,
        core::dispatch::{Exchange, Next, Step, StepConfig, StepError},
        ports::{
            TopologyService,
            http_client::{HttpClient, HttpClientResult},
        },
    };
    use tower::ServiceExt;

    struct EchoClient;

    #[async_trait]
    impl HttpClient for EchoClient {
        async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
            Ok(Response::new(Body::from(req.uri().to_string())))
        }
    }

    /// Answers with its configured greeting.
    struct Greeter(String);

    #[async_trait]
    impl Step for Greeter {
        async fn handle(&self, exchange: &mut Exchange, _next: Next<'_>) -> Result<(), StepError> {
            exchange.respond(Response::new(Body::from(self.0.clone())));
            Ok(())
        }
    }

    struct Gateway {
        _dir: TempDir,
        service: DirectoryTopologyService,
        router: Router,
        greeters_built: Arc<AtomicUsize>,
    }

    async fn gateway(files: &[(&str, &str)]) -> Gateway {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }

        let greeters_built = Arc::new(AtomicUsize::new(0));
        let counter = greeters_built.clone();
        let mut registry = builtin_registry(Arc::new(EchoClient));
        registry.register("greeter", move |config: &StepConfig<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            let greeting = config.required_param("greeting")?;
            Ok(Arc::new(Greeter(greeting.to_string())) as Arc<dyn Step>)
        });
        let deployer = Arc::new(GatewayDeployer::new(Arc::new(registry)));

        let service = DirectoryTopologyService::builder(TopologySettings {
            directory: dir.path().to_path_buf(),
            watch_events: false,
            ..TopologySettings::default()
        })
        .build();
        service.add_listener(deployer.clone());
        service.reload().await;

        let handler = Arc::new(HttpHandler::new(
            deployer,
            Arc::new(TracingAuditor),
            "gateway",
        ));
        Gateway {
            _dir: dir,
            service,
            router: handler.router(),
            greeters_built,
        }
    }

    async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    const SANDBOX: &str = r#"{
        "services": [
            {"role": "WEBHDFS", "urls": ["http://nn:50070/webhdfs"]},
            {"role": "GREETING", "dispatch": "greeter", "params": {"greeting": "hello"}},
            {"role": "BROKEN", "dispatch": "greeter"}
        ]
    }"#;

    #[tokio::test]
    async fn test_requests_reach_topology_services() {
        let gw = gateway(&[("sandbox.json", SANDBOX)]).await;

        let (status, body) = get(&gw.router, "/gateway/sandbox/webhdfs/v1/tmp?op=GETFILESTATUS").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "http://nn:50070/webhdfs/v1/tmp?op=GETFILESTATUS");

        let (status, body) = get(&gw.router, "/gateway/sandbox/greeting").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn test_steps_are_built_on_first_use() {
        let gw = gateway(&[("sandbox.json", SANDBOX)]).await;
        assert_eq!(gw.greeters_built.load(Ordering::SeqCst), 0);

        get(&gw.router, "/gateway/sandbox/greeting").await;
        get(&gw.router, "/gateway/sandbox/greeting").await;
        assert_eq!(gw.greeters_built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_step_init_failure_surfaces_at_dispatch() {
        let gw = gateway(&[("sandbox.json", SANDBOX)]).await;
        let (status, _) = get(&gw.router, "/gateway/sandbox/broken/anything").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        // the rest of the topology keeps working
        let (status, _) = get(&gw.router, "/gateway/sandbox/greeting").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_paths_are_not_found() {
        let gw = gateway(&[("sandbox.json", SANDBOX)]).await;
        assert_eq!(
            get(&gw.router, "/gateway/sandbox/yarn/ws").await.0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get(&gw.router, "/gateway/missing/webhdfs").await.0,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_provider_steps_apply_to_every_chain() {
        let topology = r#"{
            "providers": [{"role": "deny", "name": "Maintenance", "params": {"status": "503"}}],
            "services": [{"role": "WEBHDFS", "urls": ["http://nn:50070/webhdfs"]}]
        }"#;
        let gw = gateway(&[("closed.json", topology)]).await;
        assert_eq!(
            get(&gw.router, "/gateway/closed/webhdfs/v1").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_delete_undeploys_topology() {
        let gw = gateway(&[("sandbox.json", SANDBOX)]).await;
        assert_eq!(get(&gw.router, "/gateway/sandbox/greeting").await.0, StatusCode::OK);

        gw.service.delete("sandbox").await.unwrap();
        assert_eq!(
            get(&gw.router, "/gateway/sandbox/greeting").await.0,
            StatusCode::NOT_FOUND
        );
    }
}

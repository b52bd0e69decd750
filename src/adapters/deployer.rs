//! Turns published topologies into live dispatch engines.
use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;

use crate::{
    adapters::steps::{DISPATCH, REQUEST_ID},
    core::{
        dispatch::{DispatchEngine, DispatchError, StepRegistry, StepSelector},
        reconcile::{TopologyEvent, TopologyEventKind},
        topology::{Params, Topology},
    },
    ports::topology_listener::{ListenerError, TopologyListener},
};

/// Topology listener keeping one [`DispatchEngine`] per deployed topology.
///
/// Every service is mounted at `/{role}` and `/{role}/**` (role lowercased),
/// every application at each of its mount points. A chain runs `request-id`,
/// then one step per enabled provider whose role names a registered step
/// type, then the service's dispatch step.
pub struct GatewayDeployer {
    registry: Arc<StepRegistry>,
    engines: ArcSwap<HashMap<String, Arc<DispatchEngine>>>,
}

impl GatewayDeployer {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self {
            registry,
            engines: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Engine serving the named topology.
    pub fn engine(&self, topology: &str) -> Option<Arc<DispatchEngine>> {
        self.engines.load().get(topology).cloned()
    }

    /// Names of the deployed topologies, sorted.
    pub fn deployed(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.load().keys().cloned().collect();
        names.sort();
        names
    }

    /// Undeploy every topology and tear down the steps of each engine.
    pub fn shutdown(&self) {
        let engines = self.engines.swap(Arc::new(HashMap::new()));
        for engine in engines.values() {
            engine.shutdown();
        }
        tracing::info!("Undeployed {} topologies", engines.len());
    }

    pub fn build_engine(&self, topology: &Topology) -> Result<DispatchEngine, DispatchError> {
        let mut builder = DispatchEngine::builder(&topology.name, self.registry.clone())
            .default_service_path(topology.default_service_path.clone());

        let provider_steps: Vec<(&str, &Params)> = topology
            .providers
            .iter()
            .filter(|p| p.enabled && self.registry.contains(&p.role))
            .map(|p| (p.role.as_str(), &p.params))
            .collect();

        for service in &topology.services {
            let dispatch = service.dispatch.as_deref().unwrap_or(DISPATCH);
            if service.dispatch.is_none() && service.url().is_none() {
                tracing::warn!(
                    "Service {} in topology '{}' has no url, not mounted",
                    service.role,
                    topology.name
                );
                continue;
            }
            let mount = format!("/{}", service.role.to_lowercase());
            let mut params = service.params.clone();
            if let Some(url) = service.url() {
                params.insert("url", url);
            }
            params.insert("prefix", mount.as_str());

            for path in [mount.clone(), format!("{mount}/**")] {
                builder.add_role_step(
                    &service.role,
                    &path,
                    REQUEST_ID,
                    StepSelector::Type(REQUEST_ID.to_string()),
                    Params::new(),
                )?;
                for (role, provider_params) in &provider_steps {
                    builder.add_role_step(
                        &service.role,
                        &path,
                        role,
                        StepSelector::Type(role.to_string()),
                        (*provider_params).clone(),
                    )?;
                }
                builder.add_role_step(
                    &service.role,
                    &path,
                    dispatch,
                    StepSelector::Type(dispatch.to_string()),
                    params.clone(),
                )?;
            }
        }

        for application in &topology.applications {
            let dispatch = application.params.get("dispatch").unwrap_or(DISPATCH);
            for mount in application.mount_points() {
                let mount = mount.trim_end_matches('/').to_string();
                let mut params = application.params.clone();
                params.insert("prefix", mount.as_str());
                for path in [mount.clone(), format!("{mount}/**")] {
                    builder.add_role_step(
                        application.role(),
                        &path,
                        REQUEST_ID,
                        StepSelector::Type(REQUEST_ID.to_string()),
                        Params::new(),
                    )?;
                    for (role, provider_params) in &provider_steps {
                        builder.add_role_step(
                            application.role(),
                            &path,
                            role,
                            StepSelector::Type(role.to_string()),
                            (*provider_params).clone(),
                        )?;
                    }
                    builder.add_role_step(
                        application.role(),
                        &path,
                        dispatch,
                        StepSelector::Type(dispatch.to_string()),
                        params.clone(),
                    )?;
                }
            }
        }

        Ok(builder.build())
    }
}

impl TopologyListener for GatewayDeployer {
    fn handle_topology_events(&self, events: &[TopologyEvent]) -> Result<(), ListenerError> {
        let mut engines = HashMap::clone(&self.engines.load());
        let mut failures = Vec::new();

        for event in events {
            let name = &event.topology.name;
            match event.kind {
                TopologyEventKind::Deleted => {
                    if engines.remove(name).is_some() {
                        tracing::info!("Undeployed topology '{}'", name);
                    }
                }
                TopologyEventKind::Created | TopologyEventKind::Updated => {
                    match self.build_engine(&event.topology) {
                        Ok(engine) => {
                            tracing::info!(
                                "Deployed topology '{}' ({})",
                                name,
                                event.kind
                            );
                            engines.insert(name.clone(), Arc::new(engine));
                        }
                        Err(e) => {
                            tracing::error!("Failed to deploy topology '{}': {}", name, e);
                            failures.push(format!("{name}: {e}"));
                        }
                    }
                }
            }
        }

        // Replaced engines tear their steps down once the last in-flight
        // request drops its handle.
        self.engines.store(Arc::new(engines));

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ListenerError::Failed(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use http::{Request, Response, StatusCode};

    use super::*;
    use crate::{
        adapters::steps::builtin_registry,
        core::topology::{Application, Provider, Service},
        ports::http_client::{HttpClient, HttpClientResult},
    };

    struct EchoClient;

    #[async_trait]
    impl HttpClient for EchoClient {
        async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
            Ok(Response::new(Body::from(req.uri().to_string())))
        }
    }

    fn deployer() -> GatewayDeployer {
        GatewayDeployer::new(Arc::new(builtin_registry(Arc::new(EchoClient))))
    }

    fn sandbox() -> Arc<Topology> {
        Arc::new(
            Topology::new("sandbox")
                .with_provider(Provider::new("webappsec", "WebAppSec"))
                .with_service(Service::new("WEBHDFS").with_url("http://nn:50070/webhdfs"))
                .with_service(Service::new("HIVE"))
                .with_application(
                    Application {
                        params: Params::from_iter([("url", "http://ui:8080")]),
                        ..Application::new("admin-ui")
                    },
                ),
        )
    }

    async fn body(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_created_event_deploys_routes() {
        let deployer = deployer();
        deployer
            .handle_topology_events(&[TopologyEvent::new(TopologyEventKind::Created, sandbox())])
            .unwrap();
        assert_eq!(deployer.deployed(), vec!["sandbox"]);

        let engine = deployer.engine("sandbox").unwrap();
        let response = engine
            .dispatch(get("/webhdfs/v1/tmp?op=OPEN"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(body(response).await, "http://nn:50070/webhdfs/v1/tmp?op=OPEN");

        let response = engine.dispatch(get("/admin-ui/index.html")).await.into_response();
        assert_eq!(body(response).await, "http://ui:8080/index.html");
    }

    #[tokio::test]
    async fn test_service_without_url_is_not_mounted() {
        let deployer = deployer();
        deployer
            .handle_topology_events(&[TopologyEvent::new(TopologyEventKind::Created, sandbox())])
            .unwrap();
        let engine = deployer.engine("sandbox").unwrap();
        assert_eq!(engine.dispatch(get("/hive")).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_disabled_provider_adds_no_step() {
        let mut topology = Topology::new("plain")
            .with_service(Service::new("WEBHDFS").with_url("http://nn:50070/webhdfs"));
        let mut deny = Provider::new("deny", "Maintenance");
        deny.enabled = false;
        topology.providers.push(deny);

        let deployer = deployer();
        deployer
            .handle_topology_events(&[TopologyEvent::new(
                TopologyEventKind::Created,
                Arc::new(topology),
            )])
            .unwrap();
        let engine = deployer.engine("plain").unwrap();
        assert_eq!(engine.dispatch(get("/webhdfs")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_deleted_event_undeploys_and_shuts_down() {
        let deployer = deployer();
        let topology = sandbox();
        deployer
            .handle_topology_events(&[TopologyEvent::new(TopologyEventKind::Created, topology.clone())])
            .unwrap();
        let engine = deployer.engine("sandbox").unwrap();

        deployer
            .handle_topology_events(&[TopologyEvent::new(TopologyEventKind::Deleted, topology)])
            .unwrap();
        assert!(deployer.engine("sandbox").is_none());
        assert!(!engine.is_shut_down());
        drop(engine);
        assert!(deployer.deployed().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_every_engine() {
        let deployer = deployer();
        deployer
            .handle_topology_events(&[TopologyEvent::new(TopologyEventKind::Created, sandbox())])
            .unwrap();
        let engine = deployer.engine("sandbox").unwrap();

        deployer.shutdown();
        assert!(engine.is_shut_down());
        assert!(deployer.deployed().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_mount_reports_failure_and_keeps_others() {
        let broken = Topology::new("broken")
            .with_service(Service::new("a**b").with_url("http://backend"));
        let deployer = deployer();
        let result = deployer.handle_topology_events(&[
            TopologyEvent::new(TopologyEventKind::Created, Arc::new(broken)),
            TopologyEvent::new(TopologyEventKind::Created, sandbox()),
        ]);
        assert!(result.is_err());
        assert_eq!(deployer.deployed(), vec!["sandbox"]);
    }
}

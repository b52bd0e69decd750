//! Path dispatch engine.
//!
//! Steps are registered against path patterns; every step registered under
//! the same pattern joins that pattern's [`Chain`] in registration order. A
//! request resolves to exactly one chain through the [`PathMap`] and runs its
//! steps one after another. Each step receives a [`Next`] continuation and
//! decides whether the remainder of the chain runs at all.
//!
//! Step implementations are created lazily: a [`Holder`] resolves its
//! factory when the engine is built but only instantiates the step the first
//! time its chain is dispatched. A failed instantiation is reported for that
//! request and retried on the next one.
//!
//! Engines are immutable once built. Reconfiguration builds a new engine and
//! swaps it in; the old one is torn down when the last reference goes away.
use std::{
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use axum::body::Body;
use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};
use once_cell::sync::OnceCell;
use thiserror::Error;

use super::{
    path_map::{PathMap, PatternError},
    topology::Params,
};

/// Errors produced while running or instantiating a step.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StepError {
    #[error("no step implementation registered for type '{0}'")]
    UnknownType(String),

    #[error("step '{step}' failed to initialize: {reason}")]
    Init { step: String, reason: String },

    #[error("step '{step}' failed: {reason}")]
    Failed { step: String, reason: String },

    #[error("missing required parameter '{0}'")]
    MissingParam(String),

    #[error("step '{0}' belongs to an engine that has shut down")]
    ShutDown(String),
}

/// Errors produced while building an engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// The request being dispatched together with the response built so far.
pub struct Exchange {
    request: Request<Body>,
    response: Option<Response<Body>>,
    pattern: String,
    target_role: Option<String>,
}

impl Exchange {
    pub fn new(request: Request<Body>) -> Self {
        Self {
            request,
            response: None,
            pattern: String::new(),
            target_role: None,
        }
    }

    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Body> {
        &mut self.request
    }

    /// Take the request body, leaving an empty one behind.
    pub fn take_request_body(&mut self) -> Body {
        std::mem::take(self.request.body_mut())
    }

    pub fn respond(&mut self, response: Response<Body>) {
        self.response = Some(response);
    }

    pub fn response(&self) -> Option<&Response<Body>> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response<Body>> {
        self.response.as_mut()
    }

    /// Pattern of the chain that matched this request.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Service role the matched chain fronts, if any.
    pub fn target_role(&self) -> Option<&str> {
        self.target_role.as_deref()
    }

    fn into_response(self) -> Response<Body> {
        self.response.unwrap_or_else(|| Response::new(Body::empty()))
    }
}

/// A processing step in a chain.
#[async_trait]
pub trait Step: Send + Sync + 'static {
    /// Handle the exchange. Call `next.run(exchange)` to continue the chain;
    /// returning without doing so ends it.
    async fn handle(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), StepError>;

    /// Release resources. Called at most once per instance.
    fn destroy(&self) -> Result<(), StepError> {
        Ok(())
    }
}

/// Configuration handed to a step factory.
#[derive(Debug, Clone, Copy)]
pub struct StepConfig<'a> {
    pub path: &'a str,
    pub name: &'a str,
    pub params: &'a Params,
}

impl StepConfig<'_> {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn required_param(&self, name: &str) -> Result<&str, StepError> {
        self.param(name)
            .ok_or_else(|| StepError::MissingParam(name.to_string()))
    }
}

pub type StepFactory =
    Arc<dyn Fn(&StepConfig<'_>) -> Result<Arc<dyn Step>, StepError> + Send + Sync>;

/// Maps step type identifiers to factories.
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: HashMap<String, StepFactory>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&StepConfig<'_>) -> Result<Arc<dyn Step>, StepError> + Send + Sync + 'static,
    {
        self.factories.insert(type_id.into(), Arc::new(factory));
        self
    }

    pub fn get(&self, type_id: &str) -> Option<StepFactory> {
        self.factories.get(type_id).cloned()
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// How a holder obtains its step.
#[derive(Clone)]
pub enum StepSelector {
    /// Looked up in the [`StepRegistry`].
    Type(String),
    /// A pre-built instance.
    Instance(Arc<dyn Step>),
}

impl std::fmt::Debug for StepSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepSelector::Type(t) => f.debug_tuple("Type").field(t).finish(),
            StepSelector::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

/// One registered routing entry.
pub struct Holder {
    path: String,
    name: String,
    role: Option<String>,
    selector: StepSelector,
    params: Params,
    factory: Option<StepFactory>,
    instance: OnceCell<Arc<dyn Step>>,
    // set when the engine starts shutting down
    destroyed: AtomicBool,
    // set by whoever calls `destroy` on this holder's instance
    torn_down: AtomicBool,
}

impl Holder {
    fn new(
        path: &str,
        name: &str,
        role: Option<&str>,
        selector: StepSelector,
        params: Params,
        registry: &StepRegistry,
    ) -> Self {
        let instance = OnceCell::new();
        let factory = match &selector {
            StepSelector::Type(type_id) => {
                let factory = registry.get(type_id);
                if factory.is_none() {
                    tracing::warn!(
                        "No factory for step type '{}' ({} at {})",
                        type_id,
                        name,
                        path
                    );
                }
                factory
            }
            StepSelector::Instance(step) => {
                let _ = instance.set(step.clone());
                None
            }
        };
        Self {
            path: path.to_string(),
            name: name.to_string(),
            role: role.map(str::to_string),
            selector,
            params,
            factory,
            instance,
            destroyed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Whether the step has been instantiated yet.
    pub fn is_initialized(&self) -> bool {
        self.instance.get().is_some()
    }

    fn step(&self) -> Result<&Arc<dyn Step>, StepError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(StepError::ShutDown(self.name.clone()));
        }
        let mut created = false;
        let step = self.instance.get_or_try_init(|| {
            let factory = self.factory.as_ref().ok_or_else(|| match &self.selector {
                StepSelector::Type(type_id) => StepError::UnknownType(type_id.clone()),
                StepSelector::Instance(_) => StepError::Init {
                    step: self.name.clone(),
                    reason: "instance missing".to_string(),
                },
            })?;
            let config = StepConfig {
                path: &self.path,
                name: &self.name,
                params: &self.params,
            };
            tracing::debug!("Initializing step '{}' for {}", self.name, self.path);
            created = true;
            factory(&config).map_err(|e| match e {
                StepError::Init { .. } | StepError::UnknownType(_) => e,
                other => StepError::Init {
                    step: self.name.clone(),
                    reason: other.to_string(),
                },
            })
        })?;

        // instantiated while the engine was shutting down: shutdown may have
        // missed it, so whichever side gets here first tears it down
        if created && self.destroyed.load(Ordering::SeqCst) {
            self.tear_down(step);
            return Err(StepError::ShutDown(self.name.clone()));
        }
        Ok(step)
    }

    /// Destroy `step` unless this holder's instance was already torn down.
    fn tear_down(&self, step: &Arc<dyn Step>) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        match std::panic::catch_unwind(AssertUnwindSafe(|| step.destroy())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                "Failed to destroy step '{}' at {}: {}",
                self.name,
                self.path,
                e
            ),
            Err(_) => tracing::warn!(
                "Step '{}' at {} panicked during destroy",
                self.name,
                self.path
            ),
        }
    }
}

impl std::fmt::Debug for Holder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Holder")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// The ordered holders registered under one pattern.
#[derive(Debug)]
pub struct Chain {
    pattern: String,
    holders: Vec<Arc<Holder>>,
}

impl Chain {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn holders(&self) -> &[Arc<Holder>] {
        &self.holders
    }

    /// Resource role of the chain: the role of its first holder.
    pub fn role(&self) -> Option<&str> {
        self.holders.first().and_then(|h| h.role())
    }

    pub async fn run(&self, exchange: &mut Exchange) -> Result<(), StepError> {
        Next {
            chain: self,
            index: 0,
        }
        .run(exchange)
        .await
    }
}

/// Continuation into the rest of a chain.
pub struct Next<'a> {
    chain: &'a Chain,
    index: usize,
}

impl<'a> Next<'a> {
    /// Run the remaining steps. Completes immediately at the end of the chain.
    pub fn run<'e>(self, exchange: &'e mut Exchange) -> BoxFuture<'e, Result<(), StepError>>
    where
        'a: 'e,
    {
        async move {
            let Some(holder) = self.chain.holders.get(self.index) else {
                return Ok(());
            };
            let step = holder.step()?;
            let next = Next {
                chain: self.chain,
                index: self.index + 1,
            };
            step.handle(exchange, next).await
        }
        .boxed()
    }

    /// Number of steps still to run after the current one.
    pub fn remaining(&self) -> usize {
        self.chain.holders.len().saturating_sub(self.index)
    }
}

/// Result of dispatching one request.
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed(Response<Body>),
    NotFound,
    Failed(StepError),
}

impl DispatchOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchOutcome::Completed(response) => response.status(),
            DispatchOutcome::NotFound => StatusCode::NOT_FOUND,
            DispatchOutcome::Failed(StepError::ShutDown(_)) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchOutcome::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response<Body> {
        match self {
            DispatchOutcome::Completed(response) => response,
            other => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = other.status();
                response
            }
        }
    }
}

/// Collects step registrations and builds a [`DispatchEngine`].
pub struct DispatchEngineBuilder {
    name: String,
    registry: Arc<StepRegistry>,
    chains: PathMap<Vec<Arc<Holder>>>,
    holders: Vec<Arc<Holder>>,
    default_service_path: Option<String>,
}

impl DispatchEngineBuilder {
    pub fn new(name: impl Into<String>, registry: Arc<StepRegistry>) -> Self {
        Self {
            name: name.into(),
            registry,
            chains: PathMap::new(),
            holders: Vec::new(),
            default_service_path: None,
        }
    }

    /// Path prefix tried when a request matches no chain.
    pub fn default_service_path(mut self, path: Option<String>) -> Self {
        self.default_service_path = path
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        self
    }

    /// Append a step to the chain for `path`, creating the chain on first use.
    pub fn add_step(
        &mut self,
        path: &str,
        name: &str,
        selector: StepSelector,
        params: Params,
    ) -> Result<&mut Self, DispatchError> {
        self.register(path, name, None, selector, params)
    }

    /// Like [`DispatchEngineBuilder::add_step`], tagging the step with the
    /// service role it fronts.
    pub fn add_role_step(
        &mut self,
        role: &str,
        path: &str,
        name: &str,
        selector: StepSelector,
        params: Params,
    ) -> Result<&mut Self, DispatchError> {
        self.register(path, name, Some(role), selector, params)
    }

    fn register(
        &mut self,
        path: &str,
        name: &str,
        role: Option<&str>,
        selector: StepSelector,
        params: Params,
    ) -> Result<&mut Self, DispatchError> {
        let holder = Arc::new(Holder::new(
            path,
            name,
            role,
            selector,
            params,
            &self.registry,
        ));
        match self.chains.get_mut(path) {
            Some(chain) => chain.push(holder.clone()),
            None => {
                self.chains.put(path, vec![holder.clone()])?;
            }
        }
        self.holders.push(holder);
        Ok(self)
    }

    pub fn build(self) -> DispatchEngine {
        let mut chains = PathMap::new();
        for (pattern, holders) in self.chains.iter() {
            let chain = Chain {
                pattern: pattern.to_string(),
                holders: holders.clone(),
            };
            // patterns already parsed once on registration
            if let Err(e) = chains.put(pattern, chain) {
                tracing::error!("Dropping chain {}: {}", pattern, e);
            }
        }
        tracing::debug!(
            "Built dispatch engine '{}' with {} chains",
            self.name,
            chains.len()
        );
        DispatchEngine {
            name: self.name,
            chains,
            holders: self.holders,
            default_service_path: self.default_service_path,
            shut_down: AtomicBool::new(false),
        }
    }
}

/// Immutable routing table of chains.
pub struct DispatchEngine {
    name: String,
    chains: PathMap<Chain>,
    holders: Vec<Arc<Holder>>,
    default_service_path: Option<String>,
    shut_down: AtomicBool,
}

impl DispatchEngine {
    pub fn builder(name: impl Into<String>, registry: Arc<StepRegistry>) -> DispatchEngineBuilder {
        DispatchEngineBuilder::new(name, registry)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.chains.iter().map(|(_, chain)| chain)
    }

    /// Chain for a request path, falling back to the default service path.
    pub fn resolve(&self, path: &str) -> Option<&Chain> {
        self.chains.pick(path).or_else(|| {
            let prefix = self.default_service_path.as_deref()?;
            let fallback = format!("/{}/{}", prefix, path.trim_start_matches('/'));
            self.chains.pick(&fallback)
        })
    }

    pub async fn dispatch(&self, request: Request<Body>) -> DispatchOutcome {
        let path = request.uri().path().to_string();
        let Some(chain) = self.resolve(&path) else {
            tracing::debug!("No chain in '{}' for {}", self.name, path);
            return DispatchOutcome::NotFound;
        };

        let mut exchange = Exchange::new(request);
        exchange.pattern = chain.pattern.clone();
        exchange.target_role = chain.role().map(str::to_string);

        match chain.run(&mut exchange).await {
            Ok(()) => DispatchOutcome::Completed(exchange.into_response()),
            Err(e) => {
                tracing::warn!(
                    "Dispatch of {} via {} in '{}' failed: {}",
                    path,
                    chain.pattern,
                    self.name,
                    e
                );
                DispatchOutcome::Failed(e)
            }
        }
    }

    /// Tear down every instantiated step exactly once. Idempotent; a failing
    /// step does not stop the others from being torn down.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        for holder in &self.holders {
            holder.destroyed.store(true, Ordering::SeqCst);
        }

        let mut seen = HashSet::new();
        for holder in &self.holders {
            // a step still being instantiated is torn down by its `step` call
            let Some(step) = holder.instance.get() else {
                continue;
            };
            // shared instances are destroyed once
            if !seen.insert(Arc::as_ptr(step) as *const () as usize) {
                holder.torn_down.store(true, Ordering::SeqCst);
                continue;
            }
            holder.tear_down(step);
        }
        tracing::debug!("Dispatch engine '{}' shut down", self.name);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for DispatchEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("name", &self.name)
            .field("chains", &self.chains)
            .finish_non_exhaustive()
    }
}

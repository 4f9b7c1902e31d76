//! The dispatcher: one per process, owning its counter and transports.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::bridge::{Bridge, NativeFetch};
use crate::config::{BridgeConfig, ConfigError, Reload, RequestOptions, RouteMode};
use crate::error::FetchResult;
use crate::http::{FetchInit, Request, RequestInput, Response};
use crate::lifecycle::LifecycleController;
use crate::observability::metrics;
use crate::routing::{is_reserved, should_route, RoutingConfig, RoutingUpdate};

/// Fetch-compatible entry point that forwards matching requests over a bridge.
pub struct Dispatcher<B, N> {
    bridge: Arc<B>,
    native: N,
    routing: ArcSwap<RoutingConfig>,
    /// [`RouteMode`] as u8.
    mode: AtomicU8,
    next_request_id: AtomicU64,
    /// Reorder cap per request; 0 = unbounded.
    max_pending: AtomicUsize,
}

impl<B: Bridge, N: NativeFetch> Dispatcher<B, N> {
    /// Create a dispatcher with default routing: every http(s) URL is forwarded.
    pub fn new(bridge: Arc<B>, native: N) -> Self {
        Self {
            bridge,
            native,
            routing: ArcSwap::from_pointee(RoutingConfig::default()),
            mode: AtomicU8::new(RouteMode::Auto as u8),
            next_request_id: AtomicU64::new(1),
            max_pending: AtomicUsize::new(crate::config::ReassemblyConfig::default().max_pending_chunks),
        }
    }

    /// Create a dispatcher configured from a config file.
    pub fn with_config(bridge: Arc<B>, native: N, config: &BridgeConfig) -> Result<Self, ConfigError> {
        let dispatcher = Self::new(bridge, native);
        dispatcher.apply_config(config)?;
        Ok(dispatcher)
    }

    /// Fetch `input`, through the bridge when routing says so.
    pub async fn fetch(&self, input: impl Into<RequestInput>, init: FetchInit) -> FetchResult<Response> {
        self.dispatch(input.into(), init, false).await
    }

    /// Fetch `input` through the bridge regardless of routing rules.
    pub async fn fetch_forced(
        &self,
        input: impl Into<RequestInput>,
        init: FetchInit,
    ) -> FetchResult<Response> {
        self.dispatch(input.into(), init, true).await
    }

    async fn dispatch(&self, input: RequestInput, mut init: FetchInit, force: bool) -> FetchResult<Response> {
        let routing = self.routing.load_full();
        let routed = force || self.routes(input.url(), &routing);

        let options = init.take_options();
        let request = Request::new(input, init)?;

        if !routed {
            tracing::trace!(url = %request.url(), "Bypassing bridge");
            metrics::record_dispatch("native");
            return self.native.fetch(request).await;
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let options = routing.defaults.overlay(&options);
        tracing::debug!(
            request_id,
            method = %request.method(),
            url = %request.url(),
            forced = force,
            "Forwarding request"
        );
        metrics::record_dispatch("bridge");

        LifecycleController::new(self.bridge.clone(), self.max_pending())
            .forward(request_id, request, options)
            .await
    }

    /// Routing decision for `url` under the current mode and snapshot.
    pub fn should_route(&self, url: &str) -> bool {
        self.routes(url, &self.routing.load())
    }

    fn routes(&self, url: &str, routing: &RoutingConfig) -> bool {
        match self.mode() {
            RouteMode::Auto => should_route(url, routing),
            RouteMode::Always => !is_reserved(url),
            RouteMode::Never => false,
        }
    }

    /// Apply a partial update on top of the live snapshot.
    ///
    /// In-flight requests keep the snapshot they started with.
    pub fn reconfigure(&self, update: &RoutingUpdate) -> Result<Arc<RoutingConfig>, ConfigError> {
        loop {
            let current = self.routing.load_full();
            let next = Arc::new(current.merged(update)?);
            let previous = self.routing.compare_and_swap(&current, next.clone());
            if Arc::ptr_eq(&previous, &current) {
                tracing::info!(
                    include = next.include.len(),
                    exclude = next.exclude.len(),
                    "Routing reconfigured"
                );
                return Ok(next);
            }
        }
    }

    /// Replace the live snapshot.
    pub fn replace_routing(&self, routing: RoutingConfig) {
        self.routing.store(Arc::new(routing));
    }

    /// The live snapshot.
    pub fn routing(&self) -> Arc<RoutingConfig> {
        self.routing.load_full()
    }

    /// Transport defaults of the live snapshot.
    pub fn defaults(&self) -> RequestOptions {
        self.routing.load().defaults.clone()
    }

    pub fn mode(&self) -> RouteMode {
        RouteMode::from(self.mode.load(Ordering::Relaxed))
    }

    pub fn set_mode(&self, mode: RouteMode) {
        tracing::info!(mode = ?mode, "Route mode changed");
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    /// `true` forces every request through the bridge, `false` routes none.
    pub fn enable(&self, force_all: bool) {
        self.set_mode(if force_all { RouteMode::Always } else { RouteMode::Never });
    }

    /// Compile and install routing, mode and reorder cap from a config file.
    pub fn apply_config(&self, config: &BridgeConfig) -> Result<(), ConfigError> {
        let routing = RoutingConfig::compile(&config.routing)?;
        self.apply_compiled(config, routing);
        Ok(())
    }

    /// Apply a reload whose routing the watcher already compiled.
    pub fn apply_reload(&self, reload: Reload) {
        self.apply_compiled(&reload.config, reload.routing);
    }

    fn apply_compiled(&self, config: &BridgeConfig, routing: RoutingConfig) {
        self.replace_routing(routing);
        self.mode.store(config.routing.mode as u8, Ordering::Relaxed);
        self.max_pending
            .store(config.reassembly.max_pending_chunks, Ordering::Relaxed);
        tracing::info!(mode = ?config.routing.mode, "Configuration applied");
    }

    fn max_pending(&self) -> Option<usize> {
        match self.max_pending.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn bridge(&self) -> &Arc<B> {
        &self.bridge
    }
}

//! # Hot-Reload Controller
//!
//! Owns the live listener and moves it through
//! `Initializing → Serving → Draining → Reinitializing → Serving`, ending in `Stopped`
//! on process shutdown.
//!
//! Two event sources drive it while serving:
//!
//! - schema registry notifications, applied to the route table in place (no restart)
//! - restart triggers from the spec file watcher, each causing a full listener restart
//!
//! A restart holds the restart mutex across the whole drain and reinitialization, so
//! concurrent triggers are serialized. Draining asks the server to stop within the
//! shutdown budget, then probes the port until it is free or the release budget runs
//! out. When the port never frees the restart fails closed: the old serving task is
//! aborted, the controller moves to `Failed` and the error is returned. The next trigger
//! initializes a fresh generation from `Failed`.
//!
//! Caches, the registry and the restart counters outlive every generation.

use super::listener::{self, ListenerHandle};
use super::server::{build_app, AppState, GatewayServices};
use crate::core::error::{GatewayError, GatewayResult};
use crate::discovery::openapi::load_spec_file;
use crate::discovery::schema_registry::SchemaNotifications;
use crate::observability::metrics::{record_restart, record_route_registrations, RestartTrigger};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    Initializing,
    Serving,
    Draining,
    Reinitializing,
    /// A restart failed; nothing is listening until the next trigger
    Failed,
    Stopped,
}

/// Restart counters, incremented when a restart is triggered
#[derive(Debug, Default)]
pub struct RestartCounters {
    total: AtomicU64,
    spec_file: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestartCountersSnapshot {
    pub total: u64,
    pub spec_file: u64,
}

impl RestartCounters {
    pub fn record(&self, trigger: RestartTrigger) {
        self.total.fetch_add(1, Ordering::SeqCst);
        if trigger == RestartTrigger::SpecFile {
            self.spec_file.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn spec_file(&self) -> u64 {
        self.spec_file.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> RestartCountersSnapshot {
        RestartCountersSnapshot {
            total: self.total(),
            spec_file: self.spec_file(),
        }
    }
}

/// Observable controller status shared with the HTTP handlers
#[derive(Debug)]
pub struct ControllerStatus {
    state: RwLock<ControllerState>,
    generation: AtomicU64,
    local_addr: RwLock<Option<SocketAddr>>,
    counters: RestartCounters,
}

impl Default for ControllerStatus {
    fn default() -> Self {
        Self {
            state: RwLock::new(ControllerState::Initializing),
            generation: AtomicU64::new(0),
            local_addr: RwLock::new(None),
            counters: RestartCounters::default(),
        }
    }
}

impl ControllerStatus {
    pub fn state(&self) -> ControllerState {
        *self.state.read()
    }

    fn set_state(&self, state: ControllerState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(from = ?*current, to = ?state, "Controller state changed");
            *current = state;
        }
    }

    /// Number of listener generations started so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    pub fn counters(&self) -> &RestartCounters {
        &self.counters
    }
}

/// Checks whether something still accepts connections on an address
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_in_use(&self, addr: SocketAddr, timeout: Duration) -> bool;
}

/// Dials the address; any dial failure counts as free
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPortProbe;

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_in_use(&self, addr: SocketAddr, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

/// Wildcard bind addresses are probed on loopback
fn probe_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    }
}

pub struct HotReloadController {
    services: Arc<GatewayServices>,
    status: Arc<ControllerStatus>,
    probe: Arc<dyn PortProbe>,
    /// Restart mutex; holds the current generation's listener
    listener: Mutex<Option<ListenerHandle>>,
}

impl HotReloadController {
    pub fn new(services: Arc<GatewayServices>) -> Self {
        Self {
            services,
            status: Arc::new(ControllerStatus::default()),
            probe: Arc::new(TcpPortProbe),
            listener: Mutex::new(None),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn services(&self) -> &Arc<GatewayServices> {
        &self.services
    }

    pub fn status(&self) -> Arc<ControllerStatus> {
        self.status.clone()
    }

    pub fn state(&self) -> ControllerState {
        self.status.state()
    }

    pub fn generation(&self) -> u64 {
        self.status.generation()
    }

    pub fn counters(&self) -> &RestartCounters {
        self.status.counters()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.status.local_addr()
    }

    /// Build the route set and start the first listener generation
    pub async fn start(&self) -> GatewayResult<SocketAddr> {
        let mut slot = self.listener.lock().await;
        if slot.is_some() {
            return Err(GatewayError::internal("controller already started"));
        }

        self.status.set_state(ControllerState::Initializing);
        self.initialize(&mut slot).await.map_err(|e| {
            self.status.set_state(ControllerState::Failed);
            error!(error = %e, "Gateway initialization failed");
            e
        })
    }

    /// Tear down the current listener and start a new generation
    pub async fn restart(&self, trigger: RestartTrigger) -> GatewayResult<SocketAddr> {
        self.status.counters.record(trigger);
        record_restart(trigger);
        info!(trigger = trigger.as_str(), "Listener restart triggered");

        let mut slot = self.listener.lock().await;
        if self.status.state() == ControllerState::Stopped {
            return Err(GatewayError::internal("controller is stopped"));
        }

        if let Some(handle) = slot.take() {
            self.status.set_state(ControllerState::Draining);
            *self.status.local_addr.write() = None;

            if let Err(e) = self.drain(handle).await {
                self.status.set_state(ControllerState::Failed);
                error!(error = %e, "Listener restart abandoned, gateway is not serving");
                return Err(e);
            }
        }

        self.status.set_state(ControllerState::Reinitializing);
        self.initialize(&mut slot).await.map_err(|e| {
            self.status.set_state(ControllerState::Failed);
            error!(error = %e, "Listener reinitialization failed");
            e
        })
    }

    /// Stop serving for good
    pub async fn stop(&self) {
        let mut slot = self.listener.lock().await;
        if let Some(mut handle) = slot.take() {
            self.status.set_state(ControllerState::Draining);
            handle.shutdown();
            let budget = self.services.config.restart.shutdown_timeout;
            if tokio::time::timeout(budget, handle.task()).await.is_err() {
                warn!(budget = ?budget, "Listener did not stop in time, aborting");
                handle.abort();
            }
        }

        *self.status.local_addr.write() = None;
        self.status.set_state(ControllerState::Stopped);
        info!("Gateway controller stopped");
    }

    /// Bring the route table in line with the registry for one resource type.
    ///
    /// Returns the number of routes now registered for it.
    pub fn apply_schema_change(&self, resource_type: &str) -> usize {
        match self.services.registry.descriptors(resource_type) {
            Some(descriptors) => {
                let count = self.services.routes.replace_owner(resource_type, &descriptors);
                record_route_registrations(count);
                info!(resource_type, routes = count, "Resource routes registered");
                count
            }
            None => {
                let removed = self.services.routes.remove_owner(resource_type);
                info!(resource_type, removed, "Resource routes removed");
                0
            }
        }
    }

    /// Process schema notifications and restart triggers until `shutdown` fires, then stop.
    ///
    /// Shutdown also interrupts a restart in progress, including its drain budgets.
    pub async fn run(
        self: Arc<Self>,
        mut notifications: SchemaNotifications,
        mut triggers: mpsc::Receiver<RestartTrigger>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(resource_type) = notifications.recv() => {
                    self.apply_schema_change(&resource_type);
                }
                Some(trigger) = triggers.recv() => {
                    // Dropping an interrupted restart drops its listener handle, which aborts it
                    tokio::select! {
                        result = self.restart(trigger) => {
                            if let Err(e) = result {
                                error!(error = %e, "Restart failed");
                            }
                        }
                        _ = shutdown.cancelled() => {
                            warn!(trigger = trigger.as_str(), "Shutdown requested during restart");
                            break;
                        }
                    }
                }
            }
        }

        self.stop().await;
    }

    async fn initialize(&self, slot: &mut Option<ListenerHandle>) -> GatewayResult<SocketAddr> {
        self.load_declared_spec().await;

        let snapshot = self.services.registry.snapshot();
        let count = self.services.routes.rebuild(&snapshot);
        record_route_registrations(count);

        let app = build_app(AppState::new(self.services.clone(), self.status.clone()));
        let handle = listener::bind(&self.services.config.server, app).await?;
        let addr = handle.local_addr();
        *slot = Some(handle);

        let generation = self.status.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.status.local_addr.write() = Some(addr);
        self.status.set_state(ControllerState::Serving);

        info!(generation, routes = count, address = %addr, "Listener generation serving");
        Ok(addr)
    }

    /// Reload the declarative spec into the registry; a missing file declares nothing
    async fn load_declared_spec(&self) {
        let Some(path) = self.services.config.routing.openapi_spec.as_ref() else {
            return;
        };

        match tokio::fs::try_exists(path).await {
            Ok(true) => match load_spec_file(path).await {
                Ok(types) => self.services.registry.load_declared(types),
                Err(e) => warn!(path = %path.display(), error = %e, "Keeping previous declared schemas"),
            },
            Ok(false) => {
                debug!(path = %path.display(), "Declarative spec file absent");
                self.services.registry.load_declared(BTreeMap::new());
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot stat declarative spec file"),
        }
    }

    async fn drain(&self, mut handle: ListenerHandle) -> GatewayResult<()> {
        let budgets = &self.services.config.restart;
        let addr = probe_addr(handle.local_addr());

        handle.shutdown();
        match tokio::time::timeout(budgets.shutdown_timeout, handle.task()).await {
            Ok(Ok(Ok(()))) => debug!("Listener drained"),
            Ok(Ok(Err(e))) => warn!(error = %e, "Listener ended with an error"),
            Ok(Err(e)) => warn!(error = %e, "Listener task failed"),
            Err(_) => {
                warn!(budget = ?budgets.shutdown_timeout, "Listener did not stop in time, aborting");
                handle.abort();
            }
        }

        let started = Instant::now();
        loop {
            if !self.probe.is_in_use(addr, budgets.probe_timeout).await {
                debug!(address = %addr, waited = ?started.elapsed(), "Port released");
                return Ok(());
            }
            if started.elapsed() >= budgets.port_release_timeout {
                handle.abort();
                return Err(GatewayError::restart_timeout(
                    "port release",
                    budgets.port_release_timeout,
                ));
            }
            tokio::time::sleep(budgets.probe_interval).await;
        }
    }
}

//! # Gateway Module
//!
//! Wires the components into a running gateway:
//!
//! - [`controller`]: hot-reload state machine owning the listener
//! - [`listener`]: plaintext/TLS serving with graceful shutdown
//! - [`server`]: the axum application and the shared [`GatewayServices`]
//! - [`watcher`]: restart triggers from the declarative spec file
//!
//! [`Gateway`] owns the channels feeding the background tasks; [`Gateway::start`] spawns
//! them and returns a [`RunningGateway`].

pub mod controller;
pub mod listener;
pub mod server;
pub mod watcher;

pub use controller::{ControllerState, ControllerStatus, HotReloadController, PortProbe, TcpPortProbe};
pub use server::{build_app, AppState, GatewayServices};
pub use watcher::SpecFileWatcher;

use crate::caching::tenants::{StaticTenantSource, TenantReconciler};
use crate::core::config::GatewayConfig;
use crate::core::error::GatewayResult;
use crate::discovery::schema_registry::{schema_feed, SchemaEvent, SchemaNotifications};
use crate::observability::metrics::RestartTrigger;
use crate::routing::remapper::{mapping_channel, MappingEvent, MappingReceiver, MappingSender};
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A configured gateway that has not started serving yet
pub struct Gateway {
    controller: Arc<HotReloadController>,
    notifications: SchemaNotifications,
    mapping_tx: MappingSender,
    mapping_rx: MappingReceiver,
    schema_tx: mpsc::Sender<SchemaEvent>,
    schema_rx: mpsc::Receiver<SchemaEvent>,
    restart_tx: mpsc::Sender<RestartTrigger>,
    restart_rx: mpsc::Receiver<RestartTrigger>,
}

impl Gateway {
    pub async fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        let (services, notifications) = GatewayServices::from_config(config).await?;
        Ok(Self::from_controller(HotReloadController::new(Arc::new(services)), notifications))
    }

    /// Use a pre-built controller, e.g. one with a custom [`PortProbe`]
    pub fn from_controller(controller: HotReloadController, notifications: SchemaNotifications) -> Self {
        let capacity = controller.services().config.routing.notification_capacity;
        let (mapping_tx, mapping_rx) = mapping_channel(capacity);
        let (schema_tx, schema_rx) = schema_feed(capacity);
        let (restart_tx, restart_rx) = mpsc::channel(capacity);

        Self {
            controller: Arc::new(controller),
            notifications,
            mapping_tx,
            mapping_rx,
            schema_tx,
            schema_rx,
            restart_tx,
            restart_rx,
        }
    }

    pub fn controller(&self) -> Arc<HotReloadController> {
        self.controller.clone()
    }

    /// Spawn the background tasks, start the first listener generation and feed the
    /// configured mappings
    pub async fn start(self, shutdown: CancellationToken) -> GatewayResult<RunningGateway> {
        let services = self.controller.services().clone();
        let config = &services.config;
        let mut tasks = Vec::new();

        tasks.push(services.remapper.clone().watch(self.mapping_rx, shutdown.clone()));
        tasks.push(services.registry.clone().watch_feed(self.schema_rx, shutdown.clone()));

        let source = Arc::new(StaticTenantSource::new(
            config.tenants.organizations.clone(),
            config.tenants.projects.clone(),
        ));
        tasks.push(
            TenantReconciler::new(services.tenants.clone(), source, config.tenants.reconcile_interval)
                .spawn(shutdown.clone()),
        );

        for mapping in &config.mappings {
            let event = MappingEvent::Upsert {
                key: mapping.name.clone(),
                entry: mapping.entry.clone(),
            };
            if self.mapping_tx.send(event).await.is_err() {
                warn!(mapping = %mapping.name, "Mapping feed closed before startup completed");
            }
        }

        let addr = self.controller.start().await?;

        let watcher = match config.routing.openapi_spec.as_deref() {
            Some(path) => Some(SpecFileWatcher::spawn(
                path,
                config.restart.spec_debounce,
                self.restart_tx.clone(),
                shutdown.clone(),
            )?),
            None => None,
        };

        tasks.push(tokio::spawn(self.controller.clone().run(
            self.notifications,
            self.restart_rx,
            shutdown.clone(),
        )));

        info!(address = %addr, "Gateway started");

        Ok(RunningGateway {
            controller: self.controller,
            mapping_tx: self.mapping_tx,
            schema_tx: self.schema_tx,
            restart_tx: self.restart_tx,
            watcher,
            tasks,
        })
    }
}

pub struct RunningGateway {
    controller: Arc<HotReloadController>,
    mapping_tx: MappingSender,
    schema_tx: mpsc::Sender<SchemaEvent>,
    restart_tx: mpsc::Sender<RestartTrigger>,
    watcher: Option<SpecFileWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningGateway {
    pub fn controller(&self) -> &Arc<HotReloadController> {
        &self.controller
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.controller.local_addr()
    }

    /// Tenant mapping configuration feed
    pub fn mapping_sender(&self) -> MappingSender {
        self.mapping_tx.clone()
    }

    /// Schema discovery feed
    pub fn schema_sender(&self) -> mpsc::Sender<SchemaEvent> {
        self.schema_tx.clone()
    }

    /// Restart triggers, as sent by the spec file watcher
    pub fn restart_sender(&self) -> mpsc::Sender<RestartTrigger> {
        self.restart_tx.clone()
    }

    /// Wait for every background task to finish after shutdown was signalled
    pub async fn wait(self) {
        drop(self.watcher);
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Gateway stopped");
    }
}

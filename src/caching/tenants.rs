//! # Tenant Caches
//!
//! Organization and project records consulted by authorization, kept in two
//! [`ConcurrentCache`]s and refreshed by a periodic reconciler.

use super::concurrent::ConcurrentCache;
use crate::core::error::GatewayResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub organization: String,
    #[serde(default)]
    pub uid: String,
    /// Set while the project is being torn down
    #[serde(default)]
    pub deleting: bool,
}

/// Both tenant caches, shared by reference between the reconciler and authorization
#[derive(Debug, Default)]
pub struct TenantCaches {
    pub organizations: ConcurrentCache<String, Organization>,
    pub projects: ConcurrentCache<String, Project>,
}

impl TenantCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn organization(&self, name: &str) -> Option<Organization> {
        self.organizations.get(&name.to_string())
    }

    pub fn project(&self, name: &str) -> Option<Project> {
        self.projects.get(&name.to_string())
    }

    /// Replace both caches with `orgs`/`projects`, deleting records that vanished.
    ///
    /// Returns `(upserted, removed)` counts.
    pub fn sync(&self, orgs: Vec<Organization>, projects: Vec<Project>) -> (usize, usize) {
        let mut removed = 0;

        let org_names: HashSet<String> = orgs.iter().map(|o| o.name.clone()).collect();
        for stale in self.organizations.keys() {
            if !org_names.contains(&stale) && self.organizations.delete(&stale) {
                removed += 1;
            }
        }

        let project_names: HashSet<String> = projects.iter().map(|p| p.name.clone()).collect();
        for stale in self.projects.keys() {
            if !project_names.contains(&stale) && self.projects.delete(&stale) {
                removed += 1;
            }
        }

        let upserted = orgs.len() + projects.len();
        for org in orgs {
            self.organizations.set(org.name.clone(), org);
        }
        for project in projects {
            self.projects.set(project.name.clone(), project);
        }

        (upserted, removed)
    }
}

/// Source of truth the reconciler pulls tenant records from
#[async_trait]
pub trait TenantSource: Send + Sync {
    async fn organizations(&self) -> GatewayResult<Vec<Organization>>;
    async fn projects(&self) -> GatewayResult<Vec<Project>>;
}

/// Tenant records declared in the configuration file
#[derive(Debug, Clone, Default)]
pub struct StaticTenantSource {
    organizations: Vec<Organization>,
    projects: Vec<Project>,
}

impl StaticTenantSource {
    pub fn new(organizations: Vec<Organization>, projects: Vec<Project>) -> Self {
        Self {
            organizations,
            projects,
        }
    }
}

#[async_trait]
impl TenantSource for StaticTenantSource {
    async fn organizations(&self) -> GatewayResult<Vec<Organization>> {
        Ok(self.organizations.clone())
    }

    async fn projects(&self) -> GatewayResult<Vec<Project>> {
        Ok(self.projects.clone())
    }
}

/// Periodically reconciles [`TenantCaches`] against a [`TenantSource`]
pub struct TenantReconciler {
    caches: Arc<TenantCaches>,
    source: Arc<dyn TenantSource>,
    interval: Duration,
}

impl TenantReconciler {
    pub fn new(caches: Arc<TenantCaches>, source: Arc<dyn TenantSource>, interval: Duration) -> Self {
        Self {
            caches,
            source,
            interval,
        }
    }

    /// Run a single reconciliation pass
    pub async fn reconcile_once(&self) -> GatewayResult<()> {
        let orgs = self.source.organizations().await?;
        let projects = self.source.projects().await?;
        let (upserted, removed) = self.caches.sync(orgs, projects);
        debug!(upserted, removed, "Tenant caches reconciled");
        Ok(())
    }

    /// Spawn the reconcile loop. It exits within one interval of `shutdown` firing.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            info!(interval = ?self.interval, "Tenant cache reconciler started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.reconcile_once().await {
                            warn!(error = %e, "Tenant cache reconciliation failed");
                        }
                    }
                }
            }

            info!("Tenant cache reconciler stopped");
        })
    }
}

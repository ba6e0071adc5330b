//! # Resource Schema Registry
//!
//! Holds the REST surface of every discovered resource type as a list of
//! [`RouteDescriptor`]s. Publishers push full snapshots per resource type: an upsert
//! replaces everything previously known for that type, a delete drops it. Each publish
//! emits the resource type on a bounded notification channel; when the channel is full
//! the publisher waits, so no notification is ever dropped.
//!
//! Updates for one resource type are serialized by the map's per-key locking, updates
//! for different types proceed in parallel. Notifications carry only the type name, the
//! consumer reads the current descriptors back, so it always converges on the latest
//! snapshot.

use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::pattern::UriTemplate;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Operations a registered route can serve.
///
/// `List` is a `GET` on a collection template, `Get` a `GET` on a single-item template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Put,
    Patch,
    Delete,
    List,
}

impl Method {
    /// Map an HTTP method onto the route method for a template of the given shape
    pub fn from_http(method: &axum::http::Method, collection: bool) -> Option<Self> {
        match *method {
            axum::http::Method::GET if collection => Some(Method::List),
            axum::http::Method::GET => Some(Method::Get),
            axum::http::Method::PUT => Some(Method::Put),
            axum::http::Method::PATCH => Some(Method::Patch),
            axum::http::Method::DELETE => Some(Method::Delete),
            _ => None,
        }
    }

    /// Map an OpenAPI operation verb onto the route method
    pub fn from_verb(verb: &str, template: &UriTemplate) -> Option<Self> {
        match verb.to_ascii_lowercase().as_str() {
            "get" => Some(if template.is_collection() {
                Method::List
            } else {
                Method::Get
            }),
            "put" => Some(Method::Put),
            "patch" => Some(Method::Patch),
            "delete" => Some(Method::Delete),
            _ => None,
        }
    }

    pub fn as_http(&self) -> axum::http::Method {
        match self {
            Method::Get | Method::List => axum::http::Method::GET,
            Method::Put => axum::http::Method::PUT,
            Method::Patch => axum::http::Method::PATCH,
            Method::Delete => axum::http::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::List => "LIST",
        };
        f.write_str(name)
    }
}

/// REST surface of one URI template of a resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub uri_template: String,
    pub resource_kind: String,
    pub resource_group: String,
    /// Declared response codes and their descriptions, per method
    pub method_responses: BTreeMap<Method, BTreeMap<u16, String>>,
}

impl RouteDescriptor {
    pub fn new(uri_template: &str, resource_kind: &str, resource_group: &str) -> Self {
        Self {
            uri_template: uri_template.to_string(),
            resource_kind: resource_kind.to_string(),
            resource_group: resource_group.to_string(),
            method_responses: BTreeMap::new(),
        }
    }

    /// Builder-style helper declaring `method` with a single response code
    pub fn with_method(mut self, method: Method, status: u16, description: &str) -> Self {
        self.method_responses
            .entry(method)
            .or_default()
            .insert(status, description.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaEventKind {
    Upsert,
    Delete,
}

/// One tuple of the schema discovery feed
#[derive(Debug, Clone)]
pub struct SchemaEvent {
    pub kind: SchemaEventKind,
    pub resource_type: String,
    pub descriptors: Vec<RouteDescriptor>,
}

pub type SchemaNotifications = mpsc::Receiver<String>;

pub struct SchemaRegistry {
    types: DashMap<String, Vec<RouteDescriptor>>,
    declared: Mutex<HashSet<String>>,
    notifier: mpsc::Sender<String>,
}

impl SchemaRegistry {
    /// Create a registry and the receiving end of its notification channel
    pub fn new(capacity: usize) -> (Self, SchemaNotifications) {
        let (notifier, notifications) = mpsc::channel(capacity);
        let registry = Self {
            types: DashMap::new(),
            declared: Mutex::new(HashSet::new()),
            notifier,
        };
        (registry, notifications)
    }

    /// Apply a full snapshot for `resource_type` and notify the route table.
    ///
    /// Waits while the notification channel is full.
    pub async fn publish(
        &self,
        kind: SchemaEventKind,
        resource_type: &str,
        descriptors: Vec<RouteDescriptor>,
    ) -> GatewayResult<()> {
        match kind {
            SchemaEventKind::Upsert => {
                debug!(resource_type, count = descriptors.len(), "Resource schema upserted");
                self.types.insert(resource_type.to_string(), descriptors);
            }
            SchemaEventKind::Delete => {
                debug!(resource_type, "Resource schema deleted");
                self.types.remove(resource_type);
            }
        }

        self.notifier
            .send(resource_type.to_string())
            .await
            .map_err(|_| GatewayError::internal("schema notification channel closed"))
    }

    /// Replace the resource types declared by the spec file without notifying.
    ///
    /// Used while (re)initializing a listener generation, which rebuilds every route
    /// from [`SchemaRegistry::snapshot`] anyway. Types declared previously but missing
    /// from `declared` are removed.
    pub fn load_declared(&self, declared: BTreeMap<String, Vec<RouteDescriptor>>) {
        let mut previous = self.declared.lock();
        for stale in previous.iter().filter(|t| !declared.contains_key(*t)) {
            self.types.remove(stale);
        }

        *previous = declared.keys().cloned().collect();
        for (resource_type, descriptors) in declared {
            self.types.insert(resource_type, descriptors);
        }
        info!(types = previous.len(), "Declared resource schemas loaded");
    }

    pub fn descriptors(&self, resource_type: &str) -> Option<Vec<RouteDescriptor>> {
        self.types.get(resource_type).map(|d| d.value().clone())
    }

    /// All resource types with their descriptors, sorted by type name
    pub fn snapshot(&self) -> Vec<(String, Vec<RouteDescriptor>)> {
        let mut snapshot: Vec<_> = self
            .types
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub fn resource_types(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|(t, _)| t).collect()
    }

    /// Consume a discovery feed until it closes or `shutdown` fires
    pub fn watch_feed(
        self: Arc<Self>,
        mut feed: mpsc::Receiver<SchemaEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = feed.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                if let Err(e) = self
                    .publish(event.kind, &event.resource_type, event.descriptors)
                    .await
                {
                    warn!(resource_type = %event.resource_type, error = %e, "Failed to publish resource schema");
                }
            }
            debug!("Schema discovery feed consumer stopped");
        })
    }
}

/// Bounded discovery feed; senders wait when the queue is full
pub fn schema_feed(capacity: usize) -> (mpsc::Sender<SchemaEvent>, mpsc::Receiver<SchemaEvent>) {
    mpsc::channel(capacity)
}

//! # URI Remapping Engine
//!
//! Rewrites tenant-scoped external URIs into internal service URIs.
//!
//! Mapping entries are stored in a [`ConcurrentCache`] keyed by the name of the
//! configuration object that owns them. [`UriRemapper::remap`] walks the entries in
//! insertion order and the first entry whose external pattern matches the whole request
//! path wins. Bound placeholders are substituted into the service pattern and the
//! original query string is re-appended verbatim.

use crate::caching::ConcurrentCache;
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::pattern::{normalize_root, UriTemplate};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External pattern to internal pattern plus backend descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    #[serde(rename = "externalURIPattern")]
    pub external_uri_pattern: String,

    #[serde(rename = "serviceURIPattern")]
    pub service_uri_pattern: String,

    #[serde(rename = "backendService")]
    pub backend_service: String,

    #[serde(rename = "backendPort")]
    pub backend_port: u16,
}

impl MappingEntry {
    pub fn new(external: &str, service: &str, backend_service: &str, backend_port: u16) -> Self {
        Self {
            external_uri_pattern: external.to_string(),
            service_uri_pattern: service.to_string(),
            backend_service: backend_service.to_string(),
            backend_port,
        }
    }

    /// Every placeholder of the service pattern must appear in the external pattern
    pub fn validate(&self, key: &str) -> GatewayResult<()> {
        if self.backend_service.is_empty() {
            return Err(GatewayError::invalid_mapping(key, "backendService is empty"));
        }

        let external = UriTemplate::parse(&self.external_uri_pattern);
        let service = UriTemplate::parse(&self.service_uri_pattern);
        let external_params: Vec<&str> = external.params().collect();

        if let Some(missing) = service.params().find(|p| !external_params.contains(p)) {
            return Err(GatewayError::invalid_mapping(
                key,
                format!(
                    "placeholder {{{}}} of {} is not bound by {}",
                    missing, self.service_uri_pattern, self.external_uri_pattern
                ),
            ));
        }

        Ok(())
    }

    pub fn backend(&self) -> Backend {
        Backend {
            service: self.backend_service.clone(),
            port: self.backend_port,
        }
    }
}

/// Where a remapped request is forwarded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Backend {
    pub service: String,
    pub port: u16,
}

impl Backend {
    /// Base URL of the backend, e.g. `http://resource-svc:8080`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.service, self.port)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.port)
    }
}

/// Outcome of a successful remap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remapped {
    /// Internal path with the original query string re-appended
    pub service_uri: String,
    pub backend: Backend,
    pub path_params: HashMap<String, String>,
}

/// Mapping entry with its patterns parsed once at insertion time
#[derive(Debug)]
struct CompiledMapping {
    entry: MappingEntry,
    external: UriTemplate,
    service: UriTemplate,
}

/// Upsert/delete events of the tenant mapping configuration feed
#[derive(Debug, Clone)]
pub enum MappingEvent {
    Upsert { key: String, entry: MappingEntry },
    Delete { key: String },
}

pub type MappingSender = mpsc::Sender<MappingEvent>;
pub type MappingReceiver = mpsc::Receiver<MappingEvent>;

/// Bounded mapping feed; senders wait when the queue is full
pub fn mapping_channel(capacity: usize) -> (MappingSender, MappingReceiver) {
    mpsc::channel(capacity)
}

pub struct UriRemapper {
    mappings: ConcurrentCache<String, Arc<CompiledMapping>>,
    api_root: Option<String>,
}

impl UriRemapper {
    pub fn new() -> Self {
        Self {
            mappings: ConcurrentCache::new(),
            api_root: None,
        }
    }

    /// External patterns starting with `api_root` have that prefix replaced by the part
    /// of the root after its last `}`.
    pub fn with_api_root<S: Into<String>>(api_root: S) -> Self {
        Self {
            mappings: ConcurrentCache::new(),
            api_root: Some(api_root.into()),
        }
    }

    fn normalize_external<'a>(&self, pattern: &'a str) -> std::borrow::Cow<'a, str> {
        if let Some(root) = self.api_root.as_deref().filter(|r| !r.is_empty()) {
            if let Some(rest) = pattern.strip_prefix(root) {
                return format!("{}{}", normalize_root(root), rest).into();
            }
        }
        pattern.into()
    }

    /// Insert or atomically replace the entry owned by `key`
    pub fn set_mapping(&self, key: &str, entry: MappingEntry) -> GatewayResult<()> {
        entry.validate(key)?;

        let external = UriTemplate::parse(&self.normalize_external(&entry.external_uri_pattern));
        let service = UriTemplate::parse(&entry.service_uri_pattern);
        debug!(key, external = %external, service = %service, "Mapping stored");

        self.mappings.set(
            key.to_string(),
            Arc::new(CompiledMapping {
                entry,
                external,
                service,
            }),
        );
        Ok(())
    }

    /// Remove the entry owned by `key`; absent keys are ignored
    pub fn delete_mapping(&self, key: &str) -> bool {
        self.mappings.delete(&key.to_string())
    }

    pub fn mapping(&self, key: &str) -> Option<MappingEntry> {
        self.mappings.get(&key.to_string()).map(|m| m.entry.clone())
    }

    /// Mapping keys in match order
    pub fn keys(&self) -> Vec<String> {
        self.mappings.keys()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Resolve `request_uri` into a service URI and backend.
    ///
    /// Pure over the current mapping snapshot. `headers` only feed tracing.
    pub fn remap(&self, request_uri: &str, headers: &HeaderMap) -> GatewayResult<Remapped> {
        let (path, query) = match request_uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request_uri, None),
        };

        for mapping in self.mappings.values() {
            let Some(path_params) = mapping.external.match_path(path) else {
                continue;
            };

            let mut service_uri = mapping.service.render(&path_params).map_err(|missing| {
                GatewayError::internal(format!("unbound placeholder {{{}}} after match", missing))
            })?;
            if let Some(query) = query {
                service_uri.push('?');
                service_uri.push_str(query);
            }

            debug!(
                request_id = headers.get("x-request-id").and_then(|v| v.to_str().ok()).unwrap_or("-"),
                external = %mapping.external,
                service_uri = %service_uri,
                "Request URI remapped"
            );

            return Ok(Remapped {
                service_uri,
                backend: mapping.entry.backend(),
                path_params,
            });
        }

        Err(GatewayError::mapping_not_found(request_uri))
    }

    pub fn apply(&self, event: MappingEvent) {
        match event {
            MappingEvent::Upsert { key, entry } => {
                if let Err(e) = self.set_mapping(&key, entry) {
                    warn!(key = %key, error = %e, "Rejected mapping entry");
                }
            }
            MappingEvent::Delete { key } => {
                if self.delete_mapping(&key) {
                    info!(key = %key, "Mapping removed");
                }
            }
        }
    }

    /// Consume the mapping feed until it closes or `shutdown` fires
    pub fn watch(self: Arc<Self>, mut events: MappingReceiver, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => self.apply(event),
                        None => break,
                    },
                }
            }
            debug!("Mapping feed consumer stopped");
        })
    }
}

impl Default for UriRemapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remapper() -> UriRemapper {
        let remapper = UriRemapper::new();
        remapper
            .set_mapping(
                "resources",
                MappingEntry::new("/v1/projects/{projectName}/resources", "/v1/resources", "resource-svc", 8080),
            )
            .unwrap();
        remapper
            .set_mapping(
                "resource",
                MappingEntry::new(
                    "/v1/projects/{projectName}/resources/{resourceId}",
                    "/v1/resources/{resourceId}",
                    "resource-svc",
                    8080,
                ),
            )
            .unwrap();
        remapper
    }

    #[test]
    fn test_exact_remap() {
        let out = remapper()
            .remap("/v1/projects/default/resources/123", &HeaderMap::new())
            .unwrap();
        assert_eq!(out.service_uri, "/v1/resources/123");
        assert_eq!(out.backend.to_string(), "resource-svc:8080");
        assert_eq!(out.path_params["projectName"], "default");
    }

    #[test]
    fn test_query_preserved() {
        let out = remapper()
            .remap("/v1/projects/default/resources/123?query=abc", &HeaderMap::new())
            .unwrap();
        assert_eq!(out.service_uri, "/v1/resources/123?query=abc");
    }

    #[test]
    fn test_no_spurious_question_mark() {
        let out = remapper()
            .remap("/v1/projects/default/resources", &HeaderMap::new())
            .unwrap();
        assert_eq!(out.service_uri, "/v1/resources");
    }

    #[test]
    fn test_trailing_empty_query_kept() {
        let out = remapper()
            .remap("/v1/projects/default/resources?", &HeaderMap::new())
            .unwrap();
        assert_eq!(out.service_uri, "/v1/resources?");
    }

    #[test]
    fn test_no_match() {
        let err = remapper().remap("/api/invalid/resource", &HeaderMap::new()).unwrap_err();
        assert_eq!(err, GatewayError::mapping_not_found("/api/invalid/resource"));
    }

    #[test]
    fn test_partial_matches_rejected() {
        let remapper = remapper();
        for uri in ["/v1/projects/default/resources/123/extra", "/v1/projects/default"] {
            assert!(matches!(
                remapper.remap(uri, &HeaderMap::new()),
                Err(GatewayError::MappingNotFound { .. })
            ));
        }
    }

    #[test]
    fn test_literal_only_pattern_passes_through() {
        let remapper = UriRemapper::new();
        remapper
            .set_mapping("health", MappingEntry::new("/v1/status", "/internal/status", "status-svc", 9000))
            .unwrap();
        let out = remapper.remap("/v1/status", &HeaderMap::new()).unwrap();
        assert_eq!(out.service_uri, "/internal/status");
        assert!(out.path_params.is_empty());
    }

    #[test]
    fn test_first_inserted_wins() {
        let remapper = UriRemapper::new();
        remapper
            .set_mapping("first", MappingEntry::new("/v1/{a}/items", "/first/{a}", "one", 80))
            .unwrap();
        remapper
            .set_mapping("second", MappingEntry::new("/v1/{b}/items", "/second/{b}", "two", 80))
            .unwrap();

        let out = remapper.remap("/v1/x/items", &HeaderMap::new()).unwrap();
        assert_eq!(out.service_uri, "/first/x");

        // Overwriting keeps the position
        remapper
            .set_mapping("first", MappingEntry::new("/v1/{a}/items", "/first-v2/{a}", "one", 80))
            .unwrap();
        let out = remapper.remap("/v1/x/items", &HeaderMap::new()).unwrap();
        assert_eq!(out.service_uri, "/first-v2/x");
    }

    #[test]
    fn test_remap_is_repeatable() {
        let remapper = remapper();
        let uri = "/v1/projects/p/resources/9?x=1";
        assert_eq!(
            remapper.remap(uri, &HeaderMap::new()).unwrap(),
            remapper.remap(uri, &HeaderMap::new()).unwrap()
        );
    }

    #[test]
    fn test_invalid_mapping_rejected() {
        let remapper = UriRemapper::new();
        let err = remapper
            .set_mapping("bad", MappingEntry::new("/v1/{a}", "/x/{b}", "svc", 80))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidMapping { .. }));
        assert!(remapper.is_empty());
    }

    #[test]
    fn test_extra_external_placeholders_dropped() {
        let remapper = UriRemapper::new();
        remapper
            .set_mapping("x", MappingEntry::new("/v1/{org}/{project}/things", "/things", "svc", 80))
            .unwrap();
        let out = remapper.remap("/v1/acme/web/things", &HeaderMap::new()).unwrap();
        assert_eq!(out.service_uri, "/things");
    }

    #[test]
    fn test_templated_api_root_is_normalized() {
        let remapper = UriRemapper::with_api_root("/{org}.orch/api");
        remapper
            .set_mapping(
                "nodes",
                MappingEntry::new("/{org}.orch/api/v1/projects/{projectName}/nodes", "/nodes", "node-svc", 80),
            )
            .unwrap();

        let out = remapper.remap("/api/v1/projects/p1/nodes", &HeaderMap::new()).unwrap();
        assert_eq!(out.service_uri, "/nodes");
    }

    #[test]
    fn test_delete_event() {
        let remapper = remapper();
        remapper.apply(MappingEvent::Delete {
            key: "resource".to_string(),
        });
        remapper.apply(MappingEvent::Delete {
            key: "never-existed".to_string(),
        });
        assert_eq!(remapper.keys(), vec!["resources".to_string()]);
    }

    #[tokio::test]
    async fn test_watch_applies_feed() {
        let remapper = Arc::new(UriRemapper::new());
        let (tx, rx) = mapping_channel(4);
        let shutdown = CancellationToken::new();
        let handle = remapper.clone().watch(rx, shutdown.clone());

        tx.send(MappingEvent::Upsert {
            key: "k".to_string(),
            entry: MappingEntry::new("/a/{x}", "/b/{x}", "svc", 80),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(remapper.remap("/a/1", &HeaderMap::new()).unwrap().service_uri, "/b/1");
    }
}

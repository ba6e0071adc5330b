//! # Route Table
//!
//! Live table of registered resource routes. Each entry binds a URI template and a
//! [`Method`] to the resource type that declared it. Lookups go through a `matchit`
//! radix tree that is rebuilt from the ordered table after every mutation, so readers
//! always see either the old or the new route set, never a partial one.
//!
//! When two resource types declare the same pair, the later registration owns it. The
//! table remembers the order in which owners registered, and a full rebuild replays
//! owners in that order so ownership survives a listener restart.
//!
//! ## Rust Concepts Used
//!
//! - `parking_lot::RwLock` guards the table; lookups take the read lock only
//! - `Arc<RouteEntry>` lets a request keep its matched route after the table changes
//! - `BTreeMap` keeps iteration deterministic for rebuilds and the debug endpoint

use crate::discovery::schema_registry::{Method, RouteDescriptor};
use crate::routing::pattern::{Segment, UriTemplate};
use matchit::Router as RadixRouter;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// A registered `(template, method)` pair
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub template: UriTemplate,
    pub method: Method,
    /// Resource type whose schema declared this route
    pub resource_type: String,
    pub resource_kind: String,
    pub resource_group: String,
    pub responses: BTreeMap<u16, String>,
    /// `PATCH` mirrored from `PUT` rather than declared
    pub synthetic: bool,
}

/// Result of a successful lookup
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub entry: Arc<RouteEntry>,
    pub params: HashMap<String, String>,
}

/// Flat view of one route for introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub template: String,
    pub method: Method,
    pub resource_type: String,
    pub synthetic: bool,
}

/// Routes sharing one template shape, by method
#[derive(Debug, Default)]
struct Slot {
    collection: bool,
    methods: BTreeMap<Method, Arc<RouteEntry>>,
}

#[derive(Default)]
struct Table {
    slots: BTreeMap<String, Slot>,
    radix: RadixRouter<String>,
    /// Shapes the radix tree refused; matched by a linear scan instead
    unindexed: Vec<String>,
    /// Registration sequence of each owner
    owners: HashMap<String, u64>,
    next_seq: u64,
}

impl Table {
    fn insert(&mut self, entry: RouteEntry) {
        let shape = shape_key(&entry.template);
        let slot = self.slots.entry(shape).or_insert_with(|| Slot {
            collection: entry.template.is_collection(),
            methods: BTreeMap::new(),
        });

        if let Some(previous) = slot.methods.get(&entry.method) {
            if previous.resource_type != entry.resource_type {
                debug!(
                    template = %entry.template,
                    method = %entry.method,
                    previous = %previous.resource_type,
                    owner = %entry.resource_type,
                    "Route superseded"
                );
            }
        }
        slot.methods.insert(entry.method, Arc::new(entry));
    }

    fn register_owner(&mut self, resource_type: &str) {
        self.owners.insert(resource_type.to_string(), self.next_seq);
        self.next_seq += 1;
    }

    fn remove_owner(&mut self, resource_type: &str) -> usize {
        let mut removed = 0;
        for slot in self.slots.values_mut() {
            let before = slot.methods.len();
            slot.methods.retain(|_, e| e.resource_type != resource_type);
            removed += before - slot.methods.len();
        }
        self.slots.retain(|_, slot| !slot.methods.is_empty());
        removed
    }

    fn reindex(&mut self) {
        let mut radix = RadixRouter::new();
        let mut unindexed = Vec::new();

        for shape in self.slots.keys() {
            if let Err(e) = radix.insert(shape.as_str(), shape.clone()) {
                warn!(shape = %shape, error = %e, "Route shape not indexable, using linear match");
                unindexed.push(shape.clone());
            }
        }

        self.radix = radix;
        self.unindexed = unindexed;
    }

    /// Slots whose shape matches `path`: the radix hit and any matching refused shape,
    /// most literal first
    fn candidates(&self, path: &str) -> Vec<&Slot> {
        let indexed = self
            .radix
            .at(path)
            .ok()
            .and_then(|matched| self.slots.get_key_value(matched.value));

        let refused = self.unindexed.iter().filter_map(|shape| {
            let (key, slot) = self.slots.get_key_value(shape)?;
            let template = &slot.methods.values().next()?.template;
            template.match_path(path).map(|_| (key, slot))
        });

        let mut matched: Vec<_> = indexed.into_iter().chain(refused).collect();
        matched.sort_by_key(|(shape, _)| std::cmp::Reverse(literal_segments(shape)));
        matched.into_iter().map(|(_, slot)| slot).collect()
    }
}

fn literal_segments(shape: &str) -> usize {
    shape
        .split('/')
        .filter(|s| !s.is_empty() && !s.starts_with(':'))
        .count()
}

/// Radix path with positional parameter names, so templates differing only in
/// placeholder names land on the same slot
fn shape_key(template: &UriTemplate) -> String {
    if template.segments().is_empty() {
        return "/".to_string();
    }

    let mut key = String::new();
    let mut index = 0;
    for segment in template.segments() {
        key.push('/');
        match segment {
            Segment::Literal(literal) => key.push_str(literal),
            Segment::Param(_) => {
                key.push_str(&format!(":p{}", index));
                index += 1;
            }
        }
    }
    key
}

/// Expand descriptors into route entries, mirroring `PUT` as `PATCH` where absent
fn expand(resource_type: &str, descriptors: &[RouteDescriptor]) -> Vec<RouteEntry> {
    let mut entries = Vec::new();

    for descriptor in descriptors {
        let template = UriTemplate::parse(&descriptor.uri_template);
        let entry = |method: Method, responses: &BTreeMap<u16, String>, synthetic: bool| RouteEntry {
            template: template.clone(),
            method,
            resource_type: resource_type.to_string(),
            resource_kind: descriptor.resource_kind.clone(),
            resource_group: descriptor.resource_group.clone(),
            responses: responses.clone(),
            synthetic,
        };

        for (method, responses) in &descriptor.method_responses {
            entries.push(entry(*method, responses, false));
        }

        if let Some(put) = descriptor.method_responses.get(&Method::Put) {
            if !descriptor.method_responses.contains_key(&Method::Patch) {
                entries.push(entry(Method::Patch, put, true));
            }
        }
    }

    entries
}

#[derive(Default)]
pub struct RouteTable {
    inner: RwLock<Table>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every route owned by `resource_type` with the routes of `descriptors`.
    ///
    /// Pairs already registered by another resource type are superseded. Returns the
    /// number of routes now owned by `resource_type`.
    pub fn replace_owner(&self, resource_type: &str, descriptors: &[RouteDescriptor]) -> usize {
        let entries = expand(resource_type, descriptors);
        let count = entries.len();

        let mut table = self.inner.write();
        table.remove_owner(resource_type);
        table.register_owner(resource_type);
        for entry in entries {
            table.insert(entry);
        }
        table.reindex();

        count
    }

    /// Drop every route owned by `resource_type`, returning how many were removed
    pub fn remove_owner(&self, resource_type: &str) -> usize {
        let mut table = self.inner.write();
        table.owners.remove(resource_type);
        let removed = table.remove_owner(resource_type);
        if removed > 0 {
            table.reindex();
        }
        removed
    }

    /// Rebuild the whole table from a registry snapshot.
    ///
    /// Owners are replayed in their registration order; owners the table has not seen
    /// yet follow in snapshot order.
    pub fn rebuild(&self, snapshot: &[(String, Vec<RouteDescriptor>)]) -> usize {
        let mut table = self.inner.write();

        let mut ordered: Vec<_> = snapshot.iter().collect();
        ordered.sort_by_key(|(resource_type, _)| {
            table.owners.get(resource_type).copied().unwrap_or(u64::MAX)
        });

        let mut fresh = Table {
            next_seq: table.next_seq,
            ..Table::default()
        };
        let mut count = 0;
        for (resource_type, descriptors) in ordered {
            fresh.register_owner(resource_type);
            for entry in expand(resource_type, descriptors) {
                fresh.insert(entry);
                count += 1;
            }
        }
        fresh.reindex();

        *table = fresh;
        count
    }

    /// Find the route for `method` on `path`.
    ///
    /// `GET` resolves to [`Method::List`] on collection templates and to
    /// [`Method::Get`] on single-item templates. When several shapes match, the most
    /// literal one declaring the method wins.
    pub fn lookup(&self, method: &axum::http::Method, path: &str) -> Option<RouteMatch> {
        let table = self.inner.read();
        table.candidates(path).into_iter().find_map(|slot| {
            let method = Method::from_http(method, slot.collection)?;
            let entry = slot.methods.get(&method)?.clone();
            let params = entry.template.match_path(path)?;
            Some(RouteMatch { entry, params })
        })
    }

    pub fn contains(&self, method: Method, template: &str) -> bool {
        let shape = shape_key(&UriTemplate::parse(template));
        self.inner
            .read()
            .slots
            .get(&shape)
            .map(|slot| slot.methods.contains_key(&method))
            .unwrap_or(false)
    }

    pub fn routes(&self) -> Vec<RouteSummary> {
        let table = self.inner.read();
        table
            .slots
            .values()
            .flat_map(|slot| slot.methods.values())
            .map(|entry| RouteSummary {
                template: entry.template.to_string(),
                method: entry.method,
                resource_type: entry.resource_type.clone(),
                synthetic: entry.synthetic,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().slots.values().map(|s| s.methods.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method as HttpMethod;

    fn widgets() -> Vec<RouteDescriptor> {
        vec![
            RouteDescriptor::new("/v1/projects/{projectName}/widgets", "Widget", "example.io")
                .with_method(Method::List, 200, "OK"),
            RouteDescriptor::new("/v1/projects/{projectName}/widgets/{name}", "Widget", "example.io")
                .with_method(Method::Get, 200, "OK")
                .with_method(Method::Put, 200, "Replaced")
                .with_method(Method::Delete, 204, "Deleted"),
        ]
    }

    #[test]
    fn test_list_and_single_item_dispatch() {
        let table = RouteTable::new();
        table.replace_owner("widgets", &widgets());

        let list = table.lookup(&HttpMethod::GET, "/v1/projects/demo/widgets").unwrap();
        assert_eq!(list.entry.method, Method::List);
        assert_eq!(list.params["projectName"], "demo");

        let item = table.lookup(&HttpMethod::GET, "/v1/projects/demo/widgets/w1").unwrap();
        assert_eq!(item.entry.method, Method::Get);
        assert_eq!(item.params["name"], "w1");

        assert!(table.lookup(&HttpMethod::POST, "/v1/projects/demo/widgets").is_none());
        assert!(table.lookup(&HttpMethod::GET, "/v1/projects/demo").is_none());
    }

    #[test]
    fn test_patch_mirrored_from_put() {
        let table = RouteTable::new();
        table.replace_owner("widgets", &widgets());

        let patch = table.lookup(&HttpMethod::PATCH, "/v1/projects/demo/widgets/w1").unwrap();
        assert!(patch.entry.synthetic);
        assert_eq!(patch.entry.responses.get(&200).map(String::as_str), Some("Replaced"));
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_declared_patch_is_kept() {
        let table = RouteTable::new();
        let descriptor = RouteDescriptor::new("/v1/things/{id}", "Thing", "")
            .with_method(Method::Put, 200, "Replaced")
            .with_method(Method::Patch, 200, "Patched");
        table.replace_owner("things", &[descriptor]);

        let patch = table.lookup(&HttpMethod::PATCH, "/v1/things/1").unwrap();
        assert!(!patch.entry.synthetic);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_replace_owner_is_idempotent() {
        let table = RouteTable::new();
        table.replace_owner("widgets", &widgets());
        let first = table.routes();

        table.replace_owner("widgets", &widgets());
        assert_eq!(table.routes(), first);
    }

    #[test]
    fn test_replace_owner_drops_missing_routes() {
        let table = RouteTable::new();
        table.replace_owner("widgets", &widgets());
        table.replace_owner("widgets", &widgets()[..1]);

        assert_eq!(table.len(), 1);
        assert!(table.lookup(&HttpMethod::GET, "/v1/projects/demo/widgets/w1").is_none());
    }

    #[test]
    fn test_conflicting_pair_is_superseded() {
        let table = RouteTable::new();
        table.replace_owner("widgets", &widgets());

        let other = RouteDescriptor::new("/v1/projects/{project}/widgets/{id}", "Gadget", "")
            .with_method(Method::Get, 200, "OK");
        table.replace_owner("gadgets", &[other]);

        let matched = table.lookup(&HttpMethod::GET, "/v1/projects/demo/widgets/w1").unwrap();
        assert_eq!(matched.entry.resource_type, "gadgets");
        assert_eq!(matched.params["id"], "w1");

        let delete = table.lookup(&HttpMethod::DELETE, "/v1/projects/demo/widgets/w1").unwrap();
        assert_eq!(delete.entry.resource_type, "widgets");
        assert_eq!(delete.params["name"], "w1");
    }

    #[test]
    fn test_remove_owner_and_rebuild() {
        let table = RouteTable::new();
        table.replace_owner("widgets", &widgets());
        assert_eq!(table.remove_owner("widgets"), 5);
        assert!(table.is_empty());
        assert_eq!(table.remove_owner("widgets"), 0);

        let snapshot = vec![("widgets".to_string(), widgets())];
        assert_eq!(table.rebuild(&snapshot), 5);
        assert!(table.contains(Method::Patch, "/v1/projects/{p}/widgets/{n}"));
    }

    #[test]
    fn test_static_segment_alongside_param() {
        let table = RouteTable::new();
        let descriptors = vec![
            RouteDescriptor::new("/v1/items/{id}", "Item", "").with_method(Method::Get, 200, "OK"),
            RouteDescriptor::new("/v1/items/featured", "Item", "").with_method(Method::List, 200, "OK"),
        ];
        table.replace_owner("items", &descriptors);

        let featured = table.lookup(&HttpMethod::GET, "/v1/items/featured").unwrap();
        assert_eq!(featured.entry.method, Method::List);
        let item = table.lookup(&HttpMethod::GET, "/v1/items/42").unwrap();
        assert_eq!(item.params["id"], "42");
    }

    #[test]
    fn test_method_missing_on_literal_shape_falls_back_to_param() {
        let table = RouteTable::new();
        let descriptors = vec![
            RouteDescriptor::new("/v1/items/{id}", "Item", "")
                .with_method(Method::Get, 200, "OK")
                .with_method(Method::Put, 200, "Replaced"),
            RouteDescriptor::new("/v1/items/featured", "Item", "").with_method(Method::List, 200, "OK"),
        ];
        table.replace_owner("items", &descriptors);

        let put = table.lookup(&HttpMethod::PUT, "/v1/items/featured").unwrap();
        assert_eq!(put.entry.method, Method::Put);
        assert_eq!(put.params["id"], "featured");

        let list = table.lookup(&HttpMethod::GET, "/v1/items/featured").unwrap();
        assert_eq!(list.entry.method, Method::List);
        assert!(table.lookup(&HttpMethod::DELETE, "/v1/items/featured").is_none());
    }

    #[test]
    fn test_rebuild_keeps_latest_owner() {
        let table = RouteTable::new();
        let shared = |kind: &str| {
            vec![RouteDescriptor::new("/v1/shared/{id}", kind, "").with_method(Method::Get, 200, "OK")]
        };
        table.replace_owner("zeta", &shared("Zeta"));
        table.replace_owner("alpha", &shared("Alpha"));
        assert_eq!(table.lookup(&HttpMethod::GET, "/v1/shared/1").unwrap().entry.resource_type, "alpha");

        // Registry snapshots come back sorted by name
        let snapshot = vec![
            ("alpha".to_string(), shared("Alpha")),
            ("zeta".to_string(), shared("Zeta")),
        ];
        table.rebuild(&snapshot);
        assert_eq!(table.lookup(&HttpMethod::GET, "/v1/shared/1").unwrap().entry.resource_type, "alpha");

        table.rebuild(&snapshot);
        assert_eq!(table.lookup(&HttpMethod::GET, "/v1/shared/1").unwrap().entry.resource_type, "alpha");

        table.replace_owner("zeta", &shared("Zeta"));
        table.rebuild(&snapshot);
        assert_eq!(table.lookup(&HttpMethod::GET, "/v1/shared/1").unwrap().entry.resource_type, "zeta");
    }
}

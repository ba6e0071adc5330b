//! # Routing Module
//!
//! Request routing for the gateway:
//! - [`UriTemplate`]: `{name}` / `:name` path templates and segment matching
//! - [`UriRemapper`]: rewrites tenant-scoped external URIs into backend service URIs
//! - [`RouteTable`]: live resource routes with list/single-item dispatch

pub mod pattern;
pub mod remapper;
pub mod router;

pub use pattern::{normalize_root, Segment, UriTemplate};
pub use remapper::{
    mapping_channel, Backend, MappingEntry, MappingEvent, MappingReceiver, MappingSender,
    Remapped, UriRemapper,
};
pub use router::{RouteEntry, RouteMatch, RouteSummary, RouteTable};

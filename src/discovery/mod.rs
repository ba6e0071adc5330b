//! # Discovery Module
//!
//! Resource schema discovery. Schemas arrive either from the discovery feed or from
//! the declarative OpenAPI spec file and are held by the [`SchemaRegistry`].

pub mod openapi;
pub mod schema_registry;

pub use openapi::{load_spec_file, parse_spec};
pub use schema_registry::{
    schema_feed, Method, RouteDescriptor, SchemaEvent, SchemaEventKind, SchemaNotifications,
    SchemaRegistry,
};

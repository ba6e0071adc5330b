//! # Tenant Gateway Library
//!
//! A tenant-aware API gateway routing engine. Resource routes are registered at runtime
//! from schema discovery events and a declarative OpenAPI spec file, tenant-scoped
//! requests are remapped onto backend services, and everything unmatched is relayed to
//! a fallback upstream.
//!
//! ## Module Layout
//!
//! - [`core`]: error taxonomy and configuration
//! - [`caching`]: generic concurrent cache and tenant caches
//! - [`routing`]: URI templates, the remapping engine and the live route table
//! - [`discovery`]: resource schema registry and OpenAPI loading
//! - [`proxy`]: backend calls and the reverse-proxy fallback
//! - [`auth`]: token verification and tenant authorization
//! - [`gateway`]: hot-reload controller, listener and HTTP surface
//! - [`observability`]: logging and metrics

pub mod auth;
pub mod caching;
pub mod core;
pub mod discovery;
pub mod gateway;
pub mod observability;
pub mod proxy;
pub mod routing;

/// Main error type used throughout the gateway
pub use self::core::error::{GatewayError, GatewayResult};

/// Main configuration structure for the gateway
pub use self::core::config::GatewayConfig;

pub use caching::ConcurrentCache;
pub use discovery::{Method, RouteDescriptor, SchemaEventKind, SchemaRegistry};
pub use gateway::{ControllerState, Gateway, GatewayServices, HotReloadController, RunningGateway};
pub use routing::{MappingEntry, RouteTable, UriRemapper};

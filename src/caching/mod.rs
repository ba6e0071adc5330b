//! # Caching Module
//!
//! In-process caches shared across subsystems:
//! - [`ConcurrentCache`]: generic, lock-guarded key/value store with insertion-ordered
//!   iteration, used by the URI remapper for its mapping table
//! - [`TenantCaches`]: organization and project caches consulted by authorization,
//!   refreshed by [`TenantReconciler`]

pub mod concurrent;
pub mod tenants;

pub use concurrent::ConcurrentCache;
pub use tenants::{
    Organization, Project, StaticTenantSource, TenantCaches, TenantReconciler, TenantSource,
};

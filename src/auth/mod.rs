//! # Authentication and Authorization
//!
//! Registered routes are gated by two collaborators: a [`TokenVerifier`] turning request
//! headers into [`Claims`], and an [`AuthorizationPolicy`] deciding whether those claims
//! may access the matched route. [`AuthGate`] applies both, honoring the deployment's
//! [`AuthMode`](crate::core::config::AuthMode) and exempt paths.

pub mod middleware;
pub mod providers;

pub use middleware::AuthGate;
pub use providers::{
    AccessRequest, AuthorizationPolicy, Claims, JwtTokenVerifier, TenantAuthorizer, TokenVerifier,
};

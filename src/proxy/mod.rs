//! # Proxy Module
//!
//! Outbound HTTP: remapped requests to tenant backends through [`UpstreamClient`], and
//! unmatched requests to the orchestration API through [`FallbackProxy`].

pub mod fallback;
pub mod upstream;

pub use fallback::FallbackProxy;
pub use upstream::{UpstreamClient, UpstreamResponse};

//! # Auth Gate
//!
//! Applies token verification and authorization to a matched registered route. In the
//! administrative and tenant-isolated deployment modes every request passes
//! unauthenticated; in standard mode both collaborators must succeed, and either
//! failure is terminal for the request.

use super::providers::{AccessRequest, AuthorizationPolicy, Claims, JwtTokenVerifier, TenantAuthorizer, TokenVerifier};
use crate::caching::tenants::TenantCaches;
use crate::core::config::{AuthConfig, AuthMode};
use crate::core::error::{GatewayError, GatewayResult};
use axum::http::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AuthGate {
    mode: AuthMode,
    exempt_paths: Vec<String>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    policy: Arc<dyn AuthorizationPolicy>,
}

impl AuthGate {
    pub fn new(
        mode: AuthMode,
        exempt_paths: Vec<String>,
        verifier: Option<Arc<dyn TokenVerifier>>,
        policy: Arc<dyn AuthorizationPolicy>,
    ) -> GatewayResult<Self> {
        if mode.requires_token() && verifier.is_none() {
            return Err(GatewayError::config(
                "standard auth mode requires a token verifier (auth.jwt)",
            ));
        }
        Ok(Self {
            mode,
            exempt_paths,
            verifier,
            policy,
        })
    }

    /// JWT verifier and tenant-cache authorizer built from configuration
    pub async fn from_config(config: &AuthConfig, caches: Arc<TenantCaches>) -> GatewayResult<Self> {
        let verifier: Option<Arc<dyn TokenVerifier>> = match &config.jwt {
            Some(jwt) => Some(Arc::new(JwtTokenVerifier::from_config(jwt).await?)),
            None => None,
        };
        let policy = Arc::new(TenantAuthorizer::new(caches));
        Self::new(config.mode, config.exempt_paths.clone(), verifier, policy)
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Exact match, or prefix match for entries ending in `*`
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| match exempt.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == exempt,
        })
    }

    /// Gate one request. Returns the verified claims when a token was checked.
    pub async fn check(
        &self,
        path: &str,
        headers: &HeaderMap,
        params: &HashMap<String, String>,
    ) -> GatewayResult<Option<Claims>> {
        if !self.mode.requires_token() || self.is_exempt(path) {
            return Ok(None);
        }

        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| GatewayError::internal("token verifier missing"))?;

        let claims = verifier.verify_token(headers).await.map_err(|e| {
            warn!(path, error = %e, "Token verification failed");
            e
        })?;

        let request = AccessRequest { path, params };
        self.policy.authorize(&claims, &request).await.map_err(|e| {
            warn!(path, sub = %claims.sub, error = %e, "Authorization denied");
            e
        })?;

        debug!(path, sub = %claims.sub, "Request authorized");
        Ok(Some(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedVerifier(GatewayResult<Claims>);

    #[async_trait]
    impl TokenVerifier for FixedVerifier {
        async fn verify_token(&self, _headers: &HeaderMap) -> GatewayResult<Claims> {
            self.0.clone()
        }
    }

    struct DenyAll;

    #[async_trait]
    impl AuthorizationPolicy for DenyAll {
        async fn authorize(&self, _claims: &Claims, _request: &AccessRequest<'_>) -> GatewayResult<()> {
            Err(GatewayError::authz("denied"))
        }
    }

    struct AllowAll;

    #[async_trait]
    impl AuthorizationPolicy for AllowAll {
        async fn authorize(&self, _claims: &Claims, _request: &AccessRequest<'_>) -> GatewayResult<()> {
            Ok(())
        }
    }

    fn claims() -> Claims {
        Claims {
            sub: "bob".to_string(),
            exp: 0,
            iat: None,
            roles: vec![],
            organizations: vec![],
        }
    }

    fn gate(mode: AuthMode, verifier: GatewayResult<Claims>, policy: Arc<dyn AuthorizationPolicy>) -> AuthGate {
        AuthGate::new(
            mode,
            vec!["/health".to_string(), "/public/*".to_string()],
            Some(Arc::new(FixedVerifier(verifier))),
            policy,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_admin_and_isolated_modes_skip_checks() {
        for mode in [AuthMode::Admin, AuthMode::Isolated] {
            let gate = gate(mode, Err(GatewayError::auth("bad")), Arc::new(DenyAll));
            let result = gate.check("/v1/x", &HeaderMap::new(), &HashMap::new()).await;
            assert_eq!(result.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_standard_mode_requires_both_collaborators() {
        let params = HashMap::new();

        let unauthenticated = gate(AuthMode::Standard, Err(GatewayError::auth("bad")), Arc::new(AllowAll));
        let err = unauthenticated.check("/v1/x", &HeaderMap::new(), &params).await.unwrap_err();
        assert_eq!(err.error_type(), "authentication_failed");

        let denied = gate(AuthMode::Standard, Ok(claims()), Arc::new(DenyAll));
        let err = denied.check("/v1/x", &HeaderMap::new(), &params).await.unwrap_err();
        assert_eq!(err.error_type(), "authorization_denied");

        let allowed = gate(AuthMode::Standard, Ok(claims()), Arc::new(AllowAll));
        let verified = allowed.check("/v1/x", &HeaderMap::new(), &params).await.unwrap();
        assert_eq!(verified.unwrap().sub, "bob");
    }

    #[tokio::test]
    async fn test_exempt_paths_bypass_checks() {
        let gate = gate(AuthMode::Standard, Err(GatewayError::auth("bad")), Arc::new(DenyAll));
        assert!(gate.check("/health", &HeaderMap::new(), &HashMap::new()).await.is_ok());
        assert!(gate.check("/public/docs", &HeaderMap::new(), &HashMap::new()).await.is_ok());
        assert!(gate.check("/healthz", &HeaderMap::new(), &HashMap::new()).await.is_err());
    }

    #[test]
    fn test_standard_mode_without_verifier_is_rejected() {
        let result = AuthGate::new(AuthMode::Standard, vec![], None, Arc::new(AllowAll));
        assert!(result.is_err());
        assert!(AuthGate::new(AuthMode::Admin, vec![], None, Arc::new(AllowAll)).is_ok());
    }
}

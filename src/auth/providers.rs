//! # Authentication Providers
//!
//! JWT verification with `jsonwebtoken` and authorization against the tenant caches.

use crate::caching::tenants::TenantCaches;
use crate::core::config::JwtConfig;
use crate::core::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Role that grants access to every organization
pub const ADMIN_ROLE: &str = "admin";

/// Claims carried by gateway tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Organizations the subject belongs to
    #[serde(default)]
    pub organizations: Vec<String>,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    pub fn belongs_to(&self, organization: &str) -> bool {
        self.organizations.iter().any(|o| o == organization)
    }
}

/// What an authorization decision is about
#[derive(Debug, Clone)]
pub struct AccessRequest<'a> {
    pub path: &'a str,
    pub params: &'a HashMap<String, String>,
}

/// Verifies the credentials carried by request headers
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify_token(&self, headers: &HeaderMap) -> GatewayResult<Claims>;
}

/// Decides whether verified claims may access a route
#[async_trait]
pub trait AuthorizationPolicy: Send + Sync {
    async fn authorize(&self, claims: &Claims, request: &AccessRequest<'_>) -> GatewayResult<()>;
}

/// Extract the bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> GatewayResult<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| GatewayError::auth("missing Authorization header"))?
        .to_str()
        .map_err(|_| GatewayError::auth("Authorization header is not valid ASCII"))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GatewayError::auth("expected a Bearer token"))
}

pub struct JwtTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(key: DecodingKey, validation: Validation) -> Self {
        Self { key, validation }
    }

    /// Build a verifier from configuration, reading the public key file if any
    pub async fn from_config(config: &JwtConfig) -> GatewayResult<Self> {
        let algorithm = Algorithm::from_str(&config.algorithm).map_err(|_| {
            GatewayError::config(format!("Unsupported JWT algorithm: {}", config.algorithm))
        })?;

        let key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = config.secret.as_ref().ok_or_else(|| {
                    GatewayError::config("HMAC JWT algorithms require auth.jwt.secret")
                })?;
                DecodingKey::from_secret(secret.as_bytes())
            }
            _ => {
                let path = config.public_key_file.as_ref().ok_or_else(|| {
                    GatewayError::config("asymmetric JWT algorithms require auth.jwt.public_key_file")
                })?;
                let pem = tokio::fs::read(path).await?;
                match algorithm {
                    Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(&pem)?,
                    Algorithm::EdDSA => DecodingKey::from_ed_pem(&pem)?,
                    _ => DecodingKey::from_rsa_pem(&pem)?,
                }
            }
        };

        let mut validation = Validation::new(algorithm);
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self::new(key, validation))
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify_token(&self, headers: &HeaderMap) -> GatewayResult<Claims> {
        let token = bearer_token(headers)?;
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        debug!(sub = %data.claims.sub, "Token verified");
        Ok(data.claims)
    }
}

/// Authorizes tenant-scoped routes against the organization and project caches.
///
/// A route binding `projectName` is allowed when the project is cached, not being
/// deleted, its organization is cached, and the caller belongs to that organization or
/// holds the admin role. Routes without a project are allowed for any verified caller.
pub struct TenantAuthorizer {
    caches: Arc<TenantCaches>,
}

impl TenantAuthorizer {
    pub fn new(caches: Arc<TenantCaches>) -> Self {
        Self { caches }
    }
}

#[async_trait]
impl AuthorizationPolicy for TenantAuthorizer {
    async fn authorize(&self, claims: &Claims, request: &AccessRequest<'_>) -> GatewayResult<()> {
        let Some(project_name) = request.params.get("projectName") else {
            return Ok(());
        };

        let project = self
            .caches
            .project(project_name)
            .ok_or_else(|| GatewayError::authz(format!("unknown project {}", project_name)))?;
        if project.deleting {
            return Err(GatewayError::authz(format!(
                "project {} is being deleted",
                project_name
            )));
        }
        if self.caches.organization(&project.organization).is_none() {
            return Err(GatewayError::authz(format!(
                "unknown organization {}",
                project.organization
            )));
        }

        if claims.is_admin() || claims.belongs_to(&project.organization) {
            Ok(())
        } else {
            Err(GatewayError::authz(format!(
                "{} is not a member of organization {}",
                claims.sub, project.organization
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::tenants::{Organization, Project};
    use axum::http::HeaderValue;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, organizations: Vec<&str>, roles: Vec<&str>, expires_in: i64) -> String {
        let claims = Claims {
            sub: "alice".to_string(),
            exp: Utc::now().timestamp() + expires_in,
            iat: Some(Utc::now().timestamp()),
            roles: roles.into_iter().map(String::from).collect(),
            organizations: organizations.into_iter().map(String::from).collect(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .unwrap()
    }

    fn headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn jwt_config(secret: &str) -> JwtConfig {
        JwtConfig {
            secret: Some(secret.to_string()),
            public_key_file: None,
            algorithm: "HS256".to_string(),
            issuer: None,
            audience: None,
        }
    }

    fn caches() -> Arc<TenantCaches> {
        let caches = Arc::new(TenantCaches::new());
        caches.sync(
            vec![Organization {
                name: "acme".to_string(),
                uid: "1".to_string(),
            }],
            vec![
                Project {
                    name: "default".to_string(),
                    organization: "acme".to_string(),
                    uid: "2".to_string(),
                    deleting: false,
                },
                Project {
                    name: "retired".to_string(),
                    organization: "acme".to_string(),
                    uid: "3".to_string(),
                    deleting: true,
                },
                Project {
                    name: "orphan".to_string(),
                    organization: "ghost".to_string(),
                    uid: "4".to_string(),
                    deleting: false,
                },
            ],
        );
        caches
    }

    #[tokio::test]
    async fn test_jwt_verifier_accepts_valid_token() {
        let verifier = JwtTokenVerifier::from_config(&jwt_config("s3cret")).await.unwrap();
        let claims = verifier
            .verify_token(&headers(&token("s3cret", vec!["acme"], vec![], 300)))
            .await
            .unwrap();
        assert_eq!(claims.sub, "alice");
        assert!(claims.belongs_to("acme"));
    }

    #[tokio::test]
    async fn test_jwt_verifier_rejects_bad_tokens() {
        let verifier = JwtTokenVerifier::from_config(&jwt_config("s3cret")).await.unwrap();

        let wrong_key = verifier
            .verify_token(&headers(&token("other", vec![], vec![], 300)))
            .await
            .unwrap_err();
        assert_eq!(wrong_key.error_type(), "authentication_failed");

        let expired = verifier
            .verify_token(&headers(&token("s3cret", vec![], vec![], -3600)))
            .await
            .unwrap_err();
        assert_eq!(expired.error_type(), "authentication_failed");

        let missing = verifier.verify_token(&HeaderMap::new()).await.unwrap_err();
        assert_eq!(missing.error_type(), "authentication_failed");
    }

    #[tokio::test]
    async fn test_unsupported_algorithm_and_missing_secret() {
        let mut config = jwt_config("x");
        config.algorithm = "NOPE".to_string();
        assert!(JwtTokenVerifier::from_config(&config).await.is_err());

        let mut config = jwt_config("x");
        config.secret = None;
        assert!(JwtTokenVerifier::from_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_tenant_authorizer_decisions() {
        let authorizer = TenantAuthorizer::new(caches());
        let member = Claims {
            sub: "alice".to_string(),
            exp: 0,
            iat: None,
            roles: vec![],
            organizations: vec!["acme".to_string()],
        };
        let outsider = Claims {
            organizations: vec!["globex".to_string()],
            ..member.clone()
        };
        let admin = Claims {
            roles: vec![ADMIN_ROLE.to_string()],
            ..outsider.clone()
        };

        let check = |project: &str| {
            let mut params = HashMap::new();
            params.insert("projectName".to_string(), project.to_string());
            params
        };

        let default = check("default");
        let request = AccessRequest { path: "/v1/projects/default/widgets", params: &default };
        assert!(authorizer.authorize(&member, &request).await.is_ok());
        assert!(authorizer.authorize(&admin, &request).await.is_ok());
        assert_eq!(
            authorizer.authorize(&outsider, &request).await.unwrap_err().error_type(),
            "authorization_denied"
        );

        for project in ["retired", "orphan", "missing"] {
            let params = check(project);
            let request = AccessRequest { path: "/v1/projects/x", params: &params };
            assert!(authorizer.authorize(&admin, &request).await.is_err(), "{}", project);
        }

        let none = HashMap::new();
        let request = AccessRequest { path: "/v1/widgets", params: &none };
        assert!(authorizer.authorize(&outsider, &request).await.is_ok());
    }
}

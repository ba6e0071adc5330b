//! # Configuration Module
//!
//! Loading, environment overrides and validation of the gateway configuration.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable override support (`GATEWAY_<SECTION>_<FIELD>`)
//! - Human readable durations (`"10s"`, `"500ms"`) through `humantime-serde`
//! - Validation with detailed error messages

use crate::caching::tenants::{Organization, Project};
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::remapper::MappingEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (address, port, TLS)
    pub server: ServerConfig,

    /// Route discovery and remapping settings
    pub routing: RoutingConfig,

    /// Backend proxy settings
    pub proxy: ProxyConfig,

    /// Pass-through upstream for unmatched requests
    pub fallback: FallbackConfig,

    /// Hot-reload drain budgets
    pub restart: RestartConfig,

    /// Authentication mode and JWT settings
    pub auth: AuthConfig,

    /// Tenant cache reconciliation
    pub tenants: TenantsConfig,

    /// Static mapping entries applied through the mapping feed at startup
    pub mappings: Vec<MappingDefinition>,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML or JSON file, chosen by extension
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file {:?}: {}", path, e)))?;

        let mut config: GatewayConfig = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .map_err(|e| GatewayError::config(format!("Failed to parse JSON config: {}", e)))?
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise start from defaults.
    ///
    /// Environment overrides and validation apply in both cases.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        if tokio::fs::try_exists(path.as_ref()).await.unwrap_or(false) {
            return Self::load_from_file(path).await;
        }

        tracing::warn!(path = ?path.as_ref(), "Configuration file not found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_<SECTION>_<FIELD>
    /// For example: GATEWAY_SERVER_PORT=8080
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(port) = env::var("GATEWAY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_PORT: {}", e)))?;
        }

        if let Ok(addr) = env::var("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(spec) = env::var("GATEWAY_ROUTING_OPENAPI_SPEC") {
            self.routing.openapi_spec = Some(PathBuf::from(spec));
        }

        if let Ok(upstream) = env::var("GATEWAY_FALLBACK_UPSTREAM") {
            self.fallback.upstream = Some(upstream);
        }

        if let Ok(page) = env::var("GATEWAY_FALLBACK_ERROR_PAGE") {
            self.fallback.error_page_url = Some(page);
        }

        if let Ok(mode) = env::var("GATEWAY_AUTH_MODE") {
            self.auth.mode = match mode.to_lowercase().as_str() {
                "standard" => AuthMode::Standard,
                "admin" => AuthMode::Admin,
                "isolated" => AuthMode::Isolated,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_AUTH_MODE: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(secret) = env::var("GATEWAY_AUTH_JWT_SECRET") {
            match self.auth.jwt.as_mut() {
                Some(jwt) => jwt.secret = Some(secret),
                None => {
                    self.auth.jwt = Some(JwtConfig {
                        secret: Some(secret),
                        public_key_file: None,
                        algorithm: default_jwt_algorithm(),
                        issuer: None,
                        audience: None,
                    })
                }
            }
        }

        if let Ok(timeout) = env::var("GATEWAY_PROXY_TIMEOUT") {
            self.proxy.timeout = humantime::parse_duration(&timeout)
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_PROXY_TIMEOUT: {}", e)))?;
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("GATEWAY_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> GatewayResult<()> {
        if self.server.bind_address.is_empty() {
            return Err(GatewayError::config("Bind address cannot be empty"));
        }

        if self.server.max_request_size == 0 {
            return Err(GatewayError::config("max_request_size must be greater than 0"));
        }

        if let Some(tls) = &self.server.tls {
            if tls.cert_file.as_os_str().is_empty() || tls.key_file.as_os_str().is_empty() {
                return Err(GatewayError::config("TLS requires both cert_file and key_file"));
            }
        }

        if self.routing.notification_capacity == 0 {
            return Err(GatewayError::config("notification_capacity must be greater than 0"));
        }

        if self.proxy.timeout.is_zero() {
            return Err(GatewayError::config("Proxy timeout must be greater than 0"));
        }

        for (name, url) in [
            ("fallback.upstream", &self.fallback.upstream),
            ("fallback.error_page_url", &self.fallback.error_page_url),
        ] {
            if let Some(url) = url {
                let parsed = Url::parse(url)
                    .map_err(|e| GatewayError::config(format!("Invalid {} '{}': {}", name, url, e)))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(GatewayError::config(format!(
                        "{} must use http or https, got '{}'",
                        name,
                        parsed.scheme()
                    )));
                }
            }
        }

        let restart = &self.restart;
        if restart.shutdown_timeout.is_zero()
            || restart.port_release_timeout.is_zero()
            || restart.probe_interval.is_zero()
            || restart.probe_timeout.is_zero()
            || restart.spec_debounce.is_zero()
        {
            return Err(GatewayError::config("Restart timeouts and intervals must be greater than 0"));
        }

        if self.tenants.reconcile_interval.is_zero() {
            return Err(GatewayError::config("tenants.reconcile_interval must be greater than 0"));
        }

        let mut names = HashSet::new();
        for mapping in &self.mappings {
            if !names.insert(mapping.name.as_str()) {
                return Err(GatewayError::config(format!(
                    "Duplicate mapping name found: {}",
                    mapping.name
                )));
            }
            mapping.entry.validate(&mapping.name)?;
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(GatewayError::config(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        if self.logging.format != "json" && self.logging.format != "pretty" {
            return Err(GatewayError::config(format!(
                "Invalid log format: {}",
                self.logging.format
            )));
        }

        if self.auth.mode.requires_token() && self.auth.jwt.is_none() {
            return Err(GatewayError::config(
                "auth.mode standard requires an auth.jwt section (or GATEWAY_AUTH_JWT_SECRET); \
                 use mode admin or isolated for unauthenticated deployments",
            ));
        }

        Ok(())
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// Listener port (0 lets the OS choose, useful in tests)
    pub port: u16,

    /// TLS certificate and key; plaintext when absent
    pub tls: Option<TlsConfig>,

    /// Maximum request body size forwarded to backends
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
            max_request_size: 10 * 1024 * 1024,
        }
    }
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to PEM certificate chain
    pub cert_file: PathBuf,

    /// Path to PEM private key
    pub key_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// External API root; may contain `{variable}` segments
    pub api_root: Option<String>,

    /// Declarative OpenAPI spec whose changes trigger a full restart
    pub openapi_spec: Option<PathBuf>,

    /// Capacity of the discovery and mapping notification channels
    pub notification_capacity: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            api_root: None,
            openapi_spec: None,
            notification_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Timeout for a single backend call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Upstream that receives every unmatched request
    pub upstream: Option<String>,

    /// Page substituted for upstream 404/301 responses
    pub error_page_url: Option<String>,

    /// Budget for fetching the custom error page
    #[serde(with = "humantime_serde")]
    pub error_page_timeout: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            upstream: None,
            error_page_url: None,
            error_page_timeout: Duration::from_secs(2),
        }
    }
}

/// Drain budgets used when the listener restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Time allowed for the server to stop after being asked to
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Time allowed for the TCP port to become free
    #[serde(with = "humantime_serde")]
    pub port_release_timeout: Duration,

    /// Interval between port probes
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,

    /// Dial timeout of a single port probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Quiet period after the last spec file event before a restart is requested
    #[serde(with = "humantime_serde")]
    pub spec_debounce: Duration,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(10),
            port_release_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(250),
            spec_debounce: Duration::from_millis(500),
        }
    }
}

/// Deployment mode deciding whether registered routes require a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Every registered route except health/debug requires a verified token
    #[default]
    Standard,
    /// Administrative deployment, unauthenticated access allowed
    Admin,
    /// Fully tenant-isolated deployment, unauthenticated access allowed
    Isolated,
}

impl AuthMode {
    pub fn requires_token(&self) -> bool {
        matches!(self, AuthMode::Standard)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,

    /// JWT verification settings; required in standard mode
    pub jwt: Option<JwtConfig>,

    /// Paths that never require a token
    pub exempt_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Standard,
            jwt: None,
            exempt_paths: vec!["/health".to_string(), "/debug".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Shared secret for HMAC algorithms
    pub secret: Option<String>,

    /// PEM public key for RSA/EC algorithms
    pub public_key_file: Option<PathBuf>,

    /// Algorithm name, e.g. `HS256` or `RS256`
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    pub issuer: Option<String>,
    pub audience: Option<String>,
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantsConfig {
    /// Period of the organization/project cache reconciler
    #[serde(with = "humantime_serde")]
    pub reconcile_interval: Duration,

    pub organizations: Vec<Organization>,
    pub projects: Vec<Project>,
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30),
            organizations: Vec::new(),
            projects: Vec::new(),
        }
    }
}

/// A named mapping entry from the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDefinition {
    pub name: String,

    #[serde(flatten)]
    pub entry: MappingEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,

    /// `json` or `pretty`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

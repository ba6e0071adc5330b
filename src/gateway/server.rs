//! # Gateway Server
//!
//! The axum application served by every listener generation. Besides the fixed
//! `/health` and `/debug` endpoints, every request goes through [`dispatch`]:
//!
//! 1. look the path and method up in the live [`RouteTable`]
//! 2. for a registered route, run the auth gate, remap the URI and proxy to the backend
//! 3. for anything else, relay the request to the fallback upstream
//!
//! Registered routes are consulted at request time, so routes added while serving are
//! live immediately without rebuilding the application.

use super::controller::ControllerStatus;
use crate::auth::AuthGate;
use crate::caching::tenants::TenantCaches;
use crate::core::config::GatewayConfig;
use crate::core::error::GatewayResult;
use crate::discovery::schema_registry::{SchemaNotifications, SchemaRegistry};
use crate::proxy::{FallbackProxy, UpstreamClient};
use crate::routing::remapper::UriRemapper;
use crate::routing::router::{RouteMatch, RouteTable};
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument, warn};

/// Every component a gateway instance shares across listener generations
pub struct GatewayServices {
    pub config: GatewayConfig,
    pub remapper: Arc<UriRemapper>,
    pub registry: Arc<SchemaRegistry>,
    pub routes: Arc<RouteTable>,
    pub tenants: Arc<TenantCaches>,
    pub auth: AuthGate,
    pub upstream: UpstreamClient,
    pub fallback: FallbackProxy,
}

impl GatewayServices {
    /// Build the services with the configured JWT verifier and tenant authorizer.
    ///
    /// Returns the receiving end of the registry's notification channel as well.
    pub async fn from_config(config: GatewayConfig) -> GatewayResult<(Self, SchemaNotifications)> {
        let tenants = Arc::new(TenantCaches::new());
        tenants.sync(
            config.tenants.organizations.clone(),
            config.tenants.projects.clone(),
        );
        let auth = AuthGate::from_config(&config.auth, tenants.clone()).await?;
        Self::with_auth(config, tenants, auth)
    }

    /// Build the services around an existing auth gate and tenant caches
    pub fn with_auth(
        config: GatewayConfig,
        tenants: Arc<TenantCaches>,
        auth: AuthGate,
    ) -> GatewayResult<(Self, SchemaNotifications)> {
        let remapper = match config.routing.api_root.as_deref() {
            Some(root) => UriRemapper::with_api_root(root),
            None => UriRemapper::new(),
        };
        let (registry, notifications) = SchemaRegistry::new(config.routing.notification_capacity);
        let upstream = UpstreamClient::new(config.proxy.timeout)?;
        let fallback = FallbackProxy::new(&config.fallback, upstream.clone());

        let services = Self {
            remapper: Arc::new(remapper),
            registry: Arc::new(registry),
            routes: Arc::new(RouteTable::new()),
            tenants,
            auth,
            upstream,
            fallback,
            config,
        };
        Ok((services, notifications))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<GatewayServices>,
    pub status: Arc<ControllerStatus>,
}

impl AppState {
    pub fn new(services: Arc<GatewayServices>, status: Arc<ControllerStatus>) -> Self {
        Self { services, status }
    }
}

/// `x-request-id` is set on arrival when absent and echoed on the response
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/debug", get(debug_info))
        .fallback(dispatch)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

/// Liveness probe
pub async fn health_check() -> impl IntoResponse {
    let health_info = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    });

    (StatusCode::OK, Json(health_info))
}

/// Aggregate view of controller, routes, mappings and tenants
pub async fn debug_info(State(state): State<AppState>) -> impl IntoResponse {
    let services = &state.services;
    let status = &state.status;

    Json(json!({
        "generation": status.generation(),
        "state": status.state(),
        "listener": status.local_addr().map(|a| a.to_string()),
        "restarts": status.counters().snapshot(),
        "auth_mode": services.auth.mode(),
        "routes": services.routes.routes(),
        "resource_types": services.registry.resource_types(),
        "mappings": services.remapper.keys(),
        "tenants": {
            "organizations": services.tenants.organizations.len(),
            "projects": services.tenants.projects.len(),
        },
    }))
}

#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let services = &state.services;

    let body = match axum::body::to_bytes(body, services.config.server.max_request_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let result = match services.routes.lookup(&parts.method, parts.uri.path()) {
        Some(matched) => handle_route(services, matched, &parts, body).await,
        None => {
            debug!("No registered route, using fallback");
            services
                .fallback
                .forward(parts.method.clone(), &parts.uri, &parts.headers, body)
                .await
        }
    };

    result.unwrap_or_else(IntoResponse::into_response)
}

async fn handle_route(
    services: &GatewayServices,
    matched: RouteMatch,
    parts: &Parts,
    body: Bytes,
) -> GatewayResult<Response> {
    let path = parts.uri.path();
    services.auth.check(path, &parts.headers, &matched.params).await?;

    let request_uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path);
    let remapped = services.remapper.remap(request_uri, &parts.headers)?;

    debug!(
        template = %matched.entry.template,
        route_method = %matched.entry.method,
        backend = %remapped.backend,
        service_uri = %remapped.service_uri,
        "Dispatching registered route"
    );

    services
        .upstream
        .forward(&remapped, parts.method.clone(), &parts.headers, body)
        .await
}

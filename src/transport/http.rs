//! HTTP transport.
//!
//! Every request runs inside a [`RequestScope`]: a middleware creates the scope, derives
//! the connection hint from request headers, and closes the scope (releasing any
//! connection the handler opened) once the response is produced. Routes configured
//! with a fixed connection overwrite the header-derived hint.

use crate::config::RouteConnectionConfig;
use crate::db::{ConnectionManager, RequestScope};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionHint, ConnectionSummary, ResolutionSource};
use crate::transport::Transport;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};

pub const CONNECTION_NAME_HEADER: &str = "x-connection-name";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const CONNECTION_PROVIDER_HEADER: &str = "x-connection-provider";
pub const CONNECTION_STRING_HEADER: &str = "x-connection-string";

/// Named connection a route is pinned to, regardless of request headers.
#[derive(Debug, Clone)]
pub struct RouteConnection(pub String);

#[derive(Clone)]
struct AppState {
    manager: ConnectionManager,
    allow_connection_string_hint: bool,
}

/// Build a connection hint from request headers.
///
/// `x-connection-name` takes precedence over `x-tenant-id`; both select a named
/// connection. `x-connection-string` is only honoured when `allow_connection_string`
/// is set. Empty and non-UTF-8 header values are ignored.
pub fn hint_from_headers(headers: &HeaderMap, allow_connection_string: bool) -> ConnectionHint {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let connection_string = if allow_connection_string {
        header(CONNECTION_STRING_HEADER)
    } else {
        if headers.contains_key(CONNECTION_STRING_HEADER) {
            warn!("Ignoring x-connection-string header; explicit connection strings are disabled");
        }
        None
    };

    ConnectionHint {
        named_connection: header(CONNECTION_NAME_HEADER).or_else(|| header(TENANT_ID_HEADER)),
        connection_string,
        provider_name: header(CONNECTION_PROVIDER_HEADER),
    }
}

/// Wraps each request in a request scope and tears it down after the response.
async fn request_scope_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let scope = Arc::new(RequestScope::new());
    let hint = hint_from_headers(request.headers(), state.allow_connection_string_hint);
    if !hint.is_empty() {
        debug!(
            request_id = %scope.id(),
            connection = ?hint.named_connection(),
            provider = ?hint.provider_name(),
            explicit = hint.connection_string().is_some(),
            "Attached connection hint from headers"
        );
        scope.attach_hint(hint);
    }

    request.extensions_mut().insert(Arc::clone(&scope));
    let response = next.run(request).await;
    scope.close().await;
    response
}

/// Pins the request to the route's configured connection.
async fn route_connection_middleware(
    Extension(route): Extension<RouteConnection>,
    Extension(scope): Extension<Arc<RequestScope>>,
    request: Request,
    next: Next,
) -> Response {
    scope.attach_hint(ConnectionHint::named(route.0));
    next.run(request).await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_connections(State(state): State<AppState>) -> Json<Vec<ConnectionSummary>> {
    Json(state.manager.list_connections())
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub request_id: String,
    pub source: ResolutionSource,
    pub provider: String,
    pub connection: String,
    pub server_version: String,
}

async fn ping(
    State(state): State<AppState>,
    Extension(scope): Extension<Arc<RequestScope>>,
) -> DbResult<Json<PingResponse>> {
    let connection = state.manager.get_connection(&scope).await?;
    connection.ping().await?;
    let server_version = connection.server_version().await?;

    Ok(Json(PingResponse {
        request_id: scope.id().to_string(),
        source: connection.source().clone(),
        provider: connection.provider_name().to_string(),
        connection: connection.masked_connection_string().to_string(),
        server_version,
    }))
}

/// HTTP transport serving the connection routing endpoints.
pub struct HttpTransport {
    manager: ConnectionManager,
    host: String,
    port: u16,
    allow_connection_string_hint: bool,
    routes: Vec<RouteConnectionConfig>,
}

impl HttpTransport {
    pub fn new(manager: ConnectionManager, host: impl Into<String>, port: u16) -> Self {
        Self {
            manager,
            host: host.into(),
            port,
            allow_connection_string_hint: false,
            routes: Vec::new(),
        }
    }

    /// Honour the `x-connection-string` header.
    pub fn allow_connection_string_hint(mut self, allow: bool) -> Self {
        self.allow_connection_string_hint = allow;
        self
    }

    /// Serve the ping handler at each route's path, pinned to its named connection.
    pub fn with_route_connections(mut self, routes: Vec<RouteConnectionConfig>) -> Self {
        self.routes = routes;
        self
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the application router.
    pub fn router(&self) -> Router {
        let state = AppState {
            manager: self.manager.clone(),
            allow_connection_string_hint: self.allow_connection_string_hint,
        };

        let mut router = Router::new()
            .route("/health", get(health))
            .route("/connections", get(list_connections))
            .route("/ping", get(ping));

        for route in &self.routes {
            if !self.manager.connections().names().contains(&route.connection) {
                warn!(
                    path = %route.path,
                    connection = %route.connection,
                    "Route is pinned to an unregistered connection"
                );
            }
            router = router.route(
                &route.path,
                get(ping)
                    .layer::<_, std::convert::Infallible>(middleware::from_fn(route_connection_middleware))
                    .layer(Extension(RouteConnection(route.connection.clone()))),
            );
        }

        router
            .layer(middleware::from_fn_with_state(
                state.clone(),
                request_scope_middleware,
            ))
            .with_state(state)
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting connection router with HTTP transport on {}", bind_addr);

        let app = self.router();

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::internal(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        // Long-running requests may keep the server alive, so force exit after a timeout
        // once the shutdown signal is received.
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for requests to finish (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Closing connection pools");
        self.manager.close_all().await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

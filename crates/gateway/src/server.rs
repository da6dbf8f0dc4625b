use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pidgate_resolver::{
    AdminIdentity, MutateOp, ResolutionEngine, ResolveError, ResolveFilter,
};
use pidgate_rewrite::{Decision, RedirectEngine, RequestContext, RewriteError};
use pidgate_store::StoreError;
use pidgate_types::{Handle, Value};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared state behind both surfaces.
pub struct GatewayState {
    pub resolution: ResolutionEngine,
    pub redirect: RedirectEngine,
    /// First path segment that marks an identifier request, e.g. `handle`.
    pub mount: String,
    /// Declarative rule source consumed by `/admin/rules/reload`.
    pub rule_source: Option<PathBuf>,
    pub start_time: Instant,
}

impl GatewayState {
    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

pub type SharedState = Arc<GatewayState>;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// HTTP-facing error with the taxonomy → status mapping.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "administrative operations are not available on this surface",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        let status = match &err {
            ResolveError::NotFound { .. } => StatusCode::NOT_FOUND,
            ResolveError::AlreadyExists { .. } | ResolveError::AdminChainBroken { .. } => {
                StatusCode::CONFLICT
            }
            ResolveError::InvalidAdmin { .. } | ResolveError::InvalidValue(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ResolveError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            ResolveError::StoreTimeout => StatusCode::GATEWAY_TIMEOUT,
            ResolveError::Store(store) => match store {
                StoreError::NotFound { .. } | StoreError::ValueNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                StoreError::AlreadyExists { .. }
                | StoreError::Conflict { .. }
                | StoreError::InvariantViolation { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ResolveError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<RewriteError> for ApiError {
    fn from(err: RewriteError) -> Self {
        let status = match &err {
            RewriteError::InvalidRule { .. } | RewriteError::Parse(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RewriteError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    handle_count: usize,
    rule_count: usize,
}

#[derive(Debug, Deserialize)]
struct ResolveQuery {
    #[serde(rename = "type")]
    value_type: Option<String>,
    index: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ResolveResponse {
    handle: Handle,
    values: Vec<Value>,
}

/// Rewrite/proxy directive for the front-end gateway to fulfill.
#[derive(Debug, Serialize)]
struct DirectiveResponse {
    action: &'static str,
    target: String,
}

#[derive(Debug, Serialize)]
struct FallthroughResponse {
    error: &'static str,
    fallthrough: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub handle: Handle,
    pub values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct MutateRequest {
    pub handle: Handle,
    pub op: MutateOp,
    pub caller: AdminIdentity,
}

#[derive(Debug, Serialize)]
struct VersionedResponse {
    handle: Handle,
    version: u64,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    handles: Vec<Handle>,
}

#[derive(Debug, Serialize)]
struct ReloadResponse {
    rules: usize,
}

/// Serve the read-only public surface.
pub async fn serve_public(state: SharedState, addr: &str) -> Result<()> {
    let app = public_router(state);
    let listener = bind_listener(addr).await?;
    info!(%addr, "public surface listening");
    axum::serve(listener, app)
        .await
        .context("public surface terminated unexpectedly")
}

/// Serve the restricted administrative surface (trusted network boundary).
pub async fn serve_admin(state: SharedState, addr: &str) -> Result<()> {
    let app = admin_router(state);
    let listener = bind_listener(addr).await?;
    info!(%addr, "administrative surface listening");
    axum::serve(listener, app)
        .await
        .context("administrative surface terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind listener on {addr}"))
    }
}

/// Public surface: identifier resolution, legacy-path routing, health. Any
/// administrative path is refused here before the permission model is ever
/// consulted.
pub fn public_router(state: SharedState) -> Router {
    let mount_route = format!("/{}/*id", state.mount);
    Router::new()
        .route("/health", get(handle_health))
        .route(&mount_route, get(handle_resolve_public))
        .route("/admin", axum::routing::any(handle_public_admin_block))
        .route("/admin/*rest", axum::routing::any(handle_public_admin_block))
        .fallback(handle_legacy_path)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Administrative surface: handle lifecycle, admin-visibility reads, rule
/// reload.
pub fn admin_router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/admin/handles",
            get(handle_list).post(handle_create),
        )
        .route("/admin/mutate", post(handle_mutate))
        .route("/admin/resolve/*id", get(handle_resolve_admin))
        .route("/admin/rules/reload", post(handle_rules_reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_seconds(),
        handle_count: state.resolution.handle_count(),
        rule_count: state.redirect.table().snapshot().len(),
    })
}

async fn handle_public_admin_block() -> ApiError {
    ApiError::forbidden()
}

/// Mount-point dispatch: an identifier-shaped tail goes to the resolution
/// engine; anything else under the mount falls through to the redirect
/// engine like every other legacy path.
async fn handle_resolve_public(
    State(state): State<SharedState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<ResolveQuery>,
    req: Request<Body>,
) -> Response {
    let Ok(handle) = Handle::parse(&id) else {
        let path = req.uri().path().to_string();
        let context = request_context(&req);
        let decision = state.redirect.route(&path, &context);
        return decision_response(&state, decision);
    };
    let filter = ResolveFilter {
        value_type: query.value_type,
        index: query.index,
        admin_visibility: false,
    };
    match state.resolution.resolve(&handle, &filter) {
        Ok(values) => Json(ResolveResponse { handle, values }).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn handle_resolve_admin(
    State(state): State<SharedState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let handle = Handle::parse(&id)
        .map_err(|err| ApiError::new(StatusCode::NOT_FOUND, err.to_string()))?;
    let filter = ResolveFilter {
        value_type: query.value_type,
        index: query.index,
        admin_visibility: true,
    };
    let values = state.resolution.resolve(&handle, &filter)?;
    Ok(Json(ResolveResponse { handle, values }))
}

/// Fallback: everything that is neither the mount point nor health is a
/// legacy path evaluated against the rule table.
async fn handle_legacy_path(State(state): State<SharedState>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    let context = request_context(&req);
    let decision = state.redirect.route(&path, &context);
    decision_response(&state, decision)
}

fn request_context(req: &Request<Body>) -> RequestContext {
    let mut context = RequestContext::default();
    for name in req.headers().keys() {
        context.headers.insert(name.as_str().to_ascii_lowercase());
    }
    if let Some(raw) = req.uri().query() {
        // Keys arrive percent-encoded on the wire; conditions compare the
        // decoded form.
        for (key, _) in form_urlencoded::parse(raw.as_bytes()) {
            if !key.is_empty() {
                context.query_params.insert(key.into_owned());
            }
        }
    }
    context
}

fn decision_response(state: &GatewayState, decision: Decision) -> Response {
    match decision {
        Decision::Rewrite(target) => Json(DirectiveResponse {
            action: "rewrite",
            target,
        })
        .into_response(),
        Decision::RedirectPermanent(target) => {
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, target)]).into_response()
        }
        Decision::RedirectTemporary(target) => {
            (StatusCode::FOUND, [(header::LOCATION, target)]).into_response()
        }
        Decision::Proxy(target) => proxy_response(state, target),
        Decision::NoMatch => (
            StatusCode::NOT_FOUND,
            Json(FallthroughResponse {
                error: "no matching rule",
                fallthrough: true,
            }),
        )
            .into_response(),
    }
}

/// A proxy target naming a mounted identifier is answered inline by the
/// resolution engine; anything else goes back to the front end as a
/// directive.
fn proxy_response(state: &GatewayState, target: String) -> Response {
    let stripped = target
        .trim_start_matches('/')
        .strip_prefix(&format!("{}/", state.mount))
        .map(str::to_string);

    let Some(id) = stripped else {
        return Json(DirectiveResponse {
            action: "proxy",
            target,
        })
        .into_response();
    };

    let Ok(handle) = Handle::parse(&id) else {
        warn!(target = %target, "proxy target is not a valid identifier");
        return Json(DirectiveResponse {
            action: "proxy",
            target,
        })
        .into_response();
    };

    match state.resolution.resolve(&handle, &ResolveFilter::default()) {
        Ok(values) => Json(ResolveResponse { handle, values }).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn handle_create(
    State(state): State<SharedState>,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<VersionedResponse>), ApiError> {
    let version = state
        .resolution
        .create(&request.handle, request.values)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(VersionedResponse {
            handle: request.handle,
            version,
        }),
    ))
}

async fn handle_mutate(
    State(state): State<SharedState>,
    Json(request): Json<MutateRequest>,
) -> Result<Json<VersionedResponse>, ApiError> {
    let version = state
        .resolution
        .mutate(&request.handle, request.op, &request.caller)
        .await?;
    Ok(Json(VersionedResponse {
        handle: request.handle,
        version,
    }))
}

async fn handle_list(
    State(state): State<SharedState>,
) -> Result<Json<ListResponse>, ApiError> {
    let handles = state.resolution.list_handles()?;
    Ok(Json(ListResponse { handles }))
}

async fn handle_rules_reload(
    State(state): State<SharedState>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let Some(source) = &state.rule_source else {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "no rule source configured",
        ));
    };
    state.redirect.table().load_file(source)?;
    let rules = state.redirect.table().snapshot().len();
    info!(rules, source = %source.display(), "rule table reloaded");
    Ok(Json(ReloadResponse { rules }))
}

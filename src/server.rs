use crate::{
    config::Config,
    errors::AppError,
    mcp::{
        registry::{CallRequest, CallResponse, ToolRegistry},
        types::{Capabilities, Endpoint, IndexResponse, ToolInfo},
    },
    sandbox::RootRegistry,
    security::{self, RateLimiters},
};
use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http::{header, HeaderValue, Method};
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub root: RootRegistry,
    pub registry: Arc<ToolRegistry>,
    pub rls: RateLimiters,
}

impl AppState {
    pub fn new(cfg: Config, root: RootRegistry, registry: ToolRegistry) -> Self {
        let l = &cfg.limits;
        let rls = RateLimiters::new(
            l.rate_per_token_rps,
            l.rate_per_token_burst,
            l.rate_global_rps,
            l.rate_global_burst,
        );
        Self { cfg: Arc::new(cfg), root, registry: Arc::new(registry), rls }
    }
}

pub type StreamBody = axum::body::Body;

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = format!("{}:{}", state.cfg.server.bind_addr, state.cfg.server.port)
        .parse()
        .context("parsing bind address")?;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown requested");
    }
}

pub fn build_router(shared: AppState) -> Router {
    let base = shared.cfg.server.base_path.trim_end_matches('/').to_string();
    let limit_bytes = shared.cfg.limits.max_request_kb * 1024;
    let cors = cors_layer(&shared.cfg.auth.allowed_origins);
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(health))
        .route(&format!("{base}/capabilities"), get(capabilities))
        .route(
            &format!("{base}/call"),
            post(call).layer(RequestBodyLimitLayer::new(limit_bytes)),
        )
        .route(
            &format!("{base}/tool/:tool"),
            get(call_named)
                .post(call_named)
                .layer(RequestBodyLimitLayer::new(limit_bytes)),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(shared)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(AllowOrigin::list(list))
    }
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = authorize(&state, &headers) {
        return e.into_response();
    }
    let base = state.cfg.server.base_path.trim_end_matches('/');
    let mut endpoints = vec![
        Endpoint { path: "/".into(), method: "GET", description: "This index - lists all available endpoints".into() },
        Endpoint { path: "/healthz".into(), method: "GET", description: "Liveness check".into() },
        Endpoint { path: format!("{base}/capabilities"), method: "GET", description: "Tool schemas".into() },
        Endpoint { path: format!("{base}/call"), method: "POST", description: "Call a tool by name".into() },
    ];
    endpoints.extend(state.registry.iter().map(|t| Endpoint {
        path: format!("{base}/tool/{}", t.name()),
        method: "POST",
        description: t.description().to_string(),
    }));
    let body = IndexResponse {
        name: "confine",
        version: env!("CARGO_PKG_VERSION"),
        allowed_root: state.root.get().display().to_string(),
        endpoints,
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn health(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    match authorize(&state, &headers) {
        Ok(()) => (StatusCode::OK, Json(json!({"status":"ok"}))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn capabilities(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = authorize(&state, &headers) {
        return e.into_response();
    }
    let tools: Vec<ToolInfo> = state
        .registry
        .iter()
        .map(|t| {
            let caps = t.capabilities();
            ToolInfo {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: caps["input"].clone(),
                output_schema: caps["output"].clone(),
            }
        })
        .collect();
    let caps = Capabilities {
        mcp_version: "1.0",
        tools,
        streaming: true,
    };
    (StatusCode::OK, Json(caps)).into_response()
}

async fn call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CallRequest>,
) -> Response {
    let audit = Audit::begin(&headers, &req.tool);
    if let Err(e) = admit(&state, &headers) {
        audit.finish("deny", e.code(), 0, None);
        return e.into_response();
    }
    let Some(tool) = state.registry.get(&req.tool) else {
        let e = AppError::NotFound;
        audit.finish("deny", e.code(), 0, None);
        return e.into_response();
    };

    if req.stream {
        return match tool.call_stream(req.params).await {
            Ok(body) => {
                audit.finish("allow", "OK", 0, Some(true));
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/x-ndjson")],
                    body,
                )
                    .into_response()
            }
            Err(e) => {
                audit.finish("error", e.code(), 0, Some(true));
                e.into_response()
            }
        };
    }

    match tool.call(req.params).await {
        Ok(result) => {
            let payload = CallResponse::ok(req.id, result);
            audit.finish_ok(&payload);
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(e) => {
            let body = CallResponse::err(req.id, &e);
            let bytes_out = serde_json::to_vec(&body).map(|v| v.len()).unwrap_or(0) as u64;
            audit.finish("error", e.code(), bytes_out, Some(false));
            (e.status(), Json(body)).into_response()
        }
    }
}

/// One tool per URL; the body is the params object and the reply is the bare result.
async fn call_named(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    let audit = Audit::begin(&headers, &name);
    if let Err(e) = admit(&state, &headers) {
        audit.finish("deny", e.code(), 0, None);
        return e.into_response();
    }
    let Some(tool) = state.registry.get(&name) else {
        let e = AppError::NotFound;
        audit.finish("deny", e.code(), 0, None);
        return e.into_response();
    };
    let params = body.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    match tool.call(params).await {
        Ok(result) => {
            let bytes_out = serde_json::to_vec(&result).map(|v| v.len()).unwrap_or(0) as u64;
            audit.finish("allow", "OK", bytes_out, Some(false));
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => {
            audit.finish("error", e.code(), 0, Some(false));
            e.into_response()
        }
    }
}

struct Audit {
    request_id: String,
    origin: String,
    token_present: bool,
    tool: String,
    started: Instant,
}

impl Audit {
    fn begin(headers: &HeaderMap, tool: &str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            origin: headers
                .get("Origin")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string(),
            token_present: security::extract_bearer(headers).is_some(),
            tool: tool.to_string(),
            started: Instant::now(),
        }
    }

    fn duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn finish(&self, decision: &str, code: &str, bytes_out: u64, streaming: Option<bool>) {
        tracing::info!(
            request_id = %self.request_id,
            origin = %self.origin,
            token_present = self.token_present,
            tool = %self.tool,
            decision = decision,
            code = code,
            duration_ms = self.duration_ms(),
            bytes_out = bytes_out,
            streaming = ?streaming,
            "audit"
        );
    }

    fn finish_ok(&self, payload: &CallResponse) {
        let bytes_out = serde_json::to_vec(payload).map(|v| v.len()).unwrap_or(0) as u64;
        let Some(rc) = payload.result.as_ref().filter(|_| self.tool == "exec") else {
            self.finish("allow", "OK", bytes_out, Some(false));
            return;
        };
        let text_len = |k: &str| rc.get(k).and_then(|v| v.as_str()).map(|s| s.len()).unwrap_or(0);
        tracing::info!(
            request_id = %self.request_id,
            origin = %self.origin,
            token_present = self.token_present,
            tool = "exec",
            decision = "allow",
            code = "OK",
            duration_ms = self.duration_ms(),
            stdout_len = text_len("stdout"),
            stderr_len = text_len("stderr"),
            exit_code = rc.get("exit_code").and_then(|v| v.as_i64()),
            truncated = rc.get("truncated").and_then(|v| v.as_bool()),
            timed_out = rc.get("timed_out").and_then(|v| v.as_bool()),
            "audit"
        );
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    security::require_bearer(headers, state.cfg.auth.bearer_token.as_deref())?;
    security::check_origin(headers, &state.cfg.auth.allowed_origins)?;
    Ok(())
}

fn admit(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    authorize(state, headers)?;
    security::content_length_ok(headers, state.cfg.limits.max_request_kb)?;
    let key = security::rate_key(headers, state.cfg.auth.bearer_token.as_deref());
    state.rls.check(key.as_deref())
}

// src/api/mod.rs
//! Read API over the news store.

pub mod rate_limit;
pub mod request_log;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};

use crate::config::{sources::sources_as_json, Settings};
use crate::store::{NewsQuery, Record, UpsertStore};

pub use rate_limit::{KeyStrategy, RateLimiter};
pub use request_log::RequestLogConfig;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<UpsertStore>,
    pub sources_path: PathBuf,
    pub api_keys: Arc<Vec<String>>,
    pub cors_origins: Vec<String>,
    pub limiter: Arc<RateLimiter>,
    pub request_log: Arc<RequestLogConfig>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn from_settings(settings: &Settings, store: Arc<UpsertStore>) -> Self {
        Self {
            store,
            sources_path: settings.sources_path.clone(),
            api_keys: Arc::new(settings.api_keys.clone()),
            cors_origins: settings.cors_origins.clone(),
            limiter: Arc::new(RateLimiter::new(
                settings.rate_limit_per_minute,
                settings.rate_limit_burst,
                settings.rate_limit_key_strategy,
                settings.rate_limit_idle_ttl,
            )),
            request_log: Arc::new(RequestLogConfig {
                headers: settings.request_log_headers.clone(),
                include_query: settings.request_log_query,
            }),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::very_permissive();
    }
    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(target: "http", origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(list)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/sources", get(list_sources))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .route("/news", get(list_news))
        .route("/news/count", get(count_news))
        .route("/metrics", get(render_metrics))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit::rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.request_log.clone(),
            request_log::request_log_middleware,
        ))
        .layer(cors_layer(&state.cors_origins))
        .with_state(state)
}

fn detail(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": msg.into() }))).into_response()
}

async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.api_keys.is_empty() {
        let presented = req
            .headers()
            .get(rate_limit::API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if !presented.is_some_and(|k| state.api_keys.iter().any(|a| a == k)) {
            return detail(StatusCode::UNAUTHORIZED, "Invalid or missing API key");
        }
    }
    next.run(req).await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Record as exposed over HTTP; tags are the comma-joined string.
#[derive(Debug, Serialize)]
pub struct NewsOut {
    pub id: i64,
    pub source_name: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub summary: String,
    pub content: String,
    pub language: String,
    pub tags: String,
}

impl From<Record> for NewsOut {
    fn from(r: Record) -> Self {
        Self {
            tags: crate::tagger::join_tags(&r.tags),
            id: r.id,
            source_name: r.source_name,
            title: r.title,
            url: r.url,
            published_at: r.published_at,
            summary: r.summary,
            content: r.content,
            language: r.language,
        }
    }
}

fn parse_query(q: Result<Query<NewsQuery>, QueryRejection>) -> Result<NewsQuery, Response> {
    let Query(q) = q.map_err(|e| detail(StatusCode::UNPROCESSABLE_ENTITY, e.body_text()))?;
    q.validate()
        .map_err(|e| detail(StatusCode::UNPROCESSABLE_ENTITY, e))?;
    Ok(q)
}

async fn list_news(
    State(state): State<AppState>,
    q: Result<Query<NewsQuery>, QueryRejection>,
) -> Result<Json<Vec<NewsOut>>, Response> {
    let q = parse_query(q)?;
    let rows = state.store.query(&q).await;
    Ok(Json(rows.into_iter().map(NewsOut::from).collect()))
}

async fn count_news(
    State(state): State<AppState>,
    q: Result<Query<NewsQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, Response> {
    let q = parse_query(q)?;
    let n = state.store.count(&q).await;
    Ok(Json(json!({ "count": n })))
}

async fn list_sources(State(state): State<AppState>) -> Response {
    let path = state.sources_path.clone();
    let loaded = tokio::task::spawn_blocking(move || sources_as_json(&path)).await;
    match loaded {
        Ok(Ok(sources)) => Json(json!({ "sources": sources })).into_response(),
        Ok(Err(e)) => {
            tracing::error!(target: "http", error = ?e, "failed to read sources file");
            detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Could not read sources file: {e}"),
            )
        }
        Err(e) => detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(h) => h.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

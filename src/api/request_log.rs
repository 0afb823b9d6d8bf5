// src/api/request_log.rs
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};

use super::rate_limit::{client_ip, API_KEY_HEADER};

#[derive(Debug, Clone, Default)]
pub struct RequestLogConfig {
    /// Lowercased header names to include in the log line.
    pub headers: Vec<String>,
    pub include_query: bool,
}

/// `abcdefgh` -> `abc***gh`; keys of five chars or fewer become `***`.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 5 {
        return "***".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}

fn logged_headers(req: &Request, allow: &[String]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in allow {
        let Some(v) = req.headers().get(name.as_str()).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let v = if name == API_KEY_HEADER && !v.is_empty() {
            mask_api_key(v)
        } else {
            v.to_string()
        };
        out.insert(name.clone(), v);
    }
    out
}

fn query_map(req: &Request) -> BTreeMap<String, String> {
    Query::<BTreeMap<String, String>>::try_from_uri(req.uri())
        .map(|Query(m)| m)
        .unwrap_or_default()
}

pub async fn request_log_middleware(
    State(cfg): State<Arc<RequestLogConfig>>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let client = client_ip(&req);
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let headers = logged_headers(&req, &cfg.headers);
    let query = if cfg.include_query {
        query_map(&req)
    } else {
        BTreeMap::new()
    };

    let rsp = next.run(req).await;

    tracing::info!(
        target: "http",
        %client,
        %method,
        %path,
        status = rsp.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        headers = ?headers,
        query = ?query,
        "request"
    );
    rsp
}

// tests/common/mod.rs
//
// Shared helpers for integration tests: local HTTP peers, fixtures, body reads.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{body, response::Response, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use commodities_news::config::{Settings, SourceConfig, SourceKind};
use commodities_news::ingest::types::Item;

pub const BODY_LIMIT: usize = 1024 * 1024;

/// Serve `app` on an ephemeral local port; returns its address.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    addr
}

pub fn ts(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
}

pub fn item(url: &str, title: &str, summary: &str, published_at: DateTime<Utc>) -> Item {
    Item {
        source_name: "Test Wire".into(),
        title: title.into(),
        url: url.into(),
        published_at,
        summary: summary.into(),
        content: summary.into(),
        language: "en".into(),
        raw: Map::new(),
    }
}

pub fn rss_source(name: &str, url: &str) -> SourceConfig {
    SourceConfig {
        name: name.into(),
        kind: SourceKind::Rss,
        url: url.into(),
        language: "en".into(),
        enabled: true,
        translate_to_tr: false,
    }
}

/// Minimal RSS 2.0 document; entries are (title, link, pubDate, description).
pub fn rss_xml(entries: &[(&str, &str, &str, &str)]) -> String {
    let items: String = entries
        .iter()
        .map(|(t, l, p, d)| {
            format!(
                "<item><title>{t}</title><link>{l}</link><pubDate>{p}</pubDate><description>{d}</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Test Feed</title><link>https://feed.test/</link>{items}</channel></rss>"#
    )
}

/// Settings from defaults plus the given overrides; never touches process env.
pub fn settings(pairs: &[(&str, &str)]) -> Settings {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Settings::from_lookup(|k| map.get(k).cloned()).expect("test settings")
}

pub async fn body_json(resp: Response) -> Value {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

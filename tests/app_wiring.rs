// tests/app_wiring.rs
//
// Full process wiring from settings and files on disk: feed server, sources
// file, JSON store, and a webhook receiver.

mod common;

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use serde_json::Value;
use serial_test::serial;
use tokio::sync::Mutex;

use commodities_news::app::App;
use commodities_news::config::Settings;

use common::{rss_xml, settings, spawn_server};

#[tokio::test]
async fn once_run_persists_and_notifies() {
    let xml = rss_xml(&[(
        "Copper and nickel surge",
        "https://feed.test/metals",
        "Wed, 06 Mar 2024 07:30:00 GMT",
        "Base metals bid",
    )]);
    let feed = spawn_server(Router::new().route("/rss", get(move || async move { xml }))).await;

    let received: Arc<Mutex<Vec<Value>>> = Arc::default();
    let hook = spawn_server(
        Router::new()
            .route(
                "/hook",
                post(|State(r): State<Arc<Mutex<Vec<Value>>>>, Json(v): Json<Value>| async move {
                    r.lock().await.push(v);
                    StatusCode::OK
                }),
            )
            .with_state(received.clone()),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let sources = dir.path().join("sources.yml");
    std::fs::write(
        &sources,
        format!(
            "sources:\n  - name: Metals\n    type: rss\n    url: http://{feed}/rss\n  - name: Off\n    url: http://127.0.0.1:9/rss\n    enabled: false\n"
        ),
    )
    .unwrap();
    let store_path = dir.path().join("data").join("news.json");

    let sources_s = sources.to_string_lossy().to_string();
    let store_s = store_path.to_string_lossy().to_string();
    let hook_s = format!("http://{hook}/hook");
    let s = settings(&[
        ("SOURCES_PATH", sources_s.as_str()),
        ("STORE_PATH", store_s.as_str()),
        ("WEBHOOK_URLS", hook_s.as_str()),
    ]);
    let app = App::build(s, false).await.unwrap();
    assert!(store_path.exists(), "store document created at startup");

    let summary = app.run_once().await;
    assert_eq!(summary.total_inserted, 1);
    assert!(!summary.per_source.contains_key("Off"));

    let got = received.lock().await.clone();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["record"]["tags"], "copper,nickel");

    // second run is a no-op replay
    let summary = app.run_once().await;
    assert_eq!(summary.total_inserted, 0);
    assert_eq!(received.lock().await.len(), 1);

    let on_disk = std::fs::read_to_string(&store_path).unwrap();
    assert!(on_disk.contains("https://feed.test/metals"));
}

#[tokio::test]
async fn missing_sources_file_is_a_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    let sources_s = dir.path().join("nope.yml").to_string_lossy().to_string();
    let store_s = dir.path().join("news.json").to_string_lossy().to_string();
    let s = settings(&[
        ("SOURCES_PATH", sources_s.as_str()),
        ("STORE_PATH", store_s.as_str()),
    ]);
    assert!(App::build(s, false).await.is_err());
}

#[test]
#[serial]
fn settings_read_from_process_env() {
    std::env::set_var("RATE_LIMIT_PER_MINUTE", "30");
    std::env::set_var("SCHEDULE_CRON", "0 6 * * *");
    let s = Settings::from_env();
    std::env::remove_var("RATE_LIMIT_PER_MINUTE");
    std::env::remove_var("SCHEDULE_CRON");

    let s = s.unwrap();
    assert_eq!(s.rate_limit_per_minute, 30);
    assert_eq!(s.schedule_cron, "0 6 * * *");
}

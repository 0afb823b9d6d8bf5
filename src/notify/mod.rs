// src/notify/mod.rs
//! Outbound notifications for newly created records.

pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::store::Record;

pub use webhook::{DeliveryOutcome, RetryPolicy, WebhookNotifier};

/// Receives the records created during one ingestion run.
#[async_trait]
pub trait BatchNotifier: Send + Sync {
    async fn notify_batch(&self, records: Vec<Record>);
}

/// Used when no webhook endpoints are configured.
pub struct NoopNotifier;

#[async_trait]
impl BatchNotifier for NoopNotifier {
    async fn notify_batch(&self, _records: Vec<Record>) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord<'a> {
    pub source_name: &'a str,
    pub title: &'a str,
    pub url: &'a str,
    pub published_at: String,
    pub summary: &'a str,
    pub content: &'a str,
    pub language: &'a str,
    /// Comma-joined sorted tags, same as the stored form.
    pub tags: String,
}

/// Wire body: `{"event":"news.created","record":{...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent<'a> {
    pub event: &'static str,
    pub record: EventRecord<'a>,
}

impl<'a> WebhookEvent<'a> {
    pub const CREATED: &'static str = "news.created";

    pub fn created(r: &'a Record) -> Self {
        Self {
            event: Self::CREATED,
            record: EventRecord {
                source_name: &r.source_name,
                title: &r.title,
                url: &r.url,
                published_at: r.published_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                summary: &r.summary,
                content: &r.content,
                language: &r.language,
                tags: crate::tagger::join_tags(&r.tags),
            },
        }
    }
}

/// Hands batches to a background worker so the caller never waits on delivery.
pub struct QueuedNotifier {
    tx: mpsc::UnboundedSender<Vec<Record>>,
}

impl QueuedNotifier {
    /// Spawns the worker on the current tokio runtime. The worker exits once
    /// every sender is dropped and the queue is drained.
    pub fn spawn(inner: Arc<dyn BatchNotifier>) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Record>>();
        let handle = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let n = batch.len();
                inner.notify_batch(batch).await;
                tracing::debug!(target: "webhook", records = n, "notification batch processed");
            }
        });
        (Self { tx }, handle)
    }
}

#[async_trait]
impl BatchNotifier for QueuedNotifier {
    async fn notify_batch(&self, records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        if self.tx.send(records).is_err() {
            tracing::warn!(target: "webhook", "notification worker gone, batch dropped");
        }
    }
}

/// Build the configured notifier: webhooks (behind the queue when `queued`),
/// or a no-op without endpoints.
pub fn from_endpoints(endpoints: Vec<String>, queued: bool) -> Arc<dyn BatchNotifier> {
    if endpoints.is_empty() {
        return Arc::new(NoopNotifier);
    }
    let webhook: Arc<dyn BatchNotifier> = Arc::new(WebhookNotifier::new(endpoints));
    if !queued {
        return webhook;
    }
    let (queued, _worker) = QueuedNotifier::spawn(webhook);
    Arc::new(queued)
}

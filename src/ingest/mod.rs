// src/ingest/mod.rs
pub mod sources;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::SourceConfig;
use crate::ingest::sources::Source;
use crate::ingest::types::SourceAdapter;
use crate::notify::BatchNotifier;
use crate::store::{Record, UpsertStore};
use crate::tagger;
use crate::translate::TranslationChain;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Completed ingestion runs.");
        describe_counter!("ingest_events_total", "Items parsed from sources.");
        describe_counter!("ingest_inserted_total", "Records created by upsert.");
        describe_counter!("ingest_updated_total", "Records merged from a newer item.");
        describe_counter!(
            "ingest_provider_errors_total",
            "Source fetch/parse errors."
        );
        describe_counter!("ingest_store_errors_total", "Per-item store failures.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingest pipeline last ran."
        );
    });
}

/// Plain text from feed markup: decode entities, strip tags, collapse whitespace.
pub fn clean_html(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").to_string();

    // Tags replaced by a space can leave " ." before punctuation
    static RE_PUNCT: OnceCell<regex::Regex> = OnceCell::new();
    let re_punct = RE_PUNCT.get_or_init(|| regex::Regex::new(r" ([.,;:!?])").expect("punct regex"));
    out = re_punct.replace_all(&out, "$1").to_string();

    out.trim().to_string()
}

/// A source as the pipeline sees it: enabled flag plus fetch capability.
#[derive(Clone)]
pub struct PipelineSource {
    pub enabled: bool,
    pub adapter: Arc<dyn SourceAdapter>,
}

impl PipelineSource {
    pub fn new(adapter: Arc<dyn SourceAdapter>, enabled: bool) -> Self {
        Self { enabled, adapter }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: bool,
}

/// Sources sharing a name are summed into one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub per_source: BTreeMap<String, SourceSummary>,
    pub total_inserted: usize,
}

pub struct IngestionPipeline {
    sources: Vec<PipelineSource>,
    store: Arc<UpsertStore>,
    notifier: Arc<dyn BatchNotifier>,
}

impl IngestionPipeline {
    pub fn new(
        sources: Vec<PipelineSource>,
        store: Arc<UpsertStore>,
        notifier: Arc<dyn BatchNotifier>,
    ) -> Self {
        Self {
            sources,
            store,
            notifier,
        }
    }

    /// Build pipeline sources from config, all sharing one translation chain.
    pub fn sources_from_config(
        configs: &[SourceConfig],
        translator: Arc<TranslationChain>,
    ) -> Vec<PipelineSource> {
        configs
            .iter()
            .map(|cfg| {
                let adapter: Arc<dyn SourceAdapter> = Arc::new(Source::from_config(cfg, &translator));
                PipelineSource::new(adapter, cfg.enabled)
            })
            .collect()
    }

    pub fn store(&self) -> &Arc<UpsertStore> {
        &self.store
    }

    /// One pass over every enabled source. Never fails: source and store errors
    /// are logged and isolated, notification happens after all writes.
    pub async fn run_once(&self) -> RunSummary {
        ensure_metrics_described();

        let mut summary = RunSummary::default();
        let mut created: Vec<Record> = Vec::new();

        for src in self.sources.iter().filter(|s| s.enabled) {
            let name = src.adapter.name().to_string();
            let stats = summary.per_source.entry(name.clone()).or_default();

            let items = match src.adapter.fetch().await {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(target: "ingest", source = %name, error = ?e, "source fetch failed");
                    stats.failed = true;
                    continue;
                }
            };
            stats.fetched += items.len();

            for item in &items {
                let tags = tagger::tag(&item.tag_text(), &item.language);
                match self.store.upsert(item, &tags).await {
                    Ok(res) if res.inserted => {
                        stats.inserted += 1;
                        created.push(res.record);
                    }
                    Ok(res) if res.updated => {
                        stats.updated += 1;
                        tracing::debug!(target: "ingest", url = %item.url, "record updated");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        counter!("ingest_store_errors_total").increment(1);
                        tracing::warn!(target: "ingest", source = %name, url = %item.url, error = %e, "upsert failed, skipping item");
                    }
                }
            }

            tracing::info!(
                target: "ingest",
                source = %name,
                fetched = stats.fetched,
                inserted = stats.inserted,
                "source processed"
            );
        }

        summary.total_inserted = created.len();
        counter!("ingest_runs_total").increment(1);
        counter!("ingest_inserted_total").increment(created.len() as u64);
        counter!("ingest_updated_total")
            .increment(summary.per_source.values().map(|s| s.updated as u64).sum());
        gauge!("ingest_pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(target: "ingest", total_inserted = summary.total_inserted, "ingest run done");

        if !created.is_empty() {
            self.notifier.notify_batch(created).await;
        }

        summary
    }
}

#[async_trait::async_trait]
impl crate::scheduler::Job for IngestionPipeline {
    async fn run(&self) {
        let _ = self.run_once().await;
    }
}

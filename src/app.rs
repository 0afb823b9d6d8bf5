// src/app.rs
//! Process wiring: settings -> store, sources, translation, notifier, pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::api::{self, AppState};
use crate::config::{load_sources_from, LogFormat, Settings};
use crate::ingest::{IngestionPipeline, RunSummary};
use crate::metrics::Metrics;
use crate::notify;
use crate::scheduler::CronScheduler;
use crate::store::UpsertStore;
use crate::translate::TranslationChain;

/// `LOG_LEVEL` as the default directive, with the chatty HTTP stacks held at `warn`.
pub fn log_filter(log_level: &str) -> EnvFilter {
    EnvFilter::new(format!("{log_level},hyper=warn,h2=warn,reqwest=warn,rustls=warn"))
}

/// `RUST_LOG` wins; otherwise [`log_filter`] with `LOG_LEVEL`.
pub fn init_tracing(settings: &Settings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter(&settings.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    // try_init: a subscriber may already be installed
    let _ = match settings.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
    };
}

pub struct App {
    pub settings: Settings,
    pub store: Arc<UpsertStore>,
    pub pipeline: Arc<IngestionPipeline>,
}

impl App {
    /// Open the store, load sources and build the pipeline. With
    /// `queue_webhooks` delivery runs on a background worker; without it a run
    /// only returns once its webhooks are delivered or abandoned.
    pub async fn build(settings: Settings, queue_webhooks: bool) -> Result<Self> {
        let store = Arc::new(
            UpsertStore::open(&settings.store_path)
                .await
                .with_context(|| format!("opening store at {}", settings.store_path.display()))?,
        );
        store.ensure_schema().await.context("preparing store")?;

        let file = load_sources_from(&settings.sources_path)?;
        let translator = Arc::new(TranslationChain::from_config(&file.translation));
        tracing::info!(
            target: "app",
            sources = file.sources.len(),
            enabled = file.sources.iter().filter(|s| s.enabled).count(),
            translators = ?translator.provider_names(),
            "sources loaded"
        );

        let sources = IngestionPipeline::sources_from_config(&file.sources, translator);
        let notifier = notify::from_endpoints(settings.webhook_urls.clone(), queue_webhooks);
        let pipeline = Arc::new(IngestionPipeline::new(sources, store.clone(), notifier));

        Ok(Self {
            settings,
            store,
            pipeline,
        })
    }

    pub async fn run_once(&self) -> RunSummary {
        self.pipeline.run_once().await
    }

    pub fn scheduler(&self) -> Result<Arc<CronScheduler>> {
        let s = &self.settings;
        let sched = CronScheduler::from_expr(
            &s.schedule_cron,
            s.timezone,
            s.misfire_grace,
            self.pipeline.clone(),
        )?;
        Ok(Arc::new(sched))
    }

    /// Scheduler only, until ctrl-c.
    pub async fn run_scheduler(&self) -> Result<()> {
        let handle = self.scheduler()?.spawn();
        tracing::info!(target: "app", cron = %self.settings.schedule_cron, "scheduler running");
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        handle.abort();
        Ok(())
    }

    /// Read API (plus scheduler unless disabled) until ctrl-c.
    pub async fn serve(&self, with_scheduler: bool) -> Result<()> {
        let metrics = Metrics::init(self.settings.rate_limit_per_minute)?;
        let state = AppState::from_settings(&self.settings, self.store.clone())
            .with_metrics(metrics.handle.clone());
        let sweeper = state.limiter.clone().spawn_sweeper();
        let scheduler = if with_scheduler {
            Some(self.scheduler()?.spawn())
        } else {
            None
        };

        let listener = tokio::net::TcpListener::bind(&self.settings.bind_addr)
            .await
            .with_context(|| format!("binding {}", self.settings.bind_addr))?;
        tracing::info!(target: "app", addr = %self.settings.bind_addr, scheduler = with_scheduler, "listening");

        let app = api::router(state);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")?;

        sweeper.abort();
        if let Some(h) = scheduler {
            h.abort();
        }
        Ok(())
    }
}

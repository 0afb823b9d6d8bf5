// src/ingest/sources/mod.rs
pub mod rss;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{SourceConfig, SourceKind};
use crate::ingest::types::{Item, SourceAdapter};
use crate::translate::TranslationChain;

pub use rss::RssSource;

/// Closed set of supported feed protocols.
pub enum Source {
    Rss(RssSource),
}

impl Source {
    pub fn from_config(cfg: &SourceConfig, translator: &Arc<TranslationChain>) -> Self {
        match cfg.kind {
            SourceKind::Rss => Source::Rss(RssSource::new(cfg, Some(translator.clone()))),
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for Source {
    async fn fetch(&self) -> Result<Vec<Item>> {
        match self {
            Source::Rss(s) => s.fetch().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Source::Rss(s) => s.name(),
        }
    }
}

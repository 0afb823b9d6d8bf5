// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A single article as produced by one fetch of one source. Never persisted as-is;
/// the store turns it into a [`crate::store::Record`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Item {
    pub source_name: String,
    pub title: String,
    pub url: String, // natural key
    pub published_at: DateTime<Utc>,
    pub summary: String,
    pub content: String,
    pub language: String, // may be empty
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl Item {
    /// Text the tagger looks at.
    pub fn tag_text(&self) -> String {
        format!("{} {}", self.title, self.summary)
    }
}

/// Fetch capability shared by every source protocol.
///
/// Errors mean "upstream unavailable"; callers log them and treat the source as
/// having produced zero items for this run.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Item>>;
    fn name(&self) -> &str;
}

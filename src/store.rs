// src/store.rs
//! URL-keyed record store with newest-wins merge.
//!
//! Records live in memory behind one async mutex and are mirrored to a JSON
//! document on disk (temp file + rename) after every mutation. A failed write
//! rolls the in-memory change back so disk and memory never diverge.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::ingest::types::Item;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store document is not valid json: {0}")]
    Serde(#[from] serde_json::Error),
}

mod tags_serde {
    use std::collections::BTreeSet;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::tagger::{join_tags, split_tags};

    pub fn serialize<S: Serializer>(tags: &BTreeSet<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&join_tags(tags))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<String>, D::Error> {
        let joined = String::deserialize(d)?;
        Ok(split_tags(&joined))
    }
}

/// Persisted, deduplicated article. One per distinct `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub source_name: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub summary: String,
    pub content: String,
    pub language: String,
    #[serde(with = "tags_serde")]
    pub tags: BTreeSet<String>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl Record {
    fn from_item(id: i64, item: &Item, tags: &BTreeSet<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            source_name: item.source_name.clone(),
            title: item.title.clone(),
            url: item.url.clone(),
            published_at: item.published_at,
            summary: item.summary.clone(),
            content: item.content.clone(),
            language: item.language.clone(),
            tags: tags.clone(),
            fetched_at: now,
            raw: item.raw.clone(),
        }
    }

    /// Apply a strictly newer sighting of the same url.
    fn merge_newer(&mut self, item: &Item, tags: &BTreeSet<String>) {
        fn take(dst: &mut String, src: &str) {
            if !src.is_empty() {
                *dst = src.to_string();
            }
        }
        take(&mut self.title, &item.title);
        take(&mut self.summary, &item.summary);
        take(&mut self.content, &item.content);
        take(&mut self.language, &item.language);
        take(&mut self.source_name, &item.source_name);
        self.published_at = item.published_at;
        if !tags.is_empty() {
            self.tags = tags.clone();
        }
        for (k, v) in &item.raw {
            self.raw.insert(k.clone(), v.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    pub inserted: bool,
    /// An existing record was merged from a newer item.
    pub updated: bool,
    pub record: Record,
}

enum Change {
    Inserted(usize),
    Updated { idx: usize, previous: Box<Record> },
    Unchanged(usize),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    next_id: i64,
    records: Vec<Record>,
}

#[derive(Default)]
struct StoreState {
    doc: Document,
    by_url: HashMap<String, usize>,
}

impl StoreState {
    fn from_document(mut doc: Document) -> Self {
        let max_id = doc.records.iter().map(|r| r.id).max().unwrap_or(0);
        doc.next_id = doc.next_id.max(max_id + 1).max(1);
        let by_url = doc
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.url.clone(), i))
            .collect();
        Self { doc, by_url }
    }

    fn apply(&mut self, item: &Item, tags: &BTreeSet<String>, now: DateTime<Utc>) -> Change {
        match self.by_url.get(&item.url).copied() {
            None => {
                let id = self.doc.next_id.max(1);
                self.doc.next_id = id + 1;
                self.doc.records.push(Record::from_item(id, item, tags, now));
                let idx = self.doc.records.len() - 1;
                self.by_url.insert(item.url.clone(), idx);
                Change::Inserted(idx)
            }
            Some(idx) => {
                let rec = &mut self.doc.records[idx];
                if item.published_at > rec.published_at {
                    let previous = Box::new(rec.clone());
                    rec.merge_newer(item, tags);
                    Change::Updated { idx, previous }
                } else {
                    Change::Unchanged(idx)
                }
            }
        }
    }

    fn revert(&mut self, change: Change) {
        match change {
            Change::Inserted(idx) => {
                let rec = self.doc.records.remove(idx);
                self.by_url.remove(&rec.url);
                self.doc.next_id = rec.id;
            }
            Change::Updated { idx, previous } => self.doc.records[idx] = *previous,
            Change::Unchanged(_) => {}
        }
    }
}

pub struct UpsertStore {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl UpsertStore {
    /// Volatile store, used by tests and `--once` dry runs.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState::from_document(Document::default())),
        }
    }

    /// Open (or lazily create) the JSON document at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => Document::default(),
            Ok(s) => serde_json::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path: Some(path),
            state: Mutex::new(StoreState::from_document(doc)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Idempotent: make sure the backing document exists. Called once at startup.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }
        let state = self.state.lock().await;
        write_document(path, &state.doc).await
    }

    /// Insert a new url or merge a strictly newer sighting of a known one.
    pub async fn upsert(
        &self,
        item: &Item,
        tags: &BTreeSet<String>,
    ) -> Result<UpsertResult, StoreError> {
        let mut state = self.state.lock().await;
        let change = state.apply(item, tags, Utc::now());
        let (idx, inserted, updated) = match &change {
            Change::Inserted(idx) => (*idx, true, false),
            Change::Updated { idx, .. } => (*idx, false, true),
            Change::Unchanged(idx) => (*idx, false, false),
        };

        if inserted || updated {
            if let Some(path) = &self.path {
                if let Err(e) = write_document(path, &state.doc).await {
                    state.revert(change);
                    return Err(e);
                }
            }
        }

        Ok(UpsertResult {
            inserted,
            updated,
            record: state.doc.records[idx].clone(),
        })
    }

    pub async fn get_by_url(&self, url: &str) -> Option<Record> {
        let state = self.state.lock().await;
        state
            .by_url
            .get(url)
            .map(|&idx| state.doc.records[idx].clone())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.doc.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn query(&self, q: &NewsQuery) -> Vec<Record> {
        let state = self.state.lock().await;
        let mut rows: Vec<&Record> = state.doc.records.iter().filter(|r| q.matches(r)).collect();
        rows.sort_by_key(|r| r.id);
        if q.descending() {
            rows.reverse();
        }
        rows.into_iter()
            .skip(q.offset.unwrap_or(0) as usize)
            .take(q.limit())
            .cloned()
            .collect()
    }

    pub async fn count(&self, q: &NewsQuery) -> usize {
        let state = self.state.lock().await;
        state.doc.records.iter().filter(|r| q.matches(r)).count()
    }
}

async fn write_document(path: &Path, doc: &Document) -> Result<(), StoreError> {
    let io = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io)?;
    }
    let json = serde_json::to_vec_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await.map_err(io)?;
    tokio::fs::rename(&tmp, path).await.map_err(io)?;
    Ok(())
}

// ------------------------------------------------------------
// Read-side predicate
// ------------------------------------------------------------

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 200;

/// Filters accepted by `GET /news` and `GET /news/count`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewsQuery {
    pub q: Option<String>,
    pub source: Option<String>,
    pub lang: Option<String>,
    pub tag: Option<String>,
    pub published_from: Option<DateTime<Utc>>,
    pub published_to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub order: Option<String>,
}

impl NewsQuery {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(limit) = self.limit {
            if limit == 0 || limit as usize > MAX_LIMIT {
                return Err(format!("limit must be between 1 and {MAX_LIMIT}"));
            }
        }
        match self.order.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") | Some("desc") => Ok(()),
            Some(other) => Err(format!("order must be asc or desc, got {other:?}")),
        }
    }

    fn limit(&self) -> usize {
        self.limit
            .map(|l| (l as usize).clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT)
    }

    fn descending(&self) -> bool {
        !matches!(self.order.as_deref(), Some(o) if o.eq_ignore_ascii_case("asc"))
    }

    pub fn matches(&self, r: &Record) -> bool {
        fn ci_contains(hay: &str, needle: &str) -> bool {
            hay.to_lowercase().contains(&needle.to_lowercase())
        }
        let nonempty = |o: &Option<String>| o.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

        if let Some(source) = nonempty(&self.source) {
            if r.source_name != source {
                return false;
            }
        }
        if let Some(lang) = nonempty(&self.lang) {
            if r.language != lang {
                return false;
            }
        }
        if let Some(tag) = nonempty(&self.tag) {
            if !ci_contains(&crate::tagger::join_tags(&r.tags), &tag) {
                return false;
            }
        }
        if let Some(from) = self.published_from {
            if r.published_at < from {
                return false;
            }
        }
        if let Some(to) = self.published_to {
            if r.published_at >= to {
                return false;
            }
        }
        if let Some(q) = nonempty(&self.q) {
            if !(ci_contains(&r.title, &q) || ci_contains(&r.summary, &q) || ci_contains(&r.content, &q))
            {
                return false;
            }
        }
        true
    }
}

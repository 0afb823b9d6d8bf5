// src/ingest/sources/rss.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use feed_rs::model::{Entry, Feed, Link};
use metrics::{counter, histogram};
use serde_json::{json, Map};

use crate::config::SourceConfig;
use crate::ingest::clean_html;
use crate::ingest::types::{Item, SourceAdapter};
use crate::translate::TranslationChain;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Protocol-neutral view of a parsed feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub link: String,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub summary: String,
}

impl FeedEntry {
    /// `published`, then `updated`, then `now`.
    pub fn resolve_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.published.or(self.updated).unwrap_or(now)
    }

    fn from_entry(e: Entry) -> Self {
        let link = alternate_href(&e.links).unwrap_or_else(|| {
            // RSS guids are often the permalink
            let id = e.id.trim();
            if id.starts_with("http://") || id.starts_with("https://") {
                id.to_string()
            } else {
                String::new()
            }
        });
        let summary = e
            .summary
            .map(|s| s.content)
            .or_else(|| e.content.and_then(|c| c.body))
            .unwrap_or_default();
        Self {
            title: e.title.map(|t| t.content).unwrap_or_default(),
            link,
            published: e.published,
            updated: e.updated,
            summary,
        }
    }
}

/// First link without a rel or with `rel="alternate"`, else the first non-empty one.
fn alternate_href(links: &[Link]) -> Option<String> {
    let usable = || links.iter().filter(|l| !l.href.trim().is_empty());
    usable()
        .find(|l| matches!(l.rel.as_deref(), None | Some("") | Some("alternate")))
        .or_else(|| usable().next())
        .map(|l| l.href.trim().to_string())
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/// Parse an RSS 0.9x/1.0/2.0 or Atom document.
pub fn parse_feed(xml: &str) -> Result<ParsedFeed> {
    let t0 = std::time::Instant::now();
    let xml = scrub_html_entities_for_xml(xml);
    let feed: Feed = feed_rs::parser::parse(xml.as_bytes()).context("parsing feed xml")?;

    let parsed = ParsedFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        link: alternate_href(&feed.links).unwrap_or_default(),
        entries: feed.entries.into_iter().map(FeedEntry::from_entry).collect(),
    };

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(parsed)
}

/// RSS/Atom source. Keeps only the newest entry per fetch.
pub struct RssSource {
    name: String,
    url: String,
    language: String,
    translator: Option<Arc<TranslationChain>>,
    client: reqwest::Client,
}

impl RssSource {
    /// `translator` is only kept when the source has translate-on-ingest enabled.
    pub fn new(cfg: &SourceConfig, translator: Option<Arc<TranslationChain>>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("commodities-news/0.1")
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            name: cfg.name.clone(),
            url: cfg.url.clone(),
            language: cfg.language.clone(),
            translator: translator.filter(|_| cfg.translate_to_tr),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn download(&self) -> Result<String> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("{} http get()", self.name))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("{} responded with {status}", self.name);
        }
        resp.text()
            .await
            .with_context(|| format!("{} http .text()", self.name))
    }

    /// Turn a feed document into at most one `Item`.
    pub async fn items_from_feed(&self, xml: &str) -> Result<Vec<Item>> {
        let feed = parse_feed(xml)?;
        let Some(entry) = feed.entries.first() else {
            return Ok(Vec::new());
        };

        let link = entry.link.trim().to_string();
        if link.is_empty() {
            tracing::warn!(target: "ingest", source = %self.name, "newest entry has no link, skipping");
            return Ok(Vec::new());
        }

        let published_at = entry.resolve_timestamp(Utc::now());
        let mut title = entry.title.trim().to_string();
        let mut summary = clean_html(&entry.summary);
        let mut language = if self.language.is_empty() {
            "en".to_string()
        } else {
            self.language.clone()
        };

        let mut raw = Map::new();
        if let Some(chain) = &self.translator {
            if language.to_lowercase().starts_with("en") {
                let tr_title = chain.translate(&title, "en", "tr").await;
                let tr_summary = chain.translate(&summary, "en", "tr").await;
                raw.insert(
                    "original".into(),
                    json!({ "title": title, "summary": summary, "language": language }),
                );
                title = tr_title;
                summary = tr_summary;
                language = "tr".to_string();
            }
        }
        raw.insert("feed".into(), json!({ "title": feed.title, "link": feed.link }));
        raw.insert(
            "entry".into(),
            json!({
                "title": entry.title,
                "link": entry.link,
                "published": entry.published.map(rfc3339),
                "updated": entry.updated.map(rfc3339),
            }),
        );

        Ok(vec![Item {
            source_name: self.name.clone(),
            title,
            url: link,
            published_at,
            content: summary.clone(),
            summary,
            language,
            raw,
        }])
    }
}

#[async_trait]
impl SourceAdapter for RssSource {
    async fn fetch(&self) -> Result<Vec<Item>> {
        let body = match self.download().await {
            Ok(body) => body,
            Err(e) => {
                counter!("ingest_provider_errors_total").increment(1);
                return Err(e);
            }
        };
        let items = self.items_from_feed(&body).await?;
        counter!("ingest_events_total").increment(items.len() as u64);
        Ok(items)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Commodity Wire</title>
    <link>https://wire.example</link>
    <item>
      <title> Gold hits record </title>
      <link>https://wire.example/gold</link>
      <pubDate>Tue, 02 Sep 2025 10:00:00 GMT</pubDate>
      <description><![CDATA[<p>Gold&nbsp;rallied <b>again</b>.</p>]]></description>
    </item>
    <item>
      <title>Older story</title>
      <link>https://wire.example/old</link>
      <pubDate>Mon, 01 Sep 2025 10:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Desk</title>
  <link href="https://atom.example/"/>
  <entry>
    <title>Copper slides</title>
    <link rel="alternate" href="https://atom.example/copper"/>
    <updated>2025-09-03T08:30:00Z</updated>
    <summary>Copper &amp; nickel fall</summary>
  </entry>
</feed>"#;

    fn cfg(lang: &str, translate: bool) -> SourceConfig {
        SourceConfig {
            name: "Wire".into(),
            kind: SourceKind::Rss,
            url: "http://127.0.0.1:9/feed".into(),
            language: lang.into(),
            enabled: true,
            translate_to_tr: translate,
        }
    }

    #[test]
    fn parses_rss_channel_and_items() {
        let feed = parse_feed(RSS).unwrap();
        assert_eq!(feed.title, "Commodity Wire");
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].link, "https://wire.example/gold");
    }

    #[test]
    fn parses_atom_and_falls_back_to_updated() {
        let feed = parse_feed(ATOM).unwrap();
        assert_eq!(feed.link, "https://atom.example/");
        let e = &feed.entries[0];
        assert_eq!(e.link, "https://atom.example/copper");
        let ts = e.resolve_timestamp(Utc::now());
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 9, 3, 8, 30, 0).unwrap());
    }

    #[test]
    fn missing_dates_default_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(FeedEntry::default().resolve_timestamp(now), now);

        let xml = r#"<rss version="2.0"><channel><title>T</title>
            <item><title>Undated</title><link>https://wire.example/u</link></item>
        </channel></rss>"#;
        let feed = parse_feed(xml).unwrap();
        assert_eq!(feed.entries[0].resolve_timestamp(now), now);
    }

    #[test]
    fn rss_channel_with_atom_self_link() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Markets</title>
    <link>https://markets.example/</link>
    <atom:link href="https://markets.example/feed/" rel="self" type="application/rss+xml"/>
    <description>Latest</description>
    <item>
      <title>Brent edges up</title>
      <link>https://markets.example/brent</link>
      <pubDate>Wed, 03 Sep 2025 06:15:00 +0000</pubDate>
      <description>Oil prices rose.</description>
    </item>
  </channel>
</rss>"#;
        let feed = parse_feed(xml).unwrap();
        assert_eq!(feed.title, "Markets");
        assert_eq!(feed.link, "https://markets.example/");
        assert_eq!(feed.entries.len(), 1);
        let e = &feed.entries[0];
        assert_eq!(e.title, "Brent edges up");
        assert_eq!(e.link, "https://markets.example/brent");
        assert_eq!(e.published, Some(Utc.with_ymd_and_hms(2025, 9, 3, 6, 15, 0).unwrap()));
    }

    #[test]
    fn items_with_media_elements() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Pictures</title>
    <link>https://pics.example/</link>
    <item>
      <title>Wheat harvest</title>
      <link>https://pics.example/wheat</link>
      <description>Harvest begins early.</description>
      <pubDate>Thu, 04 Sep 2025 12:00:00 GMT</pubDate>
      <media:content url="https://pics.example/wheat.jpg" medium="image">
        <media:title>Wheat field</media:title>
        <media:description>A field at dawn</media:description>
      </media:content>
      <media:title>Field photo</media:title>
    </item>
  </channel>
</rss>"#;
        let feed = parse_feed(xml).unwrap();
        let e = &feed.entries[0];
        assert_eq!(e.title, "Wheat harvest");
        assert_eq!(e.link, "https://pics.example/wheat");
        assert_eq!(e.summary, "Harvest begins early.");
    }

    #[test]
    fn parses_rdf_feeds() {
        let xml = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel rdf:about="https://rdf.example/">
    <title>RDF Desk</title>
    <link>https://rdf.example/</link>
    <description>Metals</description>
  </channel>
  <item rdf:about="https://rdf.example/silver">
    <title>Silver steady</title>
    <link>https://rdf.example/silver</link>
    <description>Silver unchanged.</description>
  </item>
</rdf:RDF>"#;
        let feed = parse_feed(xml).unwrap();
        assert_eq!(feed.title, "RDF Desk");
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(feed.entries[0].title, "Silver steady");
        assert_eq!(feed.entries[0].link, "https://rdf.example/silver");
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_feed("<html><body>nope</body></html>").is_err());
    }

    #[tokio::test]
    async fn keeps_only_newest_entry_with_clean_summary() {
        let src = RssSource::new(&cfg("", false), None);
        let items = src.items_from_feed(RSS).await.unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.title, "Gold hits record");
        assert_eq!(it.summary, "Gold rallied again.");
        assert_eq!(it.content, it.summary);
        assert_eq!(it.language, "en");
        assert_eq!(
            it.published_at,
            Utc.with_ymd_and_hms(2025, 9, 2, 10, 0, 0).unwrap()
        );
        assert_eq!(it.raw["feed"]["title"], "Commodity Wire");
        assert!(it.raw.get("original").is_none());
    }

    #[tokio::test]
    async fn translation_failure_passes_text_through_and_relabels() {
        // empty chain = every provider failed
        let chain = Arc::new(TranslationChain::default());
        let src = RssSource::new(&cfg("en-US", true), Some(chain));
        let items = src.items_from_feed(RSS).await.unwrap();
        let it = &items[0];
        assert_eq!(it.language, "tr");
        assert_eq!(it.title, "Gold hits record");
        assert_eq!(it.raw["original"]["language"], "en-US");
        assert_eq!(it.raw["original"]["title"], "Gold hits record");
    }

    #[tokio::test]
    async fn non_english_sources_are_not_translated() {
        let chain = Arc::new(TranslationChain::default());
        let src = RssSource::new(&cfg("tr", true), Some(chain));
        let items = src.items_from_feed(ATOM).await.unwrap();
        assert_eq!(items[0].language, "tr");
        assert!(items[0].raw.get("original").is_none());
        assert_eq!(items[0].summary, "Copper & nickel fall");
    }
}

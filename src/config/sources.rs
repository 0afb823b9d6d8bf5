// src/config/sources.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::translate::TranslationConfig;

/// Feed protocols the pipeline knows how to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Rss,
}

impl SourceKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "rss" | "atom" => Some(Self::Rss),
            _ => None,
        }
    }
}

/// One source descriptor as it appears in the sources file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub url: String,
    pub language: String,
    pub enabled: bool,
    pub translate_to_tr: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SourcesFile {
    pub sources: Vec<SourceConfig>,
    pub translation: TranslationConfig,
}

// Loose on-disk shape; normalized into `SourceConfig`.
#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    rss_url: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    translate_to_tr: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFile {
    // legacy: top-level list
    List(Vec<RawSource>),
    Doc {
        #[serde(default)]
        sources: Vec<RawSource>,
        #[serde(default)]
        translation: Option<TranslationConfig>,
    },
}

fn read_with_ext(path: &Path) -> Result<(String, String)> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    Ok((content, ext))
}

/// Load sources from an explicit path. YAML, TOML or JSON by extension.
pub fn load_sources_from(path: &Path) -> Result<SourcesFile> {
    let (content, ext) = read_with_ext(path)?;
    parse_sources(&content, ext.as_str())
}

/// Source entries exactly as written in the file, as served by `GET /sources`.
/// Entries the pipeline would skip (no url, unknown type) are included.
pub fn sources_as_json(path: &Path) -> Result<serde_json::Value> {
    let (content, ext) = read_with_ext(path)?;
    raw_source_entries(&content, ext.as_str())
}

pub fn raw_source_entries(s: &str, hint_ext: &str) -> Result<serde_json::Value> {
    use serde_json::Value;
    if s.trim().is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let doc: Value = match hint_ext {
        "toml" => toml::from_str(s).context("parsing sources toml")?,
        "json" => serde_json::from_str(s).context("parsing sources json")?,
        _ => serde_yaml::from_str(s).context("parsing sources yaml")?,
    };
    Ok(match doc {
        Value::Array(list) => Value::Array(list),
        Value::Object(mut map) => map
            .remove("sources")
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| Value::Array(Vec::new())),
        _ => Value::Array(Vec::new()),
    })
}

/// An empty file is an empty configuration.
pub fn parse_sources(s: &str, hint_ext: &str) -> Result<SourcesFile> {
    if s.trim().is_empty() {
        tracing::warn!(target: "config", "sources file is empty");
        return Ok(SourcesFile::default());
    }
    let raw: RawFile = match hint_ext {
        "toml" => toml::from_str(s).context("parsing sources toml")?,
        "json" => serde_json::from_str(s).context("parsing sources json")?,
        "yml" | "yaml" => serde_yaml::from_str(s).context("parsing sources yaml")?,
        // YAML is a superset of JSON, so it's the best guess for unknown extensions.
        _ => serde_yaml::from_str(s).map_err(|e| anyhow!("unsupported sources format: {e}"))?,
    };
    let (list, translation) = match raw {
        RawFile::List(list) => (list, None),
        RawFile::Doc {
            sources,
            translation,
        } => (sources, translation),
    };
    Ok(SourcesFile {
        sources: list.into_iter().filter_map(normalize).collect(),
        translation: translation.unwrap_or_default(),
    })
}

fn normalize(raw: RawSource) -> Option<SourceConfig> {
    let url = raw
        .rss_url
        .or(raw.url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())?;
    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Unnamed".to_string());
    let kind_str = raw.kind.unwrap_or_default();
    let Some(kind) = SourceKind::parse(&kind_str) else {
        tracing::warn!(target: "config", source = %name, kind = %kind_str, "unsupported source type, skipping");
        return None;
    };
    Some(SourceConfig {
        name,
        kind,
        url,
        language: raw.language.unwrap_or_default().trim().to_string(),
        enabled: raw.enabled.unwrap_or(true),
        translate_to_tr: raw.translate_to_tr.unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_document_with_translation_block() {
        let yaml = r#"
sources:
  - name: Reuters Commodities
    type: rss
    url: https://example.test/reuters.xml
    language: en
    translate_to_tr: true
  - name: Legacy
    rss_url: https://example.test/legacy.xml
    enabled: false
  - name: NoUrl
translation:
  provider_primary: libretranslate
  provider_fallback: mymemory
  libretranslate:
    endpoint: http://lt.local/translate
  mymemory:
    endpoint: http://mm.local/get
"#;
        let f = parse_sources(yaml, "yml").unwrap();
        assert_eq!(f.sources.len(), 2);
        assert_eq!(f.sources[0].name, "Reuters Commodities");
        assert!(f.sources[0].translate_to_tr);
        assert!(f.sources[0].enabled);
        assert_eq!(f.sources[1].url, "https://example.test/legacy.xml");
        assert!(!f.sources[1].enabled);
        assert_eq!(f.translation.provider_primary.as_deref(), Some("libretranslate"));
        assert_eq!(
            f.translation.mymemory.endpoint.as_deref(),
            Some("http://mm.local/get")
        );
    }

    #[test]
    fn legacy_list_and_json_and_toml() {
        let json = r#"[{"name":"A","url":"http://a"}]"#;
        let f = parse_sources(json, "json").unwrap();
        assert_eq!(f.sources.len(), 1);
        assert_eq!(f.sources[0].kind, SourceKind::Rss);
        assert!(f.translation.provider_primary.is_none());

        let toml = r#"
[[sources]]
name = "B"
url = "http://b"
language = "tr"
"#;
        let t = parse_sources(toml, "toml").unwrap();
        assert_eq!(t.sources[0].language, "tr");
    }

    #[test]
    fn unknown_type_is_skipped() {
        let yaml = r#"
- name: Api
  type: json-api
  url: http://x
- name: Feed
  url: http://y
"#;
        let f = parse_sources(yaml, "yaml").unwrap();
        assert_eq!(f.sources.len(), 1);
        assert_eq!(f.sources[0].name, "Feed");
    }

    #[test]
    fn empty_file_is_an_empty_configuration() {
        let f = parse_sources("  \n", "yml").unwrap();
        assert!(f.sources.is_empty());
        assert!(f.translation.provider_primary.is_none());
        assert_eq!(raw_source_entries("", "yml").unwrap(), serde_json::json!([]));
    }

    #[test]
    fn raw_entries_keep_what_the_loader_skips() {
        let yaml = r#"
sources:
  - name: Feed
    rss_url: http://y
    extra: kept
  - name: NoUrl
  - name: Api
    type: json-api
    url: http://x
translation:
  provider_primary: mymemory
"#;
        let v = raw_source_entries(yaml, "yml").unwrap();
        assert_eq!(
            v,
            serde_json::json!([
                {"name": "Feed", "rss_url": "http://y", "extra": "kept"},
                {"name": "NoUrl"},
                {"name": "Api", "type": "json-api", "url": "http://x"}
            ])
        );
        assert_eq!(parse_sources(yaml, "yml").unwrap().sources.len(), 1);

        let legacy = raw_source_entries(r#"[{"name":"A"}]"#, "json").unwrap();
        assert_eq!(legacy, serde_json::json!([{"name": "A"}]));
        assert_eq!(raw_source_entries("translation: {}", "yaml").unwrap(), serde_json::json!([]));
    }
}

//! Translation with an ordered provider fallback chain.
//!
//! Providers are tried in configuration order. Any failure (transport error,
//! non-2xx, malformed payload, empty output) falls through to the next one; when
//! the whole chain fails the input text is returned untouched.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Per-call timeout for provider requests.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

// ------------------------------------------------------------
// Configuration
// ------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// `translation:` block of the sources file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default)]
    pub provider_primary: Option<String>,
    #[serde(default)]
    pub provider_fallback: Option<String>,
    #[serde(default)]
    pub libretranslate: EndpointConfig,
    #[serde(default)]
    pub mymemory: EndpointConfig,
}

impl TranslationConfig {
    /// Provider identifiers in the order they should be tried.
    fn ordered_ids(&self) -> Vec<String> {
        [&self.provider_primary, &self.provider_fallback]
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

#[async_trait::async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("commodities-news/0.1")
        .connect_timeout(Duration::from_secs(4))
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// LibreTranslate: `POST {q, source, target, format}` → `{"translatedText": ...}`.
pub struct LibreTranslate {
    http: reqwest::Client,
    endpoint: String,
}

impl LibreTranslate {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl TranslationProvider for LibreTranslate {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Req<'a> {
            q: &'a str,
            source: &'a str,
            target: &'a str,
            format: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(rename = "translatedText")]
            translated_text: Option<String>,
            #[serde(rename = "translated_text")]
            translated_text_alt: Option<String>,
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&Req {
                q: text,
                source: source_lang,
                target: target_lang,
                format: "text",
            })
            .send()
            .await
            .context("libretranslate request")?;
        if !resp.status().is_success() {
            bail!("libretranslate status {}", resp.status());
        }
        let body: Resp = resp.json().await.context("libretranslate payload")?;
        body.translated_text
            .or(body.translated_text_alt)
            .ok_or_else(|| anyhow!("libretranslate payload without translatedText"))
    }

    fn name(&self) -> &'static str {
        "libretranslate"
    }
}

/// MyMemory: `GET ?q=..&langpair=src|dst` → `{"responseData": {"translatedText": ...}}`.
pub struct MyMemory {
    http: reqwest::Client,
    endpoint: String,
}

impl MyMemory {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl TranslationProvider for MyMemory {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Resp {
            #[serde(rename = "responseData")]
            response_data: Option<ResponseData>,
        }
        #[derive(Deserialize)]
        struct ResponseData {
            #[serde(rename = "translatedText")]
            translated_text: Option<String>,
        }

        let langpair = format!("{source_lang}|{target_lang}");
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("q", text), ("langpair", langpair.as_str())])
            .send()
            .await
            .context("mymemory request")?;
        if !resp.status().is_success() {
            bail!("mymemory status {}", resp.status());
        }
        let body: Resp = resp.json().await.context("mymemory payload")?;
        body.response_data
            .and_then(|d| d.translated_text)
            .ok_or_else(|| anyhow!("mymemory payload without translatedText"))
    }

    fn name(&self) -> &'static str {
        "mymemory"
    }
}

// ------------------------------------------------------------
// Chain
// ------------------------------------------------------------

#[derive(Clone, Default)]
pub struct TranslationChain {
    providers: Vec<Arc<dyn TranslationProvider>>,
}

impl TranslationChain {
    pub fn new(providers: Vec<Arc<dyn TranslationProvider>>) -> Self {
        Self { providers }
    }

    /// Build the chain from config. Unknown identifiers and providers without an
    /// endpoint are skipped with a warning.
    pub fn from_config(cfg: &TranslationConfig) -> Self {
        let mut providers: Vec<Arc<dyn TranslationProvider>> = Vec::new();
        for id in cfg.ordered_ids() {
            let endpoint = match id.as_str() {
                "libretranslate" => cfg.libretranslate.endpoint.clone(),
                "mymemory" => cfg.mymemory.endpoint.clone(),
                other => {
                    tracing::warn!(target: "translate", provider = other, "unknown translation provider");
                    continue;
                }
            };
            let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) else {
                tracing::warn!(target: "translate", provider = %id, "provider has no endpoint");
                continue;
            };
            match id.as_str() {
                "libretranslate" => providers.push(Arc::new(LibreTranslate::new(endpoint))),
                _ => providers.push(Arc::new(MyMemory::new(endpoint))),
            }
        }
        Self { providers }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        for provider in &self.providers {
            let call = provider.translate(text, source_lang, target_lang);
            match tokio::time::timeout(PROVIDER_TIMEOUT, call).await {
                Ok(Ok(out)) if !out.trim().is_empty() => return out,
                Ok(Ok(_)) => {
                    tracing::debug!(target: "translate", provider = provider.name(), "empty translation");
                }
                Ok(Err(e)) => {
                    tracing::debug!(target: "translate", provider = provider.name(), error = ?e, "provider failed");
                }
                Err(_) => {
                    tracing::debug!(target: "translate", provider = provider.name(), "provider timed out");
                }
            }
            metrics::counter!("translate_provider_failures_total", "provider" => provider.name().to_string())
                .increment(1);
        }
        text.to_string()
    }
}

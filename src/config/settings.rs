// src/config/settings.rs
//! Process settings read from the environment (after `.env` is loaded).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::api::rate_limit::KeyStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub store_path: PathBuf,
    pub sources_path: PathBuf,
    pub bind_addr: String,

    pub schedule_cron: String,
    pub timezone: chrono_tz::Tz,
    pub misfire_grace: Duration,

    pub log_level: String,
    pub log_format: LogFormat,

    pub api_keys: Vec<String>,
    pub cors_origins: Vec<String>,
    pub webhook_urls: Vec<String>,

    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
    pub rate_limit_key_strategy: KeyStrategy,
    pub rate_limit_idle_ttl: Duration,

    pub request_log_headers: Vec<String>,
    pub request_log_query: bool,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build settings from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |k: &str, default: &str| get(k).unwrap_or_else(|| default.to_string());
        let num = |k: &str, default: u64| -> Result<u64> {
            match get(k) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{k} must be a non-negative integer, got {v:?}")),
                None => Ok(default),
            }
        };

        let tz_name = var("TZ", "Europe/Istanbul");
        let timezone = chrono_tz::Tz::from_str(tz_name.trim())
            .map_err(|e| anyhow!("invalid TZ {tz_name:?}: {e}"))?;

        let per_minute = num("RATE_LIMIT_PER_MINUTE", 120)?.max(1);
        let burst = num("RATE_LIMIT_BURST", 200)?.max(1);

        let strategy_raw = var("RATE_LIMIT_KEY_STRATEGY", "api_key_or_ip");
        let rate_limit_key_strategy = KeyStrategy::from_str(&strategy_raw)?;

        let log_format = match var("LOG_FORMAT", "compact").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        Ok(Self {
            store_path: PathBuf::from(var("STORE_PATH", "data/news.json")),
            sources_path: PathBuf::from(var("SOURCES_PATH", "config/sources.yml")),
            bind_addr: var("BIND_ADDR", "0.0.0.0:8000"),
            schedule_cron: var("SCHEDULE_CRON", "*/15 * * * *"),
            timezone,
            misfire_grace: Duration::from_secs(num("MISFIRE_GRACE_SECS", 3600)?),
            log_level: var("LOG_LEVEL", "info").to_ascii_lowercase(),
            log_format,
            api_keys: split_list(&var("API_KEYS", "")),
            cors_origins: split_list(&var("CORS_ORIGINS", "*")),
            webhook_urls: split_list(&var("WEBHOOK_URLS", "")),
            rate_limit_per_minute: u32::try_from(per_minute).unwrap_or(u32::MAX),
            rate_limit_burst: u32::try_from(burst).unwrap_or(u32::MAX),
            rate_limit_key_strategy,
            rate_limit_idle_ttl: Duration::from_secs(num("RATE_LIMIT_IDLE_TTL_SECS", 600)?),
            request_log_headers: split_list(&var("REQUEST_LOG_HEADERS", "x-api-key,user-agent"))
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            request_log_query: parse_bool(&var("REQUEST_LOG_QUERY", "true")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(s.schedule_cron, "*/15 * * * *");
        assert_eq!(s.timezone, chrono_tz::Europe::Istanbul);
        assert_eq!(s.misfire_grace, Duration::from_secs(3600));
        assert_eq!(s.rate_limit_per_minute, 120);
        assert_eq!(s.rate_limit_burst, 200);
        assert_eq!(s.rate_limit_key_strategy, KeyStrategy::ApiKeyOrIp);
        assert_eq!(s.cors_origins, vec!["*".to_string()]);
        assert!(s.webhook_urls.is_empty());
        assert!(s.request_log_query);
        assert_eq!(s.log_format, LogFormat::Compact);
    }

    #[test]
    fn lists_and_overrides_are_parsed() {
        let s = Settings::from_lookup(lookup(&[
            ("WEBHOOK_URLS", " http://a/hook, ,http://b/hook "),
            ("API_KEYS", "k1,k2"),
            ("RATE_LIMIT_PER_MINUTE", "60"),
            ("RATE_LIMIT_BURST", "5"),
            ("RATE_LIMIT_KEY_STRATEGY", "IP"),
            ("TZ", "UTC"),
            ("LOG_FORMAT", "json"),
            ("REQUEST_LOG_QUERY", "false"),
        ]))
        .unwrap();
        assert_eq!(s.webhook_urls, vec!["http://a/hook", "http://b/hook"]);
        assert_eq!(s.api_keys.len(), 2);
        assert_eq!(s.rate_limit_per_minute, 60);
        assert_eq!(s.rate_limit_burst, 5);
        assert_eq!(s.rate_limit_key_strategy, KeyStrategy::Ip);
        assert_eq!(s.timezone, chrono_tz::UTC);
        assert_eq!(s.log_format, LogFormat::Json);
        assert!(!s.request_log_query);
    }

    #[test]
    fn invalid_values_are_startup_errors() {
        assert!(Settings::from_lookup(lookup(&[("TZ", "Mars/Olympus")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("RATE_LIMIT_BURST", "lots")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("RATE_LIMIT_KEY_STRATEGY", "cookie")])).is_err());
    }
}

use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use metrics::counter;
use reqwest::Client;

use super::{BatchNotifier, WebhookEvent};
use crate::store::Record;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Sleep after the first failed attempt; doubled after each further failure.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the `attempt`-th failure (1-based): base, 2*base, 4*base...
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, last_error: String },
}

/// POSTs one `news.created` event per record to every configured endpoint.
#[derive(Clone)]
pub struct WebhookNotifier {
    endpoints: Vec<String>,
    client: Client,
    timeout: Duration,
    policy: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            client: Client::new(),
            timeout: Duration::from_secs(10),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn post_once(&self, url: &str, event: &WebhookEvent<'_>) -> Result<()> {
        let rsp = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(event)
            .send()
            .await
            .map_err(|e| anyhow!("webhook request failed: {e}"))?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(anyhow!("[{}] {}", status.as_u16(), snippet));
        }
        Ok(())
    }

    /// Deliver one event to one endpoint with retry. Sleeps after every failed
    /// attempt, the last one included.
    pub async fn deliver(&self, url: &str, event: &WebhookEvent<'_>) -> DeliveryOutcome {
        let mut attempt: u32 = 0;
        let mut last_error = String::new();
        while attempt < self.policy.max_attempts {
            attempt += 1;
            match self.post_once(url, event).await {
                Ok(()) => {
                    tracing::info!(target: "webhook", %url, attempt, "webhook delivered");
                    counter!("webhook_delivered_total").increment(1);
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    tracing::debug!(target: "webhook", %url, attempt, error = %e, "webhook attempt failed");
                    last_error = e.to_string();
                }
            }
            tokio::time::sleep(self.policy.backoff_after(attempt)).await;
        }
        tracing::error!(target: "webhook", %url, attempts = attempt, error = %last_error, "webhook failed");
        counter!("webhook_failed_total").increment(1);
        DeliveryOutcome::Failed {
            attempts: attempt,
            last_error,
        }
    }

    /// Deliver every record to every endpoint. Endpoints for one record run
    /// concurrently; each (record, endpoint) pair retries on its own.
    pub async fn deliver_all(&self, records: &[Record]) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(records.len() * self.endpoints.len());
        for record in records {
            let event = WebhookEvent::created(record);
            let sends = self.endpoints.iter().map(|url| self.deliver(url, &event));
            outcomes.extend(join_all(sends).await);
        }
        outcomes
    }
}

#[async_trait::async_trait]
impl BatchNotifier for WebhookNotifier {
    async fn notify_batch(&self, records: Vec<Record>) {
        if self.endpoints.is_empty() || records.is_empty() {
            return;
        }
        let _ = self.deliver_all(&records).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_after(1), Duration::from_secs(1));
        assert_eq!(p.backoff_after(2), Duration::from_secs(2));
        assert_eq!(p.backoff_after(3), Duration::from_secs(4));
    }

    fn record() -> Record {
        Record {
            id: 1,
            source_name: "Wire".into(),
            title: "Gold rises".into(),
            url: "https://example.com/gold".into(),
            published_at: chrono::Utc::now(),
            summary: String::new(),
            content: String::new(),
            language: "en".into(),
            tags: std::collections::BTreeSet::new(),
            fetched_at: chrono::Utc::now(),
            raw: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn no_endpoints_is_a_noop() {
        let n = WebhookNotifier::new(vec![]);
        assert!(n.deliver_all(&[record()]).await.is_empty());
        // would hang on backoff if it tried to send anything
        tokio::time::timeout(Duration::from_millis(200), n.notify_batch(vec![record(), record()]))
            .await
            .expect("no-op");
    }
}

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{FieldApi, FieldQueryResult, SourceInfo, Split};
use crate::context::Context;
use crate::metrics::PageMetrics;
use crate::state::Config;

/// reqwest-backed client for the local core service. Every request
/// carries a timeout; the probe gets a tighter one so a wedged core
/// cannot stall the pipeline for longer than the indicator is allowed
/// to be stale.
pub struct HttpFieldApi {
    client: Client,
    base: String,
    probe_timeout: Duration,
}

impl HttpFieldApi {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_millis(cfg.request_timeout_ms))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base: cfg.core_base.trim_end_matches('/').to_string(),
            probe_timeout: Duration::from_millis(cfg.probe_timeout_ms),
        }
    }
}

#[async_trait]
impl FieldApi for HttpFieldApi {
    async fn probe_health(&self) -> Result<()> {
        let url = format!("{}/health", self.base);
        let resp = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("health returned {}", resp.status()));
        }
        // Connected means a JSON body, not merely a 200.
        let _body: serde_json::Value = resp.json().await?;
        Ok(())
    }

    async fn create_split(
        &self,
        context: &Context,
        metrics: Option<&PageMetrics>,
    ) -> Result<Split> {
        let url = format!("{}/split", self.base);
        let mut payload = serde_json::json!({ "context": context.as_str() });
        if let Some(m) = metrics {
            payload["metrics"] = serde_json::to_value(m)?;
        }
        let resp = self.client.post(&url).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("split returned {}", status));
        }
        let split: Split = resp.json().await?;
        Ok(split)
    }

    async fn query_field(&self, context: &Context) -> Result<FieldQueryResult> {
        let url = format!("{}/query", self.base);
        let payload = serde_json::json!({ "context": context.as_str() });
        let resp = self.client.post(&url).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("query returned {}", status));
        }
        let result: FieldQueryResult = resp.json().await?;
        Ok(result)
    }

    async fn fetch_source(&self) -> Result<SourceInfo> {
        let url = format!("{}/source", self.base);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("source returned {}", resp.status()));
        }
        let info: SourceInfo = resp.json().await?;
        Ok(info)
    }
}

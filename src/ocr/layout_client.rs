//! Hosted layout-analysis client (analyze + poll `Operation-Location`).

use std::time::Duration;

use anyhow::{anyhow, Context};
use serde_json::Value;
use tracing::{debug, info};

use super::analyze_result::normalize;
use super::{content_type_for, LayoutProvider, OcrInput};
use crate::config::LayoutSettings;
use crate::document::NormalizedDocument;

const API_VERSION: &str = "2024-11-30";

pub struct LayoutClient {
    client: reqwest::Client,
    settings: LayoutSettings,
}

impl LayoutClient {
    pub fn new(client: reqwest::Client, settings: LayoutSettings) -> Self {
        Self { client, settings }
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model_id,
            API_VERSION
        )
    }

    async fn poll(&self, operation_url: &str) -> anyhow::Result<Value> {
        for attempt in 0..self.settings.max_polls {
            tokio::time::sleep(Duration::from_millis(self.settings.poll_interval_ms)).await;

            let resp = self
                .client
                .get(operation_url)
                .header("Ocp-Apim-Subscription-Key", &self.settings.api_key)
                .send()
                .await
                .context("Failed to poll layout analysis")?;
            let body: Value = resp.json().await.context("Invalid layout poll response")?;

            match body.get("status").and_then(Value::as_str).unwrap_or("") {
                "succeeded" => return Ok(body),
                "failed" => {
                    let message = body
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error");
                    anyhow::bail!("Layout analysis failed: {}", message);
                }
                status => debug!("Layout analysis {} (poll {})", status, attempt + 1),
            }
        }
        Err(anyhow!(
            "Layout analysis timed out after {} polls",
            self.settings.max_polls
        ))
    }
}

#[async_trait::async_trait]
impl LayoutProvider for LayoutClient {
    fn name(&self) -> &str {
        "layout"
    }

    async fn analyze(&self, input: &OcrInput) -> anyhow::Result<NormalizedDocument> {
        info!("LayoutClient: analyzing {} ({} bytes)", input.filename, input.data.len());
        let request = self
            .client
            .post(self.analyze_url())
            .header("Ocp-Apim-Subscription-Key", &self.settings.api_key)
            .header("Content-Type", content_type_for(&input.filename))
            .body(input.data.clone());

        let resp = request.send().await.context("Failed to reach layout service")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Layout API error ({}): {}", status, text);
        }

        let operation_url = resp
            .headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| anyhow!("No Operation-Location in layout response"))?
            .to_string();

        let result = self.poll(&operation_url).await?;
        let document = normalize(&result)?;
        info!(
            "LayoutClient: {} pages, {} words for {}",
            document.page_count(),
            document.word_count(),
            input.filename
        );
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_url() {
        let client = LayoutClient::new(
            reqwest::Client::new(),
            LayoutSettings {
                endpoint: "https://example.cognitiveservices.azure.com/".to_string(),
                api_key: "key".to_string(),
                model_id: "prebuilt-layout".to_string(),
                poll_interval_ms: 10,
                max_polls: 1,
            },
        );
        assert_eq!(
            client.analyze_url(),
            "https://example.cognitiveservices.azure.com/documentintelligence/documentModels/prebuilt-layout:analyze?api-version=2024-11-30"
        );
    }
}

//! OpenAI-compatible chat-completions client for structured extraction.
//!
//! Requests JSON-schema output together with per-token log-probabilities,
//! which the LLM confidence evaluator needs alongside the raw generated text.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::confidence::llm::TokenLogprob;
use crate::config::LlmSettings;

/// Everything the confidence core needs from one structured-output call.
#[derive(Debug, Clone)]
pub struct StructuredCompletion {
    pub generated_text: String,
    pub extracted: Value,
    pub logprobs: Vec<TokenLogprob>,
}

/// Anything that can turn prompt messages into a schema-conforming JSON object.
#[async_trait::async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(
        &self,
        messages: Vec<Message>,
        schema_name: &str,
        schema: Value,
    ) -> Result<StructuredCompletion>;
}

#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    settings: LlmSettings,
}

impl ChatClient {
    pub fn new(client: Client, settings: LlmSettings) -> Self {
        Self { client, settings }
    }

    async fn send_request(&self, request: ChatCompletionRequest) -> Result<Choice> {
        debug!("Sending chat completion: model={}", request.model);

        let response = self
            .client
            .post(&self.settings.api_url)
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion API error ({}): {}", status, error_text);
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        if let Some(usage) = &response.usage {
            info!(
                "Chat completion: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .context("Chat completion returned no choices")
    }
}

#[async_trait::async_trait]
impl StructuredExtractor for ChatClient {
    async fn extract(
        &self,
        messages: Vec<Message>,
        schema_name: &str,
        schema: Value,
    ) -> Result<StructuredCompletion> {
        let request = ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages,
            max_tokens: Some(self.settings.max_tokens),
            temperature: Some(0.0),
            logprobs: true,
            response_format: Some(ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat {
                    name: schema_name.to_string(),
                    schema,
                    strict: true,
                },
            }),
        };

        let choice = self.send_request(request).await?;
        let generated_text = choice.message.content.unwrap_or_default();
        let extracted: Value = serde_json::from_str(&generated_text)
            .context("Failed to parse structured output as JSON")?;
        let logprobs = choice.logprobs.map(|l| l.content).unwrap_or_default();

        debug!(
            "Structured output: {} chars, {} scored tokens",
            generated_text.len(),
            logprobs.len()
        );

        Ok(StructuredCompletion {
            generated_text,
            extracted,
            logprobs,
        })
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    logprobs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat {
    JsonSchema { json_schema: JsonSchemaFormat },
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: String,
    schema: Value,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceLogprobs {
    #[serde(default)]
    content: Vec<TokenLogprob>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message with text and one base64-encoded image.
    pub fn user_with_image(text: impl Into<String>, mime: &str, image: &[u8]) -> Self {
        let data_url = format!("data:{};base64,{}", mime, BASE64.encode(image));
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ]),
        }
    }
}

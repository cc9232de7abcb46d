use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{CompletionConfig, EmbeddingConfig, HttpConfig};
use crate::services::{
    with_retries, CompletionRequest, CompletionService, EmbeddingService, ResponseFormat,
    ServiceError,
};

const SERVICE: &str = "openai";
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Client for the OpenAI-compatible embeddings and chat completion endpoints.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    embedding_model: String,
    embeddings_url: String,
    completions_url: String,
    max_retries: u8,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        embeddings: &EmbeddingConfig,
        completion: &CompletionConfig,
        http: &HttpConfig,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(http.timeout())
            .build()
            .map_err(|source| ServiceError::Transport {
                service: SERVICE,
                source,
            })?;

        Ok(Self {
            client,
            api_key,
            embedding_model: embeddings.model.clone(),
            embeddings_url: format!("{}/embeddings", embeddings.base_url.trim_end_matches('/')),
            completions_url: format!(
                "{}/chat/completions",
                completion.base_url.trim_end_matches('/')
            ),
            max_retries: http.max_retries,
        })
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ServiceError> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|source| ServiceError::Transport {
                service: SERVICE,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| ServiceError::malformed(SERVICE, e.to_string()))
    }
}

/// Order vectors by the `index` the service reports and check one per input.
fn collect_embeddings(resp: Value, expected: usize) -> Result<Vec<Vec<f32>>, ServiceError> {
    let mut parsed: EmbeddingResponse =
        serde_json::from_value(resp).map_err(|e| ServiceError::malformed(SERVICE, e.to_string()))?;

    if parsed.data.len() != expected {
        return Err(ServiceError::malformed(
            SERVICE,
            format!("expected {expected} embeddings, got {}", parsed.data.len()),
        ));
    }

    parsed.data.sort_by_key(|d| d.index);
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

fn extract_message(resp: &Value) -> Result<String, ServiceError> {
    resp.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "response has no message content"))
}

#[async_trait]
impl EmbeddingService for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let body = json!({
            "model": self.embedding_model,
            "input": texts,
        });

        log::debug!("service={SERVICE} embedding texts={}", texts.len());
        let resp = with_retries(SERVICE, self.max_retries, || {
            self.post_json(&self.embeddings_url, &body)
        })
        .await?;

        collect_embeddings(resp, texts.len())
    }

    fn name(&self) -> &'static str {
        "OpenAI embeddings"
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.format == ResponseFormat::JsonObject {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let resp = with_retries(SERVICE, self.max_retries, || {
            self.post_json(&self.completions_url, &body)
        })
        .await?;

        extract_message(&resp)
    }

    fn name(&self) -> &'static str {
        "OpenAI chat"
    }
}

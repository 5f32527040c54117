use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{classify, collect_text, ensure_success, ModelLister, OptimizeRequest, Provider, StreamHooks};
use crate::errors::{OptimizerError, Result};
use crate::prompt;

const NAME: &str = "openai-compatible";

fn join(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim().trim_end_matches('/'), path)
}

/// A user-configured OpenAI-compatible endpoint (`/chat/completions`, streamed).
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(
        client: Client,
        endpoint: &str,
        api_key: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
            max_tokens,
        }
    }

    fn body(&self, req: &OptimizeRequest<'_>) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt::system_instruction(req.objective) },
                { "role": "user", "content": prompt::user_request(req) }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": true,
            "response_format": { "type": "json_object" }
        })
    }
}

/// Streamed chunks carry `delta.content`; a non-streamed reply carries `message.content`.
fn delta(v: &Value) -> Option<String> {
    let choice = v.pointer("/choices/0")?;
    choice
        .pointer("/delta/content")
        .or_else(|| choice.pointer("/message/content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn optimize(&self, req: &OptimizeRequest<'_>, hooks: &mut StreamHooks) -> Result<String> {
        let url = join(&self.endpoint, "chat/completions");
        debug!(url = %url, model = %self.model, "POST");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.body(req))
            .send()
            .await
            .map_err(|e| classify(NAME, e))?;
        let resp = ensure_success(NAME, resp).await?;
        collect_text(NAME, resp, hooks, delta).await
    }
}

/// Lists models from `GET {endpoint}/models`.
pub struct OpenAiModelLister {
    client: Client,
}

impl OpenAiModelLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[async_trait]
impl ModelLister for OpenAiModelLister {
    async fn list_models(&self, api_key: &str, endpoint: &str) -> Result<Vec<String>> {
        let url = join(endpoint, "models");
        debug!(url = %url, "GET");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| classify(NAME, e))?;
        let resp = ensure_success(NAME, resp).await.map_err(|e| match e {
            OptimizerError::Provider(detail) => OptimizerError::Provider(format!(
                "Failed to fetch models. Check endpoint and API key. ({detail})"
            )),
            other => other,
        })?;
        let list: ModelList = resp
            .json()
            .await
            .map_err(|e| OptimizerError::Provider(format!("{NAME}: unreadable model list: {e}")))?;
        let mut ids: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

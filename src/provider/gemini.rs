use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{classify, collect_text, ensure_success, OptimizeRequest, Provider, StreamHooks};
use crate::errors::{OptimizerError, Result};
use crate::prompt;

const NAME: &str = "gemini";

/// The managed provider: Gemini `streamGenerateContent` over SSE, asking
/// for a JSON reply that matches the optimization envelope.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiProvider {
    pub fn new(client: Client, base_url: &str, api_key: &str, model: &str, temperature: f32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
        }
    }

    fn body(&self, req: &OptimizeRequest<'_>) -> Value {
        json!({
            "systemInstruction": { "parts": [{ "text": prompt::system_instruction(req.objective) }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt::user_request(req) }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "optimizedPrompt": { "type": "STRING" },
                        "fullPromptDiffHtml": { "type": "STRING" },
                        "changes": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": { "reasoning": { "type": "STRING" } }
                            }
                        }
                    }
                }
            }
        })
    }
}

/// Concatenates the text parts of the first candidate.
fn delta(v: &Value) -> Option<String> {
    let parts = v.pointer("/candidates/0/content/parts")?.as_array()?;
    Some(
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
    )
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn optimize(&self, req: &OptimizeRequest<'_>, hooks: &mut StreamHooks) -> Result<String> {
        if self.api_key.trim().is_empty() {
            return Err(OptimizerError::Credential("Gemini API key is missing.".into()));
        }
        let url = format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, self.model);
        debug!(url = %url, model = %self.model, "POST");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.body(req))
            .send()
            .await
            .map_err(|e| classify(NAME, e))?;
        let resp = ensure_success(NAME, resp).await?;
        collect_text(NAME, resp, hooks, delta).await
    }
}

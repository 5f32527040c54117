use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::catalog::OutputPreference;
use crate::config::AppConfig;
use crate::errors::{OptimizerError, Result};

pub mod gemini;
pub mod openai;
pub mod sse;

use sse::SseDecoder;

const MAX_ERROR_BODY_BYTES: usize = 2048;

/// Inputs for one optimization call. The provider renders them into its own
/// system and user messages.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeRequest<'a> {
    pub original_prompt: &'a str,
    pub current_prompt: &'a str,
    pub change_request: &'a str,
    pub output_preference: OutputPreference,
    pub target_model: &'a str,
    pub objective: &'a str,
}

type Hook = Box<dyn FnOnce() + Send>;

/// Lifecycle callbacks for a streamed call. Each hook fires at most once;
/// [`StreamHooks::finish`] fires whatever is left so that both have run
/// before the call returns successfully.
#[derive(Default)]
pub struct StreamHooks {
    on_connected: Option<Hook>,
    on_first_token: Option<Hook>,
}

impl StreamHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_connected = Some(Box::new(f));
        self
    }

    pub fn on_first_token(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_first_token = Some(Box::new(f));
        self
    }

    pub fn connected(&mut self) {
        if let Some(f) = self.on_connected.take() {
            f();
        }
    }

    pub fn first_token(&mut self) {
        self.connected();
        if let Some(f) = self.on_first_token.take() {
            f();
        }
    }

    pub fn finish(&mut self) {
        self.first_token();
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the full, trimmed response text. It is expected, not
    /// guaranteed, to contain the JSON envelope.
    async fn optimize(&self, req: &OptimizeRequest<'_>, hooks: &mut StreamHooks) -> Result<String>;
}

#[async_trait]
pub trait ModelLister: Send + Sync {
    /// Sorted, de-duplicated model identifiers.
    async fn list_models(&self, api_key: &str, endpoint: &str) -> Result<Vec<String>>;
}

pub type DynProvider = Box<dyn Provider + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderChoice {
    Managed { api_key: String, model: String },
    Custom { endpoint: String, api_key: String, model: String },
}

pub trait ProviderFactory: Send + Sync {
    fn build(&self, choice: &ProviderChoice) -> Result<DynProvider>;
}

#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
    pub gemini_base_url: String,
}

impl ProviderOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.request_timeout_secs),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            gemini_base_url: cfg.gemini_base_url.clone(),
        }
    }
}

/// Builds the HTTP-backed providers.
pub struct HttpProviderFactory {
    opts: ProviderOptions,
}

impl HttpProviderFactory {
    pub fn new(opts: ProviderOptions) -> Self {
        Self { opts }
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, choice: &ProviderChoice) -> Result<DynProvider> {
        let client = http_client(self.opts.timeout)?;
        Ok(match choice {
            ProviderChoice::Managed { api_key, model } => Box::new(gemini::GeminiProvider::new(
                client,
                &self.opts.gemini_base_url,
                api_key,
                model,
                self.opts.temperature,
            )),
            ProviderChoice::Custom { endpoint, api_key, model } => Box::new(openai::OpenAiProvider::new(
                client,
                endpoint,
                api_key,
                model,
                self.opts.temperature,
                self.opts.max_tokens,
            )),
        })
    }
}

pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| OptimizerError::Provider(format!("building HTTP client: {e}")))
}

/// Network-class failures (refused, unreachable, timed out) become
/// `Connectivity`; everything else is a generic provider failure.
pub(crate) fn classify(provider: &str, err: reqwest::Error) -> OptimizerError {
    if err.is_connect() || err.is_timeout() {
        OptimizerError::Connectivity(format!("{provider}: {err}"))
    } else {
        OptimizerError::Provider(format!("{provider}: {err}"))
    }
}

pub(crate) async fn ensure_success(provider: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = read_capped_body(resp).await;
    debug!(provider, %status, body = %body, "provider returned an error status");
    let what = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "authentication rejected",
        StatusCode::TOO_MANY_REQUESTS => "rate limited or quota exceeded",
        _ => "request failed",
    };
    Err(OptimizerError::Provider(format!("{provider}: {what} ({status}): {body}")))
}

async fn read_capped_body(resp: Response) -> String {
    let mut body = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            return format!("{}...(truncated)", String::from_utf8_lossy(&body));
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

fn error_message(v: &Value) -> Option<String> {
    let err = v.get("error")?;
    Some(
        err.get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
    )
}

/// Accumulates the text of a streamed response.
///
/// `delta` pulls the text out of one SSE payload. Servers that ignore the
/// streaming request and answer with a plain JSON body are handled by
/// feeding that body (or each element, for an array) through `delta` too.
pub(crate) async fn collect_text(
    provider: &'static str,
    resp: Response,
    hooks: &mut StreamHooks,
    delta: fn(&Value) -> Option<String>,
) -> Result<String> {
    hooks.connected();
    let is_sse = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));

    let mut full = String::new();
    let absorb = |v: &Value, full: &mut String, hooks: &mut StreamHooks| -> Result<()> {
        if let Some(msg) = error_message(v) {
            return Err(OptimizerError::Provider(format!("{provider}: {msg}")));
        }
        if let Some(text) = delta(v) {
            if !text.is_empty() {
                full.push_str(&text);
                hooks.first_token();
            }
        }
        Ok(())
    };

    if !is_sse {
        let body = resp.text().await.map_err(|e| classify(provider, e))?;
        let v: Value = serde_json::from_str(&body).map_err(|e| {
            OptimizerError::Provider(format!("{provider}: unreadable response body: {e}"))
        })?;
        match &v {
            Value::Array(items) => {
                for item in items {
                    absorb(item, &mut full, hooks)?;
                }
            }
            other => absorb(other, &mut full, hooks)?,
        }
        hooks.finish();
        return Ok(full.trim().to_string());
    }

    let mut decoder = SseDecoder::default();
    let mut stream = resp.bytes_stream();
    'read: while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| classify(provider, e))?;
        for data in decoder.push(&chunk) {
            if data.trim() == "[DONE]" {
                break 'read;
            }
            match serde_json::from_str::<Value>(&data) {
                Ok(v) => absorb(&v, &mut full, hooks)?,
                Err(e) => warn!(provider, error = %e, payload_bytes = data.len(), "invalid SSE payload"),
            }
        }
    }
    if let Some(data) = decoder.finish() {
        if let Ok(v) = serde_json::from_str::<Value>(&data) {
            absorb(&v, &mut full, hooks)?;
        }
    }
    hooks.finish();
    debug!(provider, bytes = full.len(), "stream complete");
    Ok(full.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn hooks_fire_once_and_in_order() {
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (c1, c2) = (calls.clone(), calls.clone());
        let mut hooks = StreamHooks::new()
            .on_connected(move || c1.lock().push("connected"))
            .on_first_token(move || c2.lock().push("first"));
        hooks.first_token();
        hooks.first_token();
        hooks.finish();
        assert_eq!(*calls.lock(), vec!["connected", "first"]);
    }

    #[test]
    fn finish_fires_pending_hook() {
        let n = Arc::new(AtomicUsize::new(0));
        let n2 = n.clone();
        let mut hooks = StreamHooks::new().on_first_token(move || {
            n2.fetch_add(1, Ordering::SeqCst);
        });
        hooks.finish();
        hooks.finish();
        assert_eq!(n.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn error_payloads_are_recognised() {
        let v = serde_json::json!({"error": {"message": "quota exceeded", "code": 429}});
        assert_eq!(error_message(&v).as_deref(), Some("quota exceeded"));
        assert!(error_message(&serde_json::json!({"choices": []})).is_none());
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prompt_optimizer::catalog::OutputPreference;
use prompt_optimizer::errors::OptimizerError;
use prompt_optimizer::provider::gemini::GeminiProvider;
use prompt_optimizer::provider::openai::{OpenAiModelLister, OpenAiProvider};
use prompt_optimizer::provider::{http_client, ModelLister, OptimizeRequest, Provider, StreamHooks};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> OptimizeRequest<'static> {
    OptimizeRequest {
        original_prompt: "write a sort function",
        current_prompt: "write a sort function",
        change_request: "",
        output_preference: OutputPreference::Text,
        target_model: "gpt",
        objective: "coding",
    }
}

fn counting_hooks() -> (StreamHooks, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let connected = Arc::new(AtomicUsize::new(0));
    let first = Arc::new(AtomicUsize::new(0));
    let (c, f) = (connected.clone(), first.clone());
    let hooks = StreamHooks::new()
        .on_connected(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .on_first_token(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
    (hooks, connected, first)
}

fn client() -> reqwest::Client {
    http_client(Duration::from_secs(5)).unwrap()
}

fn openai_chunk(text: &str) -> String {
    let v = serde_json::json!({"choices": [{"delta": {"content": text}}]});
    format!("data: {v}\n\n")
}

#[tokio::test]
async fn openai_stream_is_accumulated_and_first_token_fires_once() {
    let server = MockServer::start().await;
    let body = [
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n".to_string(),
        openai_chunk("{\"optimizedPrompt\":"),
        openai_chunk("\"Sort a list\","),
        openai_chunk("\"changes\":[]}"),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat();

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({"model": "local-model", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = format!("{}/v1/", server.uri());
    let provider = OpenAiProvider::new(client(), &endpoint, "sk-test", "local-model", 0.5, 4096);
    let (mut hooks, connected, first) = counting_hooks();
    let text = provider.optimize(&request(), &mut hooks).await.unwrap();

    assert_eq!(text, "{\"optimizedPrompt\":\"Sort a list\",\"changes\":[]}");
    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(first.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn plain_json_body_is_accepted_when_server_does_not_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "  {\"optimizedPrompt\":\"X\"}  "}}]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(client(), &server.uri(), "k", "m", 0.5, 4096);
    let (mut hooks, _, first) = counting_hooks();
    let text = provider.optimize(&request(), &mut hooks).await.unwrap();
    assert_eq!(text, "{\"optimizedPrompt\":\"X\"}");
    assert_eq!(first.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn error_status_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(client(), &server.uri(), "k", "m", 0.5, 4096);
    let err = provider.optimize(&request(), &mut StreamHooks::new()).await.unwrap_err();
    assert!(matches!(err, OptimizerError::Provider(ref m) if m.contains("upstream exploded")), "{err:?}");
}

#[tokio::test]
async fn unreachable_endpoint_is_a_connectivity_error() {
    // Bind and drop to get a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let provider = OpenAiProvider::new(client(), &format!("http://127.0.0.1:{port}/v1"), "k", "m", 0.5, 4096);
    let err = provider.optimize(&request(), &mut StreamHooks::new()).await.unwrap_err();
    assert!(err.is_connectivity(), "{err:?}");
    assert!(err.user_message().contains("CORS"));
}

#[tokio::test]
async fn model_list_is_sorted_and_unique() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer k"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"id": "zeta"}, {"id": "alpha"}, {"id": "zeta"}, {"id": "mid"}]
        })))
        .mount(&server)
        .await;

    let lister = OpenAiModelLister::new(client());
    let models = lister.list_models("k", &format!("{}/v1", server.uri())).await.unwrap();
    assert_eq!(models, vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn rejected_model_list_request_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let lister = OpenAiModelLister::new(client());
    let err = lister.list_models("wrong", &server.uri()).await.unwrap_err();
    assert!(matches!(err, OptimizerError::Provider(ref m) if m.contains("Failed to fetch models")), "{err:?}");
}

#[tokio::test]
async fn gemini_sse_stream_is_accumulated() {
    let server = MockServer::start().await;
    let chunk = |t: &str| {
        let v = serde_json::json!({"candidates": [{"content": {"parts": [{"text": t}]}}]});
        format!("data: {v}\r\n\r\n")
    };
    let body = [chunk("{\"optimizedPrompt\":"), chunk("\"Y\"}")].concat();

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "g-key"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GeminiProvider::new(client(), &server.uri(), "g-key", "gemini-2.5-flash", 0.5);
    let (mut hooks, connected, first) = counting_hooks();
    let text = provider.optimize(&request(), &mut hooks).await.unwrap();
    assert_eq!(text, "{\"optimizedPrompt\":\"Y\"}");
    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(first.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn gemini_error_payload_in_stream_fails_the_call() {
    let server = MockServer::start().await;
    let body = "data: {\"error\":{\"message\":\"quota exceeded\",\"code\":429}}\n\n";
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = GeminiProvider::new(client(), &server.uri(), "g-key", "gemini-2.5-flash", 0.5);
    let err = provider.optimize(&request(), &mut StreamHooks::new()).await.unwrap_err();
    assert!(matches!(err, OptimizerError::Provider(ref m) if m.contains("quota exceeded")), "{err:?}");
}

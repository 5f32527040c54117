use std::sync::Arc;

use prompt_optimizer::catalog::OutputPreference;
use prompt_optimizer::config::AppConfig;
use prompt_optimizer::errors::OptimizerError;
use prompt_optimizer::history::HistoryStore;
use prompt_optimizer::provider::openai::OpenAiModelLister;
use prompt_optimizer::provider::{http_client, HttpProviderFactory, ProviderOptions};
use prompt_optimizer::session::{OptimizeInput, Phase, SessionController, SessionOptions};
use prompt_optimizer::settings::SettingsStore;
use prompt_optimizer::storage::{FileStorage, Storage, SETTINGS_KEY};
use prompt_optimizer::wire::ProviderKind;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENVELOPE: &str = r#"{"optimizedPrompt":"Write a stable merge sort in Rust.","fullPromptDiffHtml":"Write a <del>sort</del><ins>stable merge sort in Rust</ins>.","changes":[{"reasoning":"Named the algorithm."}]}"#;

fn controller(dir: &std::path::Path, cfg: &AppConfig) -> SessionController {
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(dir).unwrap());
    SessionController::new(
        HistoryStore::load(storage.clone()),
        SettingsStore::load(storage, None),
        Arc::new(HttpProviderFactory::new(ProviderOptions::from_config(cfg))),
        SessionOptions::from_config(cfg),
    )
}

fn input(prompt: &str) -> OptimizeInput {
    OptimizeInput {
        prompt: prompt.into(),
        change_request: String::new(),
        target_model: "claude".into(),
        objective: "coding".into(),
        output: OutputPreference::Text,
        iterating: false,
    }
}

async fn mount_custom_endpoint(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"id": "local-b"}, {"id": "local-a"}]
        })))
        .mount(server)
        .await;
    let chunk = serde_json::json!({"choices": [{"delta": {"content": ENVELOPE}}]});
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(format!("data: {chunk}\n\ndata: [DONE]\n\n"), "text/event-stream"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn custom_endpoint_round_trip_persists_history() {
    let server = MockServer::start().await;
    mount_custom_endpoint(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let cfg = AppConfig { data_dir: dir.path().to_path_buf(), ..AppConfig::default() };

    let mut c = controller(dir.path(), &cfg);
    let mut draft = c.settings().open_draft();
    draft.custom.endpoint = format!("{}/v1", server.uri());
    draft.custom.api_key = "sk-local".into();
    let lister = OpenAiModelLister::new(http_client(std::time::Duration::from_secs(5)).unwrap());
    assert_eq!(draft.fetch_models(&lister).await.unwrap().to_vec(), vec!["local-a", "local-b"]);
    assert_eq!(draft.custom.execution_model, "local-a");
    assert_eq!(c.settings_mut().commit(draft).provider, ProviderKind::Custom);

    let item = c.optimize(input("Write a sort.")).await.unwrap().unwrap();
    assert_eq!(item.optimized_prompt, "Write a stable merge sort in Rust.");
    assert_eq!((item.additions, item.deletions), (5, 1));
    assert_eq!(c.phase(), Phase::Succeeded);

    let reloaded = controller(dir.path(), &cfg);
    assert_eq!(reloaded.history().len(), 1);
    let stored = reloaded.history().get(0).unwrap();
    assert_eq!(stored, &item);
    assert_eq!(reloaded.settings().settings().custom.execution_model, "local-a");
}

#[tokio::test]
async fn managed_provider_without_key_never_sends() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let cfg = AppConfig {
        data_dir: dir.path().to_path_buf(),
        gemini_base_url: server.uri(),
        ..AppConfig::default()
    };

    let mut c = controller(dir.path(), &cfg);
    let err = c.optimize(input("hello")).await.unwrap_err();
    assert!(matches!(err, OptimizerError::Credential(_)));
    assert!(c.state().error.as_deref().unwrap().contains("Settings"));
    assert!(c.history().is_empty());
}

#[tokio::test]
async fn undecodable_reply_is_saved_when_diagnostics_are_on() {
    let server = MockServer::start().await;
    let chunk = serde_json::json!({"candidates": [{"content": {"parts": [{"text": "not json at all"}]}}]});
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:streamGenerateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(format!("data: {chunk}\n\n"), "text/event-stream"))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let cfg = AppConfig {
        data_dir: dir.path().to_path_buf(),
        gemini_base_url: server.uri(),
        save_responses: true,
        ..AppConfig::default()
    };

    let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(dir.path()).unwrap());
    let mut c = SessionController::new(
        HistoryStore::load(storage.clone()),
        SettingsStore::load(storage, Some("g-key".into())),
        Arc::new(HttpProviderFactory::new(ProviderOptions::from_config(&cfg))),
        SessionOptions::from_config(&cfg),
    );

    let err = c.optimize(input("hello")).await.unwrap_err();
    assert!(matches!(err, OptimizerError::MalformedResponse(_)));
    assert!(c.history().is_empty());

    let saved: Vec<_> = fs_err::read_dir(dir.path().join("responses")).unwrap().collect();
    assert_eq!(saved.len(), 1);
}

#[tokio::test]
async fn legacy_settings_file_is_migrated_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::open(dir.path()).unwrap();
    storage
        .set(
            SETTINGS_KEY,
            r#"{"endpoint":"http://h/v1","apiKey":"k","models":["a"],"executionModel":"a","provider":"openai"}"#,
        )
        .unwrap();

    let store = SettingsStore::load(Arc::new(FileStorage::open(dir.path()).unwrap()), None);
    assert!(store.was_migrated());
    let s = store.settings();
    assert_eq!(s.custom.endpoint, "http://h/v1");
    assert_eq!(s.custom.api_key, "k");
    assert_eq!(s.managed.api_key, "");

    let raw = storage.get(SETTINGS_KEY).unwrap().unwrap();
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(v.get("endpoint").is_none());
    assert_eq!(v["custom"]["endpoint"], "http://h/v1");
}

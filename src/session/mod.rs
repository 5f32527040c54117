//! The optimization session controller.
//!
//! One call to [`SessionController::optimize`] walks
//! `Idle → Sending → Streaming(waiting) → Streaming(tokens) → Parsing → Succeeded | Failed`.
//! The controller is driven through `&mut self`, so at most one request can
//! be in flight per session.

use chrono::{SubsecRound, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::catalog::{self, OutputPreference};
use crate::config::AppConfig;
use crate::diff::{self, DiffMode};
use crate::errors::{OptimizerError, Result};
use crate::history::{HistoryGroup, HistoryStore};
use crate::log;
use crate::provider::{OptimizeRequest, ProviderChoice, ProviderFactory, StreamHooks};
use crate::settings::SettingsStore;
use crate::wire::{HistoryItem, ProviderKind};

pub mod response;
pub mod timers;

use timers::{FeedbackTimers, ThinkingState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sending,
    Streaming { first_token: bool },
    Parsing,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_loading(self) -> bool {
        matches!(self, Phase::Sending | Phase::Streaming { .. } | Phase::Parsing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Phase(Phase),
    ThinkingTick(u64),
    ThinkingStopped,
    LoadingMessage(&'static str),
    Completed { index: usize },
    Failed(String),
}

/// What the user currently has on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub user_prompt: String,
    pub original_prompt: String,
    pub change_request: String,
    pub target_model: String,
    pub objective: String,
    pub output: OutputPreference,
    pub active_index: Option<usize>,
    pub error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            user_prompt: String::new(),
            original_prompt: String::new(),
            change_request: String::new(),
            target_model: catalog::UNIVERSAL.into(),
            objective: catalog::DEFAULT_OBJECTIVE.into(),
            output: OutputPreference::Text,
            active_index: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizeInput {
    pub prompt: String,
    pub change_request: String,
    pub target_model: String,
    pub objective: String,
    pub output: OutputPreference,
    /// Continue the active session instead of starting a new one.
    pub iterating: bool,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub diff_mode: DiffMode,
    pub loading_interval: Duration,
    /// Where raw replies are dumped when they cannot be decoded.
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            diff_mode: DiffMode::Words,
            loading_interval: Duration::from_millis(2500),
            diagnostics_dir: None,
        }
    }
}

impl SessionOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            diff_mode: cfg.diff_mode,
            loading_interval: Duration::from_millis(cfg.loading_message_interval_ms),
            diagnostics_dir: cfg.save_responses.then(|| log::responses_dir(&cfg.data_dir)),
        }
    }
}

pub struct SessionController {
    history: HistoryStore,
    settings: SettingsStore,
    providers: Arc<dyn ProviderFactory>,
    opts: SessionOptions,
    state: SessionState,
    phase: Arc<Mutex<Phase>>,
    thinking: ThinkingState,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        history: HistoryStore,
        settings: SettingsStore,
        providers: Arc<dyn ProviderFactory>,
        opts: SessionOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            history,
            settings,
            providers,
            opts,
            state: SessionState::default(),
            phase: Arc::new(Mutex::new(Phase::Idle)),
            thinking: ThinkingState::default(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn is_loading(&self) -> bool {
        self.phase().is_loading()
    }

    pub fn thinking(&self) -> &ThinkingState {
        &self.thinking
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryStore {
        &mut self.history
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SettingsStore {
        &mut self.settings
    }

    pub fn active_item(&self) -> Option<&HistoryItem> {
        self.state.active_index.and_then(|i| self.history.get(i).ok())
    }

    pub fn grouped_history(&self, search: &str) -> Vec<HistoryGroup<'_>> {
        self.history.grouped(search)
    }

    /// Runs one optimization. A blank prompt is a no-op and returns `Ok(None)`.
    /// Every failure is also recorded in [`SessionState::error`] and leaves
    /// history untouched.
    pub async fn optimize(&mut self, input: OptimizeInput) -> Result<Option<HistoryItem>> {
        let prompt = input.prompt.trim().to_string();
        if prompt.is_empty() {
            return Ok(None);
        }

        self.state.user_prompt = input.prompt.clone();
        self.state.change_request = input.change_request.clone();
        self.state.objective = input.objective.clone();
        self.state.target_model = catalog::normalize_target(&input.objective, &input.target_model).to_string();
        self.state.output = input.output;
        self.state.error = None;

        let fresh = !input.iterating || self.state.active_index.is_none() || self.state.original_prompt.is_empty();
        if fresh {
            self.state.original_prompt = prompt;
        }

        let outcome = {
            let timers = FeedbackTimers::start(&self.thinking, &self.events, self.opts.loading_interval);
            self.set_phase(Phase::Sending);
            self.request(&input.prompt, fresh, &timers).await
        };

        match outcome {
            Ok(item) => {
                self.history.append(item.clone());
                self.view_history(0)?;
                self.state.change_request.clear();
                self.set_phase(Phase::Succeeded);
                let _ = self.events.send(SessionEvent::Completed { index: 0 });
                info!(
                    additions = item.additions,
                    deletions = item.deletions,
                    changes = item.changes.len(),
                    "optimization stored"
                );
                Ok(Some(item))
            }
            Err(e) => {
                error!(error = %e, "optimization failed");
                let msg = e.user_message();
                self.state.error = Some(msg.clone());
                self.set_phase(Phase::Failed);
                let _ = self.events.send(SessionEvent::Failed(msg));
                Err(e)
            }
        }
    }

    async fn request(&self, current: &str, fresh: bool, timers: &FeedbackTimers) -> Result<HistoryItem> {
        let choice = self.select_provider()?;
        let provider = self.providers.build(&choice)?;

        let original_for_provider = if fresh { self.state.original_prompt.as_str() } else { current };
        let req = OptimizeRequest {
            original_prompt: original_for_provider,
            current_prompt: current,
            change_request: &self.state.change_request,
            output_preference: self.state.output,
            target_model: &self.state.target_model,
            objective: &self.state.objective,
        };

        let stop = timers.thinking_stop();
        let (p1, p2) = (self.phase.clone(), self.phase.clone());
        let (e1, e2) = (self.events.clone(), self.events.clone());
        let mut hooks = StreamHooks::new()
            .on_connected(move || publish(&p1, &e1, Phase::Streaming { first_token: false }))
            .on_first_token(move || {
                stop.stop();
                publish(&p2, &e2, Phase::Streaming { first_token: true });
            });

        info!(provider = provider.name(), fresh, "sending optimization request");
        let raw = provider.optimize(&req, &mut hooks).await?;

        self.set_phase(Phase::Parsing);
        let envelope = match response::parse_envelope(&raw) {
            Ok(env) => env,
            Err(e) => {
                warn!(raw = %log::preview(&raw, 400), "provider reply could not be decoded");
                self.dump_raw(&raw);
                return Err(e);
            }
        };

        let optimized_prompt = envelope
            .optimized_prompt
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| current.to_string());
        let full_prompt_diff_html = envelope
            .full_prompt_diff_html
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| optimized_prompt.clone());
        let counts = diff::count(&full_prompt_diff_html, self.opts.diff_mode);

        Ok(HistoryItem {
            original_prompt: self.state.original_prompt.clone(),
            optimized_prompt,
            full_prompt_diff_html,
            changes: envelope.changes.unwrap_or_default(),
            target_model: self.state.target_model.clone(),
            prompt_objective: self.state.objective.clone(),
            timestamp: Utc::now().trunc_subsecs(3),
            additions: counts.additions,
            deletions: counts.deletions,
            change_request: self.state.change_request.clone(),
        })
    }

    /// The custom endpoint when it is selected and configured; otherwise the
    /// managed provider, which needs a key.
    pub fn select_provider(&self) -> Result<ProviderChoice> {
        let s = self.settings.settings();
        let custom = &s.custom;
        if s.provider == ProviderKind::Custom && !custom.endpoint.trim().is_empty() && !custom.api_key.trim().is_empty() {
            if custom.execution_model.trim().is_empty() {
                return Err(OptimizerError::Validation(
                    "No execution model is selected. Please go to Settings, fetch models, and save your selection.".into(),
                ));
            }
            return Ok(ProviderChoice::Custom {
                endpoint: custom.endpoint.clone(),
                api_key: custom.api_key.clone(),
                model: custom.execution_model.clone(),
            });
        }
        if s.managed.api_key.trim().is_empty() {
            return Err(OptimizerError::Credential(
                "Managed provider API key is not set. Please add it in Settings.".into(),
            ));
        }
        Ok(ProviderChoice::Managed {
            api_key: s.managed.api_key.clone(),
            model: s.managed.model.clone(),
        })
    }

    /// Makes a stored item the active one and loads it into the editor.
    pub fn view_history(&mut self, index: usize) -> Result<()> {
        let item = self.history.get(index)?.clone();
        self.state.active_index = Some(index);
        self.state.original_prompt = item.original_prompt;
        self.state.user_prompt = item.optimized_prompt;
        self.state.target_model = item.target_model;
        self.state.objective = item.prompt_objective;
        self.state.error = None;
        Ok(())
    }

    pub fn view_latest_of_group(&mut self, original_prompt: &str) -> Result<()> {
        let index = self
            .history
            .all()
            .iter()
            .position(|h| h.original_prompt == original_prompt)
            .ok_or_else(|| OptimizerError::NotFound(format!("history group {original_prompt:?}")))?;
        self.view_history(index)
    }

    pub fn start_new(&mut self) {
        let output = self.state.output;
        self.state = SessionState { output, ..SessionState::default() };
    }

    /// Starts a fresh session from a group's original prompt, keeping the
    /// target model and objective of that group's latest item.
    pub fn start_from_history(&mut self, original_prompt: &str) {
        let latest = self
            .history
            .all()
            .iter()
            .find(|h| h.original_prompt == original_prompt)
            .map(|h| (h.target_model.clone(), h.prompt_objective.clone()));
        self.start_new();
        self.state.user_prompt = original_prompt.to_string();
        self.state.original_prompt = original_prompt.to_string();
        if let Some((target, objective)) = latest {
            self.state.target_model = target;
            self.state.objective = objective;
        }
    }

    fn set_phase(&self, phase: Phase) {
        publish(&self.phase, &self.events, phase);
    }

    fn dump_raw(&self, raw: &str) {
        let Some(dir) = &self.opts.diagnostics_dir else { return };
        match log::save_raw_response(dir, raw) {
            Ok(p) => info!(path = %p.display(), "saved undecodable reply"),
            Err(e) => warn!(error = %e, "could not save undecodable reply"),
        }
    }
}

fn publish(slot: &Mutex<Phase>, events: &broadcast::Sender<SessionEvent>, phase: Phase) {
    *slot.lock() = phase;
    let _ = events.send(SessionEvent::Phase(phase));
}

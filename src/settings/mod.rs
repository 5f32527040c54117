use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::errors::{OptimizerError, Result};
use crate::provider::ModelLister;
use crate::storage::{Storage, SETTINGS_KEY};
use crate::wire::{CustomSettings, ManagedSettings, ProviderKind, Settings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsEvent {
    Committed { provider: ProviderKind },
}

/// An editable copy of the settings. Nothing here reaches the store until
/// [`SettingsStore::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsDraft {
    pub managed: ManagedSettings,
    pub custom: CustomSettings,
    managed_key_read_only: bool,
}

impl SettingsDraft {
    pub fn managed_key_read_only(&self) -> bool {
        self.managed_key_read_only
    }

    /// Ignored when the managed key is supplied by the environment.
    pub fn set_managed_key(&mut self, key: &str) {
        if self.managed_key_read_only {
            warn!("managed API key is provided by the environment; ignoring edit");
            return;
        }
        self.managed.api_key = key.trim().to_string();
    }

    /// Replaces the model list from the custom endpoint and selects the first
    /// entry. On failure the list and the selection are cleared.
    pub async fn fetch_models(&mut self, lister: &dyn ModelLister) -> Result<&[String]> {
        let endpoint = self.custom.endpoint.trim().to_string();
        let key = self.custom.api_key.trim().to_string();
        if endpoint.is_empty() || key.is_empty() {
            return Err(OptimizerError::Validation(
                "API Key and Endpoint URL are required.".into(),
            ));
        }
        match lister.list_models(&key, &endpoint).await {
            Ok(models) => {
                self.custom.execution_model = models.first().cloned().unwrap_or_default();
                self.custom.models = models;
                Ok(&self.custom.models)
            }
            Err(e) => {
                self.custom.models.clear();
                self.custom.execution_model.clear();
                Err(e)
            }
        }
    }
}

pub struct SettingsStore {
    storage: Arc<dyn Storage>,
    /// Exactly what is persisted; never contains the environment key.
    stored: Settings,
    env_key: Option<String>,
    migrated: bool,
    events: broadcast::Sender<SettingsEvent>,
}

impl SettingsStore {
    /// Reads persisted settings, migrating the legacy flat shape in place.
    /// Missing or corrupt data yields defaults.
    pub fn load(storage: Arc<dyn Storage>, env_key: Option<String>) -> Self {
        let (events, _) = broadcast::channel(16);
        let raw = match storage.get(SETTINGS_KEY) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "settings storage unreadable; using defaults");
                None
            }
        };

        let mut store = Self {
            storage,
            stored: Settings::default(),
            env_key: env_key.filter(|k| !k.trim().is_empty()),
            migrated: false,
            events,
        };

        let Some(raw) = raw else { return store };
        match serde_json::from_str::<Value>(&raw) {
            Ok(v) if is_legacy_shape(&v) => {
                store.stored = migrate_legacy(&v);
                info!("migrated legacy flat settings to nested shape");
                store.persist();
                store.migrated = true;
            }
            Ok(v) => match serde_json::from_value::<Settings>(v) {
                Ok(s) => store.stored = s,
                Err(e) => warn!(error = %e, "stored settings unreadable; using defaults"),
            },
            Err(e) => warn!(error = %e, "stored settings are corrupt; using defaults"),
        }
        store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsEvent> {
        self.events.subscribe()
    }

    /// Effective settings: the environment key, when present, overrides the stored managed key.
    pub fn settings(&self) -> Settings {
        let mut s = self.stored.clone();
        if let Some(key) = &self.env_key {
            s.managed.api_key = key.clone();
        }
        s
    }

    /// The stored document was in the legacy flat shape and was rewritten by `load`.
    pub fn was_migrated(&self) -> bool {
        self.migrated
    }

    pub fn managed_key_from_env(&self) -> bool {
        self.env_key.is_some()
    }

    pub fn open_draft(&self) -> SettingsDraft {
        let effective = self.settings();
        SettingsDraft {
            managed: effective.managed,
            custom: effective.custom,
            managed_key_read_only: self.managed_key_from_env(),
        }
    }

    /// The custom provider wins only when endpoint, key and execution model are all set.
    pub fn commit(&mut self, draft: SettingsDraft) -> Settings {
        let provider = if draft.custom.is_fully_specified() {
            ProviderKind::Custom
        } else {
            ProviderKind::Managed
        };
        let mut managed = draft.managed;
        if self.env_key.is_some() {
            managed.api_key = self.stored.managed.api_key.clone();
        }
        self.stored = Settings { provider, managed, custom: draft.custom };
        self.persist();
        let _ = self.events.send(SettingsEvent::Committed { provider });
        self.settings()
    }

    fn persist(&self) {
        let write = serde_json::to_string(&self.stored)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.storage.set(SETTINGS_KEY, &json));
        if let Err(e) = write {
            warn!(error = %e, "failed to persist settings");
        }
    }
}

fn is_legacy_shape(v: &Value) -> bool {
    match v.as_object() {
        Some(obj) => {
            obj.contains_key("endpoint") || !(obj.contains_key("managed") || obj.contains_key("gemini"))
        }
        None => false,
    }
}

fn migrate_legacy(v: &Value) -> Settings {
    let text = |k: &str| v.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
    let provider = v
        .get("provider")
        .cloned()
        .and_then(|p| serde_json::from_value::<ProviderKind>(p).ok())
        .unwrap_or_default();
    let models = v
        .get("models")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    Settings {
        provider,
        managed: ManagedSettings::default(),
        custom: CustomSettings {
            endpoint: text("endpoint"),
            api_key: text("apiKey"),
            models,
            execution_model: text("executionModel"),
        },
    }
}

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// ========================================
/// Persisted records and provider envelope
/// ========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub reasoning: String,
}

/// One completed optimization. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub original_prompt: String,
    pub optimized_prompt: String,
    pub full_prompt_diff_html: String,
    #[serde(default)]
    pub changes: Vec<Change>,
    pub target_model: String,
    pub prompt_objective: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
    #[serde(default)]
    pub change_request: String,
}

/// The object a provider is asked to return. Every field is optional on the
/// wire; the session controller fills gaps before building a [`HistoryItem`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationEnvelope {
    #[serde(default)]
    pub optimized_prompt: Option<String>,
    #[serde(default)]
    pub full_prompt_diff_html: Option<String>,
    #[serde(default)]
    pub changes: Option<Vec<Change>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    #[serde(alias = "gemini")]
    Managed,
    #[serde(alias = "openai")]
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagedSettings {
    pub api_key: String,
    pub model: String,
}

impl Default for ManagedSettings {
    fn default() -> Self {
        Self { api_key: String::new(), model: "gemini-2.5-flash".into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomSettings {
    pub endpoint: String,
    pub api_key: String,
    pub models: Vec<String>,
    pub execution_model: String,
}

impl CustomSettings {
    /// Endpoint, key and execution model are all present.
    pub fn is_fully_specified(&self) -> bool {
        !self.endpoint.trim().is_empty()
            && !self.api_key.trim().is_empty()
            && !self.execution_model.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderKind,
    #[serde(alias = "gemini")]
    pub managed: ManagedSettings,
    #[serde(alias = "openai")]
    pub custom: CustomSettings,
}

/// Timestamps are written as RFC 3339 with millisecond precision. On read,
/// RFC 3339 strings and epoch-millisecond numbers are both accepted.
pub mod timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::format_millis;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_millis(ts))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| D::Error::custom(format!("invalid timestamp {s:?}: {e}"))),
            Raw::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
        }
    }
}

pub fn format_millis(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

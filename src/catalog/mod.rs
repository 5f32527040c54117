use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub value: &'static str,
    pub name: &'static str,
}

const fn choice(value: &'static str, name: &'static str) -> Choice {
    Choice { value, name }
}

pub const UNIVERSAL: &str = "universal";
pub const DEFAULT_OBJECTIVE: &str = "general";

pub const TARGET_MODELS: &[Choice] = &[
    choice("universal", "Any"),
    choice("gpt", "GPT (Family)"),
    choice("claude", "Claude (Family)"),
    choice("gemini", "Gemini (Family)"),
    choice("deepseek", "DeepSeek (Family)"),
    choice("qwen", "Qwen (Family)"),
    choice("gpt-image-1", "GPT-Image-1 (4o)"),
    choice("gemini-flash", "Gemini Flash (Image)"),
    choice("midjourney", "Midjourney"),
    choice("stable-diffusion", "Stable Diffusion"),
    choice("flux", "FLUX"),
    choice("veo", "Veo (Family)"),
    choice("sora", "Sora (Family)"),
    choice("kling", "Kling (Family)"),
    choice("wan", "Wan (Family)"),
];

pub const OBJECTIVES: &[Choice] = &[
    choice("general", "General"),
    choice("coding", "Coding"),
    choice("technical", "Technical"),
    choice("writing", "Writing"),
    choice("instructional", "Instructional"),
    choice("image", "Image"),
    choice("video", "Video"),
];

const IMAGE_MODELS: &[&str] = &["gpt-image-1", "gemini-flash", "midjourney", "stable-diffusion", "flux"];
const VIDEO_MODELS: &[&str] = &["veo", "sora", "kling", "wan"];

/// Constraint on the optimized prompt's own output, not on the provider's reply.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPreference {
    #[default]
    Text,
    Json,
}

impl OutputPreference {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputPreference::Text => "TEXT",
            OutputPreference::Json => "JSON",
        }
    }
}

pub fn model_values() -> impl Iterator<Item = &'static str> {
    TARGET_MODELS.iter().map(|c| c.value)
}

pub fn objective_values() -> impl Iterator<Item = &'static str> {
    OBJECTIVES.iter().map(|c| c.value)
}

pub fn is_visual(objective: &str) -> bool {
    matches!(objective, "image" | "video")
}

/// Image objectives see only image targets, video only video targets, and
/// everything else only text targets. `universal` is always available.
pub fn available_models(objective: &str) -> Vec<Choice> {
    let visual = |v: &str| IMAGE_MODELS.contains(&v) || VIDEO_MODELS.contains(&v);
    TARGET_MODELS
        .iter()
        .copied()
        .filter(|c| match objective {
            _ if c.value == UNIVERSAL => true,
            "image" => IMAGE_MODELS.contains(&c.value),
            "video" => VIDEO_MODELS.contains(&c.value),
            _ => !visual(c.value),
        })
        .collect()
}

/// Falls back to `universal` when `target` is not offered for `objective`.
pub fn normalize_target<'a>(objective: &str, target: &'a str) -> &'a str {
    if available_models(objective).iter().any(|c| c.value == target) {
        target
    } else {
        UNIVERSAL
    }
}

pub fn model_name(value: &str) -> &str {
    lookup(TARGET_MODELS, value)
}

pub fn objective_name(value: &str) -> &str {
    lookup(OBJECTIVES, value)
}

fn lookup<'a>(list: &'static [Choice], value: &'a str) -> &'a str {
    list.iter().find(|c| c.value == value).map_or(value, |c| c.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(list: Vec<Choice>) -> Vec<&'static str> {
        list.into_iter().map(|c| c.value).collect()
    }

    #[test]
    fn visual_objectives_filter_targets() {
        assert_eq!(
            values(available_models("video")),
            vec!["universal", "veo", "sora", "kling", "wan"]
        );
        let image = values(available_models("image"));
        assert!(image.contains(&"midjourney"));
        assert!(!image.contains(&"gpt"));
        let text = values(available_models("coding"));
        assert!(text.contains(&"deepseek"));
        assert!(!text.contains(&"flux"));
    }

    #[test]
    fn unavailable_target_resets_to_universal() {
        assert_eq!(normalize_target("general", "sora"), "universal");
        assert_eq!(normalize_target("video", "sora"), "sora");
        assert_eq!(normalize_target("general", "claude"), "claude");
    }

    #[test]
    fn names_fall_back_to_value() {
        assert_eq!(model_name("gpt"), "GPT (Family)");
        assert_eq!(objective_name("coding"), "Coding");
        assert_eq!(model_name("mystery"), "mystery");
    }
}

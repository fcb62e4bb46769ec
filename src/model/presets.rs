use serde::Serialize;

pub const DEFAULT_MODEL: &str = "qwen3-coder:480b-cloud";
pub const MIN_OUTPUT_TOKENS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPreset {
    pub name: &'static str,
    pub context_window: u32,
    pub ideal_max_tokens: u32,
    pub max_tokens_cap: u32,
    pub temperature: f64,
}

pub static PRESETS: &[ModelPreset] = &[
    ModelPreset {
        name: "qwen3-coder:480b-cloud",
        context_window: 262_144,
        ideal_max_tokens: 4_096,
        max_tokens_cap: 16_384,
        temperature: 0.4,
    },
    ModelPreset {
        name: "gpt-oss:120b-cloud",
        context_window: 131_072,
        ideal_max_tokens: 4_096,
        max_tokens_cap: 8_192,
        temperature: 0.5,
    },
    ModelPreset {
        name: "gpt-oss:20b-cloud",
        context_window: 131_072,
        ideal_max_tokens: 2_048,
        max_tokens_cap: 8_192,
        temperature: 0.5,
    },
    ModelPreset {
        name: "deepseek-v3.1:671b-cloud",
        context_window: 163_840,
        ideal_max_tokens: 4_096,
        max_tokens_cap: 8_192,
        temperature: 0.3,
    },
    ModelPreset {
        name: "kimi-k2:1t-cloud",
        context_window: 262_144,
        ideal_max_tokens: 4_096,
        max_tokens_cap: 16_384,
        temperature: 0.6,
    },
];

/// Alias table. Matching is first-hit in declaration order, so the more
/// specific `gpt-oss` sizes are listed before the bare family name.
pub static ALIASES: &[(&str, &str)] = &[
    ("qwen3-coder", "qwen3-coder:480b-cloud"),
    ("qwen", "qwen3-coder:480b-cloud"),
    ("gpt-oss:20b", "gpt-oss:20b-cloud"),
    ("gpt-oss-20b", "gpt-oss:20b-cloud"),
    ("gpt-oss", "gpt-oss:120b-cloud"),
    ("deepseek", "deepseek-v3.1:671b-cloud"),
    ("kimi", "kimi-k2:1t-cloud"),
];

/// Limits actually applied to a generation, echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedPreset {
    pub model: String,
    pub context_window: u32,
    pub ideal_max_tokens: u32,
    pub max_tokens_cap: u32,
    pub max_tokens: u32,
    pub temperature: f64,
}

pub fn preset(name: &str) -> Option<&'static ModelPreset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

pub fn default_preset() -> &'static ModelPreset {
    &PRESETS[0]
}

/// Maps a free-form model identifier onto a canonical preset name.
pub fn resolve_model(requested: Option<&str>) -> &'static str {
    let Some(raw) = requested.map(str::trim).filter(|s| !s.is_empty()) else {
        return DEFAULT_MODEL;
    };
    let lowered = raw.to_lowercase();

    if let Some((_, canonical)) = ALIASES
        .iter()
        .find(|(alias, _)| lowered.contains(&alias.to_lowercase()))
    {
        return *canonical;
    }

    preset(raw).map(|p| p.name).unwrap_or(DEFAULT_MODEL)
}

pub fn apply_limits(
    canonical: &str,
    max_tokens: Option<i64>,
    temperature: Option<f64>,
) -> AppliedPreset {
    let preset = preset(canonical).unwrap_or_else(default_preset);

    let requested = max_tokens.unwrap_or(i64::from(preset.ideal_max_tokens));
    let chosen = requested.clamp(
        i64::from(MIN_OUTPUT_TOKENS),
        i64::from(preset.max_tokens_cap.max(MIN_OUTPUT_TOKENS)),
    ) as u32;

    AppliedPreset {
        model: preset.name.to_string(),
        context_window: preset.context_window,
        ideal_max_tokens: preset.ideal_max_tokens,
        max_tokens_cap: preset.max_tokens_cap,
        max_tokens: chosen,
        temperature: temperature.unwrap_or(preset.temperature),
    }
}

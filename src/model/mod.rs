mod presets;
mod types;

pub use presets::{
    ALIASES, AppliedPreset, DEFAULT_MODEL, MIN_OUTPUT_TOKENS, ModelPreset, PRESETS, apply_limits,
    resolve_model,
};
pub use types::{ChatMessage, ChatPayload, GenerationRequest, GenerationResponse};

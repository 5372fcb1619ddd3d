//! Built-in pricing table for common LLM models.
//!
//! Prices are in USD per 1 million tokens. Backs the default
//! `LanguageModel::estimate_cost`; implementations with richer pricing
//! override the trait method instead.

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Look up built-in pricing for a model ID.
pub fn lookup(model_id: &str) -> Option<ModelPricing> {
    let (input, output) = match model_id {
        // ── Anthropic ──────────────────────────────────────────────
        "anthropic/claude-sonnet-4" => (3.0, 15.0),
        "anthropic/claude-opus-4" => (15.0, 75.0),
        "anthropic/claude-3.5-sonnet" => (3.0, 15.0),
        "anthropic/claude-3.5-haiku" => (0.8, 4.0),
        "anthropic/claude-3-haiku" => (0.25, 1.25),

        // ── OpenAI ─────────────────────────────────────────────────
        "openai/gpt-4o" => (2.5, 10.0),
        "openai/gpt-4o-mini" => (0.15, 0.6),
        "openai/o1" => (15.0, 60.0),
        "openai/o3-mini" => (1.1, 4.4),

        // ── Google ─────────────────────────────────────────────────
        "google/gemini-2.0-flash" => (0.1, 0.4),
        "google/gemini-1.5-pro" => (1.25, 5.0),

        _ => return None,
    };
    Some(ModelPricing {
        input_per_m: input,
        output_per_m: output,
    })
}

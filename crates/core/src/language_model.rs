//! LanguageModel trait — the abstraction over LLM backends.
//!
//! The engine never owns a wire protocol. The host passes an implementation
//! of this capability; the orchestrator only uses it for rolling-summary
//! generation, and callers may use `estimate_cost` for accounting.

use crate::error::LmError;
use crate::pricing;
use async_trait::async_trait;

/// The language model capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// A human-readable name for this model backend.
    fn name(&self) -> &str;

    /// Send a prompt and get the completion text.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LmError>;

    /// Estimate the USD cost of a request. Pure — no I/O.
    ///
    /// The default implementation consults the built-in pricing table and
    /// returns zero for unknown models.
    fn estimate_cost(&self, input_tokens: u32, output_tokens: u32, model_id: &str) -> f64 {
        pricing::lookup(model_id)
            .map(|p| p.cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubModel;

    #[async_trait]
    impl LanguageModel for StubModel {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, LmError> {
            Ok("ok".into())
        }
    }

    #[tokio::test]
    async fn default_cost_uses_pricing_table() {
        let model = StubModel;
        let cost = model.estimate_cost(1_000_000, 0, "anthropic/claude-3.5-haiku");
        assert!((cost - 0.8).abs() < 1e-9);
        assert_eq!(model.estimate_cost(1000, 1000, "no/such-model"), 0.0);
    }
}

//! Built-in pricing table for common LLM models.
//!
//! Prices are in USD per 1 million tokens. Each model has an input and
//! output price and, where the upstream provider publishes one, a reduced
//! cached-input price. Custom pricing can be added at runtime via TOML
//! config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
    /// Price per 1M cached input tokens in USD. Falls back to the full
    /// input price when absent.
    pub cached_per_m: Option<f64>,
}

impl ModelPricing {
    /// Create a new pricing entry without a cached-input discount.
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cached_per_m: None,
        }
    }

    /// Create a pricing entry with a cached-input discount.
    pub fn with_cached(input_per_m: f64, output_per_m: f64, cached_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cached_per_m: Some(cached_per_m),
        }
    }

    /// Compute cost for the given token counts.
    ///
    /// Cached tokens are a subset of input tokens; the fresh-input share is
    /// `max(0, input - cached)` so cached tokens are never also billed at
    /// the full input price.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32, cached_tokens: u32) -> f64 {
        let fresh_input = input_tokens.saturating_sub(cached_tokens);
        let cached_price = self.cached_per_m.unwrap_or(self.input_per_m);
        (fresh_input as f64 * self.input_per_m
            + cached_tokens as f64 * cached_price
            + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Conservative default applied when a model matches nothing in the table.
/// Deliberately on the expensive side so unknown models over-report rather
/// than silently cost nothing.
const FALLBACK_PRICING: ModelPricing = ModelPricing {
    input_per_m: 5.0,
    output_per_m: 15.0,
    cached_per_m: None,
};

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    ///
    /// Keys are model *families*: a versioned model name resolves to the
    /// longest family key it contains (see [`PricingTable::lookup`]).
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert(
            "claude-opus-4".into(),
            ModelPricing::with_cached(15.0, 75.0, 1.5),
        );
        prices.insert(
            "claude-sonnet-4".into(),
            ModelPricing::with_cached(3.0, 15.0, 0.3),
        );
        prices.insert(
            "claude-3-7-sonnet".into(),
            ModelPricing::with_cached(3.0, 15.0, 0.3),
        );
        prices.insert(
            "claude-3-5-sonnet".into(),
            ModelPricing::with_cached(3.0, 15.0, 0.3),
        );
        prices.insert(
            "claude-3-5-haiku".into(),
            ModelPricing::with_cached(0.8, 4.0, 0.08),
        );
        prices.insert(
            "claude-3-haiku".into(),
            ModelPricing::with_cached(0.25, 1.25, 0.03),
        );

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert(
            "gpt-4o-mini".into(),
            ModelPricing::with_cached(0.15, 0.6, 0.075),
        );
        prices.insert("gpt-4o".into(), ModelPricing::with_cached(2.5, 10.0, 1.25));
        prices.insert("gpt-4-turbo".into(), ModelPricing::new(10.0, 30.0));
        prices.insert("o3-mini".into(), ModelPricing::new(1.1, 4.4));

        // ── Google ─────────────────────────────────────────────────
        prices.insert("gemini-2.0-flash".into(), ModelPricing::new(0.1, 0.4));
        prices.insert("gemini-1.5-pro".into(), ModelPricing::new(1.25, 5.0));

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap();
        prices.insert(model.into(), pricing);
    }

    /// Resolve pricing for a model name.
    ///
    /// Matching order:
    /// 1. exact name match;
    /// 2. longest family key that is a substring of the model name
    ///    (`claude-sonnet-4-20250514` resolves via `claude-sonnet-4`);
    /// 3. the conservative fallback price.
    pub fn lookup(&self, model: &str) -> ModelPricing {
        let prices = self.prices.read().unwrap();

        if let Some(p) = prices.get(model) {
            return p.clone();
        }

        let model_lower = model.to_lowercase();
        let mut best: Option<(&String, &ModelPricing)> = None;
        for (key, pricing) in prices.iter() {
            if model_lower.contains(&key.to_lowercase()) {
                match best {
                    Some((best_key, _)) if best_key.len() >= key.len() => {}
                    _ => best = Some((key, pricing)),
                }
            }
        }

        match best {
            Some((key, p)) => {
                tracing::debug!(model, family = %key, "Priced model via family match");
                p.clone()
            }
            None => {
                tracing::debug!(model, "No pricing entry, using fallback");
                FALLBACK_PRICING.clone()
            }
        }
    }

    /// Compute cost for a model call.
    pub fn compute_cost(
        &self,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        cached_tokens: u32,
    ) -> f64 {
        self.lookup(model)
            .cost(input_tokens, output_tokens, cached_tokens)
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap();
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.prices.read().unwrap().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_models() {
        let table = PricingTable::with_defaults();
        assert!(table.len() >= 10);
        assert!(!table.is_empty());
    }

    #[test]
    fn exact_match_cost() {
        let table = PricingTable::with_defaults();
        // Sonnet 4: $3/M input, $15/M output
        let cost = table.compute_cost("claude-sonnet-4", 1000, 500, 0);
        // (1000 * 3.0 + 500 * 15.0) / 1M = 0.0105
        assert!((cost - 0.0105).abs() < 1e-10);
    }

    #[test]
    fn versioned_name_resolves_family() {
        let table = PricingTable::with_defaults();
        let versioned = table.compute_cost("claude-sonnet-4-20250514", 1000, 500, 0);
        let family = table.compute_cost("claude-sonnet-4", 1000, 500, 0);
        assert!((versioned - family).abs() < 1e-10);
    }

    #[test]
    fn longest_family_wins() {
        let table = PricingTable::with_defaults();
        // "gpt-4o-mini-2024-07-18" contains both "gpt-4o" and "gpt-4o-mini";
        // the longer (cheaper) family must win.
        let cost = table.compute_cost("gpt-4o-mini-2024-07-18", 1_000_000, 0, 0);
        assert!((cost - 0.15).abs() < 1e-10);
    }

    #[test]
    fn unknown_model_uses_fallback() {
        let table = PricingTable::with_defaults();
        let cost = table.compute_cost("mystery-model-9000", 1_000_000, 0, 0);
        assert!((cost - FALLBACK_PRICING.input_per_m).abs() < 1e-10);
        assert!(cost > 0.0);
    }

    #[test]
    fn cached_tokens_billed_at_discount() {
        let p = ModelPricing::with_cached(3.0, 15.0, 0.3);
        // 1000 input of which 600 cached, 0 output:
        // 400 * 3.0 + 600 * 0.3 = 1200 + 180 = 1380 per M
        let cost = p.cost(1000, 0, 600);
        assert!((cost - 0.00138).abs() < 1e-12);
        // Strictly cheaper than billing everything fresh
        assert!(cost < p.cost(1000, 0, 0));
    }

    #[test]
    fn cached_without_discount_uses_input_price() {
        let p = ModelPricing::new(2.0, 4.0);
        // Cached price defaults to input price, so splitting doesn't matter
        assert!((p.cost(1000, 0, 600) - p.cost(1000, 0, 0)).abs() < 1e-12);
    }

    #[test]
    fn cached_exceeding_input_never_negative() {
        let p = ModelPricing::with_cached(3.0, 15.0, 0.3);
        // Degenerate report: cached > input. Fresh share clamps to zero.
        let cost = p.cost(100, 0, 500);
        assert!(cost >= 0.0);
        assert!((cost - (500.0 * 0.3) / 1_000_000.0).abs() < 1e-12);
    }

    #[test]
    fn custom_override() {
        let table = PricingTable::with_defaults();
        table.set("test-model", ModelPricing::new(1.0, 3.0));
        let cost = table.compute_cost("test-model", 10, 6, 0);
        // (10 * 1.0 + 6 * 3.0) / 1M = 0.000028
        assert!((cost - 0.000028).abs() < 1e-12);
    }

    #[test]
    fn list_models_sorted() {
        let table = PricingTable::with_defaults();
        let models = table.models();
        assert!(models.contains(&"claude-sonnet-4".to_string()));
        assert!(models.windows(2).all(|w| w[0] <= w[1]));
    }
}

//! Model pricing and cost calculation
//!
//! Prices are resolved by model family: the first family pattern contained
//! (case-insensitively) in the model identifier wins. Configured overrides are
//! consulted before the built-in table. Unknown models fall back to Sonnet
//! pricing, the most common model in practice.

use crate::config::PricingConfig;
use crate::models::TokenCounts;
use tracing::debug;

/// Per-token prices in USD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_rate: f64,
    pub output_rate: f64,
    pub cache_write_rate: f64,
    pub cache_read_rate: f64,
}

impl ModelPricing {
    /// Build from USD-per-million-token rates
    pub fn per_million(input: f64, output: f64, cache_write: f64, cache_read: f64) -> Self {
        Self {
            input_rate: input / 1_000_000.0,
            output_rate: output / 1_000_000.0,
            cache_write_rate: cache_write / 1_000_000.0,
            cache_read_rate: cache_read / 1_000_000.0,
        }
    }

    pub fn cost(&self, tokens: &TokenCounts) -> f64 {
        tokens.input as f64 * self.input_rate
            + tokens.output as f64 * self.output_rate
            + tokens.cache_write as f64 * self.cache_write_rate
            + tokens.cache_read as f64 * self.cache_read_rate
    }
}

/// Built-in families as USD-per-million rates, most specific pattern first
const BUILTIN_FAMILIES: &[(&str, [f64; 4])] = &[
    ("opus-4-5", [5.0, 25.0, 6.25, 0.5]),
    ("opus-4-6", [5.0, 25.0, 6.25, 0.5]),
    ("opus", [15.0, 75.0, 18.75, 1.5]),
    ("sonnet", [3.0, 15.0, 3.75, 0.3]),
    ("haiku-4", [1.0, 5.0, 1.25, 0.1]),
    ("3-5-haiku", [0.8, 4.0, 1.0, 0.08]),
    ("3.5-haiku", [0.8, 4.0, 1.0, 0.08]),
    ("haiku", [0.25, 1.25, 0.3, 0.03]),
];

/// Sonnet rates, used when no family matches
const FALLBACK_RATES: [f64; 4] = [3.0, 15.0, 3.75, 0.3];

impl From<[f64; 4]> for ModelPricing {
    fn from(rates: [f64; 4]) -> Self {
        Self::per_million(rates[0], rates[1], rates[2], rates[3])
    }
}

/// Maps model identifiers to prices and computes record costs
#[derive(Debug, Clone)]
pub struct PricingResolver {
    families: Vec<(String, ModelPricing)>,
    fallback: ModelPricing,
}

impl Default for PricingResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingResolver {
    pub fn new() -> Self {
        Self {
            families: BUILTIN_FAMILIES
                .iter()
                .map(|(pattern, rates)| (pattern.to_string(), ModelPricing::from(*rates)))
                .collect(),
            fallback: ModelPricing::from(FALLBACK_RATES),
        }
    }

    /// Built-in table with configured overrides taking precedence
    pub fn from_config(config: &PricingConfig) -> Self {
        let mut resolver = Self::new();
        let overrides: Vec<(String, ModelPricing)> = config
            .overrides
            .iter()
            .map(|(family, rates)| {
                (
                    family.to_lowercase(),
                    ModelPricing::per_million(
                        rates.input_per_million,
                        rates.output_per_million,
                        rates.cache_write_per_million,
                        rates.cache_read_per_million,
                    ),
                )
            })
            .collect();

        resolver.families.splice(0..0, overrides);
        resolver
    }

    /// Price table for a model identifier
    pub fn resolve(&self, model: &str) -> ModelPricing {
        let model_lower = model.to_lowercase();

        self.families
            .iter()
            .find(|(pattern, _)| model_lower.contains(pattern.as_str()))
            .map(|(_, pricing)| *pricing)
            .unwrap_or_else(|| {
                debug!(model = %model, "No pricing family matched, using fallback pricing");
                self.fallback
            })
    }

    /// Cost of a record: the explicit value when present, otherwise computed
    pub fn cost_for(&self, model: &str, tokens: &TokenCounts, explicit_cost: Option<f64>) -> f64 {
        match explicit_cost {
            Some(cost) if cost.is_finite() => cost,
            _ => self.resolve(model).cost(tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriceOverride;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn per_million_input(pricing: ModelPricing) -> f64 {
        pricing.input_rate * 1_000_000.0
    }

    #[test]
    fn test_calculate_cost_sonnet() {
        let resolver = PricingResolver::new();
        let tokens = TokenCounts::new(1_000_000, 1_000_000, 0, 0);
        let cost = resolver.cost_for("claude-3-5-sonnet-20241022", &tokens, None);
        assert!(approx_eq(cost, 18.0));
    }

    #[test]
    fn test_family_match_is_case_insensitive() {
        let resolver = PricingResolver::new();
        assert!(approx_eq(per_million_input(resolver.resolve("Claude-OPUS-4-20250514")), 15.0));
        assert!(approx_eq(per_million_input(resolver.resolve("claude-opus-4-5-20251101")), 5.0));
        assert!(approx_eq(per_million_input(resolver.resolve("claude-3-5-haiku-20241022")), 0.8));
        assert!(approx_eq(per_million_input(resolver.resolve("claude-3-haiku-20240307")), 0.25));
        assert!(approx_eq(per_million_input(resolver.resolve("claude-haiku-4-5")), 1.0));
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let resolver = PricingResolver::new();
        assert!(approx_eq(per_million_input(resolver.resolve("gpt-something")), 3.0));
    }

    #[test]
    fn test_explicit_cost_wins() {
        let resolver = PricingResolver::new();
        let tokens = TokenCounts::new(1_000_000, 0, 0, 0);
        assert!(approx_eq(resolver.cost_for("claude-opus-4", &tokens, Some(0.42)), 0.42));
        assert!(approx_eq(resolver.cost_for("claude-opus-4", &tokens, None), 15.0));
    }

    #[test]
    fn test_cost_uses_all_four_rates() {
        let pricing = ModelPricing::per_million(1.0, 2.0, 3.0, 4.0);
        let tokens = TokenCounts::new(1_000_000, 1_000_000, 1_000_000, 1_000_000);
        assert!(approx_eq(pricing.cost(&tokens), 10.0));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = PricingConfig::default();
        config.overrides.insert(
            "Sonnet".to_string(),
            PriceOverride {
                input_per_million: 1.0,
                output_per_million: 1.0,
                cache_write_per_million: 1.0,
                cache_read_per_million: 1.0,
            },
        );
        let resolver = PricingResolver::from_config(&config);
        let tokens = TokenCounts::new(1_000_000, 0, 0, 0);
        assert!(approx_eq(resolver.cost_for("claude-sonnet-4", &tokens, None), 1.0));
        assert!(approx_eq(per_million_input(resolver.resolve("claude-opus-4")), 15.0));
    }
}

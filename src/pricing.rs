//! Published per-1K-token rates for the supported models. Rates are USD and
//! only used to estimate response cost; billing stays with the providers.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

static MODEL_PRICING: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert("gpt-4o", ModelPricing { input_per_1k: 0.0025, output_per_1k: 0.01 });
    table.insert("gpt-4o-mini", ModelPricing { input_per_1k: 0.00015, output_per_1k: 0.0006 });
    table.insert("gpt-4-turbo", ModelPricing { input_per_1k: 0.01, output_per_1k: 0.03 });
    table.insert("gpt-3.5-turbo", ModelPricing { input_per_1k: 0.0005, output_per_1k: 0.0015 });
    table.insert("claude-3-5-sonnet-20241022", ModelPricing {
        input_per_1k: 0.003,
        output_per_1k: 0.015,
    });
    table.insert("claude-3-5-haiku-20241022", ModelPricing {
        input_per_1k: 0.0008,
        output_per_1k: 0.004,
    });
    table.insert("claude-3-opus-20240229", ModelPricing {
        input_per_1k: 0.015,
        output_per_1k: 0.075,
    });
    table.insert("claude-3-haiku-20240307", ModelPricing {
        input_per_1k: 0.00025,
        output_per_1k: 0.00125,
    });
    table.insert("gemini-1.5-flash", ModelPricing {
        input_per_1k: 0.000075,
        output_per_1k: 0.0003,
    });
    table.insert("gemini-1.5-pro", ModelPricing { input_per_1k: 0.00125, output_per_1k: 0.005 });
    table.insert("gemini-2.0-flash", ModelPricing { input_per_1k: 0.0001, output_per_1k: 0.0004 });
    table.insert("text-embedding-3-small", ModelPricing {
        input_per_1k: 0.00002,
        output_per_1k: 0.0,
    });
    table.insert("text-embedding-3-large", ModelPricing {
        input_per_1k: 0.00013,
        output_per_1k: 0.0,
    });
    table
});

/// Looks a model up by exact name first, then by the longest table entry the
/// name starts with. Dated releases like `gpt-4o-mini-2024-07-18` resolve to
/// their base rate this way.
pub fn pricing_for(model: &str) -> Option<ModelPricing> {
    if let Some(pricing) = MODEL_PRICING.get(model) {
        return Some(*pricing);
    }

    MODEL_PRICING.iter()
        .filter(|(name, _)| model.starts_with(*name))
        .max_by_key(|(name, _)| name.len())
        .map(|(_, pricing)| *pricing)
}

/// Estimated USD cost for one exchange, rounded to six decimal places.
/// Unknown models cost 0.0 rather than failing the request.
pub fn estimate_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let Some(pricing) = pricing_for(model) else {
        return 0.0;
    };

    let cost =
        ((prompt_tokens as f64) / 1000.0) * pricing.input_per_1k +
        ((completion_tokens as f64) / 1000.0) * pricing.output_per_1k;
    (cost * 1_000_000.0).round() / 1_000_000.0
}

/// Rough token count for providers that omit usage data. Four characters per
/// token is the usual approximation for these models.
pub fn estimate_tokens(chars: usize) -> u32 {
    (chars.div_ceil(4)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_model_name_resolves() {
        let pricing = pricing_for("gpt-4o").unwrap();
        assert_eq!(pricing.input_per_1k, 0.0025);
        assert_eq!(pricing.output_per_1k, 0.01);
    }

    #[test]
    fn dated_release_prefers_the_longest_prefix() {
        // Must land on gpt-4o-mini, not the shorter gpt-4o entry.
        let pricing = pricing_for("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(pricing.input_per_1k, 0.00015);
    }

    #[test]
    fn unknown_model_costs_nothing() {
        assert!(pricing_for("unreleased-model-x").is_none());
        assert_eq!(estimate_cost("unreleased-model-x", 1000, 1000), 0.0);
    }

    #[test]
    fn cost_is_rounded_to_six_decimals() {
        // 1500 prompt + 500 completion on gpt-4o-mini:
        // 1.5 * 0.00015 + 0.5 * 0.0006 = 0.000525
        assert_eq!(estimate_cost("gpt-4o-mini", 1500, 500), 0.000525);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
    }
}

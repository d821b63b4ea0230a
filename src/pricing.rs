//! Token and cost estimation. Pure calculation, no I/O.

use crate::types::{Cost, ModelInfo, PricePer1k, Usage};

/// Approximate the token count of raw text.
///
/// Takes the larger of a character-based (4 chars/token) and a word-based
/// (0.75 words/token) heuristic; the result errs toward over-estimating.
/// Empty text counts as zero.
pub fn estimate_token_count(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let by_chars = text.chars().count().div_ceil(4);
    let words = text.split_whitespace().count();
    let by_words = (words as f64 / 0.75).ceil() as usize;
    by_chars.max(by_words) as u32
}

/// Derive the cost of an exchange from usage and a per-1K-token price pair.
///
/// Negative prices are not rejected here; validation belongs upstream.
pub fn calculate_cost(
    usage: Usage,
    input_price_per_1k: f64,
    output_price_per_1k: f64,
    currency: impl Into<String>,
) -> Cost {
    let input_cost = input_price_per_1k / 1000.0 * f64::from(usage.prompt_tokens);
    let output_cost = output_price_per_1k / 1000.0 * f64::from(usage.completion_tokens);
    Cost {
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
        currency: currency.into(),
    }
}

/// Resolve the price to use for a model.
///
/// A caller override always wins; otherwise the provider-reported price
/// from the model record; otherwise `None`, and the caller must exclude the
/// model from cost-based comparisons.
pub fn effective_price(model: &ModelInfo, override_price: Option<PricePer1k>) -> Option<PricePer1k> {
    override_price.or(model.price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelKind;

    fn model_with_price(price: Option<PricePer1k>) -> ModelInfo {
        ModelInfo {
            id: "test-model".to_string(),
            owned_by: None,
            kind: ModelKind::Text,
            context_window: None,
            capabilities: vec!["chat".to_string()],
            price,
        }
    }

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_token_count(""), 0);
    }

    #[test]
    fn short_word_dense_text_uses_the_word_heuristic() {
        // 9 chars -> 3 by chars; 3 words -> 4 by words.
        assert_eq!(estimate_token_count("a b cdefg"), 4);
    }

    #[test]
    fn long_unbroken_text_uses_the_char_heuristic() {
        let text = "x".repeat(400);
        assert_eq!(estimate_token_count(&text), 100);
    }

    #[test]
    fn estimate_is_monotonic_at_fixed_word_density() {
        let mut last = 0;
        for n in 1..40 {
            let text = "word ".repeat(n);
            let estimate = estimate_token_count(text.trim());
            assert!(estimate >= last, "estimate dropped at n={n}");
            last = estimate;
        }
    }

    #[test]
    fn total_cost_is_exactly_the_sum_of_the_parts() {
        for (input, output, in_price, out_price) in [
            (0u32, 0u32, 0.0, 0.0),
            (1000, 2000, 0.5, 1.5),
            (123, 4567, 0.0003, 0.0006),
        ] {
            let cost = calculate_cost(Usage::from_counts(input, output), in_price, out_price, "USD");
            assert_eq!(cost.total_cost, cost.input_cost + cost.output_cost);
        }
    }

    #[test]
    fn cost_scales_per_thousand_tokens() {
        let cost = calculate_cost(Usage::from_counts(2000, 1000), 0.5, 1.5, "USD");
        assert_eq!(cost.input_cost, 1.0);
        assert_eq!(cost.output_cost, 1.5);
        assert_eq!(cost.currency, "USD");
    }

    #[test]
    fn override_price_wins_over_provider_price() {
        let model = model_with_price(Some(PricePer1k {
            input: 0.1,
            output: 0.2,
        }));
        let chosen = effective_price(
            &model,
            Some(PricePer1k {
                input: 9.0,
                output: 9.0,
            }),
        )
        .unwrap();
        assert_eq!(chosen.input, 9.0);
    }

    #[test]
    fn unpriced_model_yields_none() {
        assert!(effective_price(&model_with_price(None), None).is_none());
    }
}

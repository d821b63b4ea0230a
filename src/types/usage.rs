//! Token usage and cost records.

use serde::{Deserialize, Serialize};

/// Token usage for one exchange.
///
/// When the API reports a total it is trusted as-is; totals computed locally
/// always satisfy `total_tokens == prompt_tokens + completion_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens used
    pub prompt_tokens: u32,
    /// Output tokens generated
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

impl Usage {
    /// Build a usage record from local counts; the total is derived.
    pub const fn from_counts(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Build a usage record from API-reported fields.
    ///
    /// A missing reported total falls back to the sum of the parts.
    pub fn from_reported(
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
        total_tokens: Option<u32>,
    ) -> Self {
        let prompt = prompt_tokens.unwrap_or(0);
        let completion = completion_tokens.unwrap_or(0);
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total_tokens.unwrap_or(prompt + completion),
        }
    }
}

/// Monetary cost derived from a [`Usage`] and a per-1K-token price pair.
///
/// `total_cost == input_cost + output_cost` by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub currency: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_totals_are_the_sum_of_the_parts() {
        let usage = Usage::from_counts(12, 30);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn reported_total_is_trusted_even_when_inconsistent() {
        let usage = Usage::from_reported(Some(10), Some(10), Some(25));
        assert_eq!(usage.total_tokens, 25);
    }

    #[test]
    fn missing_reported_total_falls_back_to_sum() {
        let usage = Usage::from_reported(Some(9), Some(12), None);
        assert_eq!(usage.total_tokens, 21);
    }
}

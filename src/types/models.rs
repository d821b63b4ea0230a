//! Model records and the heuristics that fill them in.
//!
//! OpenAI-compatible `/models` listings rarely carry more than an id, so
//! kind, context window, capabilities and prices are inferred. The
//! heuristics key on model-id substrings and on the handful of nested price
//! field names providers actually use.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broad model family, inferred from the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Text,
    Multimodal,
    Embedding,
}

/// Price per 1000 tokens for each direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePer1k {
    pub input: f64,
    pub output: f64,
}

/// One entry of a model listing, canonicalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model ID
    pub id: String,
    /// Model owner/organization
    pub owned_by: Option<String>,
    /// Inferred model family
    pub kind: ModelKind,
    /// Inferred context window size
    pub context_window: Option<u32>,
    /// Capability tags ("chat", "vision", ...)
    pub capabilities: Vec<String>,
    /// Provider-reported price, when the listing carried one
    pub price: Option<PricePer1k>,
}

impl ModelInfo {
    /// Canonicalize one entry of a `/models` listing.
    ///
    /// Returns `None` when the entry has no id.
    pub fn from_listing_entry(entry: &Value) -> Option<Self> {
        let id = entry.get("id").and_then(|v| v.as_str())?.to_string();
        Some(Self {
            owned_by: entry
                .get("owned_by")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            kind: infer_kind(&id),
            context_window: entry
                .get("context_length")
                .and_then(|v| v.as_u64())
                .map(|n| n as u32)
                .or_else(|| infer_context_window(&id)),
            capabilities: infer_capabilities(&id),
            price: extract_price(entry),
            id,
        })
    }
}

/// Infer the model family from id substrings.
pub fn infer_kind(id: &str) -> ModelKind {
    let lower = id.to_lowercase();
    if lower.contains("embed") {
        return ModelKind::Embedding;
    }
    if lower.contains("vision")
        || lower.contains("-4o")
        || lower.contains("omni")
        || lower.contains("vl")
    {
        return ModelKind::Multimodal;
    }
    ModelKind::Text
}

/// Infer the context window from well-known id markers.
pub fn infer_context_window(id: &str) -> Option<u32> {
    let lower = id.to_lowercase();
    if lower.contains("128k") {
        return Some(128_000);
    }
    if lower.contains("32k") {
        return Some(32_768);
    }
    if lower.contains("16k") {
        return Some(16_384);
    }
    if lower.contains("gpt-4o") || lower.contains("gpt-4-turbo") {
        return Some(128_000);
    }
    if lower.contains("gpt-4") {
        return Some(8_192);
    }
    if lower.contains("gpt-3.5") {
        return Some(4_096);
    }
    None
}

/// Capability tags based on model id patterns.
pub fn infer_capabilities(id: &str) -> Vec<String> {
    let lower = id.to_lowercase();
    let mut capabilities = vec!["chat".to_string()];

    if lower.contains("embed") {
        capabilities = vec!["embedding".to_string()];
    }
    if lower.contains("vision") || lower.contains("-4o") || lower.contains("vl") {
        capabilities.push("vision".to_string());
    }
    if lower.contains("o1") || lower.contains("reason") || lower.contains("-r1") {
        capabilities.push("reasoning".to_string());
    }

    capabilities
}

/// Probe the nested price field names providers actually use.
///
/// Known shapes: `pricing.prompt`/`pricing.completion` (OpenRouter style),
/// `pricing.input`/`pricing.output`, and flat
/// `input_price`/`output_price`. Values are per-1K-token prices; a pair is
/// only returned when both directions parse.
pub fn extract_price(entry: &Value) -> Option<PricePer1k> {
    const NESTED: [(&str, &str, &str); 2] = [
        ("pricing", "prompt", "completion"),
        ("pricing", "input", "output"),
    ];

    for (outer, input_key, output_key) in NESTED {
        if let Some(pricing) = entry.get(outer)
            && let (Some(input), Some(output)) = (
                price_field(pricing.get(input_key)),
                price_field(pricing.get(output_key)),
            )
        {
            return Some(PricePer1k { input, output });
        }
    }

    match (
        price_field(entry.get("input_price")),
        price_field(entry.get("output_price")),
    ) {
        (Some(input), Some(output)) => Some(PricePer1k { input, output }),
        _ => None,
    }
}

// Some providers report prices as JSON strings, not numbers.
fn price_field(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

//! Cost estimation for model calls.
//!
//! Prices are USD per one million tokens. Lookup tries an exact match first,
//! then the longest matching prefix, so `gemini-1.5-flash-002` resolves to the
//! `gemini-1.5-flash` entry. Unknown models have no cost.

use crate::provider::TokenUsage;

/// Per-model pricing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

const fn price(input_per_million: f64, output_per_million: f64) -> Pricing {
    Pricing {
        input_per_million,
        output_per_million,
    }
}

const PRICE_TABLE: &[(&str, Pricing)] = &[
    // Google
    ("gemini-1.5-flash-8b", price(0.0375, 0.15)),
    ("gemini-1.5-flash", price(0.075, 0.30)),
    ("gemini-1.5-pro", price(1.25, 5.0)),
    ("gemini-2.0-flash-lite", price(0.075, 0.30)),
    ("gemini-2.0-flash", price(0.10, 0.40)),
    ("gemini-2.5-flash", price(0.30, 2.50)),
    ("gemini-2.5-pro", price(1.25, 10.0)),
    ("gemini-pro", price(0.50, 1.50)),
    // OpenAI
    ("gpt-4o-mini", price(0.15, 0.60)),
    ("gpt-4o", price(2.50, 10.0)),
    ("gpt-4.1-mini", price(0.40, 1.60)),
    ("gpt-4.1", price(2.0, 8.0)),
    ("gpt-3.5-turbo", price(0.50, 1.50)),
];

/// Characters per token used when the provider reports no usage.
const CHARS_PER_TOKEN: usize = 4;

/// Looks up pricing for `model`.
pub fn pricing_for(model: &str) -> Option<Pricing> {
    let model = model.trim().to_ascii_lowercase();
    let model = model.strip_prefix("models/").unwrap_or(&model);
    PRICE_TABLE
        .iter()
        .find(|(name, _)| *name == model)
        .or_else(|| {
            PRICE_TABLE
                .iter()
                .filter(|(name, _)| model.starts_with(name))
                .max_by_key(|(name, _)| name.len())
        })
        .map(|(_, pricing)| *pricing)
}

/// Estimated cost in USD, or `None` for unpriced models.
pub fn estimate_cost(model: &str, usage: TokenUsage) -> Option<f64> {
    let pricing = pricing_for(model)?;
    let input = f64::from(usage.prompt_tokens) * pricing.input_per_million / 1_000_000.0;
    let output = f64::from(usage.completion_tokens) * pricing.output_per_million / 1_000_000.0;
    Some(input + output)
}

/// Rough token count for `text`, rounding up.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}

//! Token usage types.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token usage for a step or a whole run.
///
/// Every counter is optional: providers that do not report a counter leave it
/// `None`. Adding two usages is pointwise and null-absorbing, so an absent
/// counter never turns a present one into zero and two absent counters stay
/// absent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,
}

impl Usage {
    /// Usage with input and output counters; the total is their sum.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            total_tokens: Some(input_tokens.saturating_add(output_tokens)),
            ..Default::default()
        }
    }

    /// Merge another usage into this one (accumulate).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens = add_tokens(self.input_tokens, other.input_tokens);
        self.output_tokens = add_tokens(self.output_tokens, other.output_tokens);
        self.total_tokens = add_tokens(self.total_tokens, other.total_tokens);
        self.reasoning_tokens = add_tokens(self.reasoning_tokens, other.reasoning_tokens);
        self.cached_input_tokens =
            add_tokens(self.cached_input_tokens, other.cached_input_tokens);
    }

    /// Whether no counter is present.
    pub fn is_empty(&self) -> bool {
        *self == Usage::default()
    }

    /// Total tokens, falling back to input + output when the provider omits it.
    pub fn effective_total(&self) -> Option<u64> {
        self.total_tokens
            .or_else(|| add_tokens(self.input_tokens, self.output_tokens))
    }

    /// Space-separated `name=value` pairs for present counters.
    pub fn log_description(&self) -> String {
        let counters = [
            ("input", self.input_tokens),
            ("output", self.output_tokens),
            ("total", self.total_tokens),
            ("reasoning", self.reasoning_tokens),
            ("cached", self.cached_input_tokens),
        ];
        counters
            .iter()
            .filter_map(|(name, value)| value.map(|v| format!("{name}={v}")))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn add_tokens(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(mut self, rhs: Usage) -> Usage {
        self.merge(&rhs);
        self
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        self.merge(&rhs);
    }
}

impl<'a> Sum<&'a Usage> for Usage {
    fn sum<I: Iterator<Item = &'a Usage>>(iter: I) -> Usage {
        iter.fold(Usage::default(), |acc, usage| acc + *usage)
    }
}

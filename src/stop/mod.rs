//! Stop conditions for multi-step generation.
//!
//! After every completed step the orchestrator passes the full step history
//! to its conditions, in order. The run stops as soon as one returns `true`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::types::{StepResult, Usage};

/// Decides whether a run should stop issuing model calls.
#[async_trait]
pub trait StopCondition: Send + Sync {
    /// Check whether the run should stop given every step completed so far.
    async fn should_stop(&self, steps: &[StepResult]) -> bool;

    /// Reset internal state (for reuse across runs).
    async fn reset(&self) {}
}

/// Evaluate `conditions` in order; `true` when any of them matches.
pub async fn is_stop_condition_met(
    conditions: &[Arc<dyn StopCondition>],
    steps: &[StepResult],
) -> bool {
    for condition in conditions {
        if condition.should_stop(steps).await {
            return true;
        }
    }
    false
}

/// Conditions used when a request supplies none: stop after one step.
pub fn default_stop_conditions() -> Vec<Arc<dyn StopCondition>> {
    vec![step_count_is(1)]
}

/// Stop once `count` steps have completed.
pub fn step_count_is(count: usize) -> Arc<dyn StopCondition> {
    Arc::new(StepCountIs::new(count))
}

/// Stop once the last step called the named tool.
pub fn has_tool_call(tool_name: impl Into<String>) -> Arc<dyn StopCondition> {
    Arc::new(HasToolCall::new(tool_name))
}

/// Stop after a fixed number of steps.
pub struct StepCountIs {
    count: usize,
}

impl StepCountIs {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

#[async_trait]
impl StopCondition for StepCountIs {
    async fn should_stop(&self, steps: &[StepResult]) -> bool {
        steps.len() >= self.count
    }
}

/// Stop when the last step contains a call to a specific tool.
pub struct HasToolCall {
    tool_name: String,
}

impl HasToolCall {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
        }
    }
}

#[async_trait]
impl StopCondition for HasToolCall {
    async fn should_stop(&self, steps: &[StepResult]) -> bool {
        steps.last().is_some_and(|step| {
            step.tool_calls()
                .iter()
                .any(|call| call.tool_name == self.tool_name)
        })
    }
}

/// Stop when the last step's text contains a specific string.
pub struct StringStop {
    pattern: String,
}

impl StringStop {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

#[async_trait]
impl StopCondition for StringStop {
    async fn should_stop(&self, steps: &[StepResult]) -> bool {
        steps
            .last()
            .is_some_and(|step| step.text().contains(&self.pattern))
    }
}

/// Stop when the last step's text matches a regex.
pub struct RegexStop {
    regex: regex::Regex,
}

impl RegexStop {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: regex::Regex::new(pattern)?,
        })
    }
}

#[async_trait]
impl StopCondition for RegexStop {
    async fn should_stop(&self, steps: &[StepResult]) -> bool {
        steps
            .last()
            .is_some_and(|step| self.regex.is_match(&step.text()))
    }
}

/// Stop once the run has used at least `max_tokens` tokens across all steps.
pub struct TokenCountStop {
    max_tokens: u64,
}

impl TokenCountStop {
    pub fn new(max_tokens: u64) -> Self {
        Self { max_tokens }
    }
}

#[async_trait]
impl StopCondition for TokenCountStop {
    async fn should_stop(&self, steps: &[StepResult]) -> bool {
        let total: Usage = steps.iter().map(|step| &step.usage).sum();
        total.effective_total().unwrap_or(0) >= self.max_tokens
    }
}

/// Stop once a duration has elapsed since the first evaluation.
pub struct TimeoutStop {
    deadline: Mutex<Option<Instant>>,
    duration: Duration,
}

impl TimeoutStop {
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: Mutex::new(None),
            duration,
        }
    }
}

#[async_trait]
impl StopCondition for TimeoutStop {
    async fn should_stop(&self, _steps: &[StepResult]) -> bool {
        let mut deadline = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        let dl = *deadline.get_or_insert_with(|| Instant::now() + self.duration);
        Instant::now() >= dl
    }

    async fn reset(&self) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Stop when a custom predicate over the step history returns true.
pub struct PredicateStop<F: Fn(&[StepResult]) -> bool + Send + Sync> {
    predicate: F,
}

impl<F: Fn(&[StepResult]) -> bool + Send + Sync> PredicateStop<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F: Fn(&[StepResult]) -> bool + Send + Sync> StopCondition for PredicateStop<F> {
    async fn should_stop(&self, steps: &[StepResult]) -> bool {
        (self.predicate)(steps)
    }
}

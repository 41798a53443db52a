//! Run configuration: retries, timeouts, and per-stage model sets.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::llm::{ModelRef, Provider, RetryPolicy};
use crate::prompts::PromptSet;

/// Explicit configuration value threaded through the coordinator and stages.
/// No process-wide mutable state; callers construct one per run setup and
/// may load it from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Rate-limit retries inside the invoker
    pub max_retries: u32,
    /// Per-attempt request timeout in seconds
    pub timeout_secs: u64,
    /// Base backoff after a rate-limit signal, in seconds
    pub rate_limit_delay_secs: u64,
    /// Bound on concurrent invocations within a stage
    pub max_parallel: usize,
    /// Models answering the puzzle independently
    pub answering_models: Vec<ModelRef>,
    /// Models reviewing other models' answers
    pub verification_models: Vec<ModelRef>,
    /// Model synthesizing the final decision
    pub decision_model: ModelRef,
    /// Stage prompt templates
    pub prompts: PromptSet,
}

impl Default for RunConfig {
    fn default() -> Self {
        let answering: Vec<ModelRef> = vec![
            ModelRef::new(Provider::Groq, "llama3-70b-8192"),
            ModelRef::new(Provider::Groq, "llama-3.3-70b-versatile"),
        ];
        Self {
            max_retries: 5,
            timeout_secs: 60,
            rate_limit_delay_secs: 10,
            max_parallel: 4,
            verification_models: answering.clone(),
            decision_model: ModelRef::new(Provider::Groq, "llama-3.3-70b-versatile"),
            answering_models: answering,
            prompts: PromptSet::default(),
        }
    }
}

impl RunConfig {
    /// Validate before any stage executes.
    pub fn validate(&self) -> Result<()> {
        if self.answering_models.is_empty() {
            return Err(Error::config("no answering models configured"));
        }
        if self.verification_models.is_empty() {
            return Err(Error::config("no verification models configured"));
        }
        if self.max_parallel == 0 {
            return Err(Error::config("max_parallel must be at least 1"));
        }
        Ok(())
    }

    /// Every model a run can touch, for the fail-fast routability check.
    /// Correction calls go to the originating answering models.
    pub fn all_models(&self) -> Vec<ModelRef> {
        let mut models = self.answering_models.clone();
        for m in self
            .verification_models
            .iter()
            .chain(std::iter::once(&self.decision_model))
        {
            if !models.contains(m) {
                models.push(m.clone());
            }
        }
        models
    }

    /// The retry policy the invoker should enforce.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            rate_limit_delay: Duration::from_secs(self.rate_limit_delay_secs),
            rate_limit_step: Duration::from_secs(5),
        }
    }

    pub fn with_answering_models(mut self, models: Vec<ModelRef>) -> Self {
        self.answering_models = models;
        self
    }

    pub fn with_verification_models(mut self, models: Vec<ModelRef>) -> Self {
        self.verification_models = models;
        self
    }

    pub fn with_decision_model(mut self, model: ModelRef) -> Self {
        self.decision_model = model;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }
}

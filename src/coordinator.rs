//! Pipeline coordinator: sequences the four stages and owns the run record.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::config::RunConfig;
use crate::error::Result;
use crate::llm::{ModelInvoker, Provider};
use crate::record::{Puzzle, RunRecord, RunStatus};
use crate::stages::{AnsweringStage, CorrectionStage, DecisionStage, VerificationStage};

/// Drives one puzzle through answering, verification, correction, and
/// decision, in that order, appending each stage's output to the run record.
///
/// Construction is the only fallible step: configuration and model
/// routability are checked before any model is contacted. A constructed
/// coordinator always produces a [`RunRecord`], however degraded.
pub struct PipelineCoordinator {
    config: RunConfig,
    invoker: Arc<ModelInvoker>,
}

impl PipelineCoordinator {
    /// Build a coordinator over an already-assembled invoker.
    ///
    /// Fails fast when the configuration is invalid or any configured model
    /// has no registered backend client.
    pub fn new(config: RunConfig, invoker: ModelInvoker) -> Result<Self> {
        config.validate()?;
        invoker.ensure_routable(&config.all_models())?;
        Ok(Self {
            config,
            invoker: Arc::new(invoker),
        })
    }

    /// Build a coordinator with provider clients drawn from environment API
    /// keys.
    pub fn from_env(config: RunConfig) -> Result<Self> {
        let providers: Vec<Provider> = config
            .all_models()
            .iter()
            .map(|m| m.provider)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let invoker =
            ModelInvoker::from_env(&providers, config.timeout_secs, config.retry_policy())?;
        Self::new(config, invoker)
    }

    /// Run the full pipeline on one puzzle.
    ///
    /// Stages execute strictly in sequence; a stage never starts until the
    /// previous one has fully resolved. Model failures degrade the run, they
    /// never abort it. The returned record is terminal: `Failed` when no
    /// model produced an answer, `Degraded` when any call was dropped or the
    /// decision fell back, `Complete` otherwise.
    #[instrument(skip_all, fields(puzzle_id = %puzzle.id))]
    pub async fn run(&self, puzzle: Puzzle) -> RunRecord {
        let mut record = RunRecord::new(puzzle);
        record.config = self.config.clone();
        let attempted = self.config.answering_models.len();

        let answering = AnsweringStage::new(
            Arc::clone(&self.invoker),
            self.config.prompts.answering.clone(),
            self.config.max_parallel,
        );
        let (answers, failures) = answering
            .run(&record.puzzle, &self.config.answering_models)
            .await;
        record.append_answers(answers, failures);

        if record.answers.is_empty() {
            warn!("no model produced an answer; run failed");
            record.status = RunStatus::Failed;
            return self.finish(record, attempted);
        }

        let verification = VerificationStage::new(
            Arc::clone(&self.invoker),
            self.config.prompts.verification.clone(),
            self.config.max_parallel,
        );
        let (verdicts, failures) = verification
            .run(&record.puzzle, &record.answers, &self.config.verification_models)
            .await;
        record.append_verdicts(verdicts, failures);

        let correction = CorrectionStage::new(
            Arc::clone(&self.invoker),
            self.config.prompts.correction.clone(),
            self.config.max_parallel,
        );
        let (corrections, failures) = correction
            .run(&record.puzzle, &record.answers, &record.verdicts)
            .await;
        record.append_corrections(corrections, failures);

        let decision_stage = DecisionStage::new(
            Arc::clone(&self.invoker),
            self.config.prompts.decision.clone(),
        );
        let latest = record.latest_answers();
        let (decision, failures) = decision_stage
            .run(&record.puzzle, &latest, &record.verdicts, &self.config.decision_model)
            .await;

        match decision {
            Some(decision) => {
                let fell_back = decision.fallback;
                record.set_decision(decision, failures);
                record.status = if fell_back || !record.failures.is_empty() {
                    RunStatus::Degraded
                } else {
                    RunStatus::Complete
                };
            }
            None => {
                record.failures.extend(failures);
                record.status = RunStatus::Failed;
            }
        }

        self.finish(record, attempted)
    }

    fn finish(&self, mut record: RunRecord, attempted: usize) -> RunRecord {
        record.compute_summary(attempted);
        record.finished_at = Some(Utc::now());
        info!(
            status = ?record.status,
            answers = record.answers.len(),
            verdicts = record.verdicts.len(),
            corrections = record.corrections.len(),
            "run finished"
        );
        record
    }
}

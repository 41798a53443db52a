//! Correction stage: flagged models revise their own answers.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::llm::ModelInvoker;
use crate::prompts::render;
use crate::record::{
    AnswerRecord, CorrectedAnswerRecord, Puzzle, Stage, StageFailure, Verdict, VerdictRecord,
};
use crate::{parser, stages};

const REQUIRED_FIELDS: &[&str] = &["acknowledgment", "revised_reasoning", "revised_answer"];

/// Gives each flagged model one chance to revise its answer, with every
/// critique against it aggregated into a single prompt.
pub struct CorrectionStage {
    invoker: Arc<ModelInvoker>,
    template: String,
    max_parallel: usize,
}

impl CorrectionStage {
    pub fn new(invoker: Arc<ModelInvoker>, template: impl Into<String>, max_parallel: usize) -> Self {
        Self {
            invoker,
            template: template.into(),
            max_parallel: max_parallel.max(1),
        }
    }

    /// Run one correction call per flagged answer. The call goes to the
    /// model that produced the answer; a failed correction retains the
    /// original answer and is recorded, never fatal.
    #[instrument(skip_all, fields(puzzle_id = %puzzle.id))]
    pub async fn run(
        &self,
        puzzle: &Puzzle,
        answers: &[AnswerRecord],
        verdicts: &[VerdictRecord],
    ) -> (Vec<CorrectedAnswerRecord>, Vec<StageFailure>) {
        let flagged: Vec<&AnswerRecord> = answers
            .iter()
            .filter(|a| {
                verdicts
                    .iter()
                    .any(|v| v.subject == a.model && v.verdict != Verdict::Correct)
            })
            .collect();

        if flagged.is_empty() {
            info!("no answers flagged; correction stage is a no-op");
            return (Vec::new(), Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let tasks: Vec<_> = flagged
            .into_iter()
            .map(|answer| {
                let invoker = Arc::clone(&self.invoker);
                let semaphore = Arc::clone(&semaphore);
                let critiques = format_critiques(verdicts, answer);
                let prompt = render(
                    &self.template,
                    &[
                        ("question", puzzle.text.as_str()),
                        ("original_reasoning", answer.reasoning.as_str()),
                        ("original_answer", answer.answer.as_str()),
                        ("verdicts", critiques.as_str()),
                    ],
                );
                let model = answer.model.clone();

                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("semaphore closed unexpectedly");

                    match stages::call_structured(&invoker, &model, &prompt, REQUIRED_FIELDS).await
                    {
                        Ok(payload) => {
                            let acknowledgment = parser::field_str(&payload, "acknowledgment");
                            let reasoning = parser::field_str(&payload, "revised_reasoning");
                            let revised = parser::field_str(&payload, "revised_answer");
                            match (acknowledgment, reasoning, revised) {
                                (Ok(acknowledgment), Ok(revised_reasoning), Ok(revised_answer)) => {
                                    Ok(CorrectedAnswerRecord {
                                        model,
                                        acknowledgment,
                                        revised_reasoning,
                                        revised_answer,
                                    })
                                }
                                (a, r, v) => {
                                    let e = a
                                        .err()
                                        .or(r.err())
                                        .or(v.err())
                                        .expect("at least one error");
                                    Err(StageFailure {
                                        stage: Stage::Correction,
                                        model,
                                        reason: e.to_string(),
                                    })
                                }
                            }
                        }
                        Err(e) => Err(StageFailure {
                            stage: Stage::Correction,
                            model,
                            reason: e.to_string(),
                        }),
                    }
                }
            })
            .collect();

        let mut corrections = Vec::new();
        let mut failures = Vec::new();
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(correction) => corrections.push(correction),
                Err(failure) => {
                    warn!(
                        model = %failure.model,
                        "correction failed, original answer stands: {}", failure.reason
                    );
                    failures.push(failure);
                }
            }
        }

        info!(
            corrections = corrections.len(),
            retained = failures.len(),
            "correction stage resolved"
        );
        (corrections, failures)
    }
}

/// All critiques against one answer, one line per verdict. Positive verdicts
/// are included so the model sees the full picture, not only the dissent.
fn format_critiques(verdicts: &[VerdictRecord], answer: &AnswerRecord) -> String {
    verdicts
        .iter()
        .filter(|v| v.subject == answer.model)
        .map(|v| match &v.error_reason {
            Some(reason) if !reason.is_empty() => {
                format!("- {} judged this {}: {}", v.reviewer, v.verdict, reason)
            }
            _ => format!("- {} judged this {}", v.reviewer, v.verdict),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

//! Answering stage: independent answers from every configured model.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::llm::{ModelInvoker, ModelRef};
use crate::prompts::render;
use crate::record::{AnswerRecord, Confidence, Puzzle, Stage, StageFailure};
use crate::{parser, stages};

const REQUIRED_FIELDS: &[&str] = &["reasoning", "answer", "confidence"];

/// Fans a puzzle out to the answering models and collects one
/// (reasoning, answer, confidence) triple per survivor.
pub struct AnsweringStage {
    invoker: Arc<ModelInvoker>,
    template: String,
    max_parallel: usize,
}

impl AnsweringStage {
    pub fn new(invoker: Arc<ModelInvoker>, template: impl Into<String>, max_parallel: usize) -> Self {
        Self {
            invoker,
            template: template.into(),
            max_parallel: max_parallel.max(1),
        }
    }

    /// One best-effort attempt per model (with the uniform single retry);
    /// a failing model is dropped with its reason and never blocks siblings.
    #[instrument(skip(self, puzzle), fields(puzzle_id = %puzzle.id))]
    pub async fn run(
        &self,
        puzzle: &Puzzle,
        models: &[ModelRef],
    ) -> (Vec<AnswerRecord>, Vec<StageFailure>) {
        let prompt = render(&self.template, &[("question", &puzzle.text)]);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        let tasks: Vec<_> = models
            .iter()
            .cloned()
            .map(|model| {
                let invoker = Arc::clone(&self.invoker);
                let semaphore = Arc::clone(&semaphore);
                let prompt = prompt.clone();

                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("semaphore closed unexpectedly");

                    match stages::call_structured(&invoker, &model, &prompt, REQUIRED_FIELDS).await
                    {
                        Ok(payload) => {
                            let reasoning = parser::field_str(&payload, "reasoning");
                            let answer = parser::field_str(&payload, "answer");
                            match (reasoning, answer) {
                                (Ok(reasoning), Ok(answer)) => Ok(AnswerRecord {
                                    confidence: Confidence::from_value(&payload["confidence"]),
                                    model,
                                    reasoning,
                                    answer,
                                }),
                                (r, a) => {
                                    let e = r.err().or(a.err()).expect("at least one error");
                                    Err(StageFailure {
                                        stage: Stage::Answering,
                                        model,
                                        reason: e.to_string(),
                                    })
                                }
                            }
                        }
                        Err(e) => Err(StageFailure {
                            stage: Stage::Answering,
                            model,
                            reason: e.to_string(),
                        }),
                    }
                }
            })
            .collect();

        let mut answers = Vec::new();
        let mut failures = Vec::new();
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(answer) => answers.push(answer),
                Err(failure) => {
                    warn!(model = %failure.model, "answering dropped a model: {}", failure.reason);
                    failures.push(failure);
                }
            }
        }

        info!(
            survivors = answers.len(),
            dropped = failures.len(),
            "answering stage resolved"
        );
        (answers, failures)
    }
}

//! Verification stage: cross-model review of every surviving answer.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::llm::{ModelInvoker, ModelRef};
use crate::prompts::render;
use crate::record::{AnswerRecord, Puzzle, Stage, StageFailure, Verdict, VerdictRecord};
use crate::{parser, stages};

const REQUIRED_FIELDS: &[&str] = &["verdict"];

/// Builds the full cross-validation matrix: every reviewer judges every
/// other model's answer, never its own.
pub struct VerificationStage {
    invoker: Arc<ModelInvoker>,
    template: String,
    max_parallel: usize,
}

impl VerificationStage {
    pub fn new(invoker: Arc<ModelInvoker>, template: impl Into<String>, max_parallel: usize) -> Self {
        Self {
            invoker,
            template: template.into(),
            max_parallel: max_parallel.max(1),
        }
    }

    /// Review each answer with every eligible reviewer. The reviewer sees
    /// the subject's reasoning and answer but no reference solution.
    ///
    /// A lone survivor has no eligible reviewer and flows to the decision
    /// stage unverified. Dropping a verdict never removes the underlying
    /// answer; it only thins that subject's consensus evidence.
    #[instrument(skip_all, fields(puzzle_id = %puzzle.id, subjects = answers.len()))]
    pub async fn run(
        &self,
        puzzle: &Puzzle,
        answers: &[AnswerRecord],
        reviewers: &[ModelRef],
    ) -> (Vec<VerdictRecord>, Vec<StageFailure>) {
        if answers.len() < 2 {
            info!("fewer than two survivors; verification skipped");
            return (Vec::new(), Vec::new());
        }

        // Unique (reviewer, subject) pairs, self-review excluded
        let mut seen = HashSet::new();
        let mut pairs: Vec<(ModelRef, &AnswerRecord)> = Vec::new();
        for answer in answers {
            for reviewer in reviewers {
                if *reviewer == answer.model {
                    continue;
                }
                if seen.insert((reviewer.clone(), answer.model.clone())) {
                    pairs.push((reviewer.clone(), answer));
                }
            }
        }

        if pairs.is_empty() {
            info!("no eligible reviewer pairs; answers flow to decision unverified");
            return (Vec::new(), Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let tasks: Vec<_> = pairs
            .into_iter()
            .map(|(reviewer, answer)| {
                let invoker = Arc::clone(&self.invoker);
                let semaphore = Arc::clone(&semaphore);
                let prompt = render(
                    &self.template,
                    &[
                        ("question", puzzle.text.as_str()),
                        ("model_name", &answer.model.to_string()),
                        ("reasoning", answer.reasoning.as_str()),
                        ("answer", answer.answer.as_str()),
                    ],
                );
                let subject = answer.model.clone();

                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("semaphore closed unexpectedly");

                    match stages::call_structured(&invoker, &reviewer, &prompt, REQUIRED_FIELDS)
                        .await
                    {
                        Ok(payload) => {
                            let verdict = parser::field_str(&payload, "verdict")
                                .map(|s| Verdict::from_text(&s))
                                .unwrap_or(Verdict::Uncertain);
                            let error_reason = parser::field_str(&payload, "error_reason")
                                .ok()
                                .filter(|s| !s.trim().is_empty());
                            Ok(VerdictRecord {
                                reviewer,
                                subject,
                                verdict,
                                error_reason,
                            })
                        }
                        Err(e) => Err(StageFailure {
                            stage: Stage::Verification,
                            model: reviewer,
                            reason: format!("reviewing {subject}: {e}"),
                        }),
                    }
                }
            })
            .collect();

        let mut verdicts = Vec::new();
        let mut failures = Vec::new();
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(verdict) => verdicts.push(verdict),
                Err(failure) => {
                    warn!(model = %failure.model, "verification dropped a verdict: {}", failure.reason);
                    failures.push(failure);
                }
            }
        }

        info!(
            verdicts = verdicts.len(),
            dropped = failures.len(),
            "verification stage resolved"
        );
        (verdicts, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::llm::testing::MockClient;
    use crate::llm::{Provider, RetryPolicy};
    use crate::prompts::PromptSet;
    use crate::record::Confidence;
    use pretty_assertions::assert_eq;

    fn model(name: &str) -> ModelRef {
        ModelRef::new(Provider::Groq, name)
    }

    fn answer(name: &str) -> AnswerRecord {
        AnswerRecord {
            model: model(name),
            reasoning: "steps".to_string(),
            answer: "8人".to_string(),
            confidence: Confidence::Medium,
        }
    }

    fn stage(mock: Arc<MockClient>) -> VerificationStage {
        let invoker = ModelInvoker::new(RetryPolicy::default()).with_client(mock);
        VerificationStage::new(Arc::new(invoker), PromptSet::default().verification, 4)
    }

    #[tokio::test]
    async fn test_full_cross_matrix_without_self_review() {
        let mock = Arc::new(
            MockClient::new(Provider::Groq)
                .with_reply(r#"{"verdict": "Correct", "error_reason": ""}"#),
        );
        let stage = stage(mock);

        let answers = vec![answer("m1"), answer("m2"), answer("m3")];
        let reviewers = vec![model("m1"), model("m2"), model("m3")];
        let (verdicts, failures) =
            stage.run(&Puzzle::new("p1", "..."), &answers, &reviewers).await;

        // 3 subjects x 2 other reviewers
        assert_eq!(verdicts.len(), 6);
        assert!(failures.is_empty());
        assert!(verdicts.iter().all(|v| v.reviewer != v.subject));

        let mut pairs: Vec<(String, String)> = verdicts
            .iter()
            .map(|v| (v.reviewer.to_string(), v.subject.to_string()))
            .collect();
        let before = pairs.len();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), before, "duplicate (reviewer, subject) pair");
    }

    #[tokio::test]
    async fn test_lone_survivor_skips_verification() {
        let mock = Arc::new(MockClient::new(Provider::Groq));
        let stage = stage(mock.clone());

        let answers = vec![answer("m1")];
        let reviewers = vec![model("m1")];
        let (verdicts, failures) =
            stage.run(&Puzzle::new("p1", "..."), &answers, &reviewers).await;

        assert!(verdicts.is_empty());
        assert!(failures.is_empty());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_negative_verdict_carries_reason() {
        let mock = Arc::new(MockClient::new(Provider::Groq).with_reply(
            r#"{"verdict": "Incorrect", "error_reason": "double counts the host"}"#,
        ));
        let stage = stage(mock);

        let answers = vec![answer("m1"), answer("m2")];
        let reviewers = vec![model("m2")];
        let (verdicts, _) = stage.run(&Puzzle::new("p1", "..."), &answers, &reviewers).await;

        // Only (m2 reviews m1) is eligible; m2 never judges itself
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].subject, model("m1"));
        assert_eq!(verdicts[0].verdict, Verdict::Incorrect);
        assert_eq!(
            verdicts[0].error_reason.as_deref(),
            Some("double counts the host")
        );
    }

    #[tokio::test]
    async fn test_dropped_verdict_keeps_subject_answer() {
        let mock = Arc::new(
            MockClient::new(Provider::Groq)
                .with_model_failures("m2", 2, || Error::provider("groq", "503"))
                .with_reply(r#"{"verdict": "Correct", "error_reason": ""}"#),
        );
        let stage = stage(mock);

        let answers = vec![answer("m1"), answer("m4")];
        let reviewers = vec![model("m2"), model("m3")];
        let (verdicts, failures) =
            stage.run(&Puzzle::new("p1", "..."), &answers, &reviewers).await;

        // m2's review of m1 is dropped after its retry; every other pair
        // resolves and m1's answer itself is untouched by the drop
        assert_eq!(verdicts.len(), 3);
        assert!(!verdicts
            .iter()
            .any(|v| v.reviewer == model("m2") && v.subject == model("m1")));
        assert_eq!(failures.len(), 1);
        assert!(failures[0].reason.contains("m1"));
    }
}

//! Decision stage: a single synthesis call over the full evidence.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::llm::{ModelInvoker, ModelRef};
use crate::prompts::render;
use crate::record::{
    Confidence, DecisionRecord, LatestAnswer, Puzzle, Stage, StageFailure, VerdictRecord,
};
use crate::{parser, stages};

const REQUIRED_FIELDS: &[&str] = &["final_answer", "rationale", "confidence"];

/// Synthesizes one final answer from the latest answers and the verdict
/// matrix. When the decision model fails persistently, the
/// highest-confidence surviving answer is promoted instead.
pub struct DecisionStage {
    invoker: Arc<ModelInvoker>,
    template: String,
}

impl DecisionStage {
    pub fn new(invoker: Arc<ModelInvoker>, template: impl Into<String>) -> Self {
        Self {
            invoker,
            template: template.into(),
        }
    }

    /// Run the synthesis call. Returns `None` only when `latest` is empty,
    /// which callers rule out before reaching this stage.
    #[instrument(skip_all, fields(puzzle_id = %puzzle.id, model = %decision_model))]
    pub async fn run(
        &self,
        puzzle: &Puzzle,
        latest: &[LatestAnswer],
        verdicts: &[VerdictRecord],
        decision_model: &ModelRef,
    ) -> (Option<DecisionRecord>, Vec<StageFailure>) {
        let prompt = render(
            &self.template,
            &[
                ("question", puzzle.text.as_str()),
                ("answers", format_answers(latest).as_str()),
                ("verdicts", format_verdicts(verdicts).as_str()),
            ],
        );

        let contributing: Vec<ModelRef> = latest.iter().map(|l| l.model.clone()).collect();

        match stages::call_structured(&self.invoker, decision_model, &prompt, REQUIRED_FIELDS)
            .await
        {
            Ok(payload) => {
                let final_answer = parser::field_str(&payload, "final_answer");
                let rationale = parser::field_str(&payload, "rationale");
                match (final_answer, rationale) {
                    (Ok(final_answer), Ok(rationale)) => {
                        info!("decision model endorsed an answer");
                        let decision = DecisionRecord {
                            final_answer,
                            rationale,
                            aggregate_confidence: Confidence::from_value(&payload["confidence"]),
                            contributing_models: contributing,
                            fallback: false,
                        };
                        (Some(decision), Vec::new())
                    }
                    (f, r) => {
                        let e = f.err().or(r.err()).expect("at least one error");
                        self.fallback(latest, decision_model, &e.to_string())
                    }
                }
            }
            Err(e) => self.fallback(latest, decision_model, &e.to_string()),
        }
    }

    fn fallback(
        &self,
        latest: &[LatestAnswer],
        decision_model: &ModelRef,
        reason: &str,
    ) -> (Option<DecisionRecord>, Vec<StageFailure>) {
        let failure = StageFailure {
            stage: Stage::Decision,
            model: decision_model.clone(),
            reason: reason.to_string(),
        };
        let Some(best) = latest.iter().max_by_key(|l| l.confidence) else {
            return (None, vec![failure]);
        };
        warn!(
            model = %best.model,
            "decision model failed, promoting highest-confidence answer: {reason}"
        );
        let decision = DecisionRecord {
            final_answer: best.answer.clone(),
            rationale: format!(
                "Decision model unavailable ({reason}); promoted {}'s answer, the highest \
                 stated confidence among survivors.",
                best.model
            ),
            aggregate_confidence: best.confidence,
            contributing_models: vec![best.model.clone()],
            fallback: true,
        };
        (Some(decision), vec![failure])
    }
}

fn format_answers(latest: &[LatestAnswer]) -> String {
    latest
        .iter()
        .map(|l| {
            format!(
                "- {} ({} confidence{}): {}\n  reasoning: {}",
                l.model,
                l.confidence,
                if l.corrected { ", revised after review" } else { "" },
                l.answer,
                l.reasoning,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_verdicts(verdicts: &[VerdictRecord]) -> String {
    if verdicts.is_empty() {
        return "(no cross-review verdicts were produced)".to_string();
    }
    verdicts
        .iter()
        .map(|v| match &v.error_reason {
            Some(reason) if !reason.is_empty() => {
                format!("- {} judged {} {}: {}", v.reviewer, v.subject, v.verdict, reason)
            }
            _ => format!("- {} judged {} {}", v.reviewer, v.subject, v.verdict),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

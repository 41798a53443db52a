//! Run records: the append-only audit trail of a pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::llm::ModelRef;

/// A logic puzzle: immutable input, read-only throughout the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Puzzle {
    pub id: String,
    pub text: String,
}

impl Puzzle {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Confidence a model states for its own answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Parse from model output, accepting level names or a numeric 0..=1
    /// score. Unrecognized values read as Low rather than failing the reply.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "high" => Self::High,
                "medium" | "moderate" => Self::Medium,
                _ => Self::Low,
            },
            Value::Number(n) => {
                let score = n.as_f64().unwrap_or(0.0);
                if score >= 0.75 {
                    Self::High
                } else if score >= 0.4 {
                    Self::Medium
                } else {
                    Self::Low
                }
            }
            _ => Self::Low,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// One model's independent answer, produced in the answering stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub model: ModelRef,
    pub reasoning: String,
    pub answer: String,
    pub confidence: Confidence,
}

/// A reviewer's judgment on another model's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    Uncertain,
}

impl Verdict {
    /// Parse from model output. Anything that is not recognizably correct or
    /// incorrect reads as uncertain.
    pub fn from_text(s: &str) -> Self {
        let s = s.trim().to_lowercase();
        if s.starts_with("incorrect") || s.starts_with("wrong") {
            Self::Incorrect
        } else if s.starts_with("correct") || s.starts_with("right") {
            Self::Correct
        } else {
            Self::Uncertain
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Correct => write!(f, "correct"),
            Self::Incorrect => write!(f, "incorrect"),
            Self::Uncertain => write!(f, "uncertain"),
        }
    }
}

/// Cross-validation result: `reviewer` judged `subject`'s answer.
///
/// At most one per (reviewer, subject) pair per run; a reviewer never judges
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub reviewer: ModelRef,
    pub subject: ModelRef,
    pub verdict: Verdict,
    pub error_reason: Option<String>,
}

/// A model's revision after seeing the critiques against its answer.
///
/// Exists only when at least one non-correct verdict targeted the model; the
/// original [`AnswerRecord`] is retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectedAnswerRecord {
    pub model: ModelRef,
    pub acknowledgment: String,
    pub revised_reasoning: String,
    pub revised_answer: String,
}

/// The terminal synthesis of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub final_answer: String,
    pub rationale: String,
    pub aggregate_confidence: Confidence,
    pub contributing_models: Vec<ModelRef>,
    /// True when the decision model failed and the highest-confidence
    /// surviving answer was used instead.
    pub fallback: bool,
}

/// Pipeline stage names, for failure attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Answering,
    Verification,
    Correction,
    Decision,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answering => write!(f, "answering"),
            Self::Verification => write!(f, "verification"),
            Self::Correction => write!(f, "correction"),
            Self::Decision => write!(f, "decision"),
        }
    }
}

/// A dropped call, recorded so no failure disappears silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub model: ModelRef,
    pub reason: String,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every model survived every stage and the decision call succeeded
    Complete,
    /// A DecisionRecord was reached despite partial upstream failures
    Degraded,
    /// No model survived the answering stage
    Failed,
}

/// A model's most recent answer: corrected when a correction exists, else
/// the original. The decision stage considers exactly one of the two.
#[derive(Debug, Clone)]
pub struct LatestAnswer {
    pub model: ModelRef,
    pub reasoning: String,
    pub answer: String,
    pub confidence: Confidence,
    pub corrected: bool,
}

/// Aggregate figures computed from a finished run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub answering_success_rate: f64,
    pub verdict_distribution: HashMap<String, usize>,
    pub consensus_rate: f64,
    pub agreement_level: String,
    pub corrections_applied: usize,
}

/// The structured record of one pipeline run.
///
/// Owned exclusively by the coordinator and mutated only by appending stage
/// outputs after each stage fully resolves; prior stage data is never
/// rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub puzzle: Puzzle,
    pub answers: Vec<AnswerRecord>,
    pub verdicts: Vec<VerdictRecord>,
    pub corrections: Vec<CorrectedAnswerRecord>,
    pub decision: Option<DecisionRecord>,
    pub failures: Vec<StageFailure>,
    pub status: RunStatus,
    pub summary: RunSummary,
    /// Echo of the configuration the run executed under, for audit.
    pub config: RunConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(puzzle: Puzzle) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            puzzle,
            answers: Vec::new(),
            verdicts: Vec::new(),
            corrections: Vec::new(),
            decision: None,
            failures: Vec::new(),
            status: RunStatus::Failed,
            summary: RunSummary::default(),
            config: RunConfig::default(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Append answering-stage output.
    pub fn append_answers(&mut self, answers: Vec<AnswerRecord>, failures: Vec<StageFailure>) {
        self.answers.extend(answers);
        self.failures.extend(failures);
    }

    /// Append verification-stage output.
    pub fn append_verdicts(&mut self, verdicts: Vec<VerdictRecord>, failures: Vec<StageFailure>) {
        self.verdicts.extend(verdicts);
        self.failures.extend(failures);
    }

    /// Append correction-stage output.
    ///
    /// A correction without a prior answer from the same model would break
    /// the audit trail; such records are dropped and logged.
    pub fn append_corrections(
        &mut self,
        corrections: Vec<CorrectedAnswerRecord>,
        failures: Vec<StageFailure>,
    ) {
        for correction in corrections {
            if self.answers.iter().any(|a| a.model == correction.model) {
                self.corrections.push(correction);
            } else {
                tracing::warn!(model = %correction.model, "dropping correction with no prior answer");
            }
        }
        self.failures.extend(failures);
    }

    /// Record the terminal decision.
    pub fn set_decision(&mut self, decision: DecisionRecord, failures: Vec<StageFailure>) {
        self.decision = Some(decision);
        self.failures.extend(failures);
    }

    /// The latest answer per surviving model: revised when a correction
    /// exists, otherwise the original. Never both.
    pub fn latest_answers(&self) -> Vec<LatestAnswer> {
        self.answers
            .iter()
            .map(|original| {
                match self
                    .corrections
                    .iter()
                    .find(|c| c.model == original.model)
                {
                    Some(c) => LatestAnswer {
                        model: original.model.clone(),
                        reasoning: c.revised_reasoning.clone(),
                        answer: c.revised_answer.clone(),
                        confidence: original.confidence,
                        corrected: true,
                    },
                    None => LatestAnswer {
                        model: original.model.clone(),
                        reasoning: original.reasoning.clone(),
                        answer: original.answer.clone(),
                        confidence: original.confidence,
                        corrected: false,
                    },
                }
            })
            .collect()
    }

    /// Verdicts targeting one subject model.
    pub fn verdicts_for(&self, subject: &ModelRef) -> Vec<&VerdictRecord> {
        self.verdicts
            .iter()
            .filter(|v| &v.subject == subject)
            .collect()
    }

    /// Whether a subject received any non-correct verdict.
    pub fn is_flagged(&self, subject: &ModelRef) -> bool {
        self.verdicts_for(subject)
            .iter()
            .any(|v| v.verdict != Verdict::Correct)
    }

    /// Compute aggregate figures from the recorded stage outputs.
    pub fn compute_summary(&mut self, models_attempted: usize) {
        let mut distribution: HashMap<String, usize> = HashMap::new();
        for v in &self.verdicts {
            *distribution.entry(v.verdict.to_string()).or_insert(0) += 1;
        }
        let total = self.verdicts.len();
        let consensus_rate = if total == 0 {
            0.0
        } else {
            distribution.values().copied().max().unwrap_or(0) as f64 / total as f64
        };
        let agreement_level = if total == 0 {
            "no data"
        } else if consensus_rate >= 0.8 {
            "high consensus"
        } else if consensus_rate >= 0.6 {
            "moderate consensus"
        } else {
            "low consensus"
        };

        self.summary = RunSummary {
            answering_success_rate: if models_attempted == 0 {
                0.0
            } else {
                self.answers.len() as f64 / models_attempted as f64
            },
            verdict_distribution: distribution,
            consensus_rate,
            agreement_level: agreement_level.to_string(),
            corrections_applied: self.corrections.len(),
        };
    }
}

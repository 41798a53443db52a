//! Prompt templates with named substitution points.
//!
//! The pipeline treats templates as opaque strings supplied by
//! configuration; the defaults here carry the JSON-output contract each
//! stage's parser expects.

use serde::{Deserialize, Serialize};

/// The four stage templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    pub answering: String,
    pub verification: String,
    pub correction: String,
    pub decision: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            answering: DEFAULT_ANSWERING.to_string(),
            verification: DEFAULT_VERIFICATION.to_string(),
            correction: DEFAULT_CORRECTION.to_string(),
            decision: DEFAULT_DECISION.to_string(),
        }
    }
}

/// Substitute `{name}` placeholders in `template` with the given values.
/// Text without a matching placeholder is left untouched.
///
/// Single pass over the original template: substituted values are never
/// rescanned, so a puzzle text or model reply containing a literal
/// `{answer}` cannot inject into a later substitution.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push('{');
            rest = after;
            continue;
        };
        let name = &after[..close];
        // A nested open brace means the outer one is literal text
        if name.contains('{') {
            out.push('{');
            rest = after;
            continue;
        }
        match vars.iter().find(|(n, _)| *n == name) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

const DEFAULT_ANSWERING: &str = "\
You are solving a logic puzzle. Work through it step by step, then state \
your final answer.

Puzzle:
{question}

Respond with a JSON object containing exactly these fields:
{
  \"reasoning\": \"your step-by-step reasoning\",
  \"answer\": \"your final answer, as short as possible\",
  \"confidence\": \"low, medium, or high\"
}";

const DEFAULT_VERIFICATION: &str = "\
You are reviewing another solver's answer to a logic puzzle. Judge whether \
the reasoning and answer are logically sound. You are not given a reference \
answer; rely on your own analysis only.

Puzzle:
{question}

Solver: {model_name}
Solver's reasoning:
{reasoning}
Solver's answer: {answer}

Respond with a JSON object containing exactly these fields:
{
  \"verdict\": \"Correct, Incorrect, or Uncertain\",
  \"error_reason\": \"the specific flaw if not correct, else an empty string\"
}";

const DEFAULT_CORRECTION: &str = "\
Your answer to a logic puzzle was reviewed and at least one reviewer found \
a problem. Reconsider your solution in light of every critique below, then \
give a revised solution.

Puzzle:
{question}

Your original reasoning:
{original_reasoning}
Your original answer: {original_answer}

Reviewer critiques:
{verdicts}

Respond with a JSON object containing exactly these fields:
{
  \"acknowledgment\": \"what, if anything, was wrong with your original solution\",
  \"revised_reasoning\": \"your corrected step-by-step reasoning\",
  \"revised_answer\": \"your revised final answer\"
}";

const DEFAULT_DECISION: &str = "\
Several solvers answered the same logic puzzle and cross-reviewed each \
other. Weigh the answers, the review verdicts, and the stated confidences, \
then decide the single most defensible final answer. If the evidence is \
thin (few solvers, disagreement, missing reviews), say so in your rationale \
rather than overstating certainty.

Puzzle:
{question}

Latest answer per solver:
{answers}

Review verdicts:
{verdicts}

Respond with a JSON object containing exactly these fields:
{
  \"final_answer\": \"the answer you endorse\",
  \"rationale\": \"why, citing the consensus and verdicts\",
  \"confidence\": \"low, medium, or high\"
}";

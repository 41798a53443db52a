//! The four pipeline stages: answer, verify, correct, decide.
//!
//! Stages run strictly in sequence; inside a stage, independent per-model
//! invocations fan out concurrently under a semaphore bound and the stage
//! completes when every branch has resolved, success or failure. Results are
//! keyed by model identity, never by completion order.

mod answering;
mod correction;
mod decision;
mod verification;

pub use answering::AnsweringStage;
pub use correction::CorrectionStage;
pub use decision::DecisionStage;
pub use verification::VerificationStage;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::llm::{ModelInvoker, ModelRef};
use crate::parser;

/// Invoke a model and parse the structured reply, retrying the identical
/// prompt exactly once on any failure. Transport errors and malformed
/// responses are treated uniformly; the second failure is the caller's to
/// record.
pub(crate) async fn call_structured(
    invoker: &ModelInvoker,
    model: &ModelRef,
    prompt: &str,
    required: &[&str],
) -> Result<Map<String, Value>> {
    match attempt(invoker, model, prompt, required).await {
        Ok(payload) => Ok(payload),
        Err(first) => {
            debug!(%model, "retrying after failed attempt: {first}");
            attempt(invoker, model, prompt, required).await
        }
    }
}

async fn attempt(
    invoker: &ModelInvoker,
    model: &ModelRef,
    prompt: &str,
    required: &[&str],
) -> Result<Map<String, Value>> {
    let text = invoker.invoke(model, prompt).await?;
    parser::parse(&text, required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::llm::testing::MockClient;
    use crate::llm::{Provider, RetryPolicy};
    use std::sync::Arc;

    fn model() -> ModelRef {
        "groq/llama-3.3-70b-versatile".parse().unwrap()
    }

    #[tokio::test]
    async fn test_retry_once_on_malformed_then_succeed() {
        let mock = Arc::new(
            MockClient::new(Provider::Groq)
                .with_replies(vec![
                    "no json here".to_string(),
                    r#"{"verdict": "Correct"}"#.to_string(),
                ]),
        );
        let invoker = ModelInvoker::new(RetryPolicy::default()).with_client(mock.clone());

        let payload = call_structured(&invoker, &model(), "p", &["verdict"]).await.unwrap();
        assert_eq!(payload["verdict"], "Correct");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_scalar_required_field_earns_the_retry() {
        // Present-but-non-scalar fields are as malformed as missing ones and
        // get the same single re-prompt.
        let mock = Arc::new(
            MockClient::new(Provider::Groq)
                .with_replies(vec![
                    r#"{"verdict": ["Correct"]}"#.to_string(),
                    r#"{"verdict": "Correct"}"#.to_string(),
                ]),
        );
        let invoker = ModelInvoker::new(RetryPolicy::default()).with_client(mock.clone());

        let payload = call_structured(&invoker, &model(), "p", &["verdict"]).await.unwrap();
        assert_eq!(payload["verdict"], "Correct");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_second_retry() {
        // Two malformed replies exhaust the single retry; a third valid
        // reply must never be reached.
        let mock = Arc::new(
            MockClient::new(Provider::Groq)
                .with_replies(vec![
                    "still thinking".to_string(),
                    "hmm".to_string(),
                    r#"{"verdict": "Correct"}"#.to_string(),
                ]),
        );
        let invoker = ModelInvoker::new(RetryPolicy::default()).with_client(mock.clone());

        let err = call_structured(&invoker, &model(), "p", &["verdict"]).await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_uses_same_retry_budget() {
        let mock = Arc::new(
            MockClient::new(Provider::Groq)
                .with_failures(1, || Error::timeout(60_000))
                .with_reply(r#"{"verdict": "Correct"}"#),
        );
        let invoker = ModelInvoker::new(RetryPolicy::default()).with_client(mock.clone());

        let payload = call_structured(&invoker, &model(), "p", &["verdict"]).await.unwrap();
        assert_eq!(payload["verdict"], "Correct");
        assert_eq!(mock.calls(), 2);
    }
}

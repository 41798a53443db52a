//! # logic-quorum
//!
//! A multi-model verification pipeline for logic puzzles. Several LLMs answer
//! the same puzzle independently, cross-review each other's reasoning, revise
//! flagged answers, and a final synthesis step decides the single most
//! defensible answer with an aggregate confidence.
//!
//! ## Core Components
//!
//! - **Llm**: Provider clients and the routing/retry invoker
//! - **Stages**: The four pipeline stages (answer, verify, correct, decide)
//! - **Coordinator**: Sequences the stages and owns the run record
//! - **Record**: The append-only audit trail of a run
//! - **Store**: JSON persistence for finished runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use logic_quorum::{PipelineCoordinator, Puzzle, RunConfig, RunStore};
//!
//! let config = RunConfig::default();
//! let coordinator = PipelineCoordinator::from_env(config)?;
//!
//! let record = coordinator
//!     .run(Puzzle::new("party-8", "Eight people sit at a round table..."))
//!     .await;
//! println!("{}: {:?}", record.puzzle.id, record.status);
//!
//! RunStore::new("runs")?.save(&record)?;
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod llm;
pub mod parser;
pub mod prompts;
pub mod record;
pub mod stages;
pub mod store;

// Re-exports for convenience
pub use config::RunConfig;
pub use coordinator::PipelineCoordinator;
pub use error::{Error, Result};
pub use llm::{
    AnthropicClient, ChatMessage, ChatRole, ClientConfig, CompletionRequest, CompletionResponse,
    GoogleClient, ModelInvoker, ModelRef, OpenAiCompatClient, Provider, ProviderClient,
    RetryPolicy, TokenUsage,
};
pub use prompts::PromptSet;
pub use record::{
    AnswerRecord, Confidence, CorrectedAnswerRecord, DecisionRecord, LatestAnswer, Puzzle,
    RunRecord, RunStatus, RunSummary, Stage, StageFailure, Verdict, VerdictRecord,
};
pub use stages::{AnsweringStage, CorrectionStage, DecisionStage, VerificationStage};
pub use store::RunStore;

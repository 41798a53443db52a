//! Model invocation layer.
//!
//! A uniform contract for calling any configured model backend: per-provider
//! wire translation lives in [`client`], while routing, timeout, and
//! retry/backoff policy are enforced once in [`invoker::ModelInvoker`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use logic_quorum::llm::{ClientConfig, ModelInvoker, OpenAiCompatClient, RetryPolicy};
//!
//! let groq = OpenAiCompatClient::groq(ClientConfig::from_env(Provider::Groq)?)?;
//! let invoker = ModelInvoker::new(RetryPolicy::default())
//!     .with_client(std::sync::Arc::new(groq));
//!
//! let reply = invoker
//!     .invoke(&"groq/llama-3.3-70b-versatile".parse()?, "Solve this puzzle...")
//!     .await?;
//! ```

mod client;
mod invoker;
#[cfg(test)]
pub(crate) mod testing;
mod types;

pub use client::{
    api_key_env, AnthropicClient, ClientConfig, GoogleClient, OpenAiCompatClient, ProviderClient,
};
pub use invoker::{ModelInvoker, RetryPolicy};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, ModelRef, Provider, TokenUsage,
};

//! Scripted provider client for exercising the pipeline without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};

use super::client::ProviderClient;
use super::types::{CompletionRequest, CompletionResponse, Provider, TokenUsage};

type ErrorFactory = Box<dyn Fn() -> Error + Send + Sync>;

enum Step {
    Reply(String),
    Fail(ErrorFactory),
}

/// A [`ProviderClient`] that replays scripted outcomes.
///
/// Resolution order per call: the queue scripted for the requested model,
/// then the global queue, then the default reply. An exhausted script with
/// no default reply yields a provider error.
pub struct MockClient {
    provider: Provider,
    model_scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    global_script: Mutex<VecDeque<Step>>,
    default_reply: Mutex<Option<String>>,
    calls: AtomicU32,
    calls_by_model: Mutex<HashMap<String, u32>>,
}

impl MockClient {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            model_scripts: Mutex::new(HashMap::new()),
            global_script: Mutex::new(VecDeque::new()),
            default_reply: Mutex::new(None),
            calls: AtomicU32::new(0),
            calls_by_model: Mutex::new(HashMap::new()),
        }
    }

    /// Reply returned once every scripted step is consumed.
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        *self.default_reply.lock().unwrap() = Some(reply.into());
        self
    }

    /// Queue `n` failures ahead of any reply, for all models.
    pub fn with_failures(self, n: usize, factory: impl Fn() -> Error + Send + Sync + 'static) -> Self {
        let factory = std::sync::Arc::new(factory);
        {
            let mut script = self.global_script.lock().unwrap();
            for _ in 0..n {
                let f = factory.clone();
                script.push_back(Step::Fail(Box::new(move || f())));
            }
        }
        self
    }

    /// Queue replies, consumed in order, for all models.
    pub fn with_replies(self, replies: Vec<String>) -> Self {
        {
            let mut script = self.global_script.lock().unwrap();
            for r in replies {
                script.push_back(Step::Reply(r));
            }
        }
        self
    }

    /// Queue a reply for one specific model name.
    pub fn with_model_reply(self, model: impl Into<String>, reply: impl Into<String>) -> Self {
        self.push_model_step(model.into(), Step::Reply(reply.into()));
        self
    }

    /// Queue `n` failures for one specific model name.
    pub fn with_model_failures(
        self,
        model: impl Into<String>,
        n: usize,
        factory: impl Fn() -> Error + Send + Sync + 'static,
    ) -> Self {
        let model = model.into();
        let factory = std::sync::Arc::new(factory);
        for _ in 0..n {
            let f = factory.clone();
            self.push_model_step(model.clone(), Step::Fail(Box::new(move || f())));
        }
        self
    }

    fn push_model_step(&self, model: String, step: Step) {
        self.model_scripts
            .lock()
            .unwrap()
            .entry(model)
            .or_default()
            .push_back(step);
    }

    /// Total calls observed.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls observed for one model name.
    pub fn calls_for(&self, model: &str) -> u32 {
        *self.calls_by_model.lock().unwrap().get(model).unwrap_or(&0)
    }

    fn next_step(&self, model: &str) -> Option<Step> {
        if let Some(queue) = self.model_scripts.lock().unwrap().get_mut(model) {
            if let Some(step) = queue.pop_front() {
                return Some(step);
            }
        }
        self.global_script.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    async fn send_prompt(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_model
            .lock()
            .unwrap()
            .entry(request.model.clone())
            .or_insert(0) += 1;

        let step = self.next_step(&request.model);
        let content = match step {
            Some(Step::Reply(r)) => r,
            Some(Step::Fail(f)) => return Err(f()),
            None => self
                .default_reply
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::provider(self.provider.to_string(), "mock script exhausted"))?,
        };

        Ok(CompletionResponse {
            model: request.model,
            content,
            usage: TokenUsage::default(),
            timestamp: Utc::now(),
        })
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

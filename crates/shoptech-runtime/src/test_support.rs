//! Scripted provider shared by unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use shoptech_core::{ToolCallCounts, UsageCounters};

use crate::providers::{
    ProviderError, ReasoningProvider, ReasoningRequest, ReasoningResponse, ToolInvocation,
};

type Responder = Box<dyn Fn(&ReasoningRequest) -> Result<ReasoningResponse, ProviderError> + Send + Sync>;

/// Returns queued results in order, then falls back to a responder.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ReasoningResponse, ProviderError>>>,
    requests: Mutex<Vec<ReasoningRequest>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            responder: None,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&ReasoningRequest) -> Result<ReasoningResponse, ProviderError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn push_ok(&self, text: String, tool_calls: ToolCallCounts) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(response(text, tool_calls)));
    }

    pub fn push_err(&self, error: ProviderError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedProvider {
    async fn respond(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let result = match (next, &self.responder) {
            (Some(result), _) => result,
            (None, Some(responder)) => responder(request),
            (None, None) => Err(ProviderError::Http("script exhausted".to_string())),
        };
        result.map(|mut response| {
            response.service_tier_used = request.service_tier;
            response
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A response with fixed token counts and the given completed tool calls.
pub fn response(text: String, tool_calls: ToolCallCounts) -> ReasoningResponse {
    let mut calls = Vec::new();
    for _ in 0..tool_calls.query {
        calls.push(ToolInvocation::classify(Some("completed"), Some("shop platform"), None, None));
    }
    for _ in 0..tool_calls.open {
        calls.push(ToolInvocation::classify(Some("completed"), None, Some("https://a.de"), None));
    }
    for _ in 0..tool_calls.unknown {
        calls.push(ToolInvocation::classify(Some("completed"), None, None, None));
    }

    ReasoningResponse {
        text,
        tokens: UsageCounters {
            input_tokens: 1000,
            cached_input_tokens: 0,
            output_tokens: 200,
            reasoning_tokens: 50,
            tool_calls: ToolCallCounts::default(),
        },
        tool_calls: calls,
        ..Default::default()
    }
}

/// A schema-valid payload as the service would return it.
pub fn payload_json(platform: &str, confidence: &str, tier: &str) -> String {
    serde_json::json!({
        "input_url": "https://a.de",
        "final_platform": platform,
        "confidence": confidence,
        "evidence_tier": tier,
        "signals": ["storefront theme assets"],
        "reasoning": "The storefront loads platform assets. The checkout flow matches."
    })
    .to_string()
}

//! OpenAI Responses API provider.
//!
//! Sends one structured-output request with the `web_search_preview` tool
//! and converts the response into disjoint usage counters, classified tool
//! invocations and URL citations.
//!
//! ## Security
//!
//! This provider uses the centralized [`ApiCredential`] system for secure
//! credential handling. See the [`secrets`](super::secrets) module for details.

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialSource},
    Citation, ProviderError, ReasoningProvider, ReasoningRequest, ReasoningResponse,
    ToolInvocation,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use shoptech_core::payload::service_schema;
use shoptech_core::{ServiceTier, UsageCounters};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Name of the structured output format sent with each request.
const SCHEMA_NAME: &str = "shoptech_platform_detection";

/// OpenAI provider.
pub struct OpenAiProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    /// Create a provider with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_credential(ApiCredential::new(
            api_key,
            CredentialSource::Programmatic,
            "OpenAI API key",
        ))
    }

    /// Create from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(OPENAI_API_KEY_ENV, "OpenAI API key")?;
        Ok(Self::with_credential(credential))
    }

    /// Create from JSON configuration with environment fallback.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            OPENAI_API_KEY_ENV,
            "OpenAI API key",
        )?;

        let mut provider = Self::with_credential(credential);
        if let Some(url) = config["base_url"].as_str() {
            provider = provider.with_base_url(url);
        }
        Ok(provider)
    }

    fn with_credential(credential: ApiCredential) -> Self {
        Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Set custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn send(
        &self,
        body: &ResponsesRequest<'_>,
        timeout: Duration,
    ) -> Result<ResponsesResponse, ProviderError> {
        // SECURITY: Only expose the credential here, at the point of use
        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(timeout)
                } else {
                    ProviderError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<ResponsesResponse>()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()));
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|b| b.error.message)
            .unwrap_or(text);

        Err(classify_error(status.as_u16(), message, retry_after))
    }
}

fn classify_error(status: u16, message: String, retry_after: Option<Duration>) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth,
        429 if message.to_lowercase().contains("resource unavailable") => {
            ProviderError::ResourceUnavailable(message)
        }
        429 => ProviderError::RateLimited { retry_after },
        _ => ProviderError::Api { status, message },
    }
}

fn is_retention_unsupported(err: &ProviderError) -> bool {
    match err {
        ProviderError::Api { status: 400, message } => {
            let m = message.to_lowercase();
            m.contains("prompt_cache_retention") && m.contains("not supported")
        }
        _ => false,
    }
}

/// Responses API request format.
#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: [InputMessage<'a>; 2],
    tools: [ToolSpec; 1],
    text: TextFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_tier: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tool_calls: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningSpec<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_cache_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_cache_retention: Option<&'a str>,
}

impl<'a> ResponsesRequest<'a> {
    fn from_request(request: &'a ReasoningRequest) -> Self {
        Self {
            model: &request.model,
            input: [
                InputMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                InputMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            tools: [ToolSpec {
                type_: "web_search_preview",
            }],
            text: TextFormat {
                format: JsonSchemaFormat {
                    type_: "json_schema",
                    name: SCHEMA_NAME,
                    strict: true,
                    schema: service_schema(request.include_sources),
                },
            },
            // The standard tier is the service default and is not sent.
            service_tier: request
                .service_tier
                .is_discounted()
                .then(|| request.service_tier.as_str()),
            max_tool_calls: request.max_tool_calls,
            reasoning: request
                .reasoning_effort
                .as_deref()
                .map(|effort| ReasoningSpec { effort }),
            prompt_cache_key: request.prompt_cache_key.as_deref(),
            prompt_cache_retention: request
                .prompt_cache_key
                .as_ref()
                .and(request.prompt_cache_retention.as_deref()),
        }
    }
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ToolSpec {
    #[serde(rename = "type")]
    type_: &'static str,
}

#[derive(Debug, Serialize)]
struct TextFormat {
    format: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    #[serde(rename = "type")]
    type_: &'static str,
    name: &'static str,
    strict: bool,
    schema: JsonValue,
}

#[derive(Debug, Serialize)]
struct ReasoningSpec<'a> {
    effort: &'a str,
}

/// Responses API response format.
#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    service_tier: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    WebSearchCall {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        action: Option<SearchAction>,
        #[serde(default)]
        query: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    Message {
        #[serde(default)]
        content: Vec<MessageContent>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct SearchAction {
    #[serde(rename = "type", default)]
    type_: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(rename = "type", default)]
    type_: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    input_tokens_details: Option<InputTokenDetails>,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    output_tokens_details: Option<OutputTokenDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct InputTokenDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
struct OutputTokenDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl ResponsesResponse {
    fn into_reasoning_response(self) -> Result<ReasoningResponse, ProviderError> {
        let usage = self
            .usage
            .ok_or_else(|| ProviderError::Parse("response did not include usage".to_string()))?;

        // The service counts cache hits inside input_tokens.
        let cached = usage
            .input_tokens_details
            .map(|d| d.cached_tokens)
            .unwrap_or(0);
        let tokens = UsageCounters {
            input_tokens: usage.input_tokens.saturating_sub(cached),
            cached_input_tokens: cached.min(usage.input_tokens),
            output_tokens: usage.output_tokens,
            reasoning_tokens: usage
                .output_tokens_details
                .map(|d| d.reasoning_tokens)
                .unwrap_or(0),
            ..Default::default()
        };

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut citations = Vec::new();
        let mut seen = HashSet::new();

        for item in self.output {
            match item {
                OutputItem::WebSearchCall {
                    status,
                    action,
                    query,
                    url,
                } => {
                    let (action_type, action_query, action_url) = match action {
                        Some(a) => (a.type_, a.query, a.url),
                        None => (None, None, None),
                    };
                    tool_calls.push(ToolInvocation::classify(
                        status.as_deref(),
                        query.as_deref().or(action_query.as_deref()),
                        url.as_deref().or(action_url.as_deref()),
                        action_type.as_deref(),
                    ));
                }
                OutputItem::Message { content } => {
                    for part in content {
                        if let Some(text) = part.text.filter(|t| !t.trim().is_empty()) {
                            texts.push(text);
                        }
                        for ann in part.annotations {
                            if ann.type_ != "url_citation" {
                                continue;
                            }
                            if let Some(url) = ann.url.filter(|u| !u.is_empty()) {
                                if seen.insert(url.clone()) {
                                    citations.push(Citation {
                                        url,
                                        title: ann.title.unwrap_or_default(),
                                    });
                                }
                            }
                        }
                    }
                }
                OutputItem::Other => {}
            }
        }

        if texts.is_empty() {
            return Err(ProviderError::Parse(
                "could not extract text output from response".to_string(),
            ));
        }

        let service_tier_used = match self.service_tier.as_deref() {
            Some("flex") => ServiceTier::Flex,
            _ => ServiceTier::Auto,
        };

        Ok(ReasoningResponse {
            text: texts.join("\n"),
            tokens,
            tool_calls,
            service_tier_used,
            citations,
        })
    }
}

#[async_trait]
impl ReasoningProvider for OpenAiProvider {
    async fn respond(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ProviderError> {
        let mut body = ResponsesRequest::from_request(request);

        let raw = match self.send(&body, request.timeout).await {
            Err(e) if body.prompt_cache_retention.is_some() && is_retention_unsupported(&e) => {
                tracing::debug!(model = %request.model, "Retrying without prompt_cache_retention");
                body.prompt_cache_retention = None;
                self.send(&body, request.timeout).await?
            }
            other => other?,
        };

        raw.into_reasoning_response()
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Factory for creating OpenAI providers from configuration.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-...",        // Optional, falls back to OPENAI_API_KEY env
///   "base_url": "https://..."   // Optional, custom API endpoint
/// }
/// ```
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ReasoningProvider>, ProviderError> {
        Ok(Arc::new(OpenAiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", OPENAI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "OpenAI API key required: set 'api_key' in config or {} env",
                OPENAI_API_KEY_ENV
            )));
        }

        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": DEFAULT_BASE_URL })
    }

    fn description(&self) -> &'static str {
        "OpenAI Responses API with web search and strict structured output"
    }
}

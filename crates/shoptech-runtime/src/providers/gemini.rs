//! Google Gemini provider.
//!
//! Calls `generateContent` with Google Search grounding and a JSON response
//! schema. Grounded search queries are reported as completed `query` tool
//! calls and grounding chunks become citations.
//!
//! Gemini has no discounted tier and no tool-call ceiling: a flex request is
//! processed on the standard tier and `max_tool_calls` is not sent.

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

/// Environment variable name for the Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini provider.
pub struct GeminiProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiProvider {
    /// Create a provider with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_credential(ApiCredential::new(
            api_key,
            CredentialSource::Programmatic,
            "Gemini API key",
        ))
    }

    /// Create from `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(GEMINI_API_KEY_ENV, "Gemini API key")?;
        Ok(Self::with_credential(credential))
    }

    /// Create from JSON configuration with environment fallback.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            GEMINI_API_KEY_ENV,
            "Gemini API key",
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
        model: &str,
        body: &GenerateContentRequest<'_>,
        timeout: Duration,
    ) -> Result<GenerateContentResponse, ProviderError> {
        // SECURITY: Only expose the credential here, at the point of use
        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", self.credential.expose())
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
                .json::<GenerateContentResponse>()
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
        400 if message.contains("API key not valid") => ProviderError::Auth,
        429 => ProviderError::RateLimited { retry_after },
        _ => ProviderError::Api { status, message },
    }
}

/// Remove schema keywords the Gemini response schema does not accept.
fn gemini_schema(schema: JsonValue) -> JsonValue {
    match schema {
        JsonValue::Object(map) => map
            .into_iter()
            .filter(|(key, _)| key != "additionalProperties")
            .map(|(key, value)| (key, gemini_schema(value)))
            .collect::<serde_json::Map<_, _>>()
            .into(),
        JsonValue::Array(items) => items.into_iter().map(gemini_schema).collect(),
        other => other,
    }
}

/// Strip a Markdown code fence around the JSON answer, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// generateContent request format.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    tools: [Tool; 1],
    generation_config: GenerationConfig,
}

impl<'a> GenerateContentRequest<'a> {
    fn from_request(request: &'a ReasoningRequest) -> Self {
        Self {
            system_instruction: Content {
                role: None,
                parts: [Part {
                    text: &request.system_prompt,
                }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part {
                    text: &request.user_prompt,
                }],
            }],
            tools: [Tool {
                google_search: EmptyObject {},
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: gemini_schema(service_schema(request.include_sources)),
                temperature: 0.0,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: EmptyObject,
}

#[derive(Debug, Serialize)]
struct EmptyObject {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: JsonValue,
    temperature: f32,
}

/// generateContent response format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    web_search_queries: Vec<String>,
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Debug, Deserialize)]
struct WebChunk {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    cached_content_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl GenerateContentResponse {
    fn into_reasoning_response(self) -> Result<ReasoningResponse, ProviderError> {
        let usage = self.usage_metadata.ok_or_else(|| {
            ProviderError::Parse("response did not include usageMetadata".to_string())
        })?;

        // promptTokenCount includes cached content; thinking tokens bill as output.
        let cached = usage.cached_content_token_count.min(usage.prompt_token_count);
        let tokens = UsageCounters {
            input_tokens: usage.prompt_token_count - cached,
            cached_input_tokens: cached,
            output_tokens: usage.candidates_token_count + usage.thoughts_token_count,
            reasoning_tokens: usage.thoughts_token_count,
            ..Default::default()
        };

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response has no candidates".to_string()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        let text = strip_code_fence(&text);
        if text.is_empty() {
            return Err(ProviderError::Parse(
                "could not extract text output from response".to_string(),
            ));
        }

        let grounding = candidate.grounding_metadata.unwrap_or_default();
        let tool_calls = grounding
            .web_search_queries
            .iter()
            .map(|q| ToolInvocation::classify(Some("completed"), Some(q), None, None))
            .collect();

        let mut seen = HashSet::new();
        let citations = grounding
            .grounding_chunks
            .into_iter()
            .filter_map(|chunk| chunk.web)
            .filter_map(|web| {
                let url = web.uri.filter(|u| !u.is_empty())?;
                seen.insert(url.clone()).then(|| Citation {
                    url,
                    title: web.title.unwrap_or_default(),
                })
            })
            .collect();

        Ok(ReasoningResponse {
            text: text.to_string(),
            tokens,
            tool_calls,
            service_tier_used: ServiceTier::Auto,
            citations,
        })
    }
}

#[async_trait]
impl ReasoningProvider for GeminiProvider {
    async fn respond(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ProviderError> {
        if request.service_tier.is_discounted() {
            tracing::debug!(model = %request.model, "Gemini has no flex tier, using standard");
        }
        let body = GenerateContentRequest::from_request(request);
        self.send(&request.model, &body, request.timeout)
            .await?
            .into_reasoning_response()
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Factory for creating Gemini providers from configuration.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "...",           // Optional, falls back to GEMINI_API_KEY env
///   "base_url": "https://..."   // Optional, custom API endpoint
/// }
/// ```
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "gemini"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ReasoningProvider>, ProviderError> {
        Ok(Arc::new(GeminiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", GEMINI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Gemini API key required: set 'api_key' in config or {} env",
                GEMINI_API_KEY_ENV
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
        "Google Gemini generateContent with Google Search grounding"
    }
}

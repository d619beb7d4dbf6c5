#![cfg(feature = "gemini")]

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shoptech_core::{Platform, ServiceTier, ToolCallCounts};
use shoptech_runtime::providers::{
    GeminiProvider, ProviderError, ReasoningProvider, ReasoningRequest,
};
use shoptech_runtime::{EvaluationOrchestrator, RuntimeConfig};

const MODEL_PATH: &str = "/models/gemini-3-flash-preview:generateContent";

fn payload_text() -> String {
    json!({
        "input_url": "https://shop.example.com",
        "final_platform": "woocommerce",
        "confidence": "medium",
        "evidence_tier": "B",
        "signals": ["wp-content/plugins/woocommerce assets"],
        "reasoning": "The storefront loads WooCommerce plugin assets. No checkout was reachable."
    })
    .to_string()
}

fn success_body() -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": payload_text() }] },
            "finishReason": "STOP",
            "groundingMetadata": {
                "webSearchQueries": ["shop.example.com woocommerce", "shop.example.com impressum"],
                "groundingChunks": [
                    { "web": { "uri": "https://shop.example.com", "title": "shop.example.com" } },
                    { "web": { "uri": "https://shop.example.com", "title": "shop.example.com" } }
                ]
            }
        }],
        "usageMetadata": {
            "promptTokenCount": 1500,
            "cachedContentTokenCount": 500,
            "candidatesTokenCount": 120,
            "thoughtsTokenCount": 80,
            "totalTokenCount": 1700
        }
    })
}

fn request() -> ReasoningRequest {
    ReasoningRequest::new(
        "gemini-3-flash-preview",
        "system",
        "Website URL: https://shop.example.com\n",
    )
}

#[tokio::test]
async fn test_response_is_converted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .and(header("x-goog-api-key", "gm-test"))
        .and(body_partial_json(json!({
            "tools": [{ "google_search": {} }],
            "generationConfig": { "responseMimeType": "application/json", "temperature": 0.0 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GeminiProvider::new("gm-test").with_base_url(server.uri());
    let response = provider.respond(&request()).await.unwrap();

    assert_eq!(response.service_tier_used, ServiceTier::Auto);
    assert_eq!(response.citations.len(), 1);
    let usage = response.usage();
    assert_eq!(usage.input_tokens, 1000);
    assert_eq!(usage.cached_input_tokens, 500);
    assert_eq!(usage.output_tokens, 200);
    assert_eq!(usage.tool_calls, ToolCallCounts::new(2, 0, 0));
}

#[tokio::test]
async fn test_flex_request_runs_on_standard_tier() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .mount(&server)
        .await;

    let provider = GeminiProvider::new("gm-test").with_base_url(server.uri());
    let mut req = request();
    req.service_tier = ServiceTier::Flex;
    let response = provider.respond(&req).await.unwrap();
    assert_eq!(response.service_tier_used, ServiceTier::Auto);
}

#[tokio::test]
async fn test_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED" }
        })))
        .mount(&server)
        .await;

    let provider = GeminiProvider::new("gm-test").with_base_url(server.uri());
    assert!(matches!(
        provider.respond(&request()).await,
        Err(ProviderError::RateLimited { .. })
    ));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT" }
        })))
        .mount(&server)
        .await;

    let provider = GeminiProvider::new("bad").with_base_url(server.uri());
    assert!(matches!(
        provider.respond(&request()).await,
        Err(ProviderError::Auth)
    ));
}

#[tokio::test]
async fn test_evaluation_end_to_end_with_gemini_prices() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = RuntimeConfig::default();
    config.set_provider("gemini");
    let provider = Arc::new(GeminiProvider::new("gm-test").with_base_url(server.uri()));
    let orchestrator = EvaluationOrchestrator::builder()
        .provider(provider)
        .config(config)
        .build()
        .unwrap();

    let input = shoptech_core::EvaluationInput::new("shop.example.com");
    let result = orchestrator.evaluate(&input).await.unwrap();

    assert_eq!(result.payload.final_platform, Platform::Woocommerce);
    // 1500 prompt tokens at $0.50 and 200 output tokens at $3.00 per million
    assert_eq!(result.cost.token_cost_nanos, 750_000 + 600_000);
    // two grounded queries at $0.035
    assert_eq!(result.cost.web_search_cost_nanos, 70_000_000);
}

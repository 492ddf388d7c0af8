//! Language model access.
//!
//! [`LanguageModel`] is the collaborator the extraction and enrichment steps
//! depend on. [`ChatCompletionsClient`] talks to any OpenAI-compatible
//! `/chat/completions` endpoint. [`PromptRunner`] wraps a model with retry,
//! tolerant JSON decoding, and the post-call pause.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use eventharvest_shared::{HarvestError, LlmConfig, Result, RetryPolicy, env_secret};

use crate::decode::decode_json_object;
use crate::retry::retry_with_backoff;

/// User-Agent string for model API requests.
const USER_AGENT: &str = concat!("EventHarvest/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// LanguageModel
// ---------------------------------------------------------------------------

/// A text-in, text-out completion model.
///
/// Errors must render the provider's status or cause so that
/// [`crate::retry::classify`] can tell throttling from fatal failures.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// ChatCompletionsClient
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat completions client (OpenRouter by default).
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HarvestError::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
        })
    }

    /// Build a client reading the API key from the configured env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = env_secret(&config.api_key_env).ok_or_else(|| {
            HarvestError::config(format!(
                "language model API key not found. Set the {} environment variable.",
                config.api_key_env
            ))
        })?;
        Self::new(config, api_key)
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HarvestError::Llm(format!("request timed out: {e}"))
                } else {
                    HarvestError::Llm(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(HarvestError::Llm(format!("HTTP {status}: {detail}")));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::Llm(format!("invalid completion payload: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| HarvestError::Llm("completion has no choices".into()))?
            .message
            .content
            .unwrap_or_default();

        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// PromptRunner
// ---------------------------------------------------------------------------

/// Sends one prompt and decodes a JSON object from the reply.
#[derive(Clone, Copy)]
pub struct PromptRunner<'a> {
    model: &'a dyn LanguageModel,
    retry: RetryPolicy,
    pause: Duration,
}

impl<'a> PromptRunner<'a> {
    pub fn new(model: &'a dyn LanguageModel, retry: RetryPolicy, pause: Duration) -> Self {
        Self {
            model,
            retry,
            pause,
        }
    }

    /// Run `prompt` and return the decoded object.
    ///
    /// A reply with no decodable object counts as a non-retryable failure.
    /// Every failure ends in an empty map. The configured pause is observed
    /// after each successful call.
    #[instrument(skip_all, fields(label = %label))]
    pub async fn json(&self, label: &str, prompt: &str) -> Map<String, Value> {
        let model = self.model;
        let result = retry_with_backoff(&self.retry, label, || async move {
            let reply = model.complete(prompt).await?;
            let decoded = decode_json_object(&reply);
            if decoded.is_empty() {
                Err(HarvestError::parse("model reply held no JSON object"))
            } else {
                Ok(decoded)
            }
        })
        .await;

        match result {
            Ok(map) => {
                if !self.pause.is_zero() {
                    tokio::time::sleep(self.pause).await;
                }
                map
            }
            Err(e) => {
                warn!(label, error = %e, "prompt yielded no data");
                Map::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedModel, fast_retry};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn client_posts_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "openai/gpt-4o-mini",
                "temperature": 0,
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\": true}"}}]
            })))
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(&test_config(&server.uri()), "test-key".into())
            .unwrap();
        let reply = client.complete("hello").await.unwrap();
        assert_eq!(reply, "{\"ok\": true}");
    }

    #[tokio::test]
    async fn client_reports_status_for_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client =
            ChatCompletionsClient::new(&test_config(&server.uri()), "k".into()).unwrap();
        let err = client.complete("hello").await.unwrap_err();
        assert_eq!(
            crate::retry::classify(&err),
            crate::retry::ErrorClass::RateLimit
        );
    }

    #[tokio::test]
    async fn client_rejects_payload_without_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client =
            ChatCompletionsClient::new(&test_config(&server.uri()), "k".into()).unwrap();
        assert!(client.complete("hello").await.is_err());
    }

    #[test]
    fn from_config_requires_key() {
        let config = LlmConfig {
            api_key_env: "EH_TEST_MISSING_LLM_KEY_98765".into(),
            ..LlmConfig::default()
        };
        assert!(ChatCompletionsClient::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn runner_decodes_reply() {
        let model = ScriptedModel::replying("```json\n{\"event_name\": \"Gala\"}\n```");
        let runner = PromptRunner::new(&model, fast_retry(), Duration::ZERO);
        let map = runner.json("test", "prompt").await;
        assert_eq!(map["event_name"], "Gala");
        assert_eq!(model.prompt_count(), 1);
    }

    #[tokio::test]
    async fn runner_retries_rate_limits() {
        let model = ScriptedModel::new(vec![
            Err("HTTP 429 Too Many Requests"),
            Ok("{\"a\": \"b\"}"),
        ]);
        let runner = PromptRunner::new(&model, fast_retry(), Duration::ZERO);
        let map = runner.json("test", "prompt").await;
        assert_eq!(map["a"], "b");
        assert_eq!(model.prompt_count(), 2);
    }

    #[tokio::test]
    async fn runner_gives_up_on_non_json_reply() {
        let model = ScriptedModel::replying("I cannot help with that.");
        let runner = PromptRunner::new(&model, fast_retry(), Duration::ZERO);
        assert!(runner.json("test", "prompt").await.is_empty());
        assert_eq!(model.prompt_count(), 1);
    }

    #[tokio::test]
    async fn runner_gives_up_on_fatal_error() {
        let model = ScriptedModel::new(vec![Err("HTTP 401 bad key")]);
        let runner = PromptRunner::new(&model, fast_retry(), Duration::ZERO);
        assert!(runner.json("test", "prompt").await.is_empty());
        assert_eq!(model.prompt_count(), 1);
    }
}

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use plantwise_core::config::{LlmConfig, LlmProvider};
use plantwise_core::profile::ModelSettings;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::prompt::Prompt;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
/// OpenAI accepts at most four stop sequences.
const OPENAI_MAX_STOP: usize = 4;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt, settings: &ModelSettings) -> Result<String>;
}

/// One client for the three supported HTTP APIs.
#[derive(Clone, Debug)]
pub struct HttpLlmClient {
    client: Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| {
                match config.provider {
                    LlmProvider::OpenAi => OPENAI_BASE_URL,
                    LlmProvider::Anthropic => ANTHROPIC_BASE_URL,
                    LlmProvider::Ollama => OLLAMA_BASE_URL,
                }
                .to_string()
            })
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| anyhow!("llm api key is not configured"))
    }

    fn request(&self, prompt: &Prompt, settings: &ModelSettings) -> Result<reqwest::RequestBuilder> {
        let model = settings.model_id.as_deref().unwrap_or(&self.model);
        let request = match self.provider {
            LlmProvider::Anthropic => {
                let mut messages = vec![json!({"role": "user", "content": prompt.question})];
                let prefill = prompt.scratchpad.trim_end();
                if !prefill.is_empty() {
                    messages.push(json!({"role": "assistant", "content": prefill}));
                }
                let mut body = json!({
                    "model": model,
                    "max_tokens": settings.max_tokens,
                    "system": prompt.system,
                    "messages": messages,
                    "stop_sequences": settings.stop_sequences,
                    "temperature": settings.temperature,
                });
                if let Some(top_k) = settings.top_k {
                    body["top_k"] = json!(top_k);
                }
                if let Some(top_p) = settings.top_p {
                    body["top_p"] = json!(top_p);
                }
                self.client
                    .post(format!("{}/v1/messages", self.base_url))
                    .header("x-api-key", self.api_key()?)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
            }
            LlmProvider::OpenAi => {
                let mut messages = vec![
                    json!({"role": "system", "content": prompt.system}),
                    json!({"role": "user", "content": prompt.question}),
                ];
                if !prompt.scratchpad.is_empty() {
                    messages.push(json!({"role": "assistant", "content": prompt.scratchpad}));
                    messages.push(json!({"role": "user", "content": "Continue."}));
                }
                let stop =
                    settings.stop_sequences.iter().take(OPENAI_MAX_STOP).collect::<Vec<_>>();
                let mut body = json!({
                    "model": model,
                    "max_tokens": settings.max_tokens,
                    "messages": messages,
                    "stop": stop,
                    "temperature": settings.temperature,
                });
                if let Some(top_p) = settings.top_p {
                    body["top_p"] = json!(top_p);
                }
                self.client
                    .post(format!("{}/v1/chat/completions", self.base_url))
                    .bearer_auth(self.api_key()?)
                    .json(&body)
            }
            LlmProvider::Ollama => {
                let mut options = json!({
                    "num_predict": settings.max_tokens,
                    "temperature": settings.temperature,
                    "stop": settings.stop_sequences,
                });
                if let Some(top_k) = settings.top_k {
                    options["top_k"] = json!(top_k);
                }
                if let Some(top_p) = settings.top_p {
                    options["top_p"] = json!(top_p);
                }
                self.client.post(format!("{}/api/generate", self.base_url)).json(&json!({
                    "model": model,
                    "system": prompt.system,
                    "prompt": format!("{}\n\n{}", prompt.question, prompt.scratchpad),
                    "stream": false,
                    "options": options,
                }))
            }
        };
        Ok(request)
    }

    fn completion_text(&self, body: &Value) -> Option<String> {
        let text = match self.provider {
            LlmProvider::Anthropic => body["content"]
                .as_array()?
                .iter()
                .filter_map(|block| block["text"].as_str())
                .collect::<Vec<_>>()
                .join(""),
            LlmProvider::OpenAi => body["choices"][0]["message"]["content"].as_str()?.to_string(),
            LlmProvider::Ollama => body["response"].as_str()?.to_string(),
        };
        Some(text)
    }
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &Prompt, settings: &ModelSettings) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self.request(prompt, settings)?.send().await;
            let outcome = match response {
                Ok(response) if response.status().is_success() => {
                    let body = response.json::<Value>().await.context("invalid llm response body")?;
                    return self
                        .completion_text(&body)
                        .ok_or_else(|| anyhow!("llm response carried no completion text"));
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = response.text().await.unwrap_or_default();
                    if !retryable(status) {
                        return Err(anyhow!("llm request failed with {status}: {detail}"));
                    }
                    anyhow!("llm request failed with {status}: {detail}")
                }
                Err(error) => anyhow::Error::new(error).context("llm request failed"),
            };

            if attempt > self.max_retries {
                return Err(outcome);
            }
            tracing::warn!(
                event_name = "llm.request_retry",
                provider = ?self.provider,
                attempt,
                error = %outcome,
                "retrying llm request"
            );
            tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use plantwise_core::config::{LlmConfig, LlmProvider};
    use serde_json::json;

    use super::HttpLlmClient;

    fn config(provider: LlmProvider) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: None,
            base_url: None,
            model: "test-model".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        }
    }

    #[test]
    fn completion_text_follows_provider_shape() {
        let anthropic = HttpLlmClient::from_config(&config(LlmProvider::Anthropic)).expect("client");
        let body = json!({"content": [{"type": "text", "text": "<answer>2 tanks"}]});
        assert_eq!(anthropic.completion_text(&body).as_deref(), Some("<answer>2 tanks"));

        let openai = HttpLlmClient::from_config(&config(LlmProvider::OpenAi)).expect("client");
        let body = json!({"choices": [{"message": {"content": "<answer>ok"}}]});
        assert_eq!(openai.completion_text(&body).as_deref(), Some("<answer>ok"));

        let ollama = HttpLlmClient::from_config(&config(LlmProvider::Ollama)).expect("client");
        assert_eq!(ollama.completion_text(&json!({"response": "hi"})).as_deref(), Some("hi"));
        assert!(ollama.completion_text(&json!({})).is_none());
    }

    #[test]
    fn hosted_providers_require_an_api_key() {
        let client = HttpLlmClient::from_config(&config(LlmProvider::Anthropic)).expect("client");
        assert!(client.api_key().is_err());
        assert_eq!(client.base_url, "https://api.anthropic.com");
    }
}

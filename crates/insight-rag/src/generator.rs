//! Generative backends.
//!
//! - `OllamaGenerator`: `POST /api/generate`, with model discovery via
//!   `GET /api/tags` when no model is pinned
//! - `OpenAiChatGenerator`: `POST /chat/completions`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use insight_core::config::{GenerationApi, GenerationSettings};
use insight_core::traits::{GenerationRequest, Generator};
use insight_core::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Build the configured backend, or `None` when generation is disabled.
pub fn build_generator(settings: &GenerationSettings) -> Result<Option<Arc<dyn Generator>>> {
    if !settings.enabled {
        info!("generation disabled; answers will be extractive");
        return Ok(None);
    }
    let timeout = Duration::from_secs(settings.timeout_secs);
    let generator: Arc<dyn Generator> = match settings.api {
        GenerationApi::Ollama => Arc::new(OllamaGenerator::new(
            &settings.base_url,
            settings.model.as_deref(),
            settings.preferred_models.clone(),
            timeout,
        )?),
        GenerationApi::OpenAi => {
            let model = settings
                .model
                .as_deref()
                .ok_or_else(|| Error::InvalidConfig("generation.model is required for the openai api".into()))?;
            Arc::new(OpenAiChatGenerator::new(&settings.base_url, model, settings.api_key.as_deref(), timeout)?)
        }
    };
    Ok(Some(generator))
}

fn transport_error(what: &str, e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::generation(format!("{what} timed out"))
    } else if e.is_connect() {
        Error::generation(format!("{what} unreachable: {e}"))
    } else if e.is_decode() {
        Error::generation(format!("{what} returned a malformed response: {e}"))
    } else {
        Error::generation(format!("{what} request failed: {e}"))
    }
}

/// Pick the first preferred model that matches an installed one. A match is
/// either exact or on the name before the `:tag` suffix.
pub fn choose_model(installed: &[String], preferred: &[String]) -> Option<String> {
    for want in preferred {
        let hit = installed.iter().find(|name| *name == want || name.split(':').next() == Some(want.as_str()));
        if let Some(name) = hit {
            return Some(name.clone());
        }
    }
    installed.first().cloned()
}

pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    pinned: Option<String>,
    preferred: Vec<String>,
    discovered: OnceCell<String>,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: Option<&str>, preferred: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build Ollama HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            pinned: model.map(str::trim).filter(|m| !m.is_empty()).map(str::to_string),
            preferred,
            discovered: OnceCell::new(),
        })
    }

    async fn installed_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(|e| transport_error("Ollama tags", &e))?;
        if !resp.status().is_success() {
            return Err(Error::generation(format!("Ollama tags returned {}", resp.status())));
        }
        let parsed: TagsResponse = resp.json().await.map_err(|e| transport_error("Ollama tags", &e))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    /// The pinned model, or the discovered one. Discovery runs once and only a
    /// successful pick is remembered.
    async fn model(&self) -> Result<String> {
        if let Some(m) = &self.pinned {
            return Ok(m.clone());
        }
        let chosen = self
            .discovered
            .get_or_try_init(|| async {
                let installed = self.installed_models().await?;
                let chosen = choose_model(&installed, &self.preferred)
                    .ok_or_else(|| Error::generation("no Ollama models installed"))?;
                info!(model = %chosen, installed = installed.len(), "selected Ollama model");
                Ok::<_, Error>(chosen)
            })
            .await?;
        Ok(chosen.clone())
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let model = self.model().await?;
        let prompt = if request.system.is_empty() {
            request.prompt.clone()
        } else {
            format!("{}\n\n{}", request.system, request.prompt)
        };
        let body = GenerateRequest {
            model: &model,
            prompt: &prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
                top_p: request.top_p,
            },
        };
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = %model, "sending generate request");
        let resp = self.client.post(&url).json(&body).send().await.map_err(|e| transport_error("Ollama generate", &e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::generation(format!("Ollama returned {status}: {text}")));
        }
        let parsed: GenerateResponse = resp.json().await.map_err(|e| transport_error("Ollama generate", &e))?;
        Ok(parsed.response.trim().to_string())
    }

    async fn probe(&self) -> Result<String> {
        if self.pinned.is_some() {
            // Still confirm the server answers.
            self.installed_models().await?;
        }
        self.model().await
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: usize,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

pub struct OpenAiChatGenerator {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAiChatGenerator {
    pub fn new(base_url: &str, model: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            let auth = format!("Bearer {key}");
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth).map_err(|_| Error::InvalidConfig("invalid OpenAI API key".into()))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build OpenAI HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Generator for OpenAiChatGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage { role: "system", content: &request.system });
        }
        messages.push(ChatMessage { role: "user", content: &request.prompt });
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            messages,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("OpenAI chat completions", &e))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::generation(format!("OpenAI returned {status}: {text}")));
        }
        let parsed: ChatResponse = resp.json().await.map_err(|e| transport_error("OpenAI chat completions", &e))?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::generation("OpenAI response missing message content"))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    top_p: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn preference_order_wins_over_install_order() {
        let installed = names(&["llama2:latest", "mistral:7b", "phi3:mini"]);
        let preferred = names(&["phi3", "mistral", "llama2"]);
        assert_eq!(choose_model(&installed, &preferred).as_deref(), Some("phi3:mini"));
    }

    #[test]
    fn tagged_preference_matches_exactly() {
        let installed = names(&["gemma:7b", "gemma:2b"]);
        let preferred = names(&["gemma:2b", "gemma"]);
        assert_eq!(choose_model(&installed, &preferred).as_deref(), Some("gemma:2b"));
    }

    #[test]
    fn falls_back_to_first_installed() {
        let installed = names(&["qwen2:0.5b", "tinyllama"]);
        assert_eq!(choose_model(&installed, &names(&["phi3"])).as_deref(), Some("qwen2:0.5b"));
        assert_eq!(choose_model(&[], &names(&["phi3"])), None);
    }

    #[test]
    fn disabled_builds_nothing() {
        let settings = GenerationSettings { enabled: false, ..GenerationSettings::default() };
        assert!(build_generator(&settings).unwrap().is_none());
    }
}

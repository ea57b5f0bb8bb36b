//! Language-model capability.
//!
//! [`LanguageModel`] is "given a prompt, return text". [`ChatCompletionsModel`]
//! implements it against any OpenAI-compatible `/chat/completions` endpoint
//! (Groq by default). There is no retry and no streaming: a failure is
//! classified and returned to the caller.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{RagError, Result, DEP_LLM};

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct ChatCompletionsModel {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl ChatCompletionsModel {
    /// Build a client from config, reading the key from `llm.api_key_env`.
    ///
    /// A missing key is allowed (local OpenAI-compatible servers don't need
    /// one); the remote service will reject us with 401 if it does.
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                var = %config.api_key_env,
                "LLM API key not set; requests will be sent without authorization"
            );
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match self.api_key {
            Some(ref key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// List the model ids the endpoint offers (`GET /models`).
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let resp = self
            .request(reqwest::Method::GET, "/models")
            .send()
            .await
            .map_err(|e| RagError::from_transport(DEP_LLM, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RagError::from_status(DEP_LLM, status.as_u16(), &body));
        }

        let list: ModelList = resp
            .json()
            .await
            .map_err(|e| RagError::from_transport(DEP_LLM, e))?;
        let mut ids: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        ids.sort();
        Ok(ids)
    }
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let resp = self
            .request(reqwest::Method::POST, "/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::from_transport(DEP_LLM, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_completion_error(status.as_u16(), &text));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| RagError::from_transport(DEP_LLM, e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::unavailable(DEP_LLM, "completion response had no content"))
    }
}

/// OpenAI-compatible servers report an oversized prompt as a 400 with
/// `context_length_exceeded`, or as a plain 413.
fn classify_completion_error(status: u16, body: &str) -> RagError {
    let lowered = body.to_ascii_lowercase();
    if status == 400
        && (lowered.contains("context_length_exceeded")
            || lowered.contains("maximum context length")
            || lowered.contains("too many tokens"))
    {
        return RagError::ModelInputTooLarge(body.chars().take(500).collect());
    }
    RagError::from_status(DEP_LLM, status, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_length_errors_are_classified() {
        let body = r#"{"error":{"code":"context_length_exceeded","message":"too long"}}"#;
        assert!(matches!(
            classify_completion_error(400, body),
            RagError::ModelInputTooLarge(_)
        ));
        assert!(matches!(
            classify_completion_error(413, "payload too large"),
            RagError::ModelInputTooLarge(_)
        ));
    }

    #[test]
    fn auth_errors_name_the_llm() {
        let err = classify_completion_error(401, "invalid api key");
        assert_eq!(err.dependency(), Some(DEP_LLM));
        assert_eq!(err.status(), 502);
    }

    #[test]
    fn other_bad_requests_are_internal() {
        let err = classify_completion_error(400, r#"{"error":"bad model"}"#);
        assert!(matches!(err, RagError::Internal(_)));
    }

    #[test]
    fn chat_response_parses() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"RAG is..."}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("RAG is..."));
    }
}

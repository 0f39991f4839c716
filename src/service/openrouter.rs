//! OpenRouter chat-completions backend.
//!
//! Each generation operation is played by its own agent role (planner,
//! coder, reviewer), expressed as a system prompt over one OpenAI-compatible
//! endpoint.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::GenerationService;
use crate::config::GenerationConfig;
use crate::errors::ServiceError;

const PLANNER_SYSTEM_PROMPT: &str = "You are a software project planner. Break the project \
specification into a short ordered list of implementation tasks. Respond with one task per \
line and nothing else.";

const CODER_SYSTEM_PROMPT: &str = "You are a senior Python engineer. Generate production-quality \
Python code that implements the specification. Respond with the complete code only.";

const REVIEWER_SYSTEM_PROMPT: &str = "You are a meticulous code reviewer. Review and improve the \
given code following the instructions. Respond with the complete improved code only.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Strip a surrounding markdown code fence, if the model added one.
pub fn strip_code_fence(text: &str) -> String {
    if let Some(rest) = text.trim().strip_prefix("```") {
        // Drop the info string (e.g. "python") on the opening fence line.
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
        let body = body.trim_end();
        let body = body.strip_suffix("```").unwrap_or(body);
        return body.trim_end().to_string();
    }
    // Only blank lines are dropped; first-line indentation is code.
    text.trim_start_matches(['\n', '\r']).trim_end().to_string()
}

/// Turn the planner's free text into a task list.
pub fn parse_task_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| {
            l.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')'])
                .trim()
        })
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct OpenRouterService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenRouterService {
    pub fn new(api_key: String, base_url: &str, model: String, temperature: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model,
            temperature,
        }
    }

    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).with_context(|| {
            format!(
                "Generation API key not found in environment variable '{}'",
                config.api_key_env
            )
        })?;
        Ok(Self::new(
            api_key,
            &config.base_url,
            config.model.clone(),
            config.temperature,
        ))
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            temperature: self.temperature,
        };

        debug!(model = %self.model, "sending chat completion request");
        let response: ChatResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", "macc")
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| ServiceError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| ServiceError::Request(format!("invalid completion response: {}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ServiceError::EmptyOutput)
    }
}

#[async_trait]
impl GenerationService for OpenRouterService {
    async fn plan(&self, spec: &str) -> Result<Vec<String>, ServiceError> {
        let text = self
            .complete(PLANNER_SYSTEM_PROMPT, format!("Break down: {}", spec))
            .await?;
        Ok(parse_task_list(&text))
    }

    async fn generate(&self, spec: &str) -> Result<String, ServiceError> {
        let text = self
            .complete(
                CODER_SYSTEM_PROMPT,
                format!("Generate production-quality Python code: {}", spec),
            )
            .await?;
        Ok(strip_code_fence(&text))
    }

    async fn review(&self, artifact: &str, instructions: &str) -> Result<String, ServiceError> {
        let text = self
            .complete(
                REVIEWER_SYSTEM_PROMPT,
                format!(
                    "Instructions: {}\n\nCurrent code:\n{}",
                    instructions, artifact
                ),
            )
            .await?;
        Ok(strip_code_fence(&text))
    }
}

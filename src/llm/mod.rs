//! Reqwest-based LLM client implementing OpenAI-compatible Chat Completions streaming.

use std::{pin::Pin, time::Duration};

use anyhow::{Context, Result};
use async_stream::try_stream;
use futures_core::Stream;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the endpoint for a JSON object reply (`response_format`).
    pub json_mode: bool,
}

impl ChatOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            model: cfg.get("DEFAULT_MODEL").unwrap_or_else(|| "deepseek-chat".into()),
            temperature: cfg.get_f32("TEMPERATURE").unwrap_or(0.1),
            max_tokens: cfg.get("MAX_TOKENS").and_then(|v| v.parse().ok()).unwrap_or(4000),
            json_mode: true,
        }
    }
}

#[derive(Debug)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let timeout = cfg.get_u64("REQUEST_TIMEOUT").unwrap_or(30);
        let api_base_url = cfg
            .get("API_BASE_URL")
            .unwrap_or_else(|| "https://api.deepseek.com".into());
        let trimmed = api_base_url.trim_end_matches('/');
        let base_url = if !trimmed.ends_with("/v1") && !trimmed.contains("/v1/") {
            format!("{}/v1", trimmed)
        } else {
            trimmed.to_string()
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self { http, base_url, api_key: cfg.api_key() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        opts: ChatOptions,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>> {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();

        Box::pin(try_stream! {
            let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("text/event-stream"));
            if let Some(key) = api_key.clone() {
                let hv = HeaderValue::from_str(&format!("Bearer {}", key))?;
                headers.insert(AUTHORIZATION, hv);
            }

            let mut body = serde_json::json!({
                "model": opts.model,
                "temperature": opts.temperature,
                "messages": messages,
                "stream": true,
                "max_tokens": opts.max_tokens
            });
            if opts.json_mode {
                body["response_format"] = serde_json::json!({"type": "json_object"});
            }

            let resp = http
                .post(url)
                .headers(headers)
                .json(&body)
                .send()
                .await
                .context("failed to send chat request")?;

            if !resp.status().is_success() {
                let status = resp.status();
                Err(anyhow::anyhow!("LLM error: {}", status))?;
            }

            let mut buf = String::new();
            let mut stream = resp.bytes_stream();
            use futures_util::StreamExt as _;

            while let Some(chunk) = stream.next().await {
                let bytes = chunk.context("stream error")?;
                buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.replace_range(..=pos, "");
                    if line.is_empty() || line.starts_with(':') { continue; }
                    if let Some(payload) = line.strip_prefix("data:") {
                        let payload = payload.trim();
                        if payload == "[DONE]" { yield StreamEvent::Done; return; }
                        // malformed lines are skipped
                        if let Ok(chunk) = serde_json::from_str::<Chunk>(payload) {
                            for choice in chunk.choices {
                                if let Some(content) = choice.delta.and_then(|d| d.content) {
                                    if !content.is_empty() {
                                        yield StreamEvent::Content(content);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Drains [`chat_stream`](Self::chat_stream) into the full reply text.
    pub async fn complete(&self, messages: Vec<ChatMessage>, opts: ChatOptions) -> Result<String> {
        use futures_util::StreamExt as _;

        let mut stream = self.chat_stream(messages, opts);
        let mut text = String::new();
        while let Some(ev) = stream.next().await {
            match ev? {
                StreamEvent::Content(s) => text.push_str(&s),
                StreamEvent::Done => break,
            }
        }
        Ok(text)
    }
}

#[derive(Debug)]
pub enum StreamEvent {
    Content(String),
    Done,
}

// Minimal chunk structures for OpenAI-like streaming
#[derive(Debug, Deserialize)]
struct Chunk {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_version_suffix_once() {
        let mut cfg = Config::defaults();
        let c = LlmClient::from_config(&cfg).unwrap();
        assert_eq!(c.base_url(), "https://api.deepseek.com/v1");

        cfg.set("API_BASE_URL", "http://localhost:8080/v1/");
        let c = LlmClient::from_config(&cfg).unwrap();
        assert_eq!(c.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn options_follow_config() {
        let mut cfg = Config::defaults();
        cfg.set("MAX_TOKENS", "123");
        let o = ChatOptions::from_config(&cfg);
        assert_eq!(o.model, "deepseek-chat");
        assert_eq!(o.max_tokens, 123);
        assert!(o.json_mode);
    }
}

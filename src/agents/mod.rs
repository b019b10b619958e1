//! Planner, coder, critic and reporter agents.
//!
//! Each agent sends one JSON request to the chat endpoint and parses a JSON
//! object back. Any failure on that path is `AGENT_UNAVAILABLE`: it is logged
//! and the agent answers with its deterministic fallback instead, so a run
//! never blocks on the endpoint.

use std::{path::PathBuf, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    cache::RequestCache,
    config::Config,
    llm::{ChatMessage, ChatOptions, LlmClient},
    role::{system_prompt, AgentRole},
    utils::parse_json_object,
};

pub mod coder;
pub mod critic;
pub mod planner;
pub mod reporter;

pub use coder::{CodeArtifact, Coder, FallbackCoder, Feedback, LlmCoder};
pub use critic::{Critic, Critique, CritiqueStatus, FallbackCritic, LlmCritic};
pub use planner::{FallbackPlanner, LlmPlanner, PlanItem, Planner};
pub use reporter::{FallbackReporter, Highlight, LlmReporter, Report, Reporter};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    #[error("agent request failed: {0}")]
    Http(String),

    #[error("agent reply is not the expected JSON: {0}")]
    Parse(String),
}

/// Logs the `AGENT_UNAVAILABLE` condition before a fallback answers.
pub(crate) fn log_unavailable(role: AgentRole, err: &AgentError) {
    warn!(agent = %role, code = "AGENT_UNAVAILABLE", error = %err, "falling back to rule-based {role}");
}

/// Shared chat endpoint used by every LLM-backed agent.
pub struct AgentLlm {
    cfg: Config,
    client: Option<LlmClient>,
    opts: ChatOptions,
    cache: Option<RequestCache>,
}

impl AgentLlm {
    pub fn from_config(cfg: &Config, offline: bool, caching: bool) -> Self {
        let client = if offline {
            info!("offline mode, agents use rule-based fallbacks");
            None
        } else if cfg.api_key().is_none() {
            info!("no API key configured, agents use rule-based fallbacks");
            None
        } else {
            match LlmClient::from_config(cfg) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(error = %e, "could not build LLM client");
                    None
                }
            }
        };
        Self {
            cfg: cfg.clone(),
            client,
            opts: ChatOptions::from_config(cfg),
            cache: caching.then(|| RequestCache::from_config(cfg)),
        }
    }

    pub fn offline(cfg: &Config) -> Self {
        Self::from_config(cfg, true, false)
    }

    pub fn is_online(&self) -> bool {
        self.client.is_some()
    }

    /// One request/reply exchange for `role`.
    pub async fn ask(&self, role: AgentRole, request: &Value) -> Result<Value, AgentError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AgentError::Unavailable("no LLM client".into()))?;

        let user = serde_json::to_string_pretty(request).map_err(|e| AgentError::Parse(e.to_string()))?;
        let messages = vec![ChatMessage::system(system_prompt(&self.cfg, role)), ChatMessage::user(user)];

        let key = self
            .cache
            .as_ref()
            .map(|c| c.key_for(client.base_url(), &self.opts.model, self.opts.temperature, &messages));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key).and_then(|t| parse_json_object(&t)) {
                debug!(agent = %role, "agent reply served from cache");
                return Ok(hit);
            }
        }

        let text = client
            .complete(messages, self.opts.clone())
            .await
            .map_err(|e| AgentError::Http(format!("{e:#}")))?;
        let value = parse_json_object(&text).ok_or_else(|| {
            AgentError::Parse(format!("no JSON object in {} byte reply", text.len()))
        })?;

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Err(e) = cache.set(key, &value.to_string()) {
                debug!(error = %e, "could not cache agent reply");
            }
        }
        Ok(value)
    }

    pub async fn ask_typed<T: DeserializeOwned>(&self, role: AgentRole, request: &Value) -> Result<T, AgentError> {
        let value = self.ask(role, request).await?;
        serde_json::from_value(value).map_err(|e| AgentError::Parse(e.to_string()))
    }
}

/// The four agents a run needs.
pub struct Agents {
    pub planner: Box<dyn Planner>,
    pub coder: Box<dyn Coder>,
    pub critic: Box<dyn Critic>,
    pub reporter: Box<dyn Reporter>,
}

impl Agents {
    pub fn llm(llm: Arc<AgentLlm>, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            planner: Box::new(LlmPlanner::new(llm.clone())),
            coder: Box::new(LlmCoder::new(llm.clone(), save_dir)),
            critic: Box::new(LlmCritic::new(llm.clone())),
            reporter: Box::new(LlmReporter::new(llm)),
        }
    }

    pub fn fallback(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            planner: Box::new(FallbackPlanner),
            coder: Box::new(FallbackCoder::new(save_dir)),
            critic: Box::new(FallbackCritic),
            reporter: Box::new(FallbackReporter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn offline_client_is_unavailable() {
        let llm = AgentLlm::offline(&Config::defaults());
        assert!(!llm.is_online());
        let err = llm.ask(AgentRole::Planner, &json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Unavailable(_)));
    }
}

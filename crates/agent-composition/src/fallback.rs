//! Tries sub-agents in order, returning the first success.

use std::sync::Arc;

use agent_core::{Agent, AgentError, Message, ProtocolError};
use async_trait::async_trait;
use serde_json::json;

pub struct FallbackAgent {
    name: String,
    agents: Vec<Arc<dyn Agent>>,
}

impl FallbackAgent {
    pub fn new(name: impl Into<String>, agents: Vec<Arc<dyn Agent>>) -> Result<Self, ProtocolError> {
        if agents.is_empty() {
            return Err(ProtocolError::invalid_message(
                "fallback composition requires at least one agent",
            ));
        }
        Ok(Self {
            name: name.into(),
            agents,
        })
    }
}

#[async_trait]
impl Agent for FallbackAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: Message) -> Result<Message, AgentError> {
        let mut errors = Vec::new();

        for (i, agent) in self.agents.iter().enumerate() {
            match agent.process(message.clone()).await {
                Ok(mut result) => {
                    result
                        .metadata
                        .insert("fallback_agent_used".to_string(), json!(agent.name()));
                    result
                        .metadata
                        .insert("fallback_attempt".to_string(), json!(i + 1));
                    return Ok(result);
                }
                Err(e) => errors.push(format!("agent {} ({}): {e}", i + 1, agent.name())),
            }
        }

        Err(ProtocolError::internal(format!(
            "all {} agents failed: {}",
            self.agents.len(),
            errors.join("; ")
        ))
        .into())
    }

    fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = self
            .agents
            .iter()
            .flat_map(|a| a.capabilities())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        caps.push("fallback".to_string());
        caps
    }
}

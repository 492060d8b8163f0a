//! Feeds the output of agent *i* as the input to agent *i+1*.

use std::sync::Arc;

use agent_core::{Agent, AgentError, Message, ProtocolError};
use async_trait::async_trait;

pub struct SequentialAgent {
    name: String,
    agents: Vec<Arc<dyn Agent>>,
}

impl SequentialAgent {
    pub fn new(name: impl Into<String>, agents: Vec<Arc<dyn Agent>>) -> Result<Self, ProtocolError> {
        if agents.is_empty() {
            return Err(ProtocolError::invalid_message(
                "sequential composition requires at least one agent",
            ));
        }
        Ok(Self {
            name: name.into(),
            agents,
        })
    }
}

#[async_trait]
impl Agent for SequentialAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: Message) -> Result<Message, AgentError> {
        let mut current = message;
        for (i, agent) in self.agents.iter().enumerate() {
            current = agent.process(current).await.map_err(|e| {
                ProtocolError::internal(format!(
                    "step {} ({}) failed: {}",
                    i + 1,
                    agent.name(),
                    e
                ))
            })?;
        }
        Ok(current)
    }

    fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = self
            .agents
            .iter()
            .flat_map(|a| a.capabilities())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        caps.push("sequential".to_string());
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Append(&'static str);

    #[async_trait]
    impl Agent for Append {
        fn name(&self) -> &str {
            self.0
        }
        async fn process(&self, message: Message) -> Result<Message, AgentError> {
            let text = message.content.as_str().unwrap_or_default();
            Ok(Message::new(message.role, json!(format!("{text}{}", self.0))))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Agent for AlwaysFails {
        fn name(&self) -> &str {
            "fails"
        }
        async fn process(&self, _message: Message) -> Result<Message, AgentError> {
            Err(ProtocolError::internal("boom").into())
        }
    }

    #[tokio::test]
    async fn chains_output_to_input() {
        let sequence = SequentialAgent::new(
            "pipeline",
            vec![Arc::new(Append("a")), Arc::new(Append("b"))],
        )
        .unwrap();
        let result = sequence.process(Message::new("user", json!(""))).await.unwrap();
        assert_eq!(result.content, json!("ab"));
    }

    #[tokio::test]
    async fn reports_which_step_failed() {
        let sequence = SequentialAgent::new("pipeline", vec![Arc::new(Append("a")), Arc::new(AlwaysFails)]).unwrap();
        let err = sequence.process(Message::new("user", json!(""))).await.unwrap_err();
        assert!(err.message().contains("step 2"));
        assert!(err.message().contains("fails"));
    }

    #[test]
    fn rejects_empty_agent_list() {
        assert!(SequentialAgent::new("pipeline", vec![]).is_err());
    }
}

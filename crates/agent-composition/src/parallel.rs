//! Dispatches the same message to every sub-agent concurrently.

use std::sync::Arc;

use agent_core::{Agent, AgentError, Message, ProtocolError};
use async_trait::async_trait;
use serde_json::json;

struct AgentOutcome {
    agent_name: String,
    message: Option<Message>,
    error: Option<AgentError>,
}

/// Combines the per-agent outcomes of a parallel call into one message.
/// Given `Box<dyn Fn>` rather than a generic so `ParallelAgent` stays
/// object-safe and storable behind `Arc<dyn Agent>` like every other
/// composition pattern.
pub type Aggregator = Box<dyn Fn(&[(String, Message)]) -> Message + Send + Sync>;

pub struct ParallelAgent {
    name: String,
    agents: Vec<Arc<dyn Agent>>,
    aggregator: Option<Aggregator>,
}

impl ParallelAgent {
    pub fn new(name: impl Into<String>, agents: Vec<Arc<dyn Agent>>) -> Result<Self, ProtocolError> {
        if agents.is_empty() {
            return Err(ProtocolError::invalid_message(
                "parallel composition requires at least one agent",
            ));
        }
        Ok(Self {
            name: name.into(),
            agents,
            aggregator: None,
        })
    }

    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    fn default_aggregate(&self, results: &[(String, Message)]) -> Message {
        let mut first = results[0].1.clone();
        let mut parallel_results = serde_json::Map::new();
        for (agent_name, message) in results {
            parallel_results.insert(agent_name.clone(), json!(message));
        }
        first.metadata.insert("parallel_results".to_string(), json!(parallel_results));
        first
    }
}

#[async_trait]
impl Agent for ParallelAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: Message) -> Result<Message, AgentError> {
        let futures = self.agents.iter().map(|agent| {
            let message = message.clone();
            async move {
                let name = agent.name().to_string();
                match agent.process(message).await {
                    Ok(msg) => AgentOutcome {
                        agent_name: name,
                        message: Some(msg),
                        error: None,
                    },
                    Err(e) => AgentOutcome {
                        agent_name: name,
                        message: None,
                        error: Some(e),
                    },
                }
            }
        });
        let outcomes = futures_util::future::join_all(futures).await;

        let errors: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.error.as_ref().map(|e| format!("{}: {e}", o.agent_name)))
            .collect();
        if !errors.is_empty() {
            return Err(ProtocolError::internal(format!(
                "parallel execution had errors: {}",
                errors.join("; ")
            ))
            .into());
        }

        let results: Vec<(String, Message)> = outcomes
            .into_iter()
            .map(|o| (o.agent_name, o.message.expect("checked above: no errors")))
            .collect();

        Ok(match &self.aggregator {
            Some(aggregate) => aggregate(&results),
            None => self.default_aggregate(&results),
        })
    }

    fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = self
            .agents
            .iter()
            .flat_map(|a| a.capabilities())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        caps.push("parallel".to_string());
        caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl Agent for Echo {
        fn name(&self) -> &str {
            self.0
        }
        async fn process(&self, message: Message) -> Result<Message, AgentError> {
            Ok(Message::new("agent", message.content))
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
    async fn default_aggregate_tags_all_results_in_metadata() {
        let parallel = ParallelAgent::new("fanout", vec![Arc::new(Echo("a")), Arc::new(Echo("b"))]).unwrap();
        let result = parallel.process(Message::new("user", json!("hi"))).await.unwrap();
        let tagged = result.metadata.get("parallel_results").unwrap();
        assert!(tagged.get("a").is_some());
        assert!(tagged.get("b").is_some());
    }

    #[tokio::test]
    async fn any_failure_fails_the_whole_call() {
        let parallel = ParallelAgent::new("fanout", vec![Arc::new(Echo("a")), Arc::new(AlwaysFails)]).unwrap();
        let err = parallel.process(Message::new("user", json!("hi"))).await.unwrap_err();
        assert!(err.message().contains("fails"));
    }
}

//! Routes a message to the first agent whose predicate matches, falling
//! back to a default agent when none do.

use std::sync::Arc;

use agent_core::{Agent, AgentError, Message};
use async_trait::async_trait;
use serde_json::json;

pub type Condition = Box<dyn Fn(&Message) -> bool + Send + Sync>;

struct Route {
    condition: Condition,
    agent: Arc<dyn Agent>,
}

pub struct ConditionalAgent {
    name: String,
    routes: Vec<Route>,
    default_agent: Arc<dyn Agent>,
}

impl ConditionalAgent {
    pub fn new(name: impl Into<String>, default_agent: Arc<dyn Agent>) -> Self {
        Self {
            name: name.into(),
            routes: Vec::new(),
            default_agent,
        }
    }

    pub fn add_route(mut self, condition: Condition, agent: Arc<dyn Agent>) -> Self {
        self.routes.push(Route { condition, agent });
        self
    }
}

#[async_trait]
impl Agent for ConditionalAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: Message) -> Result<Message, AgentError> {
        for (i, route) in self.routes.iter().enumerate() {
            if (route.condition)(&message) {
                let mut result = route.agent.process(message).await.map_err(|e| {
                    agent_core::ProtocolError::internal(format!(
                        "route {} ({}) failed: {e}",
                        i + 1,
                        route.agent.name()
                    ))
                })?;
                result
                    .metadata
                    .insert("conditional_agent_used".to_string(), json!(route.agent.name()));
                result
                    .metadata
                    .insert("conditional_route".to_string(), json!(i + 1));
                return Ok(result);
            }
        }

        let mut result = self.default_agent.process(message).await.map_err(|e| {
            agent_core::ProtocolError::internal(format!(
                "default agent ({}) failed: {e}",
                self.default_agent.name()
            ))
        })?;
        result.metadata.insert(
            "conditional_agent_used".to_string(),
            json!(self.default_agent.name()),
        );
        result
            .metadata
            .insert("conditional_route".to_string(), json!("default"));
        Ok(result)
    }

    fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = self
            .routes
            .iter()
            .flat_map(|r| r.agent.capabilities())
            .chain(self.default_agent.capabilities())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        caps.push("conditional".to_string());
        caps
    }
}

pub fn role_equals(role: impl Into<String>) -> Condition {
    let role = role.into();
    Box::new(move |message: &Message| message.role == role)
}

pub fn content_contains(substr: impl Into<String>) -> Condition {
    let substr = substr.into();
    Box::new(move |message: &Message| {
        message
            .content
            .as_str()
            .map(|s| s.contains(&substr))
            .unwrap_or(false)
    })
}

pub fn metadata_has_key(key: impl Into<String>) -> Condition {
    let key = key.into();
    Box::new(move |message: &Message| message.metadata.contains_key(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Tag(&'static str);

    #[async_trait]
    impl Agent for Tag {
        fn name(&self) -> &str {
            self.0
        }
        async fn process(&self, message: Message) -> Result<Message, AgentError> {
            Ok(Message::new(self.0, message.content))
        }
    }

    #[tokio::test]
    async fn routes_to_the_first_matching_condition() {
        let router = ConditionalAgent::new("router", Arc::new(Tag("default")))
            .add_route(role_equals("admin"), Arc::new(Tag("admin_handler")));

        let result = router
            .process(Message::new("admin", json!("hi")))
            .await
            .unwrap();
        assert_eq!(result.metadata["conditional_agent_used"], json!("admin_handler"));
        assert_eq!(result.metadata["conditional_route"], json!(1));
    }

    #[tokio::test]
    async fn falls_back_to_default_when_nothing_matches() {
        let router = ConditionalAgent::new("router", Arc::new(Tag("default")))
            .add_route(role_equals("admin"), Arc::new(Tag("admin_handler")));

        let result = router.process(Message::new("user", json!("hi"))).await.unwrap();
        assert_eq!(result.metadata["conditional_agent_used"], json!("default"));
        assert_eq!(result.metadata["conditional_route"], json!("default"));
    }
}

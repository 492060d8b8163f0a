//! In-memory agent registry: name -> endpoint/capability bookkeeping with a
//! background task pruning entries whose heartbeat has gone stale.
//!
//! Nothing here is persisted; a restart starts from an empty registry and
//! expects every agent to re-register.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agent_core::{ProtocolError, ProtocolErrorCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(90);
const PRUNE_LOOP_INTERVAL: Duration = Duration::from_secs(60);

/// A registered agent's last-known endpoint and liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentRegistration {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            capabilities: Vec::new(),
            metadata: HashMap::new(),
            registered_at: now,
            last_heartbeat: now,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

struct Inner {
    agents: Mutex<HashMap<String, AgentRegistration>>,
    heartbeat_timeout: Duration,
    prune_task: Mutex<Option<JoinHandle<()>>>,
}

/// Shared, cloneable handle to the registry; background tasks and request
/// handlers all hold the same `Arc<Inner>`.
#[derive(Clone)]
pub struct AgentRegistry {
    inner: Arc<Inner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::with_heartbeat_timeout(DEFAULT_HEARTBEAT_TIMEOUT)
    }

    pub fn with_heartbeat_timeout(heartbeat_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                agents: Mutex::new(HashMap::new()),
                heartbeat_timeout,
                prune_task: Mutex::new(None),
            }),
        }
    }

    /// Spawns the background task that prunes stale agents every 60s.
    /// Idempotent: calling `start` twice does not spawn a second task.
    pub async fn start(&self) {
        let mut task = self.inner.prune_task.lock().await;
        if task.is_some() {
            return;
        }
        let registry = self.clone();
        *task = Some(tokio::spawn(async move {
            registry.prune_loop().await;
        }));
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.inner.prune_task.lock().await.take() {
            handle.abort();
        }
    }

    async fn prune_loop(&self) {
        loop {
            sleep(PRUNE_LOOP_INTERVAL).await;
            let pruned = self.prune_stale_agents().await;
            if pruned > 0 {
                info!(pruned, "pruned stale agents");
            }
        }
    }

    pub async fn register(&self, registration: AgentRegistration) -> Result<(), ProtocolError> {
        if registration.name.trim().is_empty() {
            return Err(ProtocolError::registration_failed(
                "agent name must not be empty",
            ));
        }
        let mut agents = self.inner.agents.lock().await;
        if agents.contains_key(&registration.name) {
            debug!(agent = %registration.name, "re-registering agent");
        } else {
            debug!(agent = %registration.name, "registering new agent");
        }
        agents.insert(registration.name.clone(), registration);
        Ok(())
    }

    pub async fn unregister(&self, name: &str) {
        let mut agents = self.inner.agents.lock().await;
        if agents.remove(name).is_none() {
            warn!(agent = %name, "unregister called for unknown agent");
        }
    }

    pub async fn lookup(&self, name: &str) -> Option<AgentRegistration> {
        self.inner.agents.lock().await.get(name).cloned()
    }

    pub async fn list_agents(&self) -> Vec<AgentRegistration> {
        self.inner.agents.lock().await.values().cloned().collect()
    }

    pub async fn heartbeat(&self, name: &str) -> Result<(), ProtocolError> {
        let mut agents = self.inner.agents.lock().await;
        let registration = agents
            .get_mut(name)
            .ok_or_else(|| ProtocolError::agent_not_found(name))?;
        registration.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Removes agents whose last heartbeat is older than the configured
    /// timeout and returns how many were pruned.
    pub async fn prune_stale_agents(&self) -> usize {
        let now = Utc::now();
        let mut agents = self.inner.agents.lock().await;
        let stale: Vec<String> = agents
            .iter()
            .filter(|(_, reg)| {
                now.signed_duration_since(reg.last_heartbeat)
                    .to_std()
                    .map(|elapsed| elapsed > self.inner.heartbeat_timeout)
                    .unwrap_or(false)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            agents.remove(name);
        }
        stale.len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically sends heartbeats for `agent_name` until the registry no
/// longer recognizes it, at which point it stops retrying permanently
/// (matching the one-way lifecycle of an agent process that deregistered).
pub async fn heartbeat_loop(registry: AgentRegistry, agent_name: String) {
    heartbeat_loop_with_interval(registry, agent_name, DEFAULT_HEARTBEAT_INTERVAL).await;
}

pub async fn heartbeat_loop_with_interval(
    registry: AgentRegistry,
    agent_name: String,
    interval: Duration,
) {
    loop {
        match registry.heartbeat(&agent_name).await {
            Ok(()) => sleep(interval).await,
            Err(e) if e.code == ProtocolErrorCode::AgentNotFound => {
                warn!(agent = %agent_name, "heartbeat target no longer registered, stopping");
                return;
            }
            Err(e) => {
                warn!(agent = %agent_name, error = %e, "heartbeat failed, retrying in 5s");
                sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_lookup_round_trips() {
        let registry = AgentRegistry::new();
        registry
            .register(AgentRegistration::new("summarizer", "tcp://localhost:9000"))
            .await
            .unwrap();

        let found = registry.lookup("summarizer").await.unwrap();
        assert_eq!(found.endpoint, "tcp://localhost:9000");
    }

    #[tokio::test]
    async fn register_rejects_empty_name() {
        let registry = AgentRegistry::new();
        let err = registry
            .register(AgentRegistration::new("", "tcp://localhost:9000"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ProtocolErrorCode::RegistrationFailed);
    }

    #[tokio::test]
    async fn heartbeat_on_unknown_agent_is_agent_not_found() {
        let registry = AgentRegistry::new();
        let err = registry.heartbeat("ghost").await.unwrap_err();
        assert_eq!(err.code, ProtocolErrorCode::AgentNotFound);
    }

    #[tokio::test]
    async fn prune_removes_agents_past_the_timeout() {
        let registry = AgentRegistry::with_heartbeat_timeout(Duration::from_millis(10));
        registry
            .register(AgentRegistration::new("summarizer", "tcp://localhost:9000"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let pruned = registry.prune_stale_agents().await;
        assert_eq!(pruned, 1);
        assert!(registry.lookup("summarizer").await.is_none());
    }

    #[tokio::test]
    async fn unregister_removes_agent() {
        let registry = AgentRegistry::new();
        registry
            .register(AgentRegistration::new("summarizer", "tcp://localhost:9000"))
            .await
            .unwrap();
        registry.unregister("summarizer").await;
        assert!(registry.lookup("summarizer").await.is_none());
    }

    #[tokio::test]
    async fn list_agents_returns_all_registrations() {
        let registry = AgentRegistry::new();
        registry
            .register(AgentRegistration::new("a", "tcp://localhost:9000"))
            .await
            .unwrap();
        registry
            .register(AgentRegistration::new("b", "tcp://localhost:9001"))
            .await
            .unwrap();
        assert_eq!(registry.list_agents().await.len(), 2);
    }
}

//! Three-state circuit breaker: CLOSED -> OPEN -> HALF_OPEN -> CLOSED.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use agent_core::{Agent, AgentError, Message, ProtocolError};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn label(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout: Duration,
    pub call_timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(
        failure_threshold: u32,
        success_threshold: u32,
        recovery_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        if failure_threshold == 0 {
            return Err(ProtocolError::invalid_message("failure_threshold must be >= 1"));
        }
        if success_threshold == 0 {
            return Err(ProtocolError::invalid_message("success_threshold must be >= 1"));
        }
        Ok(Self {
            failure_threshold,
            success_threshold,
            recovery_timeout,
            call_timeout,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub state_changes: HashMap<String, u64>,
    pub current_state: Option<CircuitState>,
}

struct Breaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

pub struct CircuitBreakerDecorator {
    inner: Arc<dyn Agent>,
    config: CircuitBreakerConfig,
    breaker: Mutex<Breaker>,
    metrics: Mutex<CircuitBreakerMetrics>,
}

impl CircuitBreakerDecorator {
    pub fn new(inner: Arc<dyn Agent>, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            config,
            breaker: Mutex::new(Breaker {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
            metrics: Mutex::new(CircuitBreakerMetrics {
                current_state: Some(CircuitState::Closed),
                ..Default::default()
            }),
        }
    }

    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn state(&self) -> CircuitState {
        self.breaker.lock().await.state
    }

    async fn change_state(&self, breaker: &mut Breaker, to: CircuitState) {
        let from = breaker.state;
        if from == to {
            return;
        }
        breaker.state = to;
        let mut metrics = self.metrics.lock().await;
        *metrics
            .state_changes
            .entry(format!("{}->{}", from.label(), to.label()))
            .or_insert(0) += 1;
        metrics.current_state = Some(to);
    }

    /// Checks current circuit state and decides whether the call may
    /// proceed, returning `Err(CIRCUIT_OPEN)` if not.
    async fn admit(&self) -> Result<(), ProtocolError> {
        self.metrics.lock().await.total_requests += 1;
        let mut breaker = self.breaker.lock().await;

        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let should_attempt_reset = breaker
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(false);
                if should_attempt_reset {
                    breaker.success_count = 0;
                    self.change_state(&mut breaker, CircuitState::HalfOpen).await;
                    Ok(())
                } else {
                    self.metrics.lock().await.rejected_requests += 1;
                    Err(ProtocolError::circuit_open(self.inner.name()))
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut breaker = self.breaker.lock().await;
        match breaker.state {
            CircuitState::Closed => {
                breaker.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                breaker.success_count += 1;
                if breaker.success_count >= self.config.success_threshold {
                    breaker.failure_count = 0;
                    self.change_state(&mut breaker, CircuitState::Closed).await;
                }
            }
            CircuitState::Open => {}
        }
        self.metrics.lock().await.successful_requests += 1;
    }

    async fn on_failure(&self) {
        let mut breaker = self.breaker.lock().await;
        breaker.last_failure_time = Some(Instant::now());
        match breaker.state {
            CircuitState::Closed => {
                breaker.failure_count += 1;
                if breaker.failure_count >= self.config.failure_threshold {
                    self.change_state(&mut breaker, CircuitState::Open).await;
                }
            }
            CircuitState::HalfOpen => {
                self.change_state(&mut breaker, CircuitState::Open).await;
            }
            CircuitState::Open => {}
        }
        self.metrics.lock().await.failed_requests += 1;
    }

    async fn call(&self, message: Message) -> Result<Message, AgentError> {
        self.admit().await?;

        let result = timeout(self.config.call_timeout, self.inner.process(message)).await;
        match result {
            Ok(Ok(response)) => {
                self.on_success().await;
                Ok(response)
            }
            Ok(Err(e)) => {
                self.on_failure().await;
                Err(e)
            }
            Err(_) => {
                self.on_failure().await;
                Err(ProtocolError::agent_timeout(
                    self.inner.name(),
                    self.config.call_timeout.as_secs_f64(),
                )
                .into())
            }
        }
    }
}

#[async_trait]
impl Agent for CircuitBreakerDecorator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, message: Message) -> Result<Message, AgentError> {
        self.call(message).await
    }

    fn capabilities(&self) -> Vec<String> {
        self.inner.capabilities()
    }
}

//! Circuit-breaker-aware retry: retries transient connection/timeout
//! failures with exponential backoff, but never retries a call the circuit
//! breaker has already rejected — an open circuit needs its recovery
//! timeout to pass, not more traffic.

use std::sync::Arc;

use agent_core::{Agent, AgentError, Message, MessageStream, ProtocolError, ProtocolErrorCode};
use async_trait::async_trait;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, ProtocolError> {
        if max_attempts == 0 {
            return Err(ProtocolError::invalid_message("max_attempts must be >= 1"));
        }
        if backoff_multiplier < 1.0 {
            return Err(ProtocolError::invalid_message(
                "backoff_multiplier must be >= 1.0",
            ));
        }
        Ok(Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryMetrics {
    pub total_requests: u64,
    pub total_attempts: u64,
    pub successful_requests: u64,
    pub exhausted_requests: u64,
}

fn is_retryable(error: &AgentError) -> bool {
    match error {
        AgentError::Protocol(e) => matches!(
            e.code,
            ProtocolErrorCode::ConnectionFailed
                | ProtocolErrorCode::ConnectionTimeout
                | ProtocolErrorCode::ConnectionClosed
                | ProtocolErrorCode::AgentTimeout
                | ProtocolErrorCode::AgentUnavailable
        ),
        AgentError::RemoteExecution(_) => false,
    }
}

pub struct RetryDecorator {
    inner: Arc<dyn Agent>,
    config: RetryConfig,
    metrics: tokio::sync::Mutex<RetryMetrics>,
}

impl RetryDecorator {
    pub fn new(inner: Arc<dyn Agent>, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            metrics: tokio::sync::Mutex::new(RetryMetrics::default()),
        }
    }

    pub async fn metrics(&self) -> RetryMetrics {
        self.metrics.lock().await.clone()
    }

    async fn call(&self, message: Message) -> Result<Message, AgentError> {
        self.metrics.lock().await.total_requests += 1;
        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 1..=self.config.max_attempts {
            self.metrics.lock().await.total_attempts += 1;
            match self.inner.process(message.clone()).await {
                Ok(response) => {
                    self.metrics.lock().await.successful_requests += 1;
                    return Ok(response);
                }
                Err(e) if e.code() == ProtocolErrorCode::CircuitOpen => {
                    // The breaker already said no; retrying only hammers it.
                    return Err(e);
                }
                Err(e) if is_retryable(&e) && attempt < self.config.max_attempts => {
                    last_error = Some(e);
                    sleep(backoff).await;
                    backoff = backoff
                        .mul_f64(self.config.backoff_multiplier)
                        .min(self.config.max_backoff);
                }
                Err(e) => {
                    self.metrics.lock().await.exhausted_requests += 1;
                    return Err(e);
                }
            }
        }

        self.metrics.lock().await.exhausted_requests += 1;
        Err(last_error.unwrap_or_else(|| ProtocolError::internal("retry loop exited without a result").into()))
    }
}

#[async_trait]
impl Agent for RetryDecorator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, message: Message) -> Result<Message, AgentError> {
        self.call(message).await
    }

    async fn stream(&self, message: Message) -> MessageStream {
        let result = self.call(message).await;
        Box::pin(futures_util::stream::once(async move { result }))
    }

    fn capabilities(&self) -> Vec<String> {
        self.inner.capabilities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAgent {
        fail_next: AtomicU32,
        code: ProtocolErrorCode,
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn process(&self, message: Message) -> Result<Message, AgentError> {
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(ProtocolError::new(self.code, "transient").into());
            }
            Ok(message)
        }
    }

    fn config() -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(10), 2.0).unwrap()
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let agent = Arc::new(FlakyAgent {
            fail_next: AtomicU32::new(2),
            code: ProtocolErrorCode::ConnectionFailed,
        });
        let retry = RetryDecorator::new(agent, config());
        let result = retry.process(Message::new("u", json!("x"))).await;
        assert!(result.is_ok());
        assert_eq!(retry.metrics().await.total_attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let agent = Arc::new(FlakyAgent {
            fail_next: AtomicU32::new(10),
            code: ProtocolErrorCode::AgentTimeout,
        });
        let retry = RetryDecorator::new(agent, config());
        let err = retry.process(Message::new("u", json!("x"))).await.unwrap_err();
        assert_eq!(err.code(), ProtocolErrorCode::AgentTimeout);
        assert_eq!(retry.metrics().await.exhausted_requests, 1);
    }

    #[tokio::test]
    async fn never_retries_a_circuit_open_error() {
        let agent = Arc::new(FlakyAgent {
            fail_next: AtomicU32::new(10),
            code: ProtocolErrorCode::CircuitOpen,
        });
        let retry = RetryDecorator::new(agent, config());
        retry.process(Message::new("u", json!("x"))).await.unwrap_err();
        assert_eq!(retry.metrics().await.total_attempts, 1);
    }

    #[tokio::test]
    async fn does_not_retry_remote_execution_errors() {
        struct AlwaysFails;
        #[async_trait]
        impl Agent for AlwaysFails {
            fn name(&self) -> &str {
                "fails"
            }
            async fn process(&self, _message: Message) -> Result<Message, AgentError> {
                Err(agent_core::RemoteExecutionError::new("fails", "boom").into())
            }
        }
        let retry = RetryDecorator::new(Arc::new(AlwaysFails), config());
        retry.process(Message::new("u", json!("x"))).await.unwrap_err();
        assert_eq!(retry.metrics().await.total_attempts, 1);
    }
}

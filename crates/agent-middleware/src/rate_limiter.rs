//! Token-bucket rate limiter, wrapping any [`Agent`] with an admission check.

use std::sync::Arc;
use std::time::Instant;

use agent_core::{Agent, AgentError, Message, MessageStream, ProtocolError};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Tokens regenerated per second.
    pub rate: f64,
    /// Maximum tokens the bucket can hold (burst size).
    pub capacity: f64,
    /// Tokens consumed per admitted request.
    pub tokens_per_request: f64,
    /// If false, requests that can't be admitted immediately fail fast with
    /// `RATE_LIMITED` instead of waiting for tokens to refill.
    pub wait_for_tokens: bool,
}

impl RateLimiterConfig {
    pub fn new(rate: f64, capacity: f64, tokens_per_request: f64) -> Result<Self, ProtocolError> {
        if rate <= 0.0 {
            return Err(ProtocolError::invalid_message("rate must be > 0"));
        }
        if capacity < 1.0 {
            return Err(ProtocolError::invalid_message("capacity must be >= 1"));
        }
        if tokens_per_request < 1.0 || tokens_per_request > capacity {
            return Err(ProtocolError::invalid_message(
                "tokens_per_request must be >= 1 and <= capacity",
            ));
        }
        Ok(Self {
            rate,
            capacity,
            tokens_per_request,
            wait_for_tokens: true,
        })
    }

    pub fn fail_fast(mut self) -> Self {
        self.wait_for_tokens = false;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RateLimiterMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub rejected_requests: u64,
    pub total_wait_time: Duration,
    pub current_tokens: f64,
}

struct BucketState {
    tokens: f64,
    last_update: Instant,
}

pub struct RateLimiterDecorator {
    inner: Arc<dyn Agent>,
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
    metrics: Mutex<RateLimiterMetrics>,
}

impl RateLimiterDecorator {
    pub fn new(inner: Arc<dyn Agent>, config: RateLimiterConfig) -> Self {
        let capacity = config.capacity;
        Self {
            inner,
            config,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_update: Instant::now(),
            }),
            metrics: Mutex::new(RateLimiterMetrics {
                current_tokens: capacity,
                ..Default::default()
            }),
        }
    }

    pub async fn metrics(&self) -> RateLimiterMetrics {
        self.metrics.lock().await.clone()
    }

    fn refill(state: &mut BucketState, config: &RateLimiterConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update).as_secs_f64();
        state.tokens = (state.tokens + elapsed * config.rate).min(config.capacity);
        state.last_update = now;
    }

    async fn acquire(&self) -> Result<(), ProtocolError> {
        {
            let mut metrics = self.metrics.lock().await;
            metrics.total_requests += 1;
        }

        let mut state = self.state.lock().await;
        Self::refill(&mut state, &self.config);

        if state.tokens >= self.config.tokens_per_request {
            state.tokens -= self.config.tokens_per_request;
            self.metrics.lock().await.allowed_requests += 1;
            self.metrics.lock().await.current_tokens = state.tokens;
            return Ok(());
        }

        if !self.config.wait_for_tokens {
            drop(state);
            self.metrics.lock().await.rejected_requests += 1;
            return Err(ProtocolError::rate_limited("rate limit exceeded"));
        }

        let wait_secs = (self.config.tokens_per_request - state.tokens) / self.config.rate;
        drop(state);
        sleep(Duration::from_secs_f64(wait_secs.max(0.0))).await;

        let mut state = self.state.lock().await;
        Self::refill(&mut state, &self.config);
        state.tokens = (state.tokens - self.config.tokens_per_request).max(0.0);

        let mut metrics = self.metrics.lock().await;
        metrics.allowed_requests += 1;
        metrics.total_wait_time += Duration::from_secs_f64(wait_secs.max(0.0));
        metrics.current_tokens = state.tokens;
        Ok(())
    }
}

#[async_trait]
impl Agent for RateLimiterDecorator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, message: Message) -> Result<Message, AgentError> {
        self.acquire().await?;
        self.inner.process(message).await
    }

    async fn stream(&self, message: Message) -> MessageStream {
        if let Err(e) = self.acquire().await {
            let err: AgentError = e.into();
            return Box::pin(futures_util::stream::once(async move { Err(err) }));
        }
        self.inner.stream(message).await
    }

    fn capabilities(&self) -> Vec<String> {
        self.inner.capabilities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::ProtocolErrorCode;
    use futures_util::StreamExt;
    use serde_json::json;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }
        async fn process(&self, message: Message) -> Result<Message, AgentError> {
            Ok(message)
        }
    }

    #[tokio::test]
    async fn admits_requests_within_burst_capacity() {
        let limiter = RateLimiterDecorator::new(
            Arc::new(EchoAgent),
            RateLimiterConfig::new(1.0, 3.0, 1.0).unwrap(),
        );
        for _ in 0..3 {
            limiter.process(Message::new("user", json!("hi"))).await.unwrap();
        }
        let metrics = limiter.metrics().await;
        assert_eq!(metrics.allowed_requests, 3);
        assert_eq!(metrics.rejected_requests, 0);
    }

    #[tokio::test]
    async fn fail_fast_mode_rejects_once_bucket_is_empty() {
        let limiter = RateLimiterDecorator::new(
            Arc::new(EchoAgent),
            RateLimiterConfig::new(0.001, 1.0, 1.0).unwrap().fail_fast(),
        );
        limiter.process(Message::new("user", json!("hi"))).await.unwrap();
        let err = limiter
            .process(Message::new("user", json!("hi")))
            .await
            .unwrap_err();
        match err {
            AgentError::Protocol(e) => assert_eq!(e.code, ProtocolErrorCode::RateLimited),
            _ => panic!("expected protocol error"),
        }
    }

    #[tokio::test]
    async fn config_rejects_non_positive_rate() {
        assert!(RateLimiterConfig::new(0.0, 1.0, 1.0).is_err());
    }

    #[tokio::test]
    async fn stream_is_gated_like_process() {
        let limiter = RateLimiterDecorator::new(
            Arc::new(EchoAgent),
            RateLimiterConfig::new(0.001, 1.0, 1.0).unwrap().fail_fast(),
        );
        let mut stream = limiter.stream(Message::new("user", json!("hi"))).await;
        assert!(stream.next().await.unwrap().is_ok());
        let mut second = limiter.stream(Message::new("user", json!("hi"))).await;
        assert!(second.next().await.unwrap().is_err());
    }
}

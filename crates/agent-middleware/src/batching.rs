//! Request batching: collects concurrent calls into batches dispatched to
//! the wrapped agent together, trading a little latency for throughput.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agent_core::{Agent, AgentError, Message, ProtocolError};
use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{timeout, Duration, Instant};

#[derive(Debug, Clone)]
pub struct BatchingConfig {
    pub max_batch_size: usize,
    pub max_wait_time: Duration,
    pub max_queue_size: usize,
}

impl BatchingConfig {
    pub fn new(
        max_batch_size: usize,
        max_wait_time: Duration,
        max_queue_size: usize,
    ) -> Result<Self, ProtocolError> {
        if max_batch_size == 0 {
            return Err(ProtocolError::invalid_message("max_batch_size must be >= 1"));
        }
        if max_queue_size < max_batch_size {
            return Err(ProtocolError::invalid_message(
                "max_queue_size must be >= max_batch_size",
            ));
        }
        Ok(Self {
            max_batch_size,
            max_wait_time,
            max_queue_size,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchingMetrics {
    pub total_requests: u64,
    pub total_batches: u64,
    pub successful_batches: u64,
    pub failed_batches: u64,
    pub partial_batches: u64,
    pub min_batch_size: Option<usize>,
    pub max_batch_size: Option<usize>,
    pub total_wait_time: Duration,
}

impl BatchingMetrics {
    pub fn avg_batch_size(&self) -> f64 {
        if self.total_batches == 0 {
            0.0
        } else {
            self.total_requests as f64 / self.total_batches as f64
        }
    }

    pub fn avg_wait_time(&self) -> Duration {
        if self.total_requests == 0 {
            Duration::ZERO
        } else {
            self.total_wait_time / self.total_requests as u32
        }
    }
}

struct BatchRequest {
    message: Message,
    respond: oneshot::Sender<Result<Message, AgentError>>,
    enqueued_at: Instant,
}

const FIRST_ITEM_POLL: Duration = Duration::from_millis(100);
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct BatchingDecorator {
    inner: Arc<dyn Agent>,
    config: BatchingConfig,
    tx: mpsc::Sender<BatchRequest>,
    rx: Mutex<Option<mpsc::Receiver<BatchRequest>>>,
    processor: Mutex<Option<tokio::task::JoinHandle<()>>>,
    started: AtomicBool,
    metrics: Arc<Mutex<BatchingMetrics>>,
}

impl BatchingDecorator {
    pub fn new(inner: Arc<dyn Agent>, config: BatchingConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.max_queue_size);
        Self {
            inner,
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            processor: Mutex::new(None),
            started: AtomicBool::new(false),
            metrics: Arc::new(Mutex::new(BatchingMetrics::default())),
        }
    }

    pub async fn metrics(&self) -> BatchingMetrics {
        self.metrics.lock().await.clone()
    }

    async fn ensure_started(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let rx = self
            .rx
            .lock()
            .await
            .take()
            .expect("processor started exactly once");
        let inner = self.inner.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();
        let handle = tokio::spawn(async move {
            run_processor(rx, inner, config, metrics).await;
        });
        *self.processor.lock().await = Some(handle);
    }

    /// Stops accepting new work and waits for the processor task to drain
    /// whatever is already queued.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.processor.lock().await.take() {
            handle.abort();
        }
    }
}

async fn run_processor(
    mut rx: mpsc::Receiver<BatchRequest>,
    inner: Arc<dyn Agent>,
    config: BatchingConfig,
    metrics: Arc<Mutex<BatchingMetrics>>,
) {
    loop {
        let Some(first) = rx.recv().await else {
            return;
        };
        let mut batch = vec![first];
        let deadline = batch[0].enqueued_at + config.max_wait_time;

        while batch.len() < config.max_batch_size {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match timeout(deadline - now, rx.recv()).await {
                Ok(Some(request)) => batch.push(request),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        process_batch(batch, &inner, &metrics).await;
    }
}

async fn process_batch(
    batch: Vec<BatchRequest>,
    inner: &Arc<dyn Agent>,
    metrics: &Arc<Mutex<BatchingMetrics>>,
) {
    let batch_size = batch.len();
    let now = Instant::now();
    let mut wait_sum = Duration::ZERO;
    let (messages, responders): (Vec<Message>, Vec<_>) = batch
        .into_iter()
        .map(|r| {
            wait_sum += now.saturating_duration_since(r.enqueued_at);
            (r.message, r.respond)
        })
        .unzip();

    let futures = messages.into_iter().map(|m| inner.process(m));
    let results = join_all(futures).await;

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for (responder, result) in responders.into_iter().zip(results.into_iter()) {
        if result.is_ok() {
            succeeded += 1;
        } else {
            failed += 1;
        }
        let _ = responder.send(result);
    }

    let mut metrics = metrics.lock().await;
    metrics.total_requests += batch_size as u64;
    metrics.total_batches += 1;
    metrics.total_wait_time += wait_sum;
    metrics.min_batch_size = Some(metrics.min_batch_size.map_or(batch_size, |m| m.min(batch_size)));
    metrics.max_batch_size = Some(metrics.max_batch_size.map_or(batch_size, |m| m.max(batch_size)));
    if failed == 0 {
        metrics.successful_batches += 1;
    } else if succeeded == 0 {
        metrics.failed_batches += 1;
    } else {
        metrics.partial_batches += 1;
    }
}

#[async_trait]
impl Agent for BatchingDecorator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, message: Message) -> Result<Message, AgentError> {
        self.ensure_started().await;

        let (respond, receive) = oneshot::channel();
        let request = BatchRequest {
            message,
            respond,
            enqueued_at: Instant::now(),
        };

        match timeout(ENQUEUE_TIMEOUT, self.tx.send(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(ProtocolError::agent_unavailable(self.inner.name()).into());
            }
            Err(_) => {
                return Err(ProtocolError::agent_unavailable(format!(
                    "{}: batching queue is full",
                    self.inner.name()
                ))
                .into());
            }
        }

        receive
            .await
            .map_err(|_| ProtocolError::internal("batch processor dropped the response channel").into())?
    }

    fn capabilities(&self) -> Vec<String> {
        self.inner.capabilities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    struct CountingAgent {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn name(&self) -> &str {
            "counter"
        }
        async fn process(&self, message: Message) -> Result<Message, AgentError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(message)
        }
    }

    #[tokio::test]
    async fn concurrent_requests_are_batched_together() {
        let agent = Arc::new(CountingAgent {
            calls: AtomicU32::new(0),
        });
        let batching = Arc::new(BatchingDecorator::new(
            agent.clone(),
            BatchingConfig::new(4, Duration::from_millis(50), 16).unwrap(),
        ));

        let mut handles = Vec::new();
        for i in 0..4 {
            let batching = batching.clone();
            handles.push(tokio::spawn(async move {
                batching
                    .process(Message::new("user", json!(i)))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let metrics = batching.metrics().await;
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.total_batches, 1);
    }

    #[tokio::test]
    async fn single_request_still_resolves_after_max_wait_time() {
        let agent = Arc::new(CountingAgent {
            calls: AtomicU32::new(0),
        });
        let batching = BatchingDecorator::new(
            agent,
            BatchingConfig::new(4, Duration::from_millis(20), 16).unwrap(),
        );
        let response = batching.process(Message::new("user", json!("solo"))).await.unwrap();
        assert_eq!(response.content, json!("solo"));
    }

    #[test]
    fn config_rejects_queue_smaller_than_batch_size() {
        assert!(BatchingConfig::new(8, Duration::from_millis(10), 4).is_err());
    }
}

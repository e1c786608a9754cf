//! Sinks and factories shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing_rusoto_appenders::{
    LogMessage, LogWriter, SinkAdapter, SinkContext, SinkError, SinkWriter, WriterConfig,
    WriterFactory, WriterHandle, WriterState,
};

#[derive(Debug, Default)]
pub struct Recorded {
    pub batches: Vec<Vec<LogMessage>>,
    pub times: Vec<tokio::time::Instant>,
    pub attempts: usize,
}

/// In-memory sink that records every delivered batch. Clones share the same
/// recording and switches.
#[derive(Clone)]
pub struct RecordingSink {
    pub recorded: Arc<Mutex<Recorded>>,
    pub fail_sends: Arc<AtomicBool>,
    pub fail_init: bool,
    pub panic_on_send: bool,
    pub max_count: usize,
    pub max_bytes: usize,
}

impl RecordingSink {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            recorded: Arc::default(),
            fail_sends: Arc::default(),
            fail_init: false,
            panic_on_send: false,
            max_count,
            max_bytes,
        }
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_send = true;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.recorded
            .lock()
            .batches
            .iter()
            .map(|batch| contents(batch))
            .collect()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn attempts(&self) -> usize {
        self.recorded.lock().attempts
    }

    /// When each delivered batch reached the sink.
    pub fn times(&self) -> Vec<tokio::time::Instant> {
        self.recorded.lock().times.clone()
    }
}

#[async_trait]
impl SinkAdapter for RecordingSink {
    fn destination(&self) -> String {
        "recording sink".to_string()
    }

    async fn create_client(&mut self, _ctx: &SinkContext) -> Result<(), SinkError> {
        Ok(())
    }

    async fn ensure_destination_available(&mut self, _ctx: &SinkContext) -> Result<(), SinkError> {
        if self.fail_init {
            return Err(SinkError::Service("destination rejected".to_string()));
        }
        Ok(())
    }

    async fn process_batch(
        &mut self,
        batch: Vec<LogMessage>,
        _ctx: &SinkContext,
    ) -> Vec<LogMessage> {
        self.recorded.lock().attempts += 1;
        if self.panic_on_send {
            panic!("boom");
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return batch;
        }
        let mut recorded = self.recorded.lock();
        recorded.batches.push(batch);
        recorded.times.push(tokio::time::Instant::now());
        Vec::new()
    }

    fn effective_size(&self, message: &LogMessage) -> usize {
        message.size()
    }

    fn within_service_limits(&self, batch_bytes: usize, message_count: usize) -> bool {
        batch_bytes < self.max_bytes && message_count <= self.max_count
    }

    fn max_message_size(&self) -> usize {
        self.max_bytes - 1
    }
}

/// Builds writers over clones of one [`RecordingSink`], counting them.
#[derive(Clone)]
pub struct RecordingFactory {
    pub sink: RecordingSink,
    pub created: Arc<AtomicUsize>,
}

impl RecordingFactory {
    pub fn new(sink: RecordingSink) -> Self {
        Self {
            sink,
            created: Arc::default(),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl WriterFactory<WriterConfig> for RecordingFactory {
    fn new_writer(&self, config: &WriterConfig) -> Box<dyn LogWriter> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(SinkWriter::new(self.sink.clone(), config))
    }
}

pub fn contents(messages: &[LogMessage]) -> Vec<String> {
    messages.iter().map(|m| m.content().to_string()).collect()
}

pub fn writer_config(batch_delay_ms: u64) -> WriterConfig {
    WriterConfig {
        batch_delay_ms,
        ..WriterConfig::default()
    }
}

/// Polls `condition` every 10ms of (usually paused) tokio time, giving up
/// after `limit`.
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub async fn wait_for_state(handle: &WriterHandle, state: WriterState) -> bool {
    eventually(Duration::from_secs(60), || handle.state() == state).await
}

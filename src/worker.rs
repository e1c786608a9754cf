use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WriterConfig;
use crate::error::{SinkError, WriterError};
use crate::log::{InternalLog, TracingLog};
use crate::message::{sort_by_timestamp, LogMessage};
use crate::provision::{Pacer, PollSchedule};
use crate::queue::{DiscardAction, MessageQueue};
use crate::sink::{split_batch, SinkAdapter, SinkContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Initializing,
    Running,
    Stopping,
    Stopped,
    Failed,
}

struct Shared {
    state: Mutex<WriterState>,
    last_error: Mutex<Option<WriterError>>,
    batch_delay_ms: AtomicU64,
    messages_sent: AtomicU64,
    max_message_size: usize,
}

/// Cloneable view of a running writer, held by producers and the owning
/// layer. Everything here is safe to call from any thread.
#[derive(Clone)]
pub struct WriterHandle {
    queue: Arc<MessageQueue>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl WriterHandle {
    fn new(config: &WriterConfig, max_message_size: usize) -> Self {
        Self {
            queue: Arc::new(MessageQueue::new(
                config.discard_threshold,
                config.discard_action,
            )),
            shared: Arc::new(Shared {
                state: Mutex::new(WriterState::Initializing),
                last_error: Mutex::new(None),
                batch_delay_ms: AtomicU64::new(config.batch_delay_ms),
                messages_sent: AtomicU64::new(0),
                max_message_size,
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Queues a message for delivery. Never blocks on the writer and never
    /// fails; a stopped or failed writer simply never sends it.
    pub fn add_message(&self, message: LogMessage) {
        self.queue.enqueue(message);
    }

    /// Asks the writer to flush what it can and stop.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Records a fatal error and moves the writer to [`WriterState::Failed`].
    pub fn fail(&self, error: WriterError) {
        *self.shared.state.lock() = WriterState::Failed;
        *self.shared.last_error.lock() = Some(error);
        self.shutdown.cancel();
    }

    pub fn state(&self) -> WriterState {
        *self.shared.state.lock()
    }

    pub fn last_error(&self) -> Option<WriterError> {
        self.shared.last_error.lock().clone()
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn messages_sent(&self) -> u64 {
        self.shared.messages_sent.load(Ordering::Relaxed)
    }

    pub fn max_message_size(&self) -> usize {
        self.shared.max_message_size
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.shared.batch_delay_ms.load(Ordering::Relaxed))
    }

    pub fn set_batch_delay(&self, batch_delay: Duration) {
        let millis = batch_delay.as_millis().min(u128::from(u64::MAX)) as u64;
        self.shared.batch_delay_ms.store(millis, Ordering::Relaxed);
    }

    pub fn set_discard_threshold(&self, discard_threshold: usize) {
        self.queue.set_discard_threshold(discard_threshold);
    }

    pub fn set_discard_action(&self, discard_action: DiscardAction) {
        self.queue.set_discard_action(discard_action);
    }

    fn set_state(&self, next: WriterState) {
        let mut state = self.shared.state.lock();
        if *state != WriterState::Failed {
            *state = next;
        }
    }
}

impl fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WriterHandle")
            .field("state", &self.state())
            .field("queue", &self.queue)
            .field("messages_sent", &self.messages_sent())
            .finish()
    }
}

/// A writer that a [`ThreadFactory`](crate::ThreadFactory) can run.
#[async_trait]
pub trait LogWriter: Send {
    fn handle(&self) -> WriterHandle;

    /// Runs the writer to completion. An `Err` means the writer failed.
    async fn run(self: Box<Self>) -> Result<(), WriterError>;
}

/// Builds writers for a configuration of type `C`.
pub trait WriterFactory<C>: Send + Sync {
    fn new_writer(&self, config: &C) -> Box<dyn LogWriter>;
}

/// The delivery engine: drains the queue, forms batches under the sink's
/// limits and hands them to the sink until stopped.
pub struct SinkWriter<S> {
    sink: S,
    handle: WriterHandle,
    ctx: SinkContext,
}

impl<S: SinkAdapter> SinkWriter<S> {
    pub fn new(sink: S, config: &WriterConfig) -> Self {
        let handle = WriterHandle::new(config, sink.max_message_size());
        let pacer = Pacer::new(PollSchedule::default(), handle.shutdown.clone());
        Self {
            sink,
            handle,
            ctx: SinkContext::new(pacer, Arc::new(TracingLog)),
        }
    }

    pub fn with_log(mut self, log: Arc<dyn InternalLog>) -> Self {
        self.ctx.log = log;
        self
    }

    pub fn with_poll_schedule(mut self, schedule: PollSchedule) -> Self {
        self.ctx.pacer = Pacer::new(schedule, self.handle.shutdown.clone());
        self
    }

    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    pub async fn run(mut self) -> Result<(), WriterError> {
        let result = self.run_until_stopped().await;
        match result {
            Err(WriterError::DestinationUnavailable(SinkError::Interrupted))
                if self.handle.shutdown.is_cancelled()
                    && self.handle.state() != WriterState::Failed =>
            {
                self.ctx.log.debug(&format!(
                    "writer for {} stopped during initialization",
                    self.sink.destination()
                ));
                self.handle.set_state(WriterState::Stopped);
                Ok(())
            }
            Err(err) => {
                self.ctx.log.error(
                    &format!("writer for {} failed", self.sink.destination()),
                    Some(&err),
                );
                self.handle.fail(err.clone());
                Err(err)
            }
            Ok(()) => Ok(()),
        }
    }

    async fn run_until_stopped(&mut self) -> Result<(), WriterError> {
        self.handle.set_state(WriterState::Initializing);
        self.sink
            .create_client(&self.ctx)
            .await
            .map_err(WriterError::ClientSetup)?;
        self.sink
            .ensure_destination_available(&self.ctx)
            .await
            .map_err(WriterError::DestinationUnavailable)?;

        self.handle.set_state(WriterState::Running);
        self.ctx.log.debug(&format!(
            "writer for {} is running",
            self.sink.destination()
        ));

        let shutdown = self.handle.shutdown.clone();
        let mut retry_pending = false;
        while !shutdown.is_cancelled() {
            let batch_delay = self.handle.batch_delay();
            if retry_pending && self.ctx.pacer.sleep(batch_delay).await.is_err() {
                break;
            }
            let ready = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                ready = self.gather(batch_delay, !retry_pending) => ready,
            };
            if ready {
                retry_pending = !self.send_batch().await;
            }
        }

        self.handle.set_state(WriterState::Stopping);
        self.flush().await;
        self.handle.set_state(WriterState::Stopped);
        self.ctx.log.debug(&format!(
            "writer for {} stopped with {} messages unsent",
            self.sink.destination(),
            self.handle.queue.len()
        ));
        Ok(())
    }

    /// Waits up to `batch_delay` for a first message. With `hold`, keeps
    /// gathering until the batch is full or `batch_delay` has passed since
    /// that first wake.
    async fn gather(&mut self, batch_delay: Duration, hold: bool) -> bool {
        let queue = Arc::clone(&self.handle.queue);
        if !queue.wait_for_messages(batch_delay).await {
            return false;
        }
        if hold {
            let deadline = Instant::now() + batch_delay;
            while !self.batch_full() && queue.wait_until(deadline).await {}
        }
        true
    }

    /// Whether the queued messages already fill a batch.
    fn batch_full(&self) -> bool {
        self.handle.queue.inspect(|messages| {
            let mut batch_bytes = 0;
            for (index, message) in messages.iter().enumerate() {
                batch_bytes += self.sink.effective_size(message);
                if !self.sink.within_service_limits(batch_bytes, index + 1) {
                    return true;
                }
            }
            !self
                .sink
                .within_service_limits(batch_bytes, messages.len() + 1)
        })
    }

    /// One send attempt over whatever is queued. Returns `false` if the sink
    /// failed and the batch went back on the queue.
    async fn send_batch(&mut self) -> bool {
        let drained = self.handle.queue.drain_all();
        let (sent, leftover) = self.send_from(drained).await;
        self.handle.queue.requeue(leftover);
        sent
    }

    /// Sends the first batch that fits out of `messages`. Returns whether the
    /// sink accepted it, plus everything still undelivered in queue order.
    async fn send_from(&mut self, messages: Vec<LogMessage>) -> (bool, Vec<LogMessage>) {
        let (mut batch, rest) = split_batch(&self.sink, messages);

        if batch.is_empty() {
            let mut rest = rest.into_iter();
            if let Some(oversized) = rest.next() {
                self.ctx.log.error(
                    &format!(
                        "discarding message of {} bytes: exceeds limits of {}",
                        oversized.size(),
                        self.sink.destination()
                    ),
                    None,
                );
            }
            return (true, rest.collect());
        }

        sort_by_timestamp(&mut batch);
        let count = batch.len();
        let mut unsent = self.sink.process_batch(batch, &self.ctx).await;
        let delivered = count.saturating_sub(unsent.len());
        self.handle
            .shared
            .messages_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);

        let sent = unsent.is_empty();
        unsent.extend(rest);
        (sent, unsent)
    }

    /// Best-effort delivery of what was queued when stopping began: one
    /// attempt per batch, giving up at the first failure. Later arrivals
    /// stay queued.
    async fn flush(&mut self) {
        let mut pending = self.handle.queue.drain_all();
        while !pending.is_empty() {
            let (sent, leftover) = self.send_from(pending).await;
            pending = leftover;
            if !sent {
                self.ctx.log.warn(&format!(
                    "unable to flush {} messages to {} at shutdown",
                    pending.len(),
                    self.sink.destination()
                ));
                break;
            }
        }
        self.handle.queue.requeue(pending);
    }
}

#[async_trait]
impl<S: SinkAdapter + 'static> LogWriter for SinkWriter<S> {
    fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    async fn run(self: Box<Self>) -> Result<(), WriterError> {
        SinkWriter::run(*self).await
    }
}

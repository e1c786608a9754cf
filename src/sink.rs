use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::log::InternalLog;
use crate::message::LogMessage;
use crate::provision::Pacer;

/// What a sink adapter gets from the writer that drives it.
#[derive(Clone)]
pub struct SinkContext {
    pub pacer: Pacer,
    pub log: Arc<dyn InternalLog>,
}

impl SinkContext {
    pub fn new(pacer: Pacer, log: Arc<dyn InternalLog>) -> Self {
        Self { pacer, log }
    }
}

/// Destination-specific behavior plugged into a [`SinkWriter`](crate::SinkWriter).
#[async_trait]
pub trait SinkAdapter: Send {
    /// Short description of the destination for diagnostics.
    fn destination(&self) -> String;

    /// Establishes the remote client. Failure is fatal for the writer.
    async fn create_client(&mut self, ctx: &SinkContext) -> Result<(), SinkError>;

    /// Makes sure the destination exists, provisioning it if allowed.
    /// Failure is fatal for the writer.
    async fn ensure_destination_available(&mut self, ctx: &SinkContext)
        -> Result<(), SinkError>;

    /// Attempts delivery of a timestamp-ordered batch. Returns the messages
    /// that still need delivery: empty on success, the batch unchanged when
    /// the whole request failed.
    async fn process_batch(
        &mut self,
        batch: Vec<LogMessage>,
        ctx: &SinkContext,
    ) -> Vec<LogMessage>;

    /// Payload size plus the per-message protocol overhead.
    fn effective_size(&self, message: &LogMessage) -> usize;

    /// Whether a batch with these totals may be sent in one request.
    fn within_service_limits(&self, batch_bytes: usize, message_count: usize) -> bool;

    /// Largest message content, in bytes, the destination accepts.
    fn max_message_size(&self) -> usize;
}

/// Splits `messages` into the greedy oldest-first batch the sink accepts and
/// the remainder. The first message that would push the totals past the
/// sink's limits starts the remainder.
pub fn split_batch<S>(sink: &S, mut messages: Vec<LogMessage>) -> (Vec<LogMessage>, Vec<LogMessage>)
where
    S: SinkAdapter + ?Sized,
{
    let mut batch_bytes = 0;
    let mut cut = messages.len();
    for (index, message) in messages.iter().enumerate() {
        batch_bytes += sink.effective_size(message);
        if !sink.within_service_limits(batch_bytes, index + 1) {
            cut = index;
            break;
        }
    }
    let rest = messages.split_off(cut);
    (messages, rest)
}

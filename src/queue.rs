use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::error::ConfigError;
use crate::message::LogMessage;

/// What to drop once the queue holds more than its discard threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum DiscardAction {
    /// Never drop; the threshold is ignored.
    None,
    Oldest,
    Newest,
}

impl FromStr for DiscardAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(DiscardAction::None),
            "oldest" => Ok(DiscardAction::Oldest),
            "newest" => Ok(DiscardAction::Newest),
            _ => Err(ConfigError::InvalidDiscardAction(s.to_string())),
        }
    }
}

impl std::convert::TryFrom<String> for DiscardAction {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for DiscardAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DiscardAction::None => write!(f, "none"),
            DiscardAction::Oldest => write!(f, "oldest"),
            DiscardAction::Newest => write!(f, "newest"),
        }
    }
}

struct Inner {
    messages: VecDeque<LogMessage>,
    discard_threshold: usize,
    discard_action: DiscardAction,
    dropped: u64,
}

impl Inner {
    fn apply_discard(&mut self) {
        if self.discard_action == DiscardAction::None {
            return;
        }
        while self.messages.len() > self.discard_threshold {
            match self.discard_action {
                DiscardAction::Oldest => self.messages.pop_front(),
                _ => self.messages.pop_back(),
            };
            self.dropped += 1;
        }
    }
}

/// Bounded holding area between producer threads and a single writer.
///
/// Producers call [`enqueue`](Self::enqueue), which never blocks beyond a
/// short critical section. Only the owning writer drains or requeues.
pub struct MessageQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MessageQueue {
    pub fn new(discard_threshold: usize, discard_action: DiscardAction) -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: VecDeque::new(),
                discard_threshold,
                discard_action,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends a message, silently applying the discard policy.
    pub fn enqueue(&self, message: LogMessage) {
        {
            let mut inner = self.inner.lock();
            inner.messages.push_back(message);
            inner.apply_discard();
        }
        self.notify.notify_one();
    }

    /// Removes and returns every queued message in insertion order.
    pub fn drain_all(&self) -> Vec<LogMessage> {
        self.inner.lock().messages.drain(..).collect()
    }

    /// Puts messages back at the head of the queue, ahead of anything that
    /// arrived since they were drained. The discard policy is not applied
    /// until the next enqueue.
    pub(crate) fn requeue(&self, messages: Vec<LogMessage>) {
        if messages.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for message in messages.into_iter().rev() {
            inner.messages.push_front(message);
        }
    }

    /// Waits until the queue is non-empty or `timeout` elapses. Returns
    /// whether messages are available.
    pub async fn wait_for_messages(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_empty() {
                return true;
            }
            // a stale permit from an already-drained enqueue just loops again
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                return !self.is_empty();
            }
        }
    }

    /// Waits for the next enqueue, returning `false` once `deadline` passes.
    pub async fn wait_until(&self, deadline: Instant) -> bool {
        timeout_at(deadline, self.notify.notified()).await.is_ok()
    }

    /// Runs `f` over the queued messages without removing them.
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&VecDeque<LogMessage>) -> R) -> R {
        f(&self.inner.lock().messages)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }

    /// Number of messages dropped by the discard policy so far.
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn discard_threshold(&self) -> usize {
        self.inner.lock().discard_threshold
    }

    pub fn discard_action(&self) -> DiscardAction {
        self.inner.lock().discard_action
    }

    pub fn set_discard_threshold(&self, discard_threshold: usize) {
        let mut inner = self.inner.lock();
        inner.discard_threshold = discard_threshold;
        inner.apply_discard();
    }

    pub fn set_discard_action(&self, discard_action: DiscardAction) {
        let mut inner = self.inner.lock();
        inner.discard_action = discard_action;
        inner.apply_discard();
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MessageQueue")
            .field("len", &inner.messages.len())
            .field("discard_threshold", &inner.discard_threshold)
            .field("discard_action", &inner.discard_action)
            .field("dropped", &inner.dropped)
            .finish()
    }
}

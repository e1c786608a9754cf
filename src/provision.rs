//! Check-then-create-then-poll provisioning for destination resources.
//!
//! Several writers, possibly in different processes, may race to create the
//! same resource. A create that loses the race is treated as success, a
//! create rejected because another actor is mid-change is retried after a
//! back-off, and every accepted create is followed by polling until the
//! resource becomes visible to reads.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SinkError;
use crate::sink::SinkContext;

/// Timing for provisioning. All sleeps go through [`Pacer`], so tests can
/// run them under a paused tokio clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Delay between existence checks after a create was accepted.
    pub interval: Duration,
    /// Upper bound on the whole provisioning of a single resource.
    pub timeout: Duration,
    /// Delay before retrying a create that hit a concurrent modification.
    pub conflict_backoff: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
            conflict_backoff: Duration::from_millis(250),
        }
    }
}

impl PollSchedule {
    /// Number of existence checks that fit into the timeout.
    pub fn max_attempts(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        let attempts = (self.timeout.as_millis() / interval).max(1);
        attempts.min(u128::from(u32::MAX)) as u32
    }
}

/// Cancellable sleeper shared by the writer loop and the provisioning code.
#[derive(Debug, Clone)]
pub struct Pacer {
    schedule: PollSchedule,
    shutdown: CancellationToken,
}

impl Pacer {
    pub fn new(schedule: PollSchedule, shutdown: CancellationToken) -> Self {
        Self { schedule, shutdown }
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Sleeps for `duration`, returning early with `Interrupted` on shutdown.
    pub async fn sleep(&self, duration: Duration) -> Result<(), SinkError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(SinkError::Interrupted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// A named remote resource that can be checked for and created.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Human-readable description used in diagnostics, e.g. `log group foo`.
    fn describe(&self) -> String;

    async fn exists(&self) -> Result<bool, SinkError>;

    /// Issues a create request. Implementations report a lost race as
    /// [`SinkError::AlreadyExists`] and a concurrent in-progress change as
    /// [`SinkError::OperationAborted`].
    async fn create(&self) -> Result<(), SinkError>;
}

/// Makes sure `resource` exists, creating it if necessary.
pub async fn ensure_available<R>(resource: &R, ctx: &SinkContext) -> Result<(), SinkError>
where
    R: Resource + ?Sized,
{
    if resource.exists().await? {
        return Ok(());
    }

    let schedule = *ctx.pacer.schedule();
    let deadline = Instant::now() + schedule.timeout;
    ctx.log.debug(&format!("creating {}", resource.describe()));

    loop {
        match resource.create().await {
            Ok(()) => break,
            Err(SinkError::AlreadyExists(_)) => {
                ctx.log
                    .debug(&format!("{} was created concurrently", resource.describe()));
                return Ok(());
            }
            Err(SinkError::OperationAborted(_)) => {
                if Instant::now() >= deadline {
                    return Err(SinkError::ProvisioningTimeout(resource.describe()));
                }
                ctx.pacer.sleep(schedule.conflict_backoff).await?;
            }
            Err(err) => return Err(err),
        }
    }

    for _ in 0..schedule.max_attempts() {
        if resource.exists().await? {
            return Ok(());
        }
        ctx.pacer.sleep(schedule.interval).await?;
    }
    Err(SinkError::ProvisioningTimeout(resource.describe()))
}

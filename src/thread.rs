use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::{Builder, Handle};

use crate::error::WriterError;
use crate::worker::{LogWriter, WriterHandle};

/// Called once with the error of a writer that failed or panicked.
pub type ExceptionHandler = Arc<dyn Fn(WriterError) + Send + Sync>;

/// Schedules a writer's run loop.
pub trait ThreadFactory: Send + Sync {
    fn start_writer(&self, writer: Box<dyn LogWriter>, on_error: ExceptionHandler);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn report(handle: &WriterHandle, on_error: &ExceptionHandler, error: WriterError) {
    handle.fail(error.clone());
    on_error(error);
}

/// Runs `writer` as a task on the current runtime, reporting errors and panics.
async fn supervise(writer: Box<dyn LogWriter>, handle: WriterHandle, on_error: ExceptionHandler) {
    match tokio::spawn(writer.run()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => report(&handle, &on_error, err),
        Err(join_error) if join_error.is_panic() => report(
            &handle,
            &on_error,
            WriterError::Panicked(panic_message(join_error.into_panic())),
        ),
        Err(join_error) => report(
            &handle,
            &on_error,
            WriterError::Runtime(join_error.to_string()),
        ),
    }
}

fn run_on_current_thread(writer: Box<dyn LogWriter>, on_error: ExceptionHandler) {
    let handle = writer.handle();
    match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(supervise(writer, handle, on_error)),
        Err(err) => report(&handle, &on_error, WriterError::Runtime(err.to_string())),
    }
}

/// Gives every writer its own named thread with a current-thread runtime.
#[derive(Debug, Default)]
pub struct DefaultThreadFactory {
    started: AtomicUsize,
}

impl DefaultThreadFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThreadFactory for DefaultThreadFactory {
    fn start_writer(&self, writer: Box<dyn LogWriter>, on_error: ExceptionHandler) {
        let id = self.started.fetch_add(1, Ordering::Relaxed);
        let handle = writer.handle();
        let thread_error = Arc::clone(&on_error);
        let spawned = std::thread::Builder::new()
            .name(format!("log-writer-{}", id))
            .spawn(move || run_on_current_thread(writer, on_error));
        if let Err(err) = spawned {
            report(&handle, &thread_error, WriterError::Runtime(err.to_string()));
        }
    }
}

/// Spawns writers onto an existing tokio runtime.
#[derive(Debug, Clone)]
pub struct RuntimeThreadFactory {
    runtime_handle: Handle,
}

impl RuntimeThreadFactory {
    pub fn new(runtime_handle: Handle) -> Self {
        Self { runtime_handle }
    }

    /// Uses the runtime of the calling context. Panics outside a runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl ThreadFactory for RuntimeThreadFactory {
    fn start_writer(&self, writer: Box<dyn LogWriter>, on_error: ExceptionHandler) {
        let handle = writer.handle();
        self.runtime_handle.spawn(supervise(writer, handle, on_error));
    }
}

/// Runs the writer to completion on the calling thread. Only useful with
/// writers whose run returns promptly, e.g. ones that fail to initialize.
/// Must not be called from inside a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineThreadFactory;

impl ThreadFactory for InlineThreadFactory {
    fn start_writer(&self, writer: Box<dyn LogWriter>, on_error: ExceptionHandler) {
        run_on_current_thread(writer, on_error);
    }
}

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

use crate::error::{AppenderError, WriterError};
use crate::log::{InternalLog, TracingLog};
use crate::message::{truncate_to, LogMessage};
use crate::thread::{DefaultThreadFactory, ExceptionHandler, ThreadFactory};
use crate::worker::{WriterFactory, WriterHandle};

#[derive(Default)]
struct AppenderState {
    writer: Option<WriterHandle>,
    generation: u64,
    last_writer_exception: Option<WriterError>,
    closed: bool,
}

struct AppenderInner<C> {
    config: C,
    writer_factory: Arc<dyn WriterFactory<C>>,
    thread_factory: Arc<dyn ThreadFactory>,
    log: Arc<dyn InternalLog>,
    state: Arc<Mutex<AppenderState>>,
}

/// The owning layer: lazily starts a writer for its configuration, feeds it
/// messages, and replaces it after a failure.
///
/// Cloning is cheap and every clone shares the same writer.
pub struct Appender<C> {
    inner: Arc<AppenderInner<C>>,
}

impl<C> Clone for Appender<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builds an [`Appender`], in the same spirit as the writer builders of the
/// individual sinks.
pub struct AppenderBuilder<C> {
    config: C,
    writer_factory: Arc<dyn WriterFactory<C>>,
    thread_factory: Arc<dyn ThreadFactory>,
    log: Arc<dyn InternalLog>,
}

impl<C: Send + Sync + 'static> AppenderBuilder<C> {
    pub fn new<F>(config: C, writer_factory: F) -> Self
    where
        F: WriterFactory<C> + 'static,
    {
        Self {
            config,
            writer_factory: Arc::new(writer_factory),
            thread_factory: Arc::new(DefaultThreadFactory::new()),
            log: Arc::new(TracingLog),
        }
    }

    pub fn with_thread_factory<T>(mut self, thread_factory: T) -> Self
    where
        T: ThreadFactory + 'static,
    {
        self.thread_factory = Arc::new(thread_factory);
        self
    }

    pub fn with_writer_factory<F>(mut self, writer_factory: F) -> Self
    where
        F: WriterFactory<C> + 'static,
    {
        self.writer_factory = Arc::new(writer_factory);
        self
    }

    pub fn with_log(mut self, log: Arc<dyn InternalLog>) -> Self {
        self.log = log;
        self
    }

    pub fn build(self) -> Appender<C> {
        Appender {
            inner: Arc::new(AppenderInner {
                config: self.config,
                writer_factory: self.writer_factory,
                thread_factory: self.thread_factory,
                log: self.log,
                state: Arc::new(Mutex::new(AppenderState::default())),
            }),
        }
    }
}

impl<C: Send + Sync + 'static> Appender<C> {
    pub fn builder<F>(config: C, writer_factory: F) -> AppenderBuilder<C>
    where
        F: WriterFactory<C> + 'static,
    {
        AppenderBuilder::new(config, writer_factory)
    }

    pub fn config(&self) -> &C {
        &self.inner.config
    }

    /// Submits one message, starting a writer first if none is active.
    pub fn append(&self, content: impl Into<String>) -> Result<(), AppenderError> {
        let writer = self.current_writer()?;
        let mut content = content.into();
        if truncate_to(&mut content, writer.max_message_size()) {
            self.inner.log.warn(&format!(
                "message exceeds maximum size of {} bytes, truncated",
                writer.max_message_size()
            ));
        }
        writer.add_message(LogMessage::now(content));
        Ok(())
    }

    /// The active writer, if one has been started and has not failed.
    pub fn writer(&self) -> Option<WriterHandle> {
        self.inner.state.lock().writer.clone()
    }

    /// The error that took down the most recent failed writer.
    pub fn last_writer_exception(&self) -> Option<WriterError> {
        self.inner.state.lock().last_writer_exception.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Stops the active writer and rejects further messages. The writer
    /// flushes what it can before stopping.
    pub fn close(&self) {
        let writer = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.writer.take()
        };
        if let Some(writer) = writer {
            writer.stop();
        }
    }

    fn current_writer(&self) -> Result<WriterHandle, AppenderError> {
        let (writer, handle, generation) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(AppenderError::Closed);
            }
            if let Some(existing) = &state.writer {
                return Ok(existing.clone());
            }
            let writer = self.inner.writer_factory.new_writer(&self.inner.config);
            let handle = writer.handle();
            state.generation += 1;
            state.writer = Some(handle.clone());
            (writer, handle, state.generation)
        };

        // started outside the lock: an inline factory may report failure
        // before returning
        self.inner
            .thread_factory
            .start_writer(writer, self.exception_handler(generation));
        Ok(handle)
    }

    fn exception_handler(&self, generation: u64) -> ExceptionHandler {
        let state = Arc::clone(&self.inner.state);
        let log = Arc::clone(&self.inner.log);
        Arc::new(move |error: WriterError| {
            log.error("log writer failed; it will be replaced", Some(&error));
            let mut state = state.lock();
            if state.generation == generation {
                state.writer = None;
            }
            state.last_writer_exception = Some(error);
        })
    }
}

impl<C: Send + Sync + 'static> MakeWriter for Appender<C> {
    type Writer = AppenderWriter<C>;

    fn make_writer(&self) -> Self::Writer {
        AppenderWriter::new(self.clone())
    }
}

/// Line-buffered `io::Write` over an [`Appender`]: each line becomes one
/// message.
pub struct AppenderWriter<C: Send + Sync + 'static> {
    line_writer: io::LineWriter<Inner<C>>,
}

impl<C: Send + Sync + 'static> AppenderWriter<C> {
    fn new(appender: Appender<C>) -> Self {
        Self {
            line_writer: io::LineWriter::new(Inner { appender }),
        }
    }
}

impl<C: Send + Sync + 'static> io::Write for AppenderWriter<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.line_writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.line_writer.flush()
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        self.line_writer.write_vectored(bufs)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.line_writer.write_all(buf)
    }

    fn write_fmt(&mut self, fmt: std::fmt::Arguments<'_>) -> io::Result<()> {
        self.line_writer.write_fmt(fmt)
    }
}

struct Inner<C> {
    appender: Appender<C>,
}

impl<C: Send + Sync + 'static> io::Write for Inner<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = std::str::from_utf8(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        for line in text.split('\n').filter(|line| !line.is_empty()) {
            self.appender
                .append(line)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write(buf).map(|_| ())
    }
}

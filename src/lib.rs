mod client;
pub mod cloudwatch;
mod config;
mod error;
pub mod kinesis;
mod log;
mod message;
mod provision;
mod queue;
mod sink;
pub mod sns;
mod substitute;
mod thread;
mod worker;
mod writer;

pub use cloudwatch::{CloudWatchSink, CloudWatchWriterConfig, CloudWatchWriterFactory};
pub use config::{ClientOptions, WriterConfig};
pub use error::{AppenderError, ConfigError, SinkError, WriterError};
pub use kinesis::{KinesisSink, KinesisWriterConfig, KinesisWriterFactory};
pub use log::{InternalLog, Level, LogEntry, MemoryLog, TracingLog};
pub use message::{sort_by_timestamp, timestamp, LogMessage};
pub use provision::{ensure_available, Pacer, PollSchedule, Resource};
pub use queue::{DiscardAction, MessageQueue};
pub use sink::{split_batch, SinkAdapter, SinkContext};
pub use sns::{SnsSink, SnsWriterConfig, SnsWriterFactory};
pub use substitute::substitute;
pub use thread::{
    DefaultThreadFactory, ExceptionHandler, InlineThreadFactory, RuntimeThreadFactory,
    ThreadFactory,
};
pub use worker::{LogWriter, SinkWriter, WriterFactory, WriterHandle, WriterState};
pub use writer::{Appender, AppenderBuilder, AppenderWriter};

/// Appender writing to a CloudWatch Logs stream, creating the group and
/// stream on first use.
pub fn cloudwatch(log_group: &str, log_stream: &str) -> AppenderBuilder<CloudWatchWriterConfig> {
    Appender::builder(
        CloudWatchWriterConfig::new(log_group, log_stream),
        CloudWatchWriterFactory,
    )
}

pub fn kinesis(stream_name: &str, partition_key: &str) -> AppenderBuilder<KinesisWriterConfig> {
    Appender::builder(
        KinesisWriterConfig::new(stream_name, partition_key),
        KinesisWriterFactory,
    )
}

/// Appender publishing to the SNS topic with the given name.
pub fn sns(topic_name: &str) -> AppenderBuilder<SnsWriterConfig> {
    Appender::builder(SnsWriterConfig::by_name(topic_name), SnsWriterFactory)
}

use std::sync::Arc;

use async_trait::async_trait;
use rusoto_core::RusotoError;
use rusoto_logs::{
    CloudWatchLogs, CloudWatchLogsClient, CreateLogGroupError, CreateLogGroupRequest,
    CreateLogStreamError, CreateLogStreamRequest, DescribeLogGroupsRequest,
    DescribeLogStreamsRequest, InputLogEvent, PutLogEventsRequest,
};
use serde::Deserialize;

use crate::client;
use crate::config::{ClientOptions, WriterConfig};
use crate::error::SinkError;
use crate::message::LogMessage;
use crate::provision::{ensure_available, Resource};
use crate::sink::{SinkAdapter, SinkContext};
use crate::substitute::substitute;
use crate::worker::{LogWriter, SinkWriter, WriterFactory};

pub const CLOUDWATCH_MAX_BATCH_EVENTS_LENGTH: usize = 10_000;
pub const CLOUDWATCH_MAX_BATCH_SIZE: usize = 1024 * 1024;
pub const CLOUDWATCH_EXTRA_MSG_PAYLOAD_SIZE: usize = 26;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CloudWatchWriterConfig {
    pub log_group: String,
    pub log_stream: String,
    #[serde(flatten)]
    pub writer: WriterConfig,
    #[serde(flatten)]
    pub client: ClientOptions,
}

impl CloudWatchWriterConfig {
    pub fn new(log_group: &str, log_stream: &str) -> Self {
        Self {
            log_group: substitute(log_group),
            log_stream: substitute(log_stream),
            ..Default::default()
        }
    }

    /// Expands placeholders in the group and stream names.
    pub fn substituted(mut self) -> Self {
        self.log_group = substitute(&self.log_group);
        self.log_stream = substitute(&self.log_stream);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStreamInfo {
    pub upload_sequence_token: Option<String>,
}

/// The CloudWatch Logs calls the writer needs.
#[async_trait]
pub trait CloudWatchLogsApi: Send + Sync {
    async fn log_group_exists(&self, log_group: &str) -> Result<bool, SinkError>;

    async fn create_log_group(&self, log_group: &str) -> Result<(), SinkError>;

    async fn find_log_stream(
        &self,
        log_group: &str,
        log_stream: &str,
    ) -> Result<Option<LogStreamInfo>, SinkError>;

    async fn create_log_stream(&self, log_group: &str, log_stream: &str)
        -> Result<(), SinkError>;

    async fn put_log_events(
        &self,
        log_group: &str,
        log_stream: &str,
        batch: &[LogMessage],
        sequence_token: Option<String>,
    ) -> Result<(), SinkError>;
}

/// [`CloudWatchLogsApi`] over any rusoto CloudWatch Logs client.
pub struct RusotoCloudWatchLogs<C>(pub C);

impl From<RusotoError<CreateLogGroupError>> for SinkError {
    fn from(error: RusotoError<CreateLogGroupError>) -> Self {
        SinkError::from_rusoto(error, |err| match err {
            CreateLogGroupError::ResourceAlreadyExists(msg) => SinkError::AlreadyExists(msg),
            CreateLogGroupError::OperationAborted(msg) => SinkError::OperationAborted(msg),
            other => SinkError::service(other),
        })
    }
}

impl From<RusotoError<CreateLogStreamError>> for SinkError {
    fn from(error: RusotoError<CreateLogStreamError>) -> Self {
        SinkError::from_rusoto(error, |err| match err {
            CreateLogStreamError::ResourceAlreadyExists(msg) => SinkError::AlreadyExists(msg),
            CreateLogStreamError::ResourceNotFound(msg) => SinkError::NotFound(msg),
            other => SinkError::service(other),
        })
    }
}

#[async_trait]
impl<C> CloudWatchLogsApi for RusotoCloudWatchLogs<C>
where
    C: CloudWatchLogs + Send + Sync,
{
    async fn log_group_exists(&self, log_group: &str) -> Result<bool, SinkError> {
        let mut next_token = None;
        loop {
            let request = DescribeLogGroupsRequest {
                log_group_name_prefix: Some(log_group.to_string()),
                next_token,
                ..Default::default()
            };
            let response = self
                .0
                .describe_log_groups(request)
                .await
                .map_err(|err| SinkError::from_rusoto(err, SinkError::service))?;
            let found = response
                .log_groups
                .unwrap_or_default()
                .iter()
                .any(|group| group.log_group_name.as_deref() == Some(log_group));
            if found {
                return Ok(true);
            }
            match response.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(false),
            }
        }
    }

    async fn create_log_group(&self, log_group: &str) -> Result<(), SinkError> {
        let request = CreateLogGroupRequest {
            log_group_name: log_group.to_string(),
            ..Default::default()
        };
        Ok(self.0.create_log_group(request).await?)
    }

    async fn find_log_stream(
        &self,
        log_group: &str,
        log_stream: &str,
    ) -> Result<Option<LogStreamInfo>, SinkError> {
        let request = DescribeLogStreamsRequest {
            log_group_name: log_group.to_string(),
            log_stream_name_prefix: Some(log_stream.to_string()),
            ..Default::default()
        };
        let response = self
            .0
            .describe_log_streams(request)
            .await
            .map_err(|err| SinkError::from_rusoto(err, SinkError::service))?;
        Ok(response
            .log_streams
            .unwrap_or_default()
            .into_iter()
            .find(|stream| stream.log_stream_name.as_deref() == Some(log_stream))
            .map(|stream| LogStreamInfo {
                upload_sequence_token: stream.upload_sequence_token,
            }))
    }

    async fn create_log_stream(
        &self,
        log_group: &str,
        log_stream: &str,
    ) -> Result<(), SinkError> {
        let request = CreateLogStreamRequest {
            log_group_name: log_group.to_string(),
            log_stream_name: log_stream.to_string(),
            ..Default::default()
        };
        Ok(self.0.create_log_stream(request).await?)
    }

    async fn put_log_events(
        &self,
        log_group: &str,
        log_stream: &str,
        batch: &[LogMessage],
        sequence_token: Option<String>,
    ) -> Result<(), SinkError> {
        let log_events = batch
            .iter()
            .map(|message| InputLogEvent {
                message: message.content().to_string(),
                timestamp: message.timestamp(),
            })
            .collect();
        let request = PutLogEventsRequest {
            log_events,
            log_group_name: log_group.to_string(),
            log_stream_name: log_stream.to_string(),
            sequence_token,
        };
        self.0
            .put_log_events(request)
            .await
            .map(|_| ())
            .map_err(|err| SinkError::from_rusoto(err, SinkError::service))
    }
}

struct LogGroup<'a> {
    api: &'a dyn CloudWatchLogsApi,
    name: &'a str,
}

#[async_trait]
impl Resource for LogGroup<'_> {
    fn describe(&self) -> String {
        format!("log group {}", self.name)
    }

    async fn exists(&self) -> Result<bool, SinkError> {
        self.api.log_group_exists(self.name).await
    }

    async fn create(&self) -> Result<(), SinkError> {
        self.api.create_log_group(self.name).await
    }
}

struct LogStream<'a> {
    api: &'a dyn CloudWatchLogsApi,
    group: &'a str,
    name: &'a str,
}

#[async_trait]
impl Resource for LogStream<'_> {
    fn describe(&self) -> String {
        format!("log stream {}/{}", self.group, self.name)
    }

    async fn exists(&self) -> Result<bool, SinkError> {
        Ok(self.api.find_log_stream(self.group, self.name).await?.is_some())
    }

    async fn create(&self) -> Result<(), SinkError> {
        self.api.create_log_stream(self.group, self.name).await
    }
}

/// Sink adapter for a CloudWatch Logs group/stream pair.
pub struct CloudWatchSink {
    config: CloudWatchWriterConfig,
    client: Option<Arc<dyn CloudWatchLogsApi>>,
}

impl CloudWatchSink {
    pub fn new(config: CloudWatchWriterConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    /// Uses `client` instead of building one from the configured options.
    pub fn with_client<A>(mut self, client: A) -> Self
    where
        A: CloudWatchLogsApi + 'static,
    {
        self.client = Some(Arc::new(client));
        self
    }

    fn client(&self) -> Result<Arc<dyn CloudWatchLogsApi>, SinkError> {
        self.client
            .clone()
            .ok_or_else(|| SinkError::Config("client has not been created".to_string()))
    }

    async fn attempt_to_send(
        &self,
        client: &dyn CloudWatchLogsApi,
        batch: &[LogMessage],
    ) -> Result<(), SinkError> {
        let group = &self.config.log_group;
        let stream = &self.config.log_stream;
        // the token may have been advanced by writers in other processes
        let info = client
            .find_log_stream(group, stream)
            .await?
            .ok_or_else(|| SinkError::NotFound(format!("log stream {}/{}", group, stream)))?;
        client
            .put_log_events(group, stream, batch, info.upload_sequence_token)
            .await
    }
}

#[async_trait]
impl SinkAdapter for CloudWatchSink {
    fn destination(&self) -> String {
        format!(
            "CloudWatch Logs {}/{}",
            self.config.log_group, self.config.log_stream
        )
    }

    async fn create_client(&mut self, _ctx: &SinkContext) -> Result<(), SinkError> {
        if self.config.log_group.is_empty() || self.config.log_stream.is_empty() {
            return Err(SinkError::Config(
                "log group and log stream names are required".to_string(),
            ));
        }
        if self.client.is_none() {
            let client = client::build(
                &self.config.client,
                CloudWatchLogsClient::new_with,
                CloudWatchLogsClient::new,
            )?;
            self.client = Some(Arc::new(RusotoCloudWatchLogs(client)));
        }
        Ok(())
    }

    async fn ensure_destination_available(
        &mut self,
        ctx: &SinkContext,
    ) -> Result<(), SinkError> {
        let client = self.client()?;
        let group = LogGroup {
            api: client.as_ref(),
            name: &self.config.log_group,
        };
        ensure_available(&group, ctx).await?;
        let stream = LogStream {
            api: client.as_ref(),
            group: &self.config.log_group,
            name: &self.config.log_stream,
        };
        ensure_available(&stream, ctx).await
    }

    async fn process_batch(
        &mut self,
        batch: Vec<LogMessage>,
        ctx: &SinkContext,
    ) -> Vec<LogMessage> {
        if batch.is_empty() {
            return batch;
        }
        let result = match self.client() {
            Ok(client) => self.attempt_to_send(client.as_ref(), &batch).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => Vec::new(),
            Err(err) => {
                ctx.log.error("failed to send batch", Some(&err));
                batch
            }
        }
    }

    fn effective_size(&self, message: &LogMessage) -> usize {
        message.size() + CLOUDWATCH_EXTRA_MSG_PAYLOAD_SIZE
    }

    fn within_service_limits(&self, batch_bytes: usize, message_count: usize) -> bool {
        batch_bytes < CLOUDWATCH_MAX_BATCH_SIZE
            && message_count <= CLOUDWATCH_MAX_BATCH_EVENTS_LENGTH
    }

    fn max_message_size(&self) -> usize {
        CLOUDWATCH_MAX_BATCH_SIZE - CLOUDWATCH_EXTRA_MSG_PAYLOAD_SIZE - 1
    }
}

/// Builds CloudWatch writers with rusoto clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloudWatchWriterFactory;

impl WriterFactory<CloudWatchWriterConfig> for CloudWatchWriterFactory {
    fn new_writer(&self, config: &CloudWatchWriterConfig) -> Box<dyn LogWriter> {
        let config = config.clone().substituted();
        let sink = CloudWatchSink::new(config.clone());
        Box::new(SinkWriter::new(sink, &config.writer))
    }
}

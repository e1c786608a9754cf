use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rusoto_core::RusotoError;
use rusoto_kinesis::{
    CreateStreamError, CreateStreamInput, DescribeStreamSummaryError, DescribeStreamSummaryInput,
    Kinesis, KinesisClient, PutRecordsInput, PutRecordsRequestEntry,
};
use serde::Deserialize;

use crate::client;
use crate::config::{ClientOptions, WriterConfig};
use crate::error::SinkError;
use crate::message::{timestamp, LogMessage};
use crate::provision::{ensure_available, Resource};
use crate::sink::{SinkAdapter, SinkContext};
use crate::substitute::substitute;
use crate::worker::{LogWriter, SinkWriter, WriterFactory};

pub const KINESIS_MAX_BATCH_RECORDS: usize = 500;
pub const KINESIS_MAX_BATCH_SIZE: usize = 5 * 1024 * 1024;
pub const KINESIS_MAX_RECORD_SIZE: usize = 1024 * 1024;

const STREAM_STATUS_ACTIVE: &str = "ACTIVE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KinesisWriterConfig {
    pub stream_name: String,
    pub partition_key: String,
    pub auto_create: bool,
    pub shard_count: i64,
    #[serde(flatten)]
    pub writer: WriterConfig,
    #[serde(flatten)]
    pub client: ClientOptions,
}

impl Default for KinesisWriterConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            partition_key: timestamp().to_string(),
            auto_create: false,
            shard_count: 1,
            writer: WriterConfig::default(),
            client: ClientOptions::default(),
        }
    }
}

impl KinesisWriterConfig {
    pub fn new(stream_name: &str, partition_key: &str) -> Self {
        Self {
            stream_name: substitute(stream_name),
            partition_key: substitute(partition_key),
            ..Default::default()
        }
    }

    /// Expands placeholders in the stream name and partition key.
    pub fn substituted(mut self) -> Self {
        self.stream_name = substitute(&self.stream_name);
        self.partition_key = substitute(&self.partition_key);
        self
    }
}

/// The Kinesis calls the writer needs.
#[async_trait]
pub trait KinesisApi: Send + Sync {
    /// Current stream status, or `None` if the stream does not exist.
    async fn stream_status(&self, stream_name: &str) -> Result<Option<String>, SinkError>;

    async fn create_stream(&self, stream_name: &str, shard_count: i64) -> Result<(), SinkError>;

    /// Sends the records, returning the indexes of records the service
    /// rejected.
    async fn put_records(
        &self,
        stream_name: &str,
        partition_key: &str,
        batch: &[LogMessage],
    ) -> Result<Vec<usize>, SinkError>;
}

pub struct RusotoKinesis<C>(pub C);

impl From<RusotoError<CreateStreamError>> for SinkError {
    fn from(error: RusotoError<CreateStreamError>) -> Self {
        SinkError::from_rusoto(error, |err| match err {
            CreateStreamError::ResourceInUse(msg) => SinkError::AlreadyExists(msg),
            CreateStreamError::LimitExceeded(msg) => SinkError::OperationAborted(msg),
            other => SinkError::service(other),
        })
    }
}

#[async_trait]
impl<C> KinesisApi for RusotoKinesis<C>
where
    C: Kinesis + Send + Sync,
{
    async fn stream_status(&self, stream_name: &str) -> Result<Option<String>, SinkError> {
        let request = DescribeStreamSummaryInput {
            stream_name: stream_name.to_string(),
            ..Default::default()
        };
        match self.0.describe_stream_summary(request).await {
            Ok(response) => Ok(Some(response.stream_description_summary.stream_status)),
            Err(RusotoError::Service(DescribeStreamSummaryError::ResourceNotFound(_))) => Ok(None),
            Err(err) => Err(SinkError::from_rusoto(err, SinkError::service)),
        }
    }

    async fn create_stream(&self, stream_name: &str, shard_count: i64) -> Result<(), SinkError> {
        let request = CreateStreamInput {
            stream_name: stream_name.to_string(),
            shard_count,
            ..Default::default()
        };
        Ok(self.0.create_stream(request).await?)
    }

    async fn put_records(
        &self,
        stream_name: &str,
        partition_key: &str,
        batch: &[LogMessage],
    ) -> Result<Vec<usize>, SinkError> {
        let records = batch
            .iter()
            .map(|message| PutRecordsRequestEntry {
                data: Bytes::copy_from_slice(message.content().as_bytes()),
                partition_key: partition_key.to_string(),
                ..Default::default()
            })
            .collect();
        let request = PutRecordsInput {
            records,
            stream_name: stream_name.to_string(),
            ..Default::default()
        };
        let response = self
            .0
            .put_records(request)
            .await
            .map_err(|err| SinkError::from_rusoto(err, SinkError::service))?;
        Ok(response
            .records
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.error_code.is_some())
            .map(|(index, _)| index)
            .collect())
    }
}

struct Stream<'a> {
    api: &'a dyn KinesisApi,
    name: &'a str,
    shard_count: i64,
    auto_create: bool,
}

#[async_trait]
impl Resource for Stream<'_> {
    fn describe(&self) -> String {
        format!("Kinesis stream {}", self.name)
    }

    async fn exists(&self) -> Result<bool, SinkError> {
        let status = self.api.stream_status(self.name).await?;
        Ok(status.as_deref() == Some(STREAM_STATUS_ACTIVE))
    }

    async fn create(&self) -> Result<(), SinkError> {
        // a stream in CREATING or UPDATING only needs polling
        if self.api.stream_status(self.name).await?.is_some() {
            return Ok(());
        }
        if !self.auto_create {
            return Err(SinkError::NotFound(format!(
                "{} does not exist and auto-create is disabled",
                self.describe()
            )));
        }
        match self.api.create_stream(self.name, self.shard_count).await {
            // the stream exists but may still be CREATING: keep polling
            Err(SinkError::AlreadyExists(_)) => Ok(()),
            other => other,
        }
    }
}

/// Sink adapter for a Kinesis stream; every record uses the configured
/// partition key.
pub struct KinesisSink {
    config: KinesisWriterConfig,
    client: Option<Arc<dyn KinesisApi>>,
}

impl KinesisSink {
    pub fn new(config: KinesisWriterConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    pub fn with_client<A>(mut self, client: A) -> Self
    where
        A: KinesisApi + 'static,
    {
        self.client = Some(Arc::new(client));
        self
    }

    fn client(&self) -> Result<Arc<dyn KinesisApi>, SinkError> {
        self.client
            .clone()
            .ok_or_else(|| SinkError::Config("client has not been created".to_string()))
    }
}

#[async_trait]
impl SinkAdapter for KinesisSink {
    fn destination(&self) -> String {
        format!("Kinesis stream {}", self.config.stream_name)
    }

    async fn create_client(&mut self, _ctx: &SinkContext) -> Result<(), SinkError> {
        if self.config.stream_name.is_empty() || self.config.partition_key.is_empty() {
            return Err(SinkError::Config(
                "stream name and partition key are required".to_string(),
            ));
        }
        if self.client.is_none() {
            let client = client::build(
                &self.config.client,
                KinesisClient::new_with,
                KinesisClient::new,
            )?;
            self.client = Some(Arc::new(RusotoKinesis(client)));
        }
        Ok(())
    }

    async fn ensure_destination_available(
        &mut self,
        ctx: &SinkContext,
    ) -> Result<(), SinkError> {
        let client = self.client()?;
        let stream = Stream {
            api: client.as_ref(),
            name: &self.config.stream_name,
            shard_count: self.config.shard_count,
            auto_create: self.config.auto_create,
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
        let client = match self.client() {
            Ok(client) => client,
            Err(err) => {
                ctx.log.error("failed to send batch", Some(&err));
                return batch;
            }
        };
        let result = client
            .put_records(&self.config.stream_name, &self.config.partition_key, &batch)
            .await;
        match result {
            Ok(failed) if failed.is_empty() => Vec::new(),
            Ok(failed) => {
                ctx.log.warn(&format!(
                    "{} of {} records rejected by {}; they will be retried",
                    failed.len(),
                    batch.len(),
                    self.destination()
                ));
                batch
                    .into_iter()
                    .enumerate()
                    .filter(|(index, _)| failed.contains(index))
                    .map(|(_, message)| message)
                    .collect()
            }
            Err(err) => {
                ctx.log.error("failed to send batch", Some(&err));
                batch
            }
        }
    }

    fn effective_size(&self, message: &LogMessage) -> usize {
        message.size() + self.config.partition_key.len()
    }

    fn within_service_limits(&self, batch_bytes: usize, message_count: usize) -> bool {
        batch_bytes < KINESIS_MAX_BATCH_SIZE && message_count <= KINESIS_MAX_BATCH_RECORDS
    }

    fn max_message_size(&self) -> usize {
        KINESIS_MAX_RECORD_SIZE.saturating_sub(self.config.partition_key.len())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct KinesisWriterFactory;

impl WriterFactory<KinesisWriterConfig> for KinesisWriterFactory {
    fn new_writer(&self, config: &KinesisWriterConfig) -> Box<dyn LogWriter> {
        let config = config.clone().substituted();
        let sink = KinesisSink::new(config.clone());
        Box::new(SinkWriter::new(sink, &config.writer))
    }
}

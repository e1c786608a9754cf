use std::sync::Arc;

use async_trait::async_trait;
use rusoto_sns::{CreateTopicInput, ListTopicsInput, PublishInput, Sns, SnsClient};
use serde::Deserialize;

use crate::client;
use crate::config::{non_blank, ClientOptions, WriterConfig};
use crate::error::SinkError;
use crate::message::LogMessage;
use crate::provision::{ensure_available, Resource};
use crate::sink::{SinkAdapter, SinkContext};
use crate::substitute::substitute;
use crate::worker::{LogWriter, SinkWriter, WriterFactory};

pub const SNS_MAX_MESSAGE_SIZE: usize = 262_144;

/// Either `topic_name` or `topic_arn` must be set; the ARN wins if both are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnsWriterConfig {
    pub topic_name: Option<String>,
    pub topic_arn: Option<String>,
    pub subject: Option<String>,
    pub auto_create: bool,
    #[serde(flatten)]
    pub writer: WriterConfig,
    #[serde(flatten)]
    pub client: ClientOptions,
}

impl SnsWriterConfig {
    pub fn by_name(topic_name: &str) -> Self {
        Self {
            topic_name: Some(substitute(topic_name)),
            ..Default::default()
        }
    }

    pub fn by_arn(topic_arn: &str) -> Self {
        Self {
            topic_arn: Some(substitute(topic_arn)),
            ..Default::default()
        }
    }

    /// Expands placeholders in the topic name and ARN.
    pub fn substituted(mut self) -> Self {
        self.topic_name = self.topic_name.map(|name| substitute(&name));
        self.topic_arn = self.topic_arn.map(|arn| substitute(&arn));
        self
    }
}

/// The SNS calls the writer needs.
#[async_trait]
pub trait SnsApi: Send + Sync {
    async fn list_topic_arns(&self) -> Result<Vec<String>, SinkError>;

    /// Creates the topic (idempotent on the service side) and returns its ARN.
    async fn create_topic(&self, topic_name: &str) -> Result<String, SinkError>;

    async fn publish(
        &self,
        topic_arn: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<(), SinkError>;
}

pub struct RusotoSns<C>(pub C);

#[async_trait]
impl<C> SnsApi for RusotoSns<C>
where
    C: Sns + Send + Sync,
{
    async fn list_topic_arns(&self) -> Result<Vec<String>, SinkError> {
        let mut arns = Vec::new();
        let mut next_token = None;
        loop {
            let response = self
                .0
                .list_topics(ListTopicsInput {
                    next_token,
                    ..Default::default()
                })
                .await
                .map_err(|err| SinkError::from_rusoto(err, SinkError::service))?;
            arns.extend(
                response
                    .topics
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|topic| topic.topic_arn),
            );
            match response.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(arns),
            }
        }
    }

    async fn create_topic(&self, topic_name: &str) -> Result<String, SinkError> {
        let request = CreateTopicInput {
            name: topic_name.to_string(),
            ..Default::default()
        };
        let response = self
            .0
            .create_topic(request)
            .await
            .map_err(|err| SinkError::from_rusoto(err, SinkError::service))?;
        response
            .topic_arn
            .ok_or_else(|| SinkError::Service("CreateTopic returned no ARN".to_string()))
    }

    async fn publish(
        &self,
        topic_arn: &str,
        subject: Option<&str>,
        message: &str,
    ) -> Result<(), SinkError> {
        let request = PublishInput {
            message: message.to_string(),
            subject: subject.map(str::to_string),
            topic_arn: Some(topic_arn.to_string()),
            ..Default::default()
        };
        self.0
            .publish(request)
            .await
            .map(|_| ())
            .map_err(|err| SinkError::from_rusoto(err, SinkError::service))
    }
}

fn arn_has_name(arn: &str, name: &str) -> bool {
    arn.rsplit(':').next() == Some(name)
}

enum TopicRef<'a> {
    Name(&'a str),
    Arn(&'a str),
}

struct Topic<'a> {
    api: &'a dyn SnsApi,
    topic: TopicRef<'a>,
    auto_create: bool,
}

impl Topic<'_> {
    async fn find(&self) -> Result<Option<String>, SinkError> {
        let arns = self.api.list_topic_arns().await?;
        Ok(arns.into_iter().find(|arn| match self.topic {
            TopicRef::Name(name) => arn_has_name(arn, name),
            TopicRef::Arn(wanted) => arn == wanted,
        }))
    }
}

#[async_trait]
impl Resource for Topic<'_> {
    fn describe(&self) -> String {
        match self.topic {
            TopicRef::Name(name) => format!("SNS topic {}", name),
            TopicRef::Arn(arn) => format!("SNS topic {}", arn),
        }
    }

    async fn exists(&self) -> Result<bool, SinkError> {
        Ok(self.find().await?.is_some())
    }

    async fn create(&self) -> Result<(), SinkError> {
        match self.topic {
            TopicRef::Name(name) if self.auto_create => {
                self.api.create_topic(name).await.map(|_| ())
            }
            _ => Err(SinkError::NotFound(format!(
                "{} does not exist and cannot be created",
                self.describe()
            ))),
        }
    }
}

/// Sink adapter for an SNS topic. SNS takes one message per call, so every
/// batch holds a single message.
pub struct SnsSink {
    config: SnsWriterConfig,
    client: Option<Arc<dyn SnsApi>>,
    topic_arn: Option<String>,
}

impl SnsSink {
    pub fn new(config: SnsWriterConfig) -> Self {
        Self {
            config,
            client: None,
            topic_arn: None,
        }
    }

    pub fn with_client<A>(mut self, client: A) -> Self
    where
        A: SnsApi + 'static,
    {
        self.client = Some(Arc::new(client));
        self
    }

    /// ARN resolved during provisioning.
    pub fn topic_arn(&self) -> Option<&str> {
        self.topic_arn.as_deref()
    }

    fn client(&self) -> Result<Arc<dyn SnsApi>, SinkError> {
        self.client
            .clone()
            .ok_or_else(|| SinkError::Config("client has not been created".to_string()))
    }

    fn topic_ref(&self) -> Result<TopicRef<'_>, SinkError> {
        match (
            non_blank(&self.config.topic_arn),
            non_blank(&self.config.topic_name),
        ) {
            (Some(arn), _) => Ok(TopicRef::Arn(arn)),
            (None, Some(name)) => Ok(TopicRef::Name(name)),
            (None, None) => Err(SinkError::Config(
                "either a topic name or a topic ARN is required".to_string(),
            )),
        }
    }
}

#[async_trait]
impl SinkAdapter for SnsSink {
    fn destination(&self) -> String {
        match self.topic_ref() {
            Ok(TopicRef::Arn(arn)) => format!("SNS topic {}", arn),
            Ok(TopicRef::Name(name)) => format!("SNS topic {}", name),
            Err(_) => "SNS topic (unconfigured)".to_string(),
        }
    }

    async fn create_client(&mut self, _ctx: &SinkContext) -> Result<(), SinkError> {
        self.topic_ref()?;
        if self.client.is_none() {
            let client =
                client::build(&self.config.client, SnsClient::new_with, SnsClient::new)?;
            self.client = Some(Arc::new(RusotoSns(client)));
        }
        Ok(())
    }

    async fn ensure_destination_available(
        &mut self,
        ctx: &SinkContext,
    ) -> Result<(), SinkError> {
        let client = self.client()?;
        let topic = Topic {
            api: client.as_ref(),
            topic: self.topic_ref()?,
            auto_create: self.config.auto_create,
        };
        ensure_available(&topic, ctx).await?;
        let arn = topic
            .find()
            .await?
            .ok_or_else(|| SinkError::NotFound(topic.describe()))?;
        ctx.log.debug(&format!("resolved {} to {}", topic.describe(), arn));
        self.topic_arn = Some(arn);
        Ok(())
    }

    async fn process_batch(
        &mut self,
        batch: Vec<LogMessage>,
        ctx: &SinkContext,
    ) -> Vec<LogMessage> {
        let (client, arn) = match (self.client(), self.topic_arn.as_deref()) {
            (Ok(client), Some(arn)) => (client, arn),
            (Err(err), _) => {
                ctx.log.error("failed to send batch", Some(&err));
                return batch;
            }
            (_, None) => {
                ctx.log.error("failed to send batch: topic is not resolved", None);
                return batch;
            }
        };
        let subject = self.config.subject.as_deref();
        let mut delivered = 0;
        for message in &batch {
            if let Err(err) = client.publish(arn, subject, message.content()).await {
                ctx.log.error("failed to publish message", Some(&err));
                break;
            }
            delivered += 1;
        }
        batch.into_iter().skip(delivered).collect()
    }

    fn effective_size(&self, message: &LogMessage) -> usize {
        message.size()
    }

    fn within_service_limits(&self, batch_bytes: usize, message_count: usize) -> bool {
        batch_bytes < SNS_MAX_MESSAGE_SIZE && message_count <= 1
    }

    fn max_message_size(&self) -> usize {
        SNS_MAX_MESSAGE_SIZE - 1
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SnsWriterFactory;

impl WriterFactory<SnsWriterConfig> for SnsWriterFactory {
    fn new_writer(&self, config: &SnsWriterConfig) -> Box<dyn LogWriter> {
        let config = config.clone().substituted();
        let sink = SnsSink::new(config.clone());
        Box::new(SinkWriter::new(sink, &config.writer))
    }
}

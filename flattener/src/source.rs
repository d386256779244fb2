use async_trait::async_trait;
use common_kafka::context::ChannelContext;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::types::RDKafkaErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to store offset {offset} for {topic}/{partition}: {source}")]
    Commit {
        topic: String,
        partition: i32,
        offset: i64,
        source: KafkaError,
    },
    #[error("failed to pause consumption: {0}")]
    Stop(KafkaError),
    #[error("failed to close consumer: {0}")]
    Close(KafkaError),
}

/// Owned copy of a consumed message, detached from the client's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl RawMessage {
    pub fn key_lossy(&self) -> String {
        self.key
            .as_deref()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default()
    }
}

impl From<&BorrowedMessage<'_>> for RawMessage {
    fn from(message: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: message.topic().to_owned(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
        }
    }
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Waits for the next message. `None` means no message will ever come again.
    async fn recv(&self) -> Option<RawMessage>;

    /// Marks the message, and everything before it on its partition, as processed.
    fn commit(&self, message: &RawMessage) -> Result<(), SourceError>;

    /// Stops the delivery of new messages.
    fn stop(&self) -> Result<(), SourceError>;

    /// Commits the stored offsets. The connection is released when the source is dropped.
    fn close(&self) -> Result<(), SourceError>;
}

/// Consumer side of the broker connection. The connection itself is released when the
/// source is dropped.
pub struct KafkaSource {
    consumer: StreamConsumer<ChannelContext>,
}

impl KafkaSource {
    pub fn new(consumer: StreamConsumer<ChannelContext>) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn recv(&self) -> Option<RawMessage> {
        loop {
            match self.consumer.recv().await {
                Ok(message) => return Some(RawMessage::from(&message)),
                // Consumer errors don't end the stream, they go to the error listener
                Err(e) => self.consumer.context().report_error(e, "consume"),
            }
        }
    }

    fn commit(&self, message: &RawMessage) -> Result<(), SourceError> {
        // The stored offset is the next one to consume
        self.consumer
            .store_offset(&message.topic, message.partition, message.offset + 1)
            .map_err(|source| SourceError::Commit {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                source,
            })
    }

    fn stop(&self) -> Result<(), SourceError> {
        // Pausing keeps the assignment, so the stored offsets can still be committed on close
        let assignment = self.consumer.assignment().map_err(SourceError::Stop)?;
        self.consumer
            .pause(&assignment)
            .map_err(SourceError::Stop)
    }

    fn close(&self) -> Result<(), SourceError> {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => Ok(()),
            // Nothing was stored since the last auto commit
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(e) => Err(SourceError::Close(e)),
        }
    }
}

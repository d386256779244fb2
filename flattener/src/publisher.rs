use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to produce to topic {topic}: {source}")]
    Delivery { topic: String, source: KafkaError },
    #[error("failed to produce to topic {topic} (canceled)")]
    Canceled { topic: String },
    #[error("failed to flush producer: {0}")]
    Flush(KafkaError),
}

/// Where a published payload landed. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Sends one payload and waits for the broker to acknowledge it. No retries.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<Delivery, PublishError>;

    /// Releases the connection, flushing anything still queued.
    fn close(&self) -> Result<(), PublishError>;
}

pub struct KafkaPublisher<C: ClientContext + 'static> {
    producer: FutureProducer<C>,
    flush_timeout: Duration,
}

impl<C: ClientContext + 'static> KafkaPublisher<C> {
    pub fn new(producer: FutureProducer<C>) -> Self {
        Self {
            producer,
            flush_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl<C: ClientContext + 'static> Publisher for KafkaPublisher<C> {
    #[instrument(skip_all, fields(topic = %topic))]
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<Delivery, PublishError> {
        let record: FutureRecord<'_, str, [u8]> = FutureRecord {
            topic,
            partition: None,
            payload: Some(payload),
            key: None,
            timestamp: None,
            headers: None,
        };

        // Queueing never times out by itself, message.timeout.ms bounds the whole delivery
        match self.producer.send(record, Timeout::Never).await {
            Ok((partition, offset)) => {
                info!(topic, partition, offset, "message stored");
                Ok(Delivery {
                    topic: topic.to_owned(),
                    partition,
                    offset,
                })
            }
            Err((KafkaError::Canceled, _)) => Err(PublishError::Canceled {
                topic: topic.to_owned(),
            }),
            Err((source, _)) => Err(PublishError::Delivery {
                topic: topic.to_owned(),
                source,
            }),
        }
    }

    fn close(&self) -> Result<(), PublishError> {
        self.producer
            .flush(self.flush_timeout)
            .map_err(PublishError::Flush)
    }
}

use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::{ClientConfig, ClientContext};
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

pub fn producer_client_config(kafka_hosts: &str, config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", kafka_hosts)
        .set("statistics.interval.ms", "10000")
        // Dropped telemetry can't be recovered, so every send waits on all in-sync replicas
        .set("acks", "all")
        // Records are sent without a key, spread them over the topic's partitions
        .set("partitioner", "random")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}

pub async fn create_kafka_producer<C: ClientContext + 'static>(
    kafka_hosts: &str,
    config: &KafkaConfig,
    context: C,
) -> Result<FutureProducer<C>, KafkaError> {
    let client_config = producer_client_config(kafka_hosts, config);

    debug!("rdkafka configuration: {:?}", client_config);
    let api: FutureProducer<C> = client_config.create_with_context(context)?;

    // "Ping" the Kafka brokers by requesting metadata
    match api
        .client()
        .fetch_metadata(None, Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

use rdkafka::consumer::{Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::ClientConfig;
use tracing::{debug, info};

use crate::config::KafkaConfig;

pub fn consumer_client_config(
    kafka_hosts: &str,
    group_id: &str,
    config: &KafkaConfig,
) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("group.id", group_id)
        .set(
            "auto.offset.reset",
            config.kafka_consumer_offset_reset.to_owned(),
        )
        // Offsets are committed in the background, but only the ones we explicitly stored
        .set("enable.auto.commit", "true")
        .set(
            "auto.commit.interval.ms",
            config.kafka_consumer_auto_commit_interval_ms.to_string(),
        )
        .set("enable.auto.offset.store", "false");

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}

pub fn create_kafka_consumer<C: ConsumerContext + 'static>(
    kafka_hosts: &str,
    group_id: &str,
    topics: &[String],
    config: &KafkaConfig,
    context: C,
) -> Result<StreamConsumer<C>, KafkaError> {
    let client_config = consumer_client_config(kafka_hosts, group_id, config);

    debug!("rdkafka configuration: {:?}", client_config);
    let consumer: StreamConsumer<C> = client_config.create_with_context(context)?;

    let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
    consumer.subscribe(&topics)?;

    info!(topics = ?topics, group_id, "Kafka consumer subscribed");

    Ok(consumer)
}

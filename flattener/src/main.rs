//! Consume telemetry events, flatten their partitions and fan the records out to the
//! destination topics.
use std::sync::Arc;
use std::time::Duration;

use common_kafka::context::ChannelContext;
use common_kafka::kafka_consumer::create_kafka_consumer;
use common_kafka::kafka_producer::create_kafka_producer;
use envconfig::Envconfig;
use tracing::{error, info, warn};

use flattener::config::Config;
use flattener::logging::{setup_tracing, LogTarget};
use flattener::metrics::{serve, setup_metrics_recorder, setup_metrics_router};
use flattener::notifications::{spawn_error_listener, spawn_notification_listener};
use flattener::pipeline::ConsumeLoop;
use flattener::publisher::KafkaPublisher;
use flattener::settings::{load_flatteners_config, load_log_config, LogConfig};
use flattener::source::KafkaSource;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::init_from_env()?;

    let (log_config, log_config_error) = match load_log_config(&config.log_config_path) {
        Ok(log_config) => (log_config, None),
        Err(e) => (LogConfig::default(), Some(e)),
    };
    let (log_target, log_file_error) = match LogTarget::open(&log_config) {
        Ok(target) => (target, None),
        Err(e) => (LogTarget::Stdout, Some(e)),
    };
    setup_tracing(log_target, log_config.log_level);
    if let Some(e) = log_config_error {
        warn!(error = %e, "Failed to load log config, logging to stdout at Info");
    }
    if let Some(e) = log_file_error {
        warn!(
            error = %e,
            path = log_config.log_file_path,
            "Failed to open log file, logging to stdout"
        );
    }
    info!("Starting flattener...");

    let flatteners = load_flatteners_config(&config.flatteners_config_path).inspect_err(|e| {
        error!(error = %e, "Failed to load flatteners config");
    })?;
    info!(
        broker = flatteners.broker_address,
        input_topics = ?flatteners.input_topics,
        destination_topics = ?flatteners.destination_topics,
        group_id = config.kafka_group_id,
        "Configuration loaded"
    );
    if flatteners.destination_topics.is_empty() {
        warn!("No destination topics configured, messages will be committed without publishing");
    }

    let (context, events) = ChannelContext::new();
    let errors = spawn_error_listener(events.errors);
    let notifications = spawn_notification_listener(events.notifications);

    let producer = create_kafka_producer(&flatteners.broker_address, &config.kafka, context.clone())
        .await
        .inspect_err(|e| error!(error = %e, "Failed to create Kafka producer"))?;
    let consumer = create_kafka_consumer(
        &flatteners.broker_address,
        &config.kafka_group_id,
        &flatteners.input_topics,
        &config.kafka,
        context,
    )
    .inspect_err(|e| error!(error = %e, "Failed to create Kafka consumer"))?;

    let recorder_handle = setup_metrics_recorder()?;
    let bind = config.bind();
    tokio::task::spawn(async move {
        let router = setup_metrics_router(recorder_handle);
        if let Err(e) = serve(router, &bind).await {
            error!(error = %e, bind, "Failed to serve metrics");
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received SIGINT"),
            Err(e) => error!(error = %e, "Failed to listen for SIGINT, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    let consume = ConsumeLoop::new(
        Arc::new(KafkaSource::new(consumer)),
        Arc::new(KafkaPublisher::new(producer)),
        flatteners.destination_topics,
    );
    // The loop releases the producer, then the consumer, which closes the broker channels
    consume.run(shutdown_rx).await;

    let listeners = async { tokio::join!(errors, notifications) };
    match tokio::time::timeout(Duration::from_secs(5), listeners).await {
        Ok((errors, notifications)) => info!(
            broker_errors = errors.unwrap_or_default(),
            notifications = notifications.unwrap_or_default(),
            "Flattener shut down"
        ),
        Err(_) => info!("Flattener shut down, broker listeners still draining"),
    }

    Ok(())
}

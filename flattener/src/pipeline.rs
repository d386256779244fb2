//! The consume loop: receive, decode, flatten, publish to every destination, commit.
//!
//! Messages are handled one at a time. Decode and transform failures skip the message
//! without committing it, so it comes back after a restart. Publish failures are logged
//! per destination and the message is committed anyway: a destination that failed does
//! not get the records again.
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::event::{decode_event, encode_records};
use crate::publisher::Publisher;
use crate::source::{MessageSource, RawMessage};
use crate::transform::transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Decode,
    Transform,
    Serialize,
}

impl SkipReason {
    fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Decode => "decode",
            SkipReason::Transform => "transform",
            SkipReason::Serialize => "serialize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Not committed.
    Skipped(SkipReason),
    /// Committed, whatever the number of failed destinations.
    Processed {
        records: usize,
        delivered: usize,
        failed: usize,
    },
}

/// Fields drop in declaration order: the producer is released before the consumer.
pub struct ConsumeLoop {
    publisher: Arc<dyn Publisher>,
    source: Arc<dyn MessageSource>,
    destinations: Vec<String>,
}

impl ConsumeLoop {
    pub fn new(
        source: Arc<dyn MessageSource>,
        publisher: Arc<dyn Publisher>,
        destinations: Vec<String>,
    ) -> Self {
        Self {
            publisher,
            source,
            destinations,
        }
    }

    /// Runs until `shutdown` flips (or its sender is dropped), or until the source closes,
    /// then closes and releases the broker clients.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(destinations = ?self.destinations, "Starting consume loop");

        loop {
            if *shutdown.borrow_and_update() {
                info!("Shutdown signal received, stopping consume loop");
                break;
            }

            // Whichever is ready first wins, the message in hand is always processed in full
            let message = tokio::select! {
                _ = shutdown.changed() => {
                    info!("Shutdown signal received, stopping consume loop");
                    break;
                }
                message = self.source.recv() => message,
            };

            let Some(message) = message else {
                warn!("Message source closed, stopping consume loop");
                break;
            };

            self.process(&message).await;
        }

        self.shutdown();
    }

    pub async fn process(&self, message: &RawMessage) -> MessageOutcome {
        metrics::counter!("flattener_messages_received_total").increment(1);
        debug!(
            topic = message.topic,
            partition = message.partition,
            offset = message.offset,
            key = message.key_lossy(),
            "Received message"
        );

        let event = match decode_event(message.payload.as_deref()) {
            Ok(event) => event,
            Err(e) => return self.skip(message, SkipReason::Decode, &e),
        };

        let records = match transform(event.as_ref()) {
            Ok(records) => records,
            Err(e) => return self.skip(message, SkipReason::Transform, &e),
        };
        let record_count = records.len();
        metrics::counter!("flattener_records_flattened_total").increment(record_count as u64);

        let payload = match encode_records(records) {
            Ok(payload) => payload,
            Err(e) => return self.skip(message, SkipReason::Serialize, &e),
        };

        let mut delivered = 0;
        let mut failed = 0;
        for topic in &self.destinations {
            match self.publisher.publish(topic, &payload).await {
                Ok(_) => {
                    delivered += 1;
                    metrics::counter!("flattener_publish_total", "topic" => topic.clone())
                        .increment(1);
                }
                Err(e) => {
                    failed += 1;
                    metrics::counter!("flattener_publish_errors_total", "topic" => topic.clone())
                        .increment(1);
                    error!(
                        error = %e,
                        topic,
                        source_topic = message.topic,
                        source_partition = message.partition,
                        source_offset = message.offset,
                        "Failed to publish flattened records"
                    );
                }
            }
        }

        if let Err(e) = self.source.commit(message) {
            metrics::counter!("flattener_commit_errors_total").increment(1);
            warn!(error = %e, "Failed to commit offset");
        }

        MessageOutcome::Processed {
            records: record_count,
            delivered,
            failed,
        }
    }

    fn skip(
        &self,
        message: &RawMessage,
        reason: SkipReason,
        error: &dyn std::error::Error,
    ) -> MessageOutcome {
        metrics::counter!("flattener_messages_skipped_total", "reason" => reason.as_str())
            .increment(1);
        warn!(
            error = %error,
            reason = reason.as_str(),
            topic = message.topic,
            partition = message.partition,
            offset = message.offset,
            payload = %String::from_utf8_lossy(message.payload.as_deref().unwrap_or_default()),
            "Skipping message"
        );
        MessageOutcome::Skipped(reason)
    }

    /// Best effort teardown: new deliveries stop first, then the producer is flushed and
    /// released, then the consumer commits its last offsets and is released.
    fn shutdown(self) {
        let ConsumeLoop { publisher, source, .. } = self;

        if let Err(e) = source.stop() {
            info!(error = %e, "Failed to stop consuming");
        }
        match publisher.close() {
            Ok(()) => info!("Producer closed"),
            Err(e) => info!(error = %e, "Failed to close producer"),
        }
        drop(publisher);
        match source.close() {
            Ok(()) => info!("Consumer closed"),
            Err(e) => info!(error = %e, "Failed to close consumer"),
        }
        drop(source);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rdkafka::error::KafkaError;

    use super::*;
    use crate::event::{decode_records, FlattenedRecord};
    use crate::publisher::{Delivery, PublishError};
    use crate::source::SourceError;

    const SCENARIO_A: &str = r#"{
        "inputTopic": "inputTopic",
        "destinationTopic": "destinationTopic",
        "Action": "something",
        "Message": {
            "Partitions": [
                {"name": "c", "driveType": 3, "metric": {"usedSpaceBytes": 342734824, "totalSpaceBytes": 34273482423}},
                {"name": "d", "driveType": 3, "metric": {"usedSpaceBytes": 942734824, "totalSpaceBytes": 904273482423}}
            ],
            "CreateAtTimeUTC": "2017-08-07T08:38:43.3059476Z"
        }
    }"#;

    #[derive(Default)]
    struct FakeSource {
        messages: Mutex<VecDeque<RawMessage>>,
        committed: Mutex<Vec<i64>>,
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail_commits: bool,
        pending_when_drained: bool,
    }

    impl FakeSource {
        fn with(messages: Vec<RawMessage>) -> Self {
            Self {
                messages: Mutex::new(messages.into()),
                committed: Default::default(),
                calls: Default::default(),
                fail_commits: Default::default(),
                pending_when_drained: Default::default(),
            }
        }

        fn committed(&self) -> Vec<i64> {
            self.committed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSource for FakeSource {
        async fn recv(&self) -> Option<RawMessage> {
            let next = self.messages.lock().unwrap().pop_front();
            match next {
                Some(message) => Some(message),
                None if self.pending_when_drained => std::future::pending().await,
                None => None,
            }
        }

        fn commit(&self, message: &RawMessage) -> Result<(), SourceError> {
            if self.fail_commits {
                return Err(SourceError::Commit {
                    topic: message.topic.clone(),
                    partition: message.partition,
                    offset: message.offset,
                    source: KafkaError::Canceled,
                });
            }
            self.committed.lock().unwrap().push(message.offset);
            Ok(())
        }

        fn stop(&self) -> Result<(), SourceError> {
            self.calls.lock().unwrap().push("stop");
            Ok(())
        }

        fn close(&self) -> Result<(), SourceError> {
            self.calls.lock().unwrap().push("close consumer");
            Err(SourceError::Close(KafkaError::Canceled))
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push("consumer released");
            }
        }
    }

    #[derive(Default)]
    struct FakePublisher {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        unavailable: HashSet<String>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl FakePublisher {
        fn unavailable(topics: &[&str]) -> Self {
            Self {
                unavailable: topics.iter().map(|t| t.to_string()).collect(),
                sent: Default::default(),
                calls: Default::default(),
            }
        }

        fn topics(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(topic, _)| topic.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<Delivery, PublishError> {
            // Attempts are recorded even when the broker is "down"
            let mut sent = self.sent.lock().unwrap();
            sent.push((topic.to_string(), payload.to_vec()));

            if self.unavailable.contains(topic) {
                return Err(PublishError::Delivery {
                    topic: topic.to_string(),
                    source: KafkaError::Canceled,
                });
            }
            Ok(Delivery {
                topic: topic.to_string(),
                partition: 0,
                offset: sent.len() as i64,
            })
        }

        fn close(&self) -> Result<(), PublishError> {
            self.calls.lock().unwrap().push("close producer");
            Ok(())
        }
    }

    impl Drop for FakePublisher {
        fn drop(&mut self) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push("producer released");
            }
        }
    }

    fn message(offset: i64, payload: Option<&str>) -> RawMessage {
        RawMessage {
            topic: "test1".to_string(),
            partition: 0,
            offset,
            key: None,
            payload: payload.map(|p| p.as_bytes().to_vec()),
        }
    }

    fn destinations(topics: &[&str]) -> Vec<String> {
        topics.iter().map(|t| t.to_string()).collect()
    }

    fn pipeline(
        source: &Arc<FakeSource>,
        publisher: &Arc<FakePublisher>,
        topics: &[&str],
    ) -> ConsumeLoop {
        ConsumeLoop::new(source.clone(), publisher.clone(), destinations(topics))
    }

    #[tokio::test]
    async fn publishes_one_combined_payload_per_destination() {
        let source = Arc::new(FakeSource::default());
        let publisher = Arc::new(FakePublisher::default());
        let consume = pipeline(&source, &publisher, &["test2", "test3"]);

        let outcome = consume.process(&message(7, Some(SCENARIO_A))).await;

        assert_eq!(
            outcome,
            MessageOutcome::Processed {
                records: 2,
                delivered: 2,
                failed: 0
            }
        );
        assert_eq!(publisher.topics(), vec!["test2", "test3"]);
        assert_eq!(source.committed(), vec![7]);

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent[0].1, sent[1].1);
        let records = decode_records(&sent[0].1).unwrap();
        assert_eq!(
            records,
            vec![
                FlattenedRecord {
                    name: "c".to_string(),
                    drive_type: 3,
                    used_space_bytes: 342734824,
                    total_space_bytes: 34273482423,
                    created_at_utc: "2017-08-07T08:38:43.3059476Z".to_string(),
                },
                FlattenedRecord {
                    name: "d".to_string(),
                    drive_type: 3,
                    used_space_bytes: 942734824,
                    total_space_bytes: 904273482423,
                    created_at_utc: "2017-08-07T08:38:43.3059476Z".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_skipped_without_commit() {
        let source = Arc::new(FakeSource::default());
        let publisher = Arc::new(FakePublisher::default());
        let consume = pipeline(&source, &publisher, &["test2"]);

        let outcome = consume.process(&message(1, Some("{not json"))).await;

        assert_eq!(outcome, MessageOutcome::Skipped(SkipReason::Decode));
        assert!(publisher.topics().is_empty());
        assert!(source.committed().is_empty());
    }

    #[tokio::test]
    async fn empty_payloads_fail_the_transform_and_are_skipped() {
        let source = Arc::new(FakeSource::default());
        let publisher = Arc::new(FakePublisher::default());
        let consume = pipeline(&source, &publisher, &["test2"]);

        assert_eq!(
            consume.process(&message(1, None)).await,
            MessageOutcome::Skipped(SkipReason::Transform)
        );
        assert_eq!(
            consume.process(&message(2, Some("null"))).await,
            MessageOutcome::Skipped(SkipReason::Transform)
        );
        assert!(publisher.topics().is_empty());
        assert!(source.committed().is_empty());
    }

    #[tokio::test]
    async fn unavailable_destination_does_not_block_the_others_or_the_commit() {
        let source = Arc::new(FakeSource::default());
        let publisher = Arc::new(FakePublisher::unavailable(&["test2"]));
        let consume = pipeline(&source, &publisher, &["test2", "test3"]);

        let outcome = consume.process(&message(3, Some(SCENARIO_A))).await;

        assert_eq!(
            outcome,
            MessageOutcome::Processed {
                records: 2,
                delivered: 1,
                failed: 1
            }
        );
        assert_eq!(publisher.topics(), vec!["test2", "test3"]);
        assert_eq!(source.committed(), vec![3]);
    }

    #[tokio::test]
    async fn event_without_partitions_still_publishes_and_commits() {
        let source = Arc::new(FakeSource::default());
        let publisher = Arc::new(FakePublisher::default());
        let consume = pipeline(&source, &publisher, &["test2"]);

        let outcome = consume
            .process(&message(
                9,
                Some(r#"{"Message": {"Partitions": [], "CreateAtTimeUTC": "2017-08-07T08:38:43Z"}}"#),
            ))
            .await;

        assert_eq!(
            outcome,
            MessageOutcome::Processed {
                records: 0,
                delivered: 1,
                failed: 0
            }
        );
        assert_eq!(publisher.sent.lock().unwrap()[0].1, b"[]");
        assert_eq!(source.committed(), vec![9]);
    }

    #[tokio::test]
    async fn commit_failures_are_not_fatal() {
        let source = Arc::new(FakeSource {
            fail_commits: true,
            messages: Default::default(),
            committed: Default::default(),
            calls: Default::default(),
            pending_when_drained: Default::default(),
        });
        let publisher = Arc::new(FakePublisher::default());
        let consume = pipeline(&source, &publisher, &["test2"]);

        let outcome = consume.process(&message(4, Some(SCENARIO_A))).await;

        assert!(matches!(outcome, MessageOutcome::Processed { delivered: 1, .. }));
    }

    #[tokio::test]
    async fn loop_moves_past_bad_messages_until_the_source_closes() {
        let source = Arc::new(FakeSource::with(vec![
            message(0, Some(SCENARIO_A)),
            message(1, Some("garbage")),
            message(2, None),
            message(3, Some(SCENARIO_A)),
        ]));
        let publisher = Arc::new(FakePublisher::default());
        let consume = pipeline(&source, &publisher, &["test2"]);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        consume.run(shutdown_rx).await;

        assert_eq!(source.committed(), vec![0, 3]);
        assert_eq!(publisher.topics(), vec!["test2", "test2"]);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_loop_and_closes_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let source = Arc::new(FakeSource {
            messages: Mutex::new(vec![message(0, Some(SCENARIO_A))].into()),
            calls: calls.clone(),
            pending_when_drained: true,
            committed: Default::default(),
            fail_commits: Default::default(),
        });
        let publisher = Arc::new(FakePublisher {
            calls: calls.clone(),
            sent: Default::default(),
            unavailable: Default::default(),
        });
        let consume = pipeline(&source, &publisher, &["test2"]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(consume.run(shutdown_rx));

        // The first message is picked up before the loop blocks on the drained source
        while source.committed().is_empty() {
            tokio::task::yield_now().await;
        }
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(source.committed(), vec![0]);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["stop", "close producer", "close consumer"]
        );
    }

    #[tokio::test]
    async fn producer_is_released_before_the_consumer() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        // The loop holds the only handles, so teardown is what releases them
        let consume = ConsumeLoop::new(
            Arc::new(FakeSource {
                calls: calls.clone(),
                messages: Default::default(),
                committed: Default::default(),
                fail_commits: Default::default(),
                pending_when_drained: Default::default(),
            }),
            Arc::new(FakePublisher {
                calls: calls.clone(),
                sent: Default::default(),
                unavailable: Default::default(),
            }),
            destinations(&["test2"]),
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        consume.run(shutdown_rx).await;

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "stop",
                "close producer",
                "producer released",
                "close consumer",
                "consumer released"
            ]
        );
    }

    #[tokio::test]
    async fn already_signalled_shutdown_processes_nothing() {
        let source = Arc::new(FakeSource::with(vec![message(0, Some(SCENARIO_A))]));
        let publisher = Arc::new(FakePublisher::default());
        let consume = pipeline(&source, &publisher, &["test2"]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        consume.run(shutdown_rx).await;

        assert!(publisher.topics().is_empty());
        assert!(source.committed().is_empty());
    }
}

use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::{ClientContext, TopicPartitionList};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// An asynchronous error reported by the client, outside of any send or receive call.
#[derive(Debug)]
pub struct BrokerError {
    pub error: KafkaError,
    pub reason: String,
}

/// A topic partition touched by a rebalance or a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Assigned(Vec<TopicPartition>),
    Revoked(Vec<TopicPartition>),
    RebalanceFailed(String),
    Committed(Vec<TopicPartition>),
    CommitFailed(String),
}

/// Receiving halves of the channels fed by a [`ChannelContext`].
pub struct BrokerEvents {
    pub errors: UnboundedReceiver<BrokerError>,
    pub notifications: UnboundedReceiver<Notification>,
}

/// Client context that forwards librdkafka callbacks onto channels, so that they can be
/// observed by tasks that don't share anything with the consume loop.
#[derive(Clone)]
pub struct ChannelContext {
    errors: UnboundedSender<BrokerError>,
    notifications: UnboundedSender<Notification>,
}

impl ChannelContext {
    pub fn new() -> (Self, BrokerEvents) {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();

        (
            Self {
                errors: errors_tx,
                notifications: notifications_tx,
            },
            BrokerEvents {
                errors: errors_rx,
                notifications: notifications_rx,
            },
        )
    }

    pub fn report_error(&self, error: KafkaError, reason: &str) {
        let event = BrokerError {
            error,
            reason: reason.to_owned(),
        };
        if self.errors.send(event).is_err() {
            debug!("error listener is gone, dropping broker error");
        }
    }

    pub fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("notification listener is gone, dropping notification");
        }
    }
}

pub fn topic_partitions(list: &TopicPartitionList) -> Vec<TopicPartition> {
    list.elements()
        .into_iter()
        .map(|elem| TopicPartition {
            topic: elem.topic().to_owned(),
            partition: elem.partition(),
        })
        .collect()
}

impl ClientContext for ChannelContext {
    fn error(&self, error: KafkaError, reason: &str) {
        self.report_error(error, reason);
    }
}

impl ConsumerContext for ChannelContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        if let Some(notification) = before_rebalance(rebalance) {
            self.notify(notification);
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        if let Some(notification) = after_rebalance(rebalance) {
            self.notify(notification);
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(_) => self.notify(Notification::Committed(topic_partitions(offsets))),
            Err(e) => self.notify(Notification::CommitFailed(e.to_string())),
        }
    }
}

// rdkafka calls both hooks for every rebalance event, so each variant is reported by one
// of them only: revocations before they happen, assignments and failures once done.
fn before_rebalance(rebalance: &Rebalance) -> Option<Notification> {
    match rebalance {
        Rebalance::Revoke(partitions) => Some(Notification::Revoked(topic_partitions(partitions))),
        Rebalance::Assign(_) | Rebalance::Error(_) => None,
    }
}

fn after_rebalance(rebalance: &Rebalance) -> Option<Notification> {
    match rebalance {
        Rebalance::Assign(partitions) => Some(Notification::Assigned(topic_partitions(partitions))),
        Rebalance::Error(e) => Some(Notification::RebalanceFailed(e.to_string())),
        Rebalance::Revoke(_) => None,
    }
}

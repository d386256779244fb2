use common_kafka::context::{BrokerError, Notification};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub fn spawn_error_listener(mut errors: UnboundedReceiver<BrokerError>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0;
        while let Some(BrokerError { error, reason }) = errors.recv().await {
            seen += 1;
            metrics::counter!("flattener_broker_errors_total").increment(1);
            error!(error = %error, reason = %reason, "Error");
        }
        debug!("broker error channel closed");
        seen
    })
}

pub fn spawn_notification_listener(
    mut notifications: UnboundedReceiver<Notification>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0;
        while let Some(notification) = notifications.recv().await {
            seen += 1;
            log_notification(&notification);
        }
        debug!("broker notification channel closed");
        seen
    })
}

fn log_notification(notification: &Notification) {
    match notification {
        Notification::Assigned(partitions) => {
            info!(partitions = ?partitions, "Rebalanced: partitions assigned")
        }
        Notification::Revoked(partitions) => {
            info!(partitions = ?partitions, "Rebalanced: partitions revoked")
        }
        Notification::RebalanceFailed(reason) => warn!(reason = %reason, "Rebalance failed"),
        Notification::Committed(partitions) => {
            debug!(partitions = partitions.len(), "Offsets committed")
        }
        Notification::CommitFailed(reason) => warn!(reason = %reason, "Offset commit failed"),
    }
}

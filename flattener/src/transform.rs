use thiserror::Error;

use crate::event::{FlattenedRecord, IncomingEvent};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransformError {
    #[error("incoming message is empty")]
    EmptyInput,
}

/// Flattens an event into one record per partition, in partition order. Values are
/// copied as they are: reshaping only, no validation.
pub fn transform(event: Option<&IncomingEvent>) -> Result<Vec<FlattenedRecord>, TransformError> {
    let event = event.ok_or(TransformError::EmptyInput)?;
    let envelope = &event.message;

    Ok(envelope
        .partitions
        .iter()
        .map(|partition| FlattenedRecord {
            name: partition.name.clone(),
            drive_type: partition.drive_type,
            used_space_bytes: partition.metric.used_space_bytes,
            total_space_bytes: partition.metric.total_space_bytes,
            created_at_utc: envelope.created_at_utc.clone(),
        })
        .collect())
}

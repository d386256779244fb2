use serde::{Deserialize, Serialize};

/// Telemetry event as produced upstream. Missing fields decode to their zero value.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IncomingEvent {
    #[serde(rename = "inputTopic")]
    pub input_topic: String,
    /// Informational only, destinations are taken from the configuration.
    #[serde(rename = "destinationTopic")]
    pub destination_topic: String,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Message")]
    pub message: Envelope,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Envelope {
    #[serde(rename = "Partitions")]
    pub partitions: Vec<Partition>,
    /// Kept verbatim, never parsed.
    #[serde(rename = "CreateAtTimeUTC")]
    pub created_at_utc: String,
}

/// A disk partition, not a Kafka one.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Partition {
    pub name: String,
    #[serde(rename = "driveType")]
    pub drive_type: i64,
    pub metric: Metric,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Metric {
    #[serde(rename = "usedSpaceBytes")]
    pub used_space_bytes: i64,
    #[serde(rename = "totalSpaceBytes")]
    pub total_space_bytes: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlattenedRecord {
    pub name: String,
    #[serde(rename = "driveType")]
    pub drive_type: i64,
    #[serde(rename = "usedSpaceBytes")]
    pub used_space_bytes: i64,
    #[serde(rename = "totalSpaceBytes")]
    pub total_space_bytes: i64,
    #[serde(rename = "createAtTimeUTC")]
    pub created_at_utc: String,
}

/// Wire wrapper around one record on the destination topics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DestinationMessage {
    #[serde(rename = "Data")]
    pub data: FlattenedRecord,
}

impl From<FlattenedRecord> for DestinationMessage {
    fn from(data: FlattenedRecord) -> Self {
        Self { data }
    }
}

/// Decodes a consumed payload. A missing payload or a JSON `null` yields `None`.
pub fn decode_event(payload: Option<&[u8]>) -> Result<Option<IncomingEvent>, serde_json::Error> {
    match payload {
        Some(bytes) => serde_json::from_slice(bytes),
        None => Ok(None),
    }
}

/// Serializes all the records of one source event into a single JSON array.
pub fn encode_records(records: Vec<FlattenedRecord>) -> Result<Vec<u8>, serde_json::Error> {
    let messages: Vec<DestinationMessage> =
        records.into_iter().map(DestinationMessage::from).collect();
    serde_json::to_vec(&messages)
}

pub fn decode_records(payload: &[u8]) -> Result<Vec<FlattenedRecord>, serde_json::Error> {
    let messages: Vec<DestinationMessage> = serde_json::from_slice(payload)?;
    Ok(messages.into_iter().map(|m| m.data).collect())
}

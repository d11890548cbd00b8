//! Stream names, subjects, and payload shapes for the saga event bus.
//!
//! Both services serialize these with `serde_json`; the payloads are the
//! whole wire contract, so changes here are cross-service breaking changes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable stream carrying basket lifecycle events.
pub const TRANSACTION_STREAM: &str = "TRANSACTION_STREAM";
/// Durable stream buffering raw provider webhooks.
pub const WEBHOOK_NOTIFY_STREAM: &str = "WEBHOOK_NOTIFY_STREAM";

pub const SUBJECT_TRANSACTION_COMMITTED: &str = "transaction.committed";
pub const SUBJECT_TRANSACTION_SETTLED: &str = "transaction.settled";
pub const SUBJECT_TRANSACTION_CANCELED: &str = "transaction.canceled";
pub const SUBJECT_TRANSACTION_EXPIRED: &str = "transaction.expired";
pub const SUBJECT_WEBHOOK_NOTIFY: &str = "webhook.notify";

pub const TRANSACTION_SUBJECTS: [&str; 4] = [
    SUBJECT_TRANSACTION_COMMITTED,
    SUBJECT_TRANSACTION_SETTLED,
    SUBJECT_TRANSACTION_CANCELED,
    SUBJECT_TRANSACTION_EXPIRED,
];

/// Lifecycle stage carried in a `transaction.*` event body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionEventStatus {
    #[serde(rename = "COMMITTED")]
    Committed,
    #[serde(rename = "SETTLED")]
    Settled,
    #[serde(rename = "CANCELED")]
    Canceled,
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl TransactionEventStatus {
    pub fn subject(&self) -> &'static str {
        match self {
            TransactionEventStatus::Committed => SUBJECT_TRANSACTION_COMMITTED,
            TransactionEventStatus::Settled => SUBJECT_TRANSACTION_SETTLED,
            TransactionEventStatus::Canceled => SUBJECT_TRANSACTION_CANCELED,
            TransactionEventStatus::Expired => SUBJECT_TRANSACTION_EXPIRED,
        }
    }
}

/// Body of every `transaction.*` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub transaction_id: Uuid,
    pub status: TransactionEventStatus,
}

impl TransactionEvent {
    pub fn new(transaction_id: Uuid, status: TransactionEventStatus) -> Self {
        Self {
            transaction_id,
            status,
        }
    }
}

/// Body of a `webhook.notify` message: the provider fields the reconciler
/// needs plus the verbatim request body for signature audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotifyEvent {
    pub transaction_status: String,
    pub status_code: String,
    pub signature_key: String,
    #[serde(default)]
    pub settlement_time: Option<String>,
    pub order_id: Uuid,
    pub gross_amount: String,
    #[serde(with = "serde_bytes_base64")]
    pub body: Vec<u8>,
}

/// Raw webhook bytes travel base64-encoded inside the JSON event body.
mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_event_wire_shape() {
        let id = Uuid::new_v4();
        let event = TransactionEvent::new(id, TransactionEventStatus::Canceled);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["transaction_id"], id.to_string());
        assert_eq!(json["status"], "CANCELED");
    }

    #[test]
    fn status_subjects_are_stream_members() {
        for status in [
            TransactionEventStatus::Committed,
            TransactionEventStatus::Settled,
            TransactionEventStatus::Canceled,
            TransactionEventStatus::Expired,
        ] {
            assert!(TRANSACTION_SUBJECTS.contains(&status.subject()));
        }
    }

    #[test]
    fn webhook_event_round_trips_raw_body() {
        let raw = br#"{"order_id":"x","transaction_status":"settlement"}"#.to_vec();
        let event = WebhookNotifyEvent {
            transaction_status: "settlement".into(),
            status_code: "200".into(),
            signature_key: "abc".into(),
            settlement_time: Some("2026-07-01 10:00:00".into()),
            order_id: Uuid::new_v4(),
            gross_amount: "450".into(),
            body: raw.clone(),
        };
        let bytes = serde_json::to_vec(&event).unwrap();
        let back: WebhookNotifyEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.body, raw);
        assert_eq!(back.transaction_status, "settlement");
    }
}

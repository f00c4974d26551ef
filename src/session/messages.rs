// src/session/messages.rs
//
// JSON wire envelope shared by both devices:
//
//   { "type": <tag>, "sessionId": .., "senderId": .., "seq": .., ..payload }
//
// Nanosecond fields travel as decimal strings; JSON numbers cannot carry a
// full 64-bit nanosecond value without precision loss.

use crate::types::Role;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaceMessage {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "senderId")]
    pub sender_id: String,
    pub seq: u64,
    #[serde(flatten)]
    pub body: MessageBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MessageBody {
    #[serde(rename = "syncPing")]
    SyncPing {
        #[serde(with = "nanos_str")]
        t1: i64,
    },
    #[serde(rename = "syncPong")]
    SyncPong {
        #[serde(with = "nanos_str")]
        t1: i64,
        #[serde(with = "nanos_str")]
        t2: i64,
        #[serde(with = "nanos_str")]
        t3: i64,
    },
    #[serde(rename = "roleConfirm")]
    RoleConfirm { role: Role },
    #[serde(rename = "ready")]
    Ready { role: Role },
    #[serde(rename = "startEvent")]
    StartEvent {
        #[serde(rename = "tStart", with = "nanos_str")]
        t_start: i64,
    },
    #[serde(rename = "finishResult")]
    FinishResult {
        #[serde(rename = "splitNanos", with = "nanos_str")]
        split_nanos: i64,
        #[serde(rename = "uncertaintyMs")]
        uncertainty_ms: f64,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat {},
}

impl RaceMessage {
    pub fn encode(&self) -> String {
        // the envelope contains no non-serializable types
        serde_json::to_string(self).expect("race message serializes")
    }

    /// None for anything that does not parse as a well-formed envelope,
    /// including unparsable nanosecond strings.
    pub fn decode(payload: &str) -> Option<Self> {
        serde_json::from_str(payload).ok()
    }
}

/// i64 nanoseconds as decimal strings on the wire.
mod nanos_str {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<i64>().map_err(serde::de::Error::custom)
    }
}

//! Wire protocol between the relay and its socket clients.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": <payload>}`.
//! Events without a payload accept `{}`, `null`, or no `data` at all.

use crate::id::ConnectionId;
use crate::model::{BeaconMessage, BeaconNode, GeneratedNarrative, Location};
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum InboundEvent {
    RegisterNodeHead {
        device_name: String,
    },
    RegisterBeacon {
        device_name: String,
        #[serde(default)]
        location: Option<Location>,
    },
    BeaconMessage {
        message: String,
        #[serde(default)]
        location: Option<Location>,
    },
    GetNarratives(Empty),
    GetBeaconStatus(Empty),
}

impl InboundEvent {
    /// Parse one text frame.
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::RegisterNodeHead { .. } => "register-node-head",
            InboundEvent::RegisterBeacon { .. } => "register-beacon",
            InboundEvent::BeaconMessage { .. } => "beacon-message",
            InboundEvent::GetNarratives(_) => "get-narratives",
            InboundEvent::GetBeaconStatus(_) => "get-beacon-status",
        }
    }
}

/// Payload of query events that carry no data.
///
/// Serializes as `{}`; deserializes from `{}`, `null`, or a missing `data`.
/// Keys inside the object are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Empty;

impl Serialize for Empty {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

impl<'de> Deserialize<'de> for Empty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EmptyVisitor;

        impl<'de> Visitor<'de> for EmptyVisitor {
            type Value = Empty;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an empty object or null")
            }

            fn visit_none<E: de::Error>(self) -> Result<Empty, E> {
                Ok(Empty)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Empty, E> {
                Ok(Empty)
            }

            fn visit_some<S>(self, deserializer: S) -> Result<Empty, S::Error>
            where
                S: Deserializer<'de>,
            {
                deserializer.deserialize_any(EmptyVisitor)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Empty, A::Error> {
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                Ok(Empty)
            }
        }

        // A missing `data` only answers `deserialize_option`.
        deserializer.deserialize_option(EmptyVisitor)
    }
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Reply to a node head registration.
    NodeHeadRegistered(NodeHeadRegistered),
    /// Reply to a beacon registration.
    BeaconRegistered(BeaconRegistered),
    /// Pushed to the node head when a beacon registers; carries the raw record.
    #[serde(rename = "beacon-registered")]
    BeaconJoined(BeaconNode),
    /// A beacon message forwarded to the node head.
    BeaconMessageReceived(ForwardedMessage),
    NarrativeGenerated(NarrativeDelivery),
    BeaconDisconnected(BeaconDisconnected),
    Error(ErrorPayload),
    NarrativesList(Vec<GeneratedNarrative>),
    BeaconStatus(BeaconStatus),
}

impl OutboundEvent {
    /// Serialize to one text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::NodeHeadRegistered(_) => "node-head-registered",
            OutboundEvent::BeaconRegistered(_) | OutboundEvent::BeaconJoined(_) => {
                "beacon-registered"
            }
            OutboundEvent::BeaconMessageReceived(_) => "beacon-message-received",
            OutboundEvent::NarrativeGenerated(_) => "narrative-generated",
            OutboundEvent::BeaconDisconnected(_) => "beacon-disconnected",
            OutboundEvent::Error(_) => "error",
            OutboundEvent::NarrativesList(_) => "narratives-list",
            OutboundEvent::BeaconStatus(_) => "beacon-status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHeadRegistered {
    pub success: bool,
    pub node_id: ConnectionId,
    pub active_beacons: Vec<BeaconNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconRegistered {
    pub success: bool,
    pub node_id: ConnectionId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedMessage {
    #[serde(flatten)]
    pub message: BeaconMessage,
    pub device_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeDelivery {
    pub id: String,
    pub original_message: String,
    pub narrative: String,
    pub timestamp: DateTime<Utc>,
    pub device_name: String,
}

impl NarrativeDelivery {
    pub fn new(narrative: &GeneratedNarrative, device_name: impl Into<String>) -> Self {
        Self {
            id: narrative.id.clone(),
            original_message: narrative.original_message.clone(),
            narrative: narrative.narrative.clone(),
            timestamp: narrative.timestamp,
            device_name: device_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconDisconnected {
    pub node_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconStatus {
    pub node_head_id: Option<ConnectionId>,
    pub active_beacons: Vec<BeaconNode>,
    pub total_narratives: usize,
}

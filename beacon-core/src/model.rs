//! Records shared by the registry, the narrative store and the wire protocol.

use crate::id::ConnectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A geographic point reported by a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A registered beacon connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconNode {
    pub id: ConnectionId,
    pub device_name: String,
    /// Peer address as reported by the transport.
    pub address: String,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// A message submitted by a beacon. Lives only for the duration of one relay call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconMessage {
    pub node_id: ConnectionId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// Where the narrative text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeSource {
    /// Produced by the remote generative model.
    Model,
    /// Produced by the local template after the model call failed.
    Fallback,
}

/// A narrative generated from a beacon message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedNarrative {
    pub id: String,
    pub original_message: String,
    pub narrative: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub source: NarrativeSource,
}

/// Whether a node head is connected, and which one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHeadStatus {
    pub is_active: bool,
    pub node_id: Option<ConnectionId>,
}

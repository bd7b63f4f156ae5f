//! Connection registry: the node-head slot and the beacon table.
//!
//! The registry is the only owner of [`BeaconNode`] records. It performs no
//! I/O; notifying peers about changes is the relay's job.

use crate::id::ConnectionId;
use crate::model::{BeaconNode, Location, NodeHeadStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The role a connection took when it registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    NodeHead,
    Beacon,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::NodeHead => write!(f, "node head"),
            Role::Beacon => write!(f, "beacon node"),
        }
    }
}

/// Errors from registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Connection already registered as {held}; cannot register as {requested}")]
    RoleConflict {
        connection: ConnectionId,
        held: Role,
        requested: Role,
    },
}

/// What [`ConnectionRegistry::remove_connection`] cleaned up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Removal {
    pub was_node_head: bool,
    pub removed_beacon: Option<BeaconNode>,
}

#[derive(Debug, Clone)]
struct NodeHead {
    id: ConnectionId,
    device_name: String,
}

/// Tracks the active node head and every registered beacon.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    node_head: Option<NodeHead>,
    beacons: HashMap<ConnectionId, BeaconNode>,
    /// Registration order of `beacons`, so listings are stable.
    beacon_order: Vec<ConnectionId>,
    roles: HashMap<ConnectionId, Role>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `id` the node head, replacing any previous head.
    ///
    /// Returns the current beacons so the new head can bootstrap its view.
    pub fn register_node_head(
        &mut self,
        id: ConnectionId,
        device_name: impl Into<String>,
    ) -> Result<Vec<BeaconNode>, RegistryError> {
        self.claim_role(id, Role::NodeHead)?;
        self.node_head = Some(NodeHead {
            id,
            device_name: device_name.into(),
        });
        Ok(self.list_beacons())
    }

    /// Create or replace the beacon entry for `id`.
    pub fn register_beacon(
        &mut self,
        id: ConnectionId,
        device_name: impl Into<String>,
        address: impl Into<String>,
        location: Option<Location>,
    ) -> Result<BeaconNode, RegistryError> {
        self.claim_role(id, Role::Beacon)?;

        let node = BeaconNode {
            id,
            device_name: device_name.into(),
            address: address.into(),
            last_seen: Utc::now(),
            is_active: true,
            location,
        };

        if self.beacons.insert(id, node.clone()).is_none() {
            self.beacon_order.push(id);
        }
        Ok(node)
    }

    /// Forget everything about `id`.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Removal {
        self.roles.remove(&id);

        let was_node_head = self.node_head.as_ref().is_some_and(|head| head.id == id);
        if was_node_head {
            self.node_head = None;
        }

        let removed_beacon = self.beacons.remove(&id);
        if removed_beacon.is_some() {
            self.beacon_order.retain(|b| *b != id);
        }

        Removal {
            was_node_head,
            removed_beacon,
        }
    }

    /// Refresh `last_seen` for a beacon. Returns the updated record.
    pub fn touch(&mut self, id: ConnectionId) -> Option<&BeaconNode> {
        let node = self.beacons.get_mut(&id)?;
        node.last_seen = Utc::now();
        Some(node)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&BeaconNode> {
        self.beacons.get(&id)
    }

    pub fn role_of(&self, id: ConnectionId) -> Option<Role> {
        self.roles.get(&id).copied()
    }

    /// All registered beacons in registration order.
    pub fn list_beacons(&self) -> Vec<BeaconNode> {
        self.beacon_order
            .iter()
            .filter_map(|id| self.beacons.get(id))
            .cloned()
            .collect()
    }

    pub fn beacon_count(&self) -> usize {
        self.beacons.len()
    }

    pub fn node_head(&self) -> Option<ConnectionId> {
        self.node_head.as_ref().map(|head| head.id)
    }

    pub fn node_head_name(&self) -> Option<&str> {
        self.node_head.as_ref().map(|head| head.device_name.as_str())
    }

    pub fn node_head_status(&self) -> NodeHeadStatus {
        NodeHeadStatus {
            is_active: self.node_head.is_some(),
            node_id: self.node_head(),
        }
    }

    fn claim_role(&mut self, id: ConnectionId, requested: Role) -> Result<(), RegistryError> {
        match self.roles.get(&id) {
            Some(&held) if held != requested => Err(RegistryError::RoleConflict {
                connection: id,
                held,
                requested,
            }),
            _ => {
                self.roles.insert(id, requested);
                Ok(())
            }
        }
    }
}

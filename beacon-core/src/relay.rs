//! The beacon relay.
//!
//! [`BeaconRelay`] owns the connection registry, the narrative store and one
//! outbound channel per connected client. Inbound events are dispatched with
//! an exhaustive match; registry changes are applied under the state lock and
//! the lock is never held while a narrative is being generated, so several
//! narrations may be in flight at once and finish in any order.
//!
//! Delivery is best-effort: events addressed to a connection whose channel is
//! gone are dropped without error.

use crate::id::ConnectionId;
use crate::model::{BeaconMessage, BeaconNode, GeneratedNarrative, NodeHeadStatus};
use crate::narrator::NarrativeGenerator;
use crate::protocol::{
    BeaconDisconnected, BeaconRegistered, BeaconStatus, ForwardedMessage, InboundEvent,
    NarrativeDelivery, NodeHeadRegistered, OutboundEvent,
};
use crate::registry::{ConnectionRegistry, Removal};
use crate::store::{NarrativeStore, DEFAULT_CAPACITY};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Error text sent to a connection that messages before registering as a beacon.
pub const NOT_REGISTERED: &str = "Beacon node not registered";

/// Confirmation text sent to a newly registered beacon.
pub const BEACON_REGISTERED: &str = "Beacon node registered successfully";

/// Configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum narratives kept in memory.
    pub narrative_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            narrative_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_narrative_capacity(mut self, capacity: usize) -> Self {
        self.narrative_capacity = capacity;
        self
    }
}

/// A client's handle on the relay: its id and the events addressed to it.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub events: mpsc::UnboundedReceiver<OutboundEvent>,
}

/// Snapshot used by the HTTP status route.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub node_head: NodeHeadStatus,
    pub beacons: Vec<BeaconNode>,
    pub total_narratives: usize,
    pub recent_narratives: Vec<GeneratedNarrative>,
}

struct Peer {
    address: String,
    outbox: mpsc::UnboundedSender<OutboundEvent>,
}

struct RelayState {
    registry: ConnectionRegistry,
    store: NarrativeStore,
    peers: HashMap<ConnectionId, Peer>,
}

impl RelayState {
    fn emit(&self, to: ConnectionId, event: OutboundEvent) {
        let Some(peer) = self.peers.get(&to) else {
            debug!(connection = %to, event = event.name(), "Dropping event for unknown connection");
            return;
        };
        if peer.outbox.send(event).is_err() {
            debug!(connection = %to, "Dropping event for closed connection");
        }
    }

    fn emit_to_head(&self, event: OutboundEvent) {
        if let Some(head) = self.registry.node_head() {
            self.emit(head, event);
        }
    }
}

struct RelayInner {
    state: Mutex<RelayState>,
    generator: NarrativeGenerator,
}

/// The beacon fan-out relay. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BeaconRelay {
    inner: Arc<RelayInner>,
}

impl BeaconRelay {
    /// Create a relay that generates narratives with `generator`.
    pub fn new(generator: NarrativeGenerator, config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                state: Mutex::new(RelayState {
                    registry: ConnectionRegistry::new(),
                    store: NarrativeStore::with_capacity(config.narrative_capacity),
                    peers: HashMap::new(),
                }),
                generator,
            }),
        }
    }

    /// Accept a new client connection from `address`.
    pub async fn connect(&self, address: impl Into<String>) -> Connection {
        let id = ConnectionId::new();
        let (outbox, events) = mpsc::unbounded_channel();
        let address = address.into();

        info!(connection = %id, %address, "Device connected");
        self.inner
            .state
            .lock()
            .await
            .peers
            .insert(id, Peer { address, outbox });

        Connection { id, events }
    }

    /// Apply one inbound event from `conn`.
    ///
    /// A beacon message returns the [`NarrationJob`] that finishes handling
    /// it; the caller decides whether to await it inline or spawn it.
    pub async fn handle(&self, conn: ConnectionId, event: InboundEvent) -> Option<NarrationJob> {
        let mut state = self.inner.state.lock().await;

        match event {
            InboundEvent::RegisterNodeHead { device_name } => {
                match state.registry.register_node_head(conn, device_name.as_str()) {
                    Ok(active_beacons) => {
                        info!(connection = %conn, device = %device_name, "Node head registered");
                        state.emit(
                            conn,
                            OutboundEvent::NodeHeadRegistered(NodeHeadRegistered {
                                success: true,
                                node_id: conn,
                                active_beacons,
                            }),
                        );
                    }
                    Err(e) => {
                        warn!(connection = %conn, error = %e, "Rejected node head registration");
                        state.emit(conn, OutboundEvent::error(e.to_string()));
                    }
                }
                None
            }

            InboundEvent::RegisterBeacon {
                device_name,
                location,
            } => {
                let address = state
                    .peers
                    .get(&conn)
                    .map(|peer| peer.address.clone())
                    .unwrap_or_default();

                match state
                    .registry
                    .register_beacon(conn, device_name, address, location)
                {
                    Ok(node) => {
                        info!(connection = %conn, device = %node.device_name, "Beacon node registered");
                        state.emit_to_head(OutboundEvent::BeaconJoined(node));
                        state.emit(
                            conn,
                            OutboundEvent::BeaconRegistered(BeaconRegistered {
                                success: true,
                                node_id: conn,
                                message: BEACON_REGISTERED.to_string(),
                            }),
                        );
                    }
                    Err(e) => {
                        warn!(connection = %conn, error = %e, "Rejected beacon registration");
                        state.emit(conn, OutboundEvent::error(e.to_string()));
                    }
                }
                None
            }

            InboundEvent::BeaconMessage { message, location } => {
                let Some(node) = state.registry.touch(conn).cloned() else {
                    warn!(connection = %conn, "Message from unregistered beacon");
                    state.emit(conn, OutboundEvent::error(NOT_REGISTERED));
                    return None;
                };

                let message = BeaconMessage {
                    node_id: conn,
                    message,
                    timestamp: Utc::now(),
                    location,
                };
                info!(device = %node.device_name, message = %message.message, "Beacon message");

                state.emit_to_head(OutboundEvent::BeaconMessageReceived(ForwardedMessage {
                    message: message.clone(),
                    device_name: node.device_name.clone(),
                }));

                Some(NarrationJob {
                    relay: self.clone(),
                    sender: conn,
                    device_name: node.device_name,
                    message,
                })
            }

            InboundEvent::GetNarratives(_) => {
                let narratives = state.store.list_all();
                state.emit(conn, OutboundEvent::NarrativesList(narratives));
                None
            }

            InboundEvent::GetBeaconStatus(_) => {
                let status = BeaconStatus {
                    node_head_id: state.registry.node_head(),
                    active_beacons: state.registry.list_beacons(),
                    total_narratives: state.store.len(),
                };
                state.emit(conn, OutboundEvent::BeaconStatus(status));
                None
            }
        }
    }

    /// Handle an event and, for beacon messages, wait for the narrative.
    pub async fn process(
        &self,
        conn: ConnectionId,
        event: InboundEvent,
    ) -> Option<GeneratedNarrative> {
        match self.handle(conn, event).await {
            Some(job) => Some(job.run().await),
            None => None,
        }
    }

    /// Forget `conn`. Tells the node head if a beacon left.
    pub async fn disconnect(&self, conn: ConnectionId) -> Removal {
        let mut state = self.inner.state.lock().await;
        state.peers.remove(&conn);

        let removal = state.registry.remove_connection(conn);
        if removal.was_node_head {
            info!(connection = %conn, "Node head disconnected");
        }
        if let Some(beacon) = &removal.removed_beacon {
            info!(connection = %conn, device = %beacon.device_name, "Beacon node disconnected");
            state.emit_to_head(OutboundEvent::BeaconDisconnected(BeaconDisconnected {
                node_id: conn,
            }));
        }
        if !removal.was_node_head && removal.removed_beacon.is_none() {
            info!(connection = %conn, "Device disconnected");
        }

        removal
    }

    pub async fn active_beacons(&self) -> Vec<BeaconNode> {
        self.inner.state.lock().await.registry.list_beacons()
    }

    /// All stored narratives, newest first.
    pub async fn narratives(&self) -> Vec<GeneratedNarrative> {
        self.inner.state.lock().await.store.list_all()
    }

    pub async fn node_head_status(&self) -> NodeHeadStatus {
        self.inner.state.lock().await.registry.node_head_status()
    }

    /// Combined snapshot with the `recent` newest narratives.
    pub async fn status(&self, recent: usize) -> RelayStatus {
        let state = self.inner.state.lock().await;
        RelayStatus {
            node_head: state.registry.node_head_status(),
            beacons: state.registry.list_beacons(),
            total_narratives: state.store.len(),
            recent_narratives: state.store.recent(recent),
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.state.lock().await.peers.len()
    }
}

/// The second half of handling a beacon message: generate, store, deliver.
///
/// Not cancelled by a disconnect; if the sender is gone by the time the
/// narrative is ready, its copy is dropped.
#[must_use = "a narration job does nothing until run"]
pub struct NarrationJob {
    relay: BeaconRelay,
    sender: ConnectionId,
    device_name: String,
    message: BeaconMessage,
}

impl NarrationJob {
    pub fn sender(&self) -> ConnectionId {
        self.sender
    }

    pub fn message(&self) -> &BeaconMessage {
        &self.message
    }

    pub async fn run(self) -> GeneratedNarrative {
        let inner = &self.relay.inner;
        let narrative = inner
            .generator
            .generate(&self.message.message, self.message.location)
            .await;

        let mut state = inner.state.lock().await;
        if let Some(evicted) = state.store.insert(narrative.clone()) {
            debug!(id = %evicted.id, "Evicted oldest narrative");
        }

        let delivery =
            OutboundEvent::NarrativeGenerated(NarrativeDelivery::new(&narrative, &self.device_name));
        state.emit(self.sender, delivery.clone());
        state.emit_to_head(delivery);

        narrative
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Location, NarrativeSource};
    use crate::narrator::fallback_narrative;
    use crate::protocol::Empty;
    use crate::registry::Role;

    fn relay() -> BeaconRelay {
        BeaconRelay::new(NarrativeGenerator::offline(), RelayConfig::default())
    }

    fn drain(conn: &mut Connection) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = conn.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn register_beacon(name: &str) -> InboundEvent {
        InboundEvent::RegisterBeacon {
            device_name: name.to_string(),
            location: None,
        }
    }

    fn beacon_message(text: &str) -> InboundEvent {
        InboundEvent::BeaconMessage {
            message: text.to_string(),
            location: None,
        }
    }

    #[tokio::test]
    async fn test_unregistered_sender_gets_error_only() {
        let relay = relay();
        let mut cam = relay.connect("10.0.0.2:5000").await;

        let job = relay.handle(cam.id, beacon_message("Found a fort")).await;
        assert!(job.is_none());
        assert_eq!(drain(&mut cam), vec![OutboundEvent::error(NOT_REGISTERED)]);
        assert!(relay.narratives().await.is_empty());
    }

    #[tokio::test]
    async fn test_node_head_reply_carries_beacons() {
        let relay = relay();
        let mut cam = relay.connect("10.0.0.2:5000").await;
        relay.process(cam.id, register_beacon("cam-1")).await;
        drain(&mut cam);

        let mut head = relay.connect("10.0.0.1:5000").await;
        relay
            .process(
                head.id,
                InboundEvent::RegisterNodeHead {
                    device_name: "head-A".to_string(),
                },
            )
            .await;

        let events = drain(&mut head);
        assert_eq!(events.len(), 1);
        let OutboundEvent::NodeHeadRegistered(reply) = &events[0] else {
            panic!("expected node-head-registered, got {:?}", events[0]);
        };
        assert!(reply.success);
        assert_eq!(reply.node_id, head.id);
        assert_eq!(reply.active_beacons.len(), 1);
        assert_eq!(reply.active_beacons[0].device_name, "cam-1");
        assert_eq!(reply.active_beacons[0].address, "10.0.0.2:5000");
    }

    #[tokio::test]
    async fn test_narrative_uses_message_location_only() {
        let relay = relay();
        let registered_at = Location::new(22.5726, 88.3639);
        let seen_at = Location::new(22.5851, 88.3468);
        let cam = relay.connect("10.0.0.2:5000").await;
        relay
            .process(
                cam.id,
                InboundEvent::RegisterBeacon {
                    device_name: "cam-1".to_string(),
                    location: Some(registered_at),
                },
            )
            .await;

        let job = relay
            .handle(cam.id, beacon_message("Found a fort"))
            .await
            .unwrap();
        assert_eq!(job.message().location, None);
        assert_eq!(job.sender(), cam.id);

        let narrative = job.run().await;
        assert_eq!(narrative.location, None);
        assert_eq!(narrative.source, NarrativeSource::Fallback);
        assert_eq!(narrative.narrative, fallback_narrative("Found a fort"));

        let narrative = relay
            .process(
                cam.id,
                InboundEvent::BeaconMessage {
                    message: "Found a ghat".to_string(),
                    location: Some(seen_at),
                },
            )
            .await
            .unwrap();
        assert_eq!(narrative.location, Some(seen_at));
    }

    #[tokio::test]
    async fn test_role_conflict_reported_to_sender() {
        let relay = relay();
        let mut cam = relay.connect("10.0.0.2:5000").await;
        relay.process(cam.id, register_beacon("cam-1")).await;
        drain(&mut cam);

        relay
            .process(
                cam.id,
                InboundEvent::RegisterNodeHead {
                    device_name: "cam-1".to_string(),
                },
            )
            .await;

        let events = drain(&mut cam);
        assert_eq!(events.len(), 1);
        let OutboundEvent::Error(payload) = &events[0] else {
            panic!("expected error, got {:?}", events[0]);
        };
        assert!(payload.message.contains(&Role::Beacon.to_string()));
        assert!(!relay.node_head_status().await.is_active);
    }

    #[tokio::test]
    async fn test_disconnect_drops_channel_and_entry() {
        let relay = relay();
        let cam = relay.connect("10.0.0.2:5000").await;
        relay.process(cam.id, register_beacon("cam-1")).await;
        assert_eq!(relay.connection_count().await, 1);

        let removal = relay.disconnect(cam.id).await;
        assert!(removal.removed_beacon.is_some());
        assert_eq!(relay.connection_count().await, 0);
        assert!(relay.active_beacons().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_queries() {
        let relay = BeaconRelay::new(
            NarrativeGenerator::offline(),
            RelayConfig::new().with_narrative_capacity(3),
        );
        let mut cam = relay.connect("10.0.0.2:5000").await;
        relay.process(cam.id, register_beacon("cam-1")).await;
        for i in 0..5 {
            relay.process(cam.id, beacon_message(&format!("spot {i}"))).await;
        }
        drain(&mut cam);

        relay.process(cam.id, InboundEvent::GetBeaconStatus(Empty)).await;
        relay.process(cam.id, InboundEvent::GetNarratives(Empty)).await;
        let events = drain(&mut cam);

        let OutboundEvent::BeaconStatus(status) = &events[0] else {
            panic!("expected beacon-status, got {:?}", events[0]);
        };
        assert_eq!(status.node_head_id, None);
        assert_eq!(status.active_beacons.len(), 1);
        assert_eq!(status.total_narratives, 3);

        let OutboundEvent::NarrativesList(list) = &events[1] else {
            panic!("expected narratives-list, got {:?}", events[1]);
        };
        let messages: Vec<&str> = list.iter().map(|n| n.original_message.as_str()).collect();
        assert_eq!(messages, vec!["spot 4", "spot 3", "spot 2"]);

        let snapshot = relay.status(2).await;
        assert_eq!(snapshot.total_narratives, 3);
        assert_eq!(snapshot.recent_narratives.len(), 2);
    }
}

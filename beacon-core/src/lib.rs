//! Beacon relay with AI-generated narratives.
//!
//! This crate provides:
//! - A connection registry for one node head and many beacon nodes
//! - A bounded store of generated narratives
//! - A narrative generator backed by Gemini, with a local fallback
//! - The relay that routes beacon traffic between them
//!
//! # Quick Start
//!
//! ```ignore
//! use beacon_core::{BeaconRelay, InboundEvent, NarrativeGenerator, RelayConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let generator = match gemini::Gemini::from_env() {
//!         Ok(client) => NarrativeGenerator::new(Arc::new(client)),
//!         Err(_) => NarrativeGenerator::offline(),
//!     };
//!     let relay = BeaconRelay::new(generator, RelayConfig::default());
//!
//!     let mut cam = relay.connect("10.0.0.7:51234").await;
//!     relay
//!         .process(cam.id, InboundEvent::RegisterBeacon {
//!             device_name: "cam-1".into(),
//!             location: None,
//!         })
//!         .await;
//!     relay
//!         .process(cam.id, InboundEvent::BeaconMessage {
//!             message: "Found a fort".into(),
//!             location: None,
//!         })
//!         .await;
//!
//!     while let Ok(event) = cam.events.try_recv() {
//!         println!("{}", event.to_frame().unwrap());
//!     }
//! }
//! ```

pub mod id;
pub mod model;
pub mod narrator;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod store;
pub mod testing;

// Primary public API
pub use id::ConnectionId;
pub use model::{
    BeaconMessage, BeaconNode, GeneratedNarrative, Location, NarrativeSource, NodeHeadStatus,
};
pub use narrator::{NarrateError, NarrativeBackend, NarrativeGenerator};
pub use protocol::{Empty, InboundEvent, OutboundEvent};
pub use registry::{ConnectionRegistry, RegistryError, Removal, Role};
pub use relay::{BeaconRelay, Connection, NarrationJob, RelayConfig, RelayStatus};
pub use store::NarrativeStore;
pub use testing::{MockBackend, TestHarness};

//! Testing utilities for the beacon relay.
//!
//! This module provides tools for integration testing:
//! - `MockBackend` for deterministic narratives without API calls
//! - `TestHarness` for scripted relay scenarios with named connections
//! - Assertion helpers for inspecting delivered events

use crate::id::ConnectionId;
use crate::model::{GeneratedNarrative, Location};
use crate::narrator::{NarrateError, NarrativeBackend, NarrativeGenerator};
use crate::protocol::{InboundEvent, NarrativeDelivery, OutboundEvent};
use crate::registry::Removal;
use crate::relay::{BeaconRelay, Connection, NarrationJob, RelayConfig};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    /// Return queued responses in order; fail once they run out.
    Scripted,
    /// Return a story that quotes the prompt back.
    Echo,
    /// Always fail.
    Fail,
}

/// A narrative backend that returns scripted responses.
///
/// Use this for deterministic tests without API calls.
pub struct MockBackend {
    behavior: Behavior,
    responses: Mutex<VecDeque<String>>,
    delays: Mutex<VecDeque<Duration>>,
    prompts: Mutex<Vec<String>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockBackend {
    fn with_behavior(behavior: Behavior, responses: Vec<String>) -> Self {
        Self {
            behavior,
            responses: Mutex::new(responses.into()),
            delays: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Return `responses` in order, then fail.
    pub fn scripted(responses: Vec<String>) -> Self {
        Self::with_behavior(Behavior::Scripted, responses)
    }

    /// Answer every prompt with `"Story: <prompt>"`.
    pub fn echo() -> Self {
        Self::with_behavior(Behavior::Echo, Vec::new())
    }

    /// Fail every call, forcing the fallback narrative.
    pub fn failing() -> Self {
        Self::with_behavior(Behavior::Fail, Vec::new())
    }

    /// Sleep for each of `delays` on successive calls (no delay once exhausted).
    pub fn with_delays(self, delays: Vec<Duration>) -> Self {
        *locked(&self.delays) = delays.into();
        self
    }

    /// Add a response to the queue.
    pub fn queue_response(&self, response: impl Into<String>) {
        locked(&self.responses).push_back(response.into());
    }

    /// Every prompt received so far.
    pub fn prompts(&self) -> Vec<String> {
        locked(&self.prompts).clone()
    }

    pub fn call_count(&self) -> usize {
        locked(&self.prompts).len()
    }
}

#[async_trait]
impl NarrativeBackend for MockBackend {
    async fn narrate(&self, prompt: &str) -> Result<String, NarrateError> {
        locked(&self.prompts).push(prompt.to_string());

        let delay = locked(&self.delays).pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.behavior {
            Behavior::Scripted => locked(&self.responses).pop_front().ok_or_else(|| {
                NarrateError::Unavailable("no more scripted responses".to_string())
            }),
            Behavior::Echo => Ok(format!("Story: {prompt}")),
            Behavior::Fail => Err(NarrateError::Unavailable("mock failure".to_string())),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Test harness for running relay scenarios with named connections.
pub struct TestHarness {
    /// The relay under test.
    pub relay: BeaconRelay,
    /// The backend feeding the relay's generator.
    pub backend: Arc<MockBackend>,
    connections: HashMap<String, Connection>,
}

impl TestHarness {
    /// Create a harness whose backend has no scripted responses.
    pub fn new() -> Self {
        Self::with_backend(MockBackend::scripted(Vec::new()))
    }

    /// Create a harness around a specific backend.
    pub fn with_backend(backend: MockBackend) -> Self {
        Self::with_config(backend, RelayConfig::default())
    }

    pub fn with_config(backend: MockBackend, config: RelayConfig) -> Self {
        let backend = Arc::new(backend);
        let generator = NarrativeGenerator::new(backend.clone());
        Self {
            relay: BeaconRelay::new(generator, config),
            backend,
            connections: HashMap::new(),
        }
    }

    /// Queue a narrative for the next generation.
    pub fn expect_narrative(&mut self, text: impl Into<String>) -> &mut Self {
        self.backend.queue_response(text);
        self
    }

    /// Open a connection under `name` (no-op if already open).
    pub async fn connect(&mut self, name: &str) -> ConnectionId {
        if let Some(conn) = self.connections.get(name) {
            return conn.id;
        }
        let conn = self.relay.connect(format!("{name}.test:0")).await;
        let id = conn.id;
        self.connections.insert(name.to_string(), conn);
        id
    }

    /// The connection id for `name`, if connected.
    pub fn id(&self, name: &str) -> Option<ConnectionId> {
        self.connections.get(name).map(|c| c.id)
    }

    /// Send an event from `name`, connecting first if needed, and run any
    /// resulting narration to completion.
    pub async fn send(&mut self, name: &str, event: InboundEvent) -> Option<GeneratedNarrative> {
        let id = self.connect(name).await;
        self.relay.process(id, event).await
    }

    /// Send an event and hand back the narration job without running it.
    pub async fn dispatch(&mut self, name: &str, event: InboundEvent) -> Option<NarrationJob> {
        let id = self.connect(name).await;
        self.relay.handle(id, event).await
    }

    pub async fn register_head(&mut self, name: &str) {
        self.send(
            name,
            InboundEvent::RegisterNodeHead {
                device_name: name.to_string(),
            },
        )
        .await;
    }

    pub async fn register_beacon(&mut self, name: &str, location: Option<Location>) {
        self.send(
            name,
            InboundEvent::RegisterBeacon {
                device_name: name.to_string(),
                location,
            },
        )
        .await;
    }

    /// Send a beacon message from `name` and wait for its narrative.
    pub async fn message(&mut self, name: &str, text: &str) -> Option<GeneratedNarrative> {
        self.send(
            name,
            InboundEvent::BeaconMessage {
                message: text.to_string(),
                location: None,
            },
        )
        .await
    }

    /// Close the connection under `name`.
    pub async fn disconnect(&mut self, name: &str) -> Option<Removal> {
        let conn = self.connections.remove(name)?;
        Some(self.relay.disconnect(conn.id).await)
    }

    /// Drain every event delivered to `name` so far.
    pub fn events(&mut self, name: &str) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        if let Some(conn) = self.connections.get_mut(name) {
            while let Ok(event) = conn.events.try_recv() {
                events.push(event);
            }
        }
        events
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Names of the events, in delivery order.
pub fn event_names(events: &[OutboundEvent]) -> Vec<&'static str> {
    events.iter().map(OutboundEvent::name).collect()
}

/// The narrative deliveries among `events`.
pub fn deliveries(events: &[OutboundEvent]) -> Vec<&NarrativeDelivery> {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::NarrativeGenerated(delivery) => Some(delivery),
            _ => None,
        })
        .collect()
}

/// Assert that no `error` event was delivered.
#[track_caller]
pub fn assert_no_errors(events: &[OutboundEvent]) {
    let errors: Vec<&OutboundEvent> = events
        .iter()
        .filter(|e| matches!(e, OutboundEvent::Error(_)))
        .collect();
    assert!(errors.is_empty(), "Expected no error events, got {errors:?}");
}

/// Assert that exactly one `error` event with `message` was delivered, and nothing else.
#[track_caller]
pub fn assert_only_error(events: &[OutboundEvent], message: &str) {
    assert_eq!(
        events,
        &[OutboundEvent::error(message)],
        "Expected a single error event '{message}'"
    );
}

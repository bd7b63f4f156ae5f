use axum::{extract::State, routing::get, Json, Router};
use beacon_core::{BeaconNode, BeaconRelay, GeneratedNarrative, NodeHeadStatus};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::socket::beacon_socket;

/// Narratives included in the status summary.
const RECENT_NARRATIVES: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub relay: BeaconRelay,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusData {
    node_head: NodeHeadStatus,
    active_beacons: usize,
    beacons: Vec<BeaconNode>,
    total_narratives: usize,
    recent_narratives: Vec<GeneratedNarrative>,
}

#[derive(Debug, Serialize)]
struct NarrativesData {
    narratives: Vec<GeneratedNarrative>,
    count: usize,
}

#[derive(Debug, Serialize)]
struct BeaconsData {
    beacons: Vec<BeaconNode>,
    count: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(beacon_socket))
        .route("/api/beacon/status", get(beacon_status))
        .route("/api/beacon/narratives", get(narratives))
        .route("/api/beacon/beacons", get(active_beacons))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn beacon_status(State(state): State<AppState>) -> Json<ApiResponse<StatusData>> {
    let status = state.relay.status(RECENT_NARRATIVES).await;

    ApiResponse::ok(StatusData {
        node_head: status.node_head,
        active_beacons: status.beacons.len(),
        beacons: status.beacons,
        total_narratives: status.total_narratives,
        recent_narratives: status.recent_narratives,
    })
}

async fn narratives(State(state): State<AppState>) -> Json<ApiResponse<NarrativesData>> {
    let narratives = state.relay.narratives().await;

    ApiResponse::ok(NarrativesData {
        count: narratives.len(),
        narratives,
    })
}

async fn active_beacons(State(state): State<AppState>) -> Json<ApiResponse<BeaconsData>> {
    let beacons = state.relay.active_beacons().await;

    ApiResponse::ok(BeaconsData {
        count: beacons.len(),
        beacons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use beacon_core::{InboundEvent, MockBackend, NarrativeGenerator, RelayConfig};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn relay() -> BeaconRelay {
        BeaconRelay::new(
            NarrativeGenerator::new(Arc::new(MockBackend::failing())),
            RelayConfig::default(),
        )
    }

    async fn get_json(app: Router, uri: &str) -> Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn seeded_relay(messages: usize) -> BeaconRelay {
        let relay = relay();
        let cam = relay.connect("10.0.0.2:5000").await;
        relay
            .process(
                cam.id,
                InboundEvent::RegisterBeacon {
                    device_name: "cam-1".to_string(),
                    location: None,
                },
            )
            .await;
        for i in 0..messages {
            relay
                .process(
                    cam.id,
                    InboundEvent::BeaconMessage {
                        message: format!("spot {i}"),
                        location: None,
                    },
                )
                .await;
        }
        relay
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(AppState { relay: relay() });
        assert_eq!(get_json(app, "/health").await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_status_summary() {
        let app = router(AppState {
            relay: seeded_relay(7).await,
        });
        let body = get_json(app, "/api/beacon/status").await;

        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["nodeHead"]["isActive"], false);
        assert_eq!(body["data"]["activeBeacons"], 1);
        assert_eq!(body["data"]["beacons"][0]["deviceName"], "cam-1");
        assert_eq!(body["data"]["totalNarratives"], 7);
        assert_eq!(body["data"]["recentNarratives"].as_array().unwrap().len(), 5);
        assert_eq!(body["data"]["recentNarratives"][0]["originalMessage"], "spot 6");
    }

    #[tokio::test]
    async fn test_narratives_list() {
        let app = router(AppState {
            relay: seeded_relay(2).await,
        });
        let body = get_json(app, "/api/beacon/narratives").await;

        assert_eq!(body["data"]["count"], 2);
        assert_eq!(body["data"]["narratives"][0]["originalMessage"], "spot 1");
        assert_eq!(body["data"]["narratives"][0]["source"], "fallback");
    }

    #[tokio::test]
    async fn test_beacons_list_empty() {
        let app = router(AppState { relay: relay() });
        let body = get_json(app, "/api/beacon/beacons").await;

        assert_eq!(
            body,
            json!({ "success": true, "data": { "beacons": [], "count": 0 } })
        );
    }
}

//! Minimal Google Gemini API client.
//!
//! This crate provides a focused client for the `generateContent` endpoint:
//! - Plain text prompts, optionally aimed at a specific model
//! - A one-shot retry on the default model when a configured model is missing

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Errors that can occur when using the Gemini client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Model returned no text")]
    EmptyResponse,
}

impl Error {
    /// Whether the API reported that the requested model does not exist.
    pub fn is_model_not_found(&self) -> bool {
        matches!(self, Error::Api { status, .. } if *status == StatusCode::NOT_FOUND.as_u16())
    }
}

/// Gemini API client.
#[derive(Clone)]
pub struct Gemini {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Gemini {
    /// Create a new Gemini client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Create a Gemini client from `GEMINI_API_KEY`, falling back to
    /// `VITE_GEMINI_API_KEY` for setups that share the frontend's env file.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("VITE_GEMINI_API_KEY"))
            .map_err(|_| Error::NoApiKey)?;
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }
        Self::new(api_key)
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API root (proxies, local fakes).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The model requests go to when they don't name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a generation request and return the full response.
    ///
    /// If the requested model is not found and it isn't already the default
    /// model, the request is retried once against [`DEFAULT_MODEL`].
    pub async fn generate_content(&self, request: Request) -> Result<Response, Error> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());

        match self.send(&model, &request).await {
            Err(e) if e.is_model_not_found() && model != DEFAULT_MODEL => {
                warn!(model = %model, "Gemini model not found, retrying with {DEFAULT_MODEL}");
                self.send(DEFAULT_MODEL, &request).await
            }
            other => other,
        }
    }

    /// Convenience wrapper: send a single user prompt and return its text.
    pub async fn generate_text(&self, prompt: impl Into<String>) -> Result<String, Error> {
        let response = self
            .generate_content(Request::new(vec![Content::user(prompt)]))
            .await?;
        debug!(model = %response.model, "Gemini response");
        let text = response.text();
        if text.trim().is_empty() {
            return Err(Error::EmptyResponse);
        }
        Ok(text)
    }

    async fn send(&self, model: &str, request: &Request) -> Result<Response, Error> {
        let api_request = build_api_request(request);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(parse_response(model, api_response))
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

fn build_api_request(request: &Request) -> ApiRequest {
    ApiRequest {
        contents: request
            .contents
            .iter()
            .map(|c| ApiContent {
                role: "user",
                parts: c
                    .parts
                    .iter()
                    .map(|text| ApiPart { text: text.clone() })
                    .collect(),
            })
            .collect(),
    }
}

fn parse_response(model: &str, api_response: ApiResponse) -> Response {
    let candidates = api_response
        .candidates
        .into_iter()
        .map(|c| Candidate {
            text_parts: c
                .content
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .filter_map(|p| p.text)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default(),
        })
        .collect();

    Response {
        model: api_response
            .model_version
            .unwrap_or_else(|| model.to_string()),
        candidates,
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A generation request to send to Gemini.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub contents: Vec<Content>,
}

impl Request {
    /// Create a new request with the given prompt contents.
    pub fn new(contents: Vec<Content>) -> Self {
        Self {
            model: None,
            contents,
        }
    }

    /// Send this request to `model` instead of the client's model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// One user turn.
#[derive(Debug, Clone)]
pub struct Content {
    pub parts: Vec<String>,
}

impl Content {
    /// Create a user turn with text content.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            parts: vec![text.into()],
        }
    }
}

/// A generation response from Gemini.
#[derive(Debug, Clone)]
pub struct Response {
    /// The model version that answered.
    pub model: String,
    pub candidates: Vec<Candidate>,
}

impl Response {
    /// Text of the first candidate, parts concatenated.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| c.text_parts.concat())
            .unwrap_or_default()
    }
}

/// One generated alternative.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub text_parts: Vec<String>,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    contents: Vec<ApiContent>,
}

#[derive(Debug, Serialize)]
struct ApiContent {
    role: &'static str,
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize)]
struct ApiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidateContent {
    #[serde(default)]
    parts: Vec<ApiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_client_creation() {
        let client = Gemini::new("test-key").unwrap();
        assert_eq!(client.model, DEFAULT_MODEL);
        assert_eq!(client.base_url, API_BASE);
    }

    #[test]
    fn test_client_with_model_and_base() {
        let client = Gemini::new("test-key")
            .unwrap()
            .with_model("gemini-1.5-pro")
            .with_base_url("http://localhost:9000/v1beta/");
        assert_eq!(client.model(), "gemini-1.5-pro");
        assert_eq!(client.base_url, "http://localhost:9000/v1beta");
    }

    #[test]
    fn test_api_request_shape() {
        let request = Request::new(vec![Content::user("Found a fort")]);
        let json = serde_json::to_value(build_api_request(&request)).unwrap();

        assert_eq!(
            json,
            json!({"contents": [{"role": "user", "parts": [{"text": "Found a fort"}]}]})
        );
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Arre, "}, {"text": "ki sundor!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 40},
            "modelVersion": "gemini-1.5-flash-002"
        }"#;
        let api: ApiResponse = serde_json::from_str(body).unwrap();
        let response = parse_response(DEFAULT_MODEL, api);

        assert_eq!(response.text(), "Arre, ki sundor!");
        assert_eq!(response.model, "gemini-1.5-flash-002");
    }

    #[test]
    fn test_parse_blocked_response() {
        let body = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let api: ApiResponse = serde_json::from_str(body).unwrap();
        let response = parse_response("gemini-1.5-pro", api);

        assert_eq!(response.text(), "");
        assert_eq!(response.model, "gemini-1.5-pro");
    }

    #[test]
    fn test_model_not_found_detection() {
        let missing = Error::Api {
            status: 404,
            message: "models/nope is not found".to_string(),
        };
        assert!(missing.is_model_not_found());

        let quota = Error::Api {
            status: 429,
            message: "quota".to_string(),
        };
        assert!(!quota.is_model_not_found());
        assert!(!Error::NoApiKey.is_model_not_found());
    }

    // =========================================================================
    // Local fake of the generateContent endpoint
    // =========================================================================

    #[derive(Clone)]
    struct FakeApi {
        /// Models answered with 404.
        missing: Vec<&'static str>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    async fn fake_generate(
        State(api): State<FakeApi>,
        Path(call): Path<String>,
        headers: AxumHeaders,
    ) -> AxumResponse {
        api.calls.lock().unwrap().push(format!("/models/{call}"));

        if headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
            return (AxumStatus::UNAUTHORIZED, "missing key").into_response();
        }

        let model = call.split(':').next().unwrap_or_default().to_string();
        if api.missing.iter().any(|m| *m == model) {
            let body = json!({"error": {"code": 404, "message": format!("models/{model} is not found")}});
            return (AxumStatus::NOT_FOUND, body.to_string()).into_response();
        }
        match model.as_str() {
            "busy" => (AxumStatus::TOO_MANY_REQUESTS, "quota exceeded").into_response(),
            "silent" => (AxumStatus::OK, json!({"candidates": []}).to_string()).into_response(),
            _ => {
                let body = json!({
                    "candidates": [{"content": {"parts": [{"text": format!("hi from {model}")}]}}]
                });
                (AxumStatus::OK, body.to_string()).into_response()
            }
        }
    }

    /// Serve the fake on an ephemeral port; returns its base URL and call log.
    async fn spawn_fake(missing: Vec<&'static str>) -> (String, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/v1beta/models/{call}", post(fake_generate))
            .with_state(FakeApi {
                missing,
                calls: calls.clone(),
            });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/v1beta"), calls)
    }

    fn client(base_url: &str) -> Gemini {
        Gemini::new("test-key").unwrap().with_base_url(base_url)
    }

    #[tokio::test]
    async fn test_missing_model_retries_default() {
        let (base, calls) = spawn_fake(vec!["nope"]).await;

        let text = client(&base).with_model("nope").generate_text("hi").await.unwrap();

        assert_eq!(text, "hi from gemini-1.5-flash");
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "/models/nope:generateContent".to_string(),
                "/models/gemini-1.5-flash:generateContent".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_request_model_overrides_client_model() {
        let (base, calls) = spawn_fake(Vec::new()).await;

        let response = client(&base)
            .generate_content(Request::new(vec![Content::user("hi")]).with_model("gemini-1.5-pro"))
            .await
            .unwrap();

        assert_eq!(response.text(), "hi from gemini-1.5-pro");
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["/models/gemini-1.5-pro:generateContent".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_default_model_is_not_retried() {
        let (base, calls) = spawn_fake(vec![DEFAULT_MODEL]).await;

        let err = client(&base).generate_text("hi").await.unwrap_err();

        assert!(err.is_model_not_found());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_api_errors_are_not_retried() {
        let (base, calls) = spawn_fake(Vec::new()).await;

        let err = client(&base).with_model("busy").generate_text("hi").await.unwrap_err();

        assert!(matches!(err, Error::Api { status: 429, .. }));
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["/models/busy:generateContent".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_candidates_is_an_error() {
        let (base, _calls) = spawn_fake(Vec::new()).await;

        let err = client(&base).with_model("silent").generate_text("hi").await.unwrap_err();

        assert!(matches!(err, Error::EmptyResponse));
    }

    #[tokio::test]
    async fn test_wrong_key_surfaces_api_error() {
        let (base, _calls) = spawn_fake(Vec::new()).await;

        let err = Gemini::new("other-key")
            .unwrap()
            .with_base_url(&base)
            .generate_text("hi")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Api { status: 401, .. }));
    }
}

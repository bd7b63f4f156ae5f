//! Narrative generation.
//!
//! A [`NarrativeGenerator`] turns a raw beacon message into a short guided
//! story. The text comes from a [`NarrativeBackend`] (normally Gemini); when
//! the backend is missing or fails, a fixed local template is used instead,
//! so generation itself never fails.

use crate::id::narrative_id;
use crate::model::{GeneratedNarrative, Location, NarrativeSource};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors a backend can report. The generator absorbs all of them.
#[derive(Debug, Error)]
pub enum NarrateError {
    #[error("Gemini API error: {0}")]
    Gemini(#[from] gemini::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend returned an empty narrative")]
    Empty,
}

/// A remote text generator.
#[async_trait]
pub trait NarrativeBackend: Send + Sync {
    /// Produce text for the given prompt.
    async fn narrate(&self, prompt: &str) -> Result<String, NarrateError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl NarrativeBackend for gemini::Gemini {
    async fn narrate(&self, prompt: &str) -> Result<String, NarrateError> {
        Ok(self.generate_text(prompt).await?)
    }

    fn name(&self) -> &str {
        self.model()
    }
}

/// Build the storyteller prompt for a beacon message.
pub fn narrative_prompt(message: &str) -> String {
    format!(
        r#"You are a Bengali storyteller guiding a traveller through Kolkata. You speak English warmly, with a light Bengali lilt.
A beacon device has just detected: "{message}"

Tell the traveller about this place. Your story must:
1. Be 2-3 paragraphs long
2. Explain its historical or cultural significance
3. Weave in a few Bengali expressions naturally ("arre", "ki sundor", "ek dam")
4. Sound like a friend chatting, not a guidebook
5. Share an interesting fact or legend about the place
6. End by inviting the traveller to explore further

Example opening: "Arre, you have found Victoria Memorial! Ki sundor place this is, na? Let me tell you how this marble wonder came to be..."

Write the narrative now:"#
    )
}

/// The text used when the backend cannot produce a narrative.
pub fn fallback_narrative(message: &str) -> String {
    format!(
        "Arre, what a wonderful discovery! You've found {message}. This place holds so many \
         stories and memories. Ki sundor, na? Every corner of Kolkata has its own tale to tell, \
         and this spot is no different. Take a moment to soak in the atmosphere and imagine all \
         the people who have walked here before you. Ek dam amazing experience it will be!"
    )
}

/// Wraps a backend with the persona prompt and the local fallback.
#[derive(Clone, Default)]
pub struct NarrativeGenerator {
    backend: Option<Arc<dyn NarrativeBackend>>,
}

impl NarrativeGenerator {
    /// A generator backed by the given remote backend.
    pub fn new(backend: Arc<dyn NarrativeBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A generator that always uses the fallback template.
    pub fn offline() -> Self {
        Self { backend: None }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Generate a narrative for `message`. Never fails.
    pub async fn generate(&self, message: &str, location: Option<Location>) -> GeneratedNarrative {
        let (narrative, source) = match self.remote(message).await {
            Ok(text) => (text, NarrativeSource::Model),
            Err(e) => {
                warn!(error = %e, "Narrative generation failed, using fallback");
                (fallback_narrative(message), NarrativeSource::Fallback)
            }
        };

        let timestamp = Utc::now();
        GeneratedNarrative {
            id: narrative_id(timestamp.timestamp_millis()),
            original_message: message.to_string(),
            narrative,
            timestamp,
            location,
            source,
        }
    }

    async fn remote(&self, message: &str) -> Result<String, NarrateError> {
        let Some(backend) = &self.backend else {
            return Err(NarrateError::Unavailable(
                "no narrative backend configured".to_string(),
            ));
        };

        debug!(backend = backend.name(), "Requesting narrative");
        let text = backend.narrate(&narrative_prompt(message)).await?;
        if text.trim().is_empty() {
            return Err(NarrateError::Empty);
        }
        Ok(text)
    }
}

//! Input payloads handed to agents.

use crate::{ParallaxError, Result};
use serde::{Deserialize, Serialize};

/// The document under analysis plus optional background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPayload {
    pub document: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl InputPayload {
    /// Create a payload, rejecting empty documents.
    pub fn new(document: impl Into<String>) -> Result<Self> {
        let document = document.into();
        if document.trim().is_empty() {
            return Err(ParallaxError::Config("document must not be empty".into()));
        }
        Ok(Self {
            document,
            context: None,
        })
    }

    /// Attach context. Blank context is treated as absent.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.context = if context.trim().is_empty() {
            None
        } else {
            Some(context)
        };
        self
    }

    /// Re-check a payload that may have been deserialized without going
    /// through [`InputPayload::new`].
    pub fn validate(&self) -> Result<()> {
        if self.document.trim().is_empty() {
            return Err(ParallaxError::Config("document must not be empty".into()));
        }
        Ok(())
    }
}

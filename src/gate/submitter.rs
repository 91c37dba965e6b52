//! The gated operation and a local stand-in for it.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::error::Result;

/// A single unit of rate-limited work, such as submitting one document.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Submit `payload` and return the identifier assigned to it.
    async fn submit(&self, payload: &Value) -> Result<String>;
}

/// Submitter that accepts everything and assigns a fresh identifier.
///
/// Used by the CLI in place of a real remote service.
#[derive(Debug, Default)]
pub struct EchoSubmitter {
    submitted: AtomicU64,
}

impl EchoSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many payloads have been accepted.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Submitter for EchoSubmitter {
    async fn submit(&self, payload: &Value) -> Result<String> {
        let document_id = uuid::Uuid::new_v4().to_string();
        let sequence = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            document_id = %document_id,
            sequence = sequence,
            accepted_at = %chrono::Utc::now().to_rfc3339(),
            payload = %payload,
            "Document accepted"
        );
        Ok(document_id)
    }
}

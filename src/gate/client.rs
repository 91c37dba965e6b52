//! Client that admits before every submission.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{trace, warn};

use super::submitter::Submitter;
use crate::error::Result;
use crate::ratelimit::AdmissionController;

/// Runs one submission per admission granted by its controller.
///
/// Failed submissions are reported, never retried; the slot they used stays
/// consumed.
pub struct GatedClient<S: Submitter> {
    controller: Arc<AdmissionController>,
    submitter: S,
}

impl<S: Submitter> GatedClient<S> {
    /// Create a client guarding `submitter` with `controller`.
    pub fn new(controller: Arc<AdmissionController>, submitter: S) -> Self {
        Self {
            controller,
            submitter,
        }
    }

    /// Wait for admission, then submit `payload` once.
    pub async fn submit(&self, payload: &Value) -> Result<String> {
        let admission = self.controller.acquire().await?;
        trace!(granted_at = ?admission.granted_at, "Submitting admitted payload");
        self.dispatch(payload).await
    }

    /// Like [`submit`](Self::submit), but give up waiting for admission after `timeout`.
    pub async fn submit_timeout(&self, payload: &Value, timeout: Duration) -> Result<String> {
        self.controller.acquire_timeout(timeout).await?;
        self.dispatch(payload).await
    }

    async fn dispatch(&self, payload: &Value) -> Result<String> {
        self.submitter.submit(payload).await.map_err(|e| {
            warn!(error = %e, "Submission failed");
            e
        })
    }

    /// The controller guarding this client.
    pub fn controller(&self) -> &Arc<AdmissionController> {
        &self.controller
    }

    /// The wrapped submitter.
    pub fn submitter(&self) -> &S {
        &self.submitter
    }

    /// Close the controller, releasing anyone waiting to submit.
    pub async fn close(&self) {
        self.controller.close().await
    }
}

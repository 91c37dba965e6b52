//! Gated access to a rate-limited external operation.
//!
//! The controller knows nothing about what it guards. A [`GatedClient`]
//! pairs one [`AdmissionController`](crate::ratelimit::AdmissionController)
//! with one [`Submitter`] and performs exactly one submission per admission.

mod client;
mod submitter;

pub use client::GatedClient;
pub use submitter::{EchoSubmitter, Submitter};

//! Tollgate - Admission Control for Rate-Limited Services
//!
//! This crate bounds how many operations concurrent callers may start within
//! a period, blocking excess callers until capacity frees up. Two strategies
//! share one contract: a rolling window backed by a queue of grant instants
//! and a background reclaimer, and a fixed window counter reclaimed inline.

pub mod config;
pub mod error;
pub mod gate;
pub mod ratelimit;

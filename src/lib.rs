//! Gatekeeper - fixed-window request-rate limiting
//!
//! This crate protects an API front end, and the upstream service behind it,
//! from overload. Every inbound request is keyed by operation and caller
//! identity and counted against a per-operation rule; callers over their
//! quota are told to back off until the current window ends.

pub mod config;
pub mod error;
pub mod ratelimit;

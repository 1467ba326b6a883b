//! Integration tests for Undertow
//!
//! Drive the HTTP surface end to end against the simulated swarm: session
//! lifecycle, range delivery, scheduler behaviour under slow or absent
//! peers, and subprocess cleanup on client disconnect.

#[path = "integration/harness.rs"]
mod harness;

#[path = "integration/sessions.rs"]
mod sessions;

#[path = "integration/range_delivery.rs"]
mod range_delivery;

#[path = "integration/scheduling.rs"]
mod scheduling;

#[path = "integration/subtitles.rs"]
mod subtitles;

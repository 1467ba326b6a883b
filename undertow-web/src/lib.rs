//! Undertow Web - HTTP surface for progressive torrent streaming
//!
//! JSON endpoints for session management, range-aware byte streaming and
//! WebVTT subtitle delivery over the core session registry and scheduler.

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, build_router, run_server};

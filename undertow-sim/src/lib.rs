//! Undertow Sim - simulated swarm for development and testing
//!
//! Provides a [`SwarmEngine`](undertow_core::SwarmEngine) that serves
//! content seeded from local files or memory buffers instead of real peers.
//! Delivery is rate limited, follows piece priorities and writes verified
//! pieces into sparse files, so the streaming scheduler, range delivery and
//! subtitle pipeline behave exactly as they would against a live swarm.
//!
//! # Example
//!
//! ```no_run
//! use undertow_core::config::SimulationConfig;
//! use undertow_sim::{ContentCreator, SimulatedSwarm};
//!
//! # async fn example() -> Result<(), undertow_sim::SimulationError> {
//! let swarm = SimulatedSwarm::new(SimulationConfig::default(), "/tmp/undertow");
//! let locators = swarm
//!     .seed_library("/srv/media".as_ref(), &ContentCreator::new())
//!     .await?;
//! for locator in locators {
//!     println!("{}", locator.to_magnet());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Throughput Model
//!
//! Every tick the delivery task earns `download_speed * tick` bytes of
//! allowance, scaled by seeded jitter, and spends it on whole pieces in
//! priority order. A swarm configured with zero peers never delivers,
//! which is how tests provoke stalls.

pub mod content;
pub mod swarm;

pub use content::{ContentCreator, DEFAULT_PIECE_SIZE, SeededContent};
pub use swarm::SimulatedSwarm;

/// Errors raised while seeding or delivering simulated content.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Invalid seed content: {reason}")]
    InvalidContent { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

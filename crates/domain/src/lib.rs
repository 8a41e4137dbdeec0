//! tikdog domain crate
//!
//! This crate contains the core domain logic following hexagonal architecture:
//! - `model`: Domain entities and value objects
//! - `ports`: Trait definitions for external dependencies (adapters)
//! - `challenge`: Proof-of-work solver for upstream anti-bot challenges
//! - `registry`: The ordered post registry
//! - `usecases`: Reconciliation, caption codec, channel linking, sync loop

pub mod challenge;
pub mod model;
pub mod ports;
pub mod registry;
pub mod usecases;

pub use challenge::{ChallengeDescriptor, ChallengeUnsolved};
pub use model::*;
pub use ports::*;
pub use registry::{PostRegistry, RegistryError};

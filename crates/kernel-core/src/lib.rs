//! Deterministic tick-driven voxel world kernel.
//!
//! A [`world::VoxelWorld`] owns one world's authoritative state and advances it
//! one tick at a time through [`world::VoxelWorld::step_once`]. Everything that
//! can influence state arrives as a [`world::StepInput`], and every tick yields a
//! [`audit::TickLogEntry`] whose digest lets a replay prove it reached the same
//! state.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod geom;
pub mod grid;
pub mod model;
pub mod rng;
pub mod snapshot_v1;
pub mod world;

pub use audit::{ActionEnvelope, AuditEntry, ExternalOp, JoinSpec, TickLogEntry};
pub use catalog::CatalogBundle;
pub use config::WorldConfig;
pub use geom::Vec3;
pub use snapshot_v1::SnapshotV1;
pub use world::{StepInput, StepOutcome, VoxelWorld, WorldError};

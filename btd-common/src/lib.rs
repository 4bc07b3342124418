pub mod config;
pub mod fields;
pub mod geometry;
pub mod layout;
pub mod params;
pub mod particle;

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

// Re-export key types for easier use by dependent crates
pub use config::{BoostConfig, BtdConfig, DiagConfig, DomainConfig, MovingWindowConfig, PulseConfig, RunConfig, SpeciesConfig};
pub use fields::{FieldDispatch, FieldKind};
pub use geometry::{IndexBox, RealBox, MOVING_AXIS, SPACEDIM};
pub use layout::{FabRecord, FieldSegment, ParticleBoxRecord, RunInfo, SegmentFormat, SnapshotHeader, SpeciesHeader};
pub use params::{BtdParams, MergeStrategy};
pub use particle::LabParticle;

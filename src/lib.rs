//! Back-transformed diagnostics: reconstructs lab-frame snapshots, one z-slice per
//! boosted-frame step, in bounded chunks merged incrementally on disk.

pub mod diagnostics;
pub mod field_buffer;
pub mod flush;
pub mod merge;
pub mod particle_buffer;
pub mod slice;
pub mod snapshot;
pub mod synthetic;
pub mod transform;

pub use diagnostics::{BtdDiagnostics, StepInput};
pub use field_buffer::{CellCenteredField, FieldBuffer};
pub use flush::{ChunkData, ChunkWriter, FlushController, SegmentWriter};
pub use merge::MergeEngine;
pub use particle_buffer::{BoostedSpecies, CrossingTransform, ParticleBuffer, ParticleState, ParticleTransform, SliceContext};
pub use snapshot::{Snapshot, SnapshotRegistry};
pub use synthetic::SyntheticRun;
pub use transform::{lab_cell_index, BoostFrame};

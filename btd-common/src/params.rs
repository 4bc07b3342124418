use crate::fields::FieldDispatch;
use crate::geometry::{RealBox, SPACEDIM};
use crate::layout::SegmentFormat;
use serde::{Deserialize, Serialize};

/// How a flushed chunk's files are moved into the cumulative snapshot.
#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// POSIX rename; no data is copied.
    Rename,
    /// Copy then delete, for stores without an atomic rename.
    Copy,
}

/// Runtime parameters derived from the configuration, consumed by every engine component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtdParams {
    // Boost
    pub gamma_boost: f64,
    pub beta_boost: f64,
    pub moving_window_v: f64, // m/s, along the moving axis

    // Boosted-frame domain at level 0
    pub prob_lo: [f64; SPACEDIM],
    pub prob_hi: [f64; SPACEDIM],
    pub n_cell: [i32; SPACEDIM],
    pub dt_boost: f64,
    pub ref_ratio: i32, // refinement ratio along the moving axis for the output level

    // User window, clipped to the domain at initialisation
    pub diag_lo: [f64; SPACEDIM],
    pub diag_hi: [f64; SPACEDIM],

    // Snapshots
    pub num_snapshots_lab: usize,
    pub dt_snapshots_lab: f64,
    pub buffer_size: i32,
    pub fields: FieldDispatch,
    pub species: Vec<String>,

    // Output
    pub file_prefix: String,
    pub file_min_digits: usize,
    pub segment_format: SegmentFormat,
    pub merge_strategy: MergeStrategy,
    pub merge_open_retries: u32,
    pub merge_retry_delay_ms: u64,
}

impl BtdParams {
    pub fn cell_size(&self, dim: usize) -> f64 {
        (self.prob_hi[dim] - self.prob_lo[dim]) / self.n_cell[dim] as f64
    }

    pub fn cell_sizes(&self) -> [f64; SPACEDIM] {
        [self.cell_size(0), self.cell_size(1), self.cell_size(2)]
    }

    /// Boosted-frame problem domain at the start of the run.
    pub fn prob_domain(&self) -> RealBox {
        RealBox::new(self.prob_lo, self.prob_hi)
    }

    pub fn do_particles(&self) -> bool {
        !self.species.is_empty()
    }
}

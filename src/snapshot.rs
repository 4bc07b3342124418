use crate::transform::{lab_cell_index, BoostFrame};
use btd_common::{BtdParams, IndexBox, RealBox, MOVING_AXIS, SPACEDIM};
use log::{debug, info, warn};

const Z: usize = MOVING_AXIS;

/// One requested lab-frame output and the state of its incremental reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub index: usize,
    /// Fixed lab-frame time the snapshot represents.
    pub lab_time: f64,
    /// Boosted-frame problem domain mapped to the lab frame; lab cell indices are
    /// measured from its low edge along the moving axis.
    pub prob_domain_lab: RealBox,
    /// Physical extent of the snapshot. Its moving-axis low edge is extended once
    /// the first chunk fixes the snapshot's index range.
    pub lab_domain: RealBox,
    pub snapshot_index_box: IndexBox,
    pub buffer_index_box: IndexBox,
    pub buffer_domain_lab: RealBox,
    /// Estimated lab-frame cell count of the whole snapshot per axis.
    pub snapshot_ncells_lab: [i32; SPACEDIM],

    pub current_lab_z: f64,
    pub current_boost_z: f64,
    pub previous_boost_z: f64,

    pub slices_in_buffer: usize,
    pub chunks_flushed: usize,
    pub max_chunks_expected: usize,
    pub is_full: bool,
    pub last_slice_reached: bool,

    /// Particles already merged into the snapshot, per output species.
    pub particles_flushed: Vec<u64>,
    /// Particles held by the current chunk, per output species.
    pub particles_in_buffer: Vec<u64>,
}

impl Snapshot {
    /// Places snapshot `index` in the lab frame and evaluates its slice coordinates
    /// at boosted time `t_boost`.
    pub fn initialize(index: usize, params: &BtdParams, frame: &BoostFrame, t_boost: f64) -> Self {
        let v = params.moving_window_v;
        let dx = params.cell_sizes();
        let lab_time = frame.snapshot_lab_time(index, params.dt_snapshots_lab, params.prob_hi[Z]);

        let mut prob_domain_lab = params.prob_domain();
        prob_domain_lab.set_lo(Z, frame.boosted_z_to_lab(params.prob_lo[Z], v, lab_time));
        prob_domain_lab.set_hi(Z, frame.boosted_z_to_lab(params.prob_hi[Z], v, lab_time));

        // User window clipped to the domain, then snapped to whole boosted cells.
        let mut diag_dom = RealBox::new([0.0; SPACEDIM], [0.0; SPACEDIM]);
        let mut lo = [0i32; SPACEDIM];
        let mut hi = [0i32; SPACEDIM];
        for d in 0..SPACEDIM {
            diag_dom.lo[d] = params.diag_lo[d].max(params.prob_lo[d]);
            diag_dom.hi[d] = params.diag_hi[d].min(params.prob_hi[d]);
            let lo_index = snap_floor((diag_dom.lo[d] - params.prob_lo[d]) / dx[d]);
            let hi_index = snap_ceil((diag_dom.hi[d] - params.prob_lo[d]) / dx[d]);
            lo[d] = lo_index.max(0);
            hi[d] = hi_index.max(0) - 1;
            if hi[d] < lo[d] {
                warn!(
                    "Snapshot {}: diagnostic window has no cells along axis {}; using a single cell.",
                    index, d
                );
                hi[d] = lo[d];
            }
        }
        let diag_box = IndexBox::new(lo, hi);
        for d in 0..SPACEDIM {
            diag_dom.lo[d] = params.prob_lo[d] + diag_box.lo[d] as f64 * dx[d];
            diag_dom.hi[d] = params.prob_lo[d] + (diag_box.hi[d] + 1) as f64 * dx[d];
        }

        let zmin_lab = frame.boosted_z_to_lab(diag_dom.lo[Z], v, lab_time);
        let zmax_lab = frame.boosted_z_to_lab(diag_dom.hi[Z], v, lab_time);
        let mut lab_domain = diag_dom;
        lab_domain.set_lo(Z, zmin_lab);
        lab_domain.set_hi(Z, zmax_lab);

        let dz = frame.dz_lab(params.dt_boost, params.ref_ratio as f64);
        let mut snapshot_ncells_lab = [0i32; SPACEDIM];
        for d in 0..SPACEDIM {
            let cells = if d == Z {
                snap_floor((zmax_lab - zmin_lab) / dz)
            } else {
                snap_floor(diag_dom.length(d) / dx[d])
            };
            snapshot_ncells_lab[d] = cells.max(0);
        }

        let nspecies = params.species.len();
        let current_boost_z = frame.boost_z(lab_time, t_boost);
        let snapshot = Snapshot {
            index,
            lab_time,
            prob_domain_lab,
            lab_domain,
            snapshot_index_box: diag_box,
            buffer_index_box: diag_box,
            buffer_domain_lab: lab_domain,
            snapshot_ncells_lab,
            current_lab_z: frame.lab_z(lab_time, t_boost),
            current_boost_z,
            previous_boost_z: current_boost_z,
            slices_in_buffer: 0,
            chunks_flushed: 0,
            max_chunks_expected: 0,
            is_full: false,
            last_slice_reached: false,
            particles_flushed: vec![0; nspecies],
            particles_in_buffer: vec![0; nspecies],
        };
        debug!(
            "Snapshot {}: t_lab = {:.6e} s, lab z = [{:.6e}, {:.6e}] m, ~{} lab cells along z.",
            index, lab_time, zmin_lab, zmax_lab, snapshot_ncells_lab[Z]
        );
        snapshot
    }

    /// Moves the slice to boosted time `t_boost`.
    pub fn update_z(&mut self, frame: &BoostFrame, t_boost: f64) {
        self.previous_boost_z = self.current_boost_z;
        self.current_boost_z = frame.boost_z(self.lab_time, t_boost);
        self.current_lab_z = frame.lab_z(self.lab_time, t_boost);
    }

    /// Lab cell index of the current slice.
    pub fn lab_cell_index(&self, dz_lab: f64) -> i32 {
        lab_cell_index(self.current_lab_z, self.prob_domain_lab.lo[Z], dz_lab)
    }

    /// Number of cells the current chunk can hold along the moving axis.
    pub fn chunk_len(&self) -> usize {
        self.buffer_index_box.length(Z)
    }

    pub fn buffer_empty(&self) -> bool {
        self.slices_in_buffer == 0
    }

    pub fn buffer_full(&self) -> bool {
        self.slices_in_buffer > 0 && self.slices_in_buffer >= self.chunk_len()
    }

    /// Fixes the snapshot's index range when the first slice of the first chunk
    /// arrives at lab cell `k`.
    pub fn define_snapshot_geometry(&mut self, k: i32, buffer_size: i32, dz_lab: f64) {
        let ncells = self.snapshot_ncells_lab[Z];
        let max_chunks = ((ncells + buffer_size - 1) / buffer_size).max(1);
        self.max_chunks_expected = max_chunks as usize;
        let num_z_cells = max_chunks * buffer_size;

        self.snapshot_index_box.set_small(Z, k - (num_z_cells - 1));
        self.snapshot_index_box.set_big(Z, k);
        let new_lo = self.lab_domain.hi[Z] - num_z_cells as f64 * dz_lab;
        self.lab_domain.set_lo(Z, new_lo);
        info!(
            "Snapshot {}: first slice at lab cell {}, expecting {} chunk(s) of {} cells.",
            self.index, k, max_chunks, buffer_size
        );
    }

    /// Starts a new chunk whose highest cell is `k`. The chunk never extends below
    /// lab cell 0 or below the snapshot box, so the last chunk holds exactly the remainder.
    pub fn define_buffer_box(&mut self, k: i32, buffer_size: i32, dz_lab: f64, dx: &[f64; SPACEDIM]) {
        let floor = self.snapshot_index_box.lo[Z].max(0);
        let lo_z = (k - buffer_size + 1).max(floor);
        let mut buffer_box = self.snapshot_index_box;
        buffer_box.set_small(Z, lo_z);
        buffer_box.set_big(Z, k);
        self.buffer_index_box = buffer_box;

        for d in 0..SPACEDIM {
            let cell = if d == Z { dz_lab } else { dx[d] };
            self.buffer_domain_lab.lo[d] = self.prob_domain_lab.lo[d] + buffer_box.lo[d] as f64 * cell;
            self.buffer_domain_lab.hi[d] = self.prob_domain_lab.lo[d] + (buffer_box.hi[d] + 1) as f64 * cell;
        }
        debug!(
            "Snapshot {}: chunk {} covers lab cells [{}, {}].",
            self.index, self.chunks_flushed, lo_z, k
        );
    }

    /// Closes the bookkeeping of a chunk that has been written and merged.
    /// `flushed_counts` are the per-species particle counts of that chunk.
    pub fn record_flush(&mut self, flushed_counts: &[u64]) {
        self.slices_in_buffer = 0;
        self.chunks_flushed += 1;
        for (total, count) in self.particles_flushed.iter_mut().zip(flushed_counts) {
            *total += *count;
        }
        self.particles_in_buffer.iter_mut().for_each(|c| *c = 0);
        self.set_full_status();
    }

    pub fn set_full_status(&mut self) {
        if self.is_full {
            return;
        }
        if self.last_slice_reached {
            self.is_full = true;
            info!(
                "Snapshot {} complete after {} chunk(s).",
                self.index, self.chunks_flushed
            );
        }
    }
}

/// Owns every snapshot of the run.
#[derive(Debug, Clone)]
pub struct SnapshotRegistry {
    snapshots: Vec<Snapshot>,
}

impl SnapshotRegistry {
    pub fn new(params: &BtdParams, frame: &BoostFrame, t_boost: f64) -> Self {
        let snapshots = (0..params.num_snapshots_lab)
            .map(|i| Snapshot::initialize(i, params, frame, t_boost))
            .collect();
        SnapshotRegistry { snapshots }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Snapshot> {
        self.snapshots.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Snapshot> {
        self.snapshots.iter_mut()
    }

    pub fn all_full(&self) -> bool {
        self.snapshots.iter().all(|s| s.is_full)
    }

    pub fn update_z(&mut self, frame: &BoostFrame, t_boost: f64) {
        for snapshot in &mut self.snapshots {
            snapshot.update_z(frame, t_boost);
        }
    }
}

// Floor/ceil that treat values within rounding noise of an integer as that integer.
fn snap_floor(x: f64) -> i32 {
    let r = x.round();
    if (x - r).abs() <= 1e-9 * r.abs().max(1.0) {
        r as i32
    } else {
        x.floor() as i32
    }
}

fn snap_ceil(x: f64) -> i32 {
    let r = x.round();
    if (x - r).abs() <= 1e-9 * r.abs().max(1.0) {
        r as i32
    } else {
        x.ceil() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btd_common::{FieldDispatch, MergeStrategy, SegmentFormat};

    fn params() -> BtdParams {
        BtdParams {
            gamma_boost: 2.0,
            beta_boost: 0.75f64.sqrt(),
            moving_window_v: btd_common::SPEED_OF_LIGHT,
            prob_lo: [-2.0, -2.0, 0.0],
            prob_hi: [2.0, 2.0, 64.0],
            n_cell: [4, 4, 64],
            dt_boost: 1.0e-9,
            ref_ratio: 1,
            diag_lo: [-2.0, -2.0, 0.0],
            diag_hi: [2.0, 2.0, 64.0],
            num_snapshots_lab: 3,
            dt_snapshots_lab: 1.0e-8,
            buffer_size: 4,
            fields: FieldDispatch::resolve(&["Ex".to_string()]).unwrap(),
            species: vec!["electrons".to_string()],
            file_prefix: "unused".to_string(),
            file_min_digits: 5,
            segment_format: SegmentFormat::Bincode,
            merge_strategy: MergeStrategy::Rename,
            merge_open_retries: 0,
            merge_retry_delay_ms: 0,
        }
    }

    #[test]
    fn initialize_maps_domain_to_lab_frame() {
        let p = params();
        let frame = BoostFrame::new(p.gamma_boost).unwrap();
        let s = Snapshot::initialize(1, &p, &frame, 0.0);
        assert_eq!(s.snapshot_index_box, IndexBox::new([0, 0, 0], [3, 3, 63]));
        let lab_len = 64.0 / ((1.0 + frame.beta) * frame.gamma);
        assert!((s.lab_domain.length(Z) - lab_len).abs() < 1e-9);
        assert!((s.lab_time - (1.0e-8 + frame.gamma * frame.beta * 64.0 / btd_common::SPEED_OF_LIGHT)).abs() < 1e-20);
        assert_eq!(s.particles_flushed, vec![0]);
        assert!(!s.is_full);
    }

    #[test]
    fn empty_window_axis_is_forced_to_one_cell() {
        let mut p = params();
        p.diag_lo[0] = 0.5;
        p.diag_hi[0] = 0.5;
        let frame = BoostFrame::new(p.gamma_boost).unwrap();
        let s = Snapshot::initialize(0, &p, &frame, 0.0);
        assert_eq!(s.snapshot_index_box.length(0), 1);
        assert_eq!(s.snapshot_index_box.lo[0], 2);
    }

    #[test]
    fn last_chunk_is_sized_to_the_remainder() {
        let p = params();
        let frame = BoostFrame::new(p.gamma_boost).unwrap();
        let mut s = Snapshot::initialize(0, &p, &frame, 0.0);
        s.snapshot_ncells_lab[Z] = 10;
        let dz = 0.5;
        s.define_snapshot_geometry(9, 4, dz);
        assert_eq!(s.max_chunks_expected, 3);
        assert_eq!((s.snapshot_index_box.lo[Z], s.snapshot_index_box.hi[Z]), (-2, 9));

        let dx = p.cell_sizes();
        s.define_buffer_box(9, 4, dz, &dx);
        assert_eq!(s.chunk_len(), 4);
        s.define_buffer_box(1, 4, dz, &dx);
        assert_eq!((s.buffer_index_box.lo[Z], s.buffer_index_box.hi[Z]), (0, 1));
        assert_eq!(s.chunk_len(), 2);
        assert!(s.snapshot_index_box.contains_along(&s.buffer_index_box, Z));
        assert!((s.buffer_domain_lab.length(Z) - 2.0 * dz).abs() < 1e-12);
    }

    #[test]
    fn record_flush_counts_and_closes() {
        let p = params();
        let frame = BoostFrame::new(p.gamma_boost).unwrap();
        let mut s = Snapshot::initialize(0, &p, &frame, 0.0);
        s.slices_in_buffer = 4;
        s.particles_in_buffer = vec![7];
        s.record_flush(&[7]);
        assert_eq!(s.chunks_flushed, 1);
        assert_eq!(s.slices_in_buffer, 0);
        assert_eq!(s.particles_flushed, vec![7]);
        assert_eq!(s.particles_in_buffer, vec![0]);
        assert!(!s.is_full);

        s.last_slice_reached = true;
        s.slices_in_buffer = 2;
        s.record_flush(&[3]);
        assert_eq!(s.chunks_flushed, 2);
        assert_eq!(s.particles_flushed, vec![10]);
        assert!(s.is_full);
    }

    #[test]
    fn snapping_ignores_rounding_noise() {
        assert_eq!(snap_ceil(64.000000000001), 64);
        assert_eq!(snap_ceil(63.5), 64);
        assert_eq!(snap_floor(10.999999999999), 11);
        assert_eq!(snap_floor(11.25), 11);
    }
}

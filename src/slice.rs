//! Per-step decision of whether a snapshot receives a slice, and which lab cell it fills.

use crate::snapshot::Snapshot;
use btd_common::{RealBox, MOVING_AXIS};
use log::trace;

/// Outcome of evaluating one snapshot against the current boosted-frame window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SliceSelection {
    pub in_domain: bool,
    /// Lab cell index of the slice. Meaningful only when `in_domain` is true.
    pub k: i32,
}

/// True if the snapshot's current slice lies inside both the boosted-frame window
/// `boost_domain` and the snapshot's lab domain.
pub fn slice_in_domain(snapshot: &Snapshot, boost_domain: &RealBox) -> bool {
    boost_domain.contains_along(MOVING_AXIS, snapshot.current_boost_z)
        && snapshot.lab_domain.contains_along(MOVING_AXIS, snapshot.current_lab_z)
}

/// Evaluates the current slice of `snapshot` and marks the snapshot when the slice
/// reaches lab cell 0. Coordinates must already be updated for this step.
pub fn select_slice(snapshot: &mut Snapshot, boost_domain: &RealBox, dz_lab: f64) -> SliceSelection {
    let in_domain = slice_in_domain(snapshot, boost_domain);
    let k = snapshot.lab_cell_index(dz_lab);
    if in_domain && k == 0 {
        snapshot.last_slice_reached = true;
    }
    trace!(
        "Snapshot {}: z_boost = {:.6e}, z_lab = {:.6e}, k = {}, in domain: {}",
        snapshot.index, snapshot.current_boost_z, snapshot.current_lab_z, k, in_domain
    );
    SliceSelection { in_domain, k }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::BoostFrame;
    use btd_common::{BtdParams, FieldDispatch, MergeStrategy, SegmentFormat, SPEED_OF_LIGHT};

    fn setup() -> (BtdParams, BoostFrame) {
        let params = BtdParams {
            gamma_boost: 2.0,
            beta_boost: 0.75f64.sqrt(),
            moving_window_v: SPEED_OF_LIGHT,
            prob_lo: [-2.0, -2.0, 0.0],
            prob_hi: [2.0, 2.0, 64.0],
            n_cell: [4, 4, 64],
            dt_boost: 1.0e-9,
            ref_ratio: 1,
            diag_lo: [-2.0, -2.0, 0.0],
            diag_hi: [2.0, 2.0, 64.0],
            num_snapshots_lab: 1,
            dt_snapshots_lab: 1.0e-8,
            buffer_size: 4,
            fields: FieldDispatch::resolve(&["rho".to_string()]).unwrap(),
            species: Vec::new(),
            file_prefix: "unused".to_string(),
            file_min_digits: 5,
            segment_format: SegmentFormat::Bincode,
            merge_strategy: MergeStrategy::Rename,
            merge_open_retries: 0,
            merge_retry_delay_ms: 0,
        };
        let frame = BoostFrame::new(params.gamma_boost).unwrap();
        (params, frame)
    }

    #[test]
    fn slice_outside_boosted_window_is_rejected() {
        let (params, frame) = setup();
        let mut s = Snapshot::initialize(0, &params, &frame, 0.0);
        let far = RealBox::new([-2.0, -2.0, 1.0e6], [2.0, 2.0, 1.0e6 + 64.0]);
        let before = s.clone();
        let sel = select_slice(&mut s, &far, 1.0);
        assert!(!sel.in_domain);
        assert_eq!(s, before);
    }

    #[test]
    fn cell_zero_marks_last_slice() {
        let (params, frame) = setup();
        let mut s = Snapshot::initialize(0, &params, &frame, 0.0);
        let dz = 0.25;
        s.current_lab_z = s.prob_domain_lab.lo[MOVING_AXIS] + 0.5 * dz;
        s.current_boost_z = 10.0;
        s.lab_domain.set_lo(MOVING_AXIS, s.prob_domain_lab.lo[MOVING_AXIS]);
        let wide = RealBox::new([-2.0, -2.0, -1.0e3], [2.0, 2.0, 1.0e3]);
        let sel = select_slice(&mut s, &wide, dz);
        assert!(sel.in_domain);
        assert_eq!(sel.k, 0);
        assert!(s.last_slice_reached);
    }
}

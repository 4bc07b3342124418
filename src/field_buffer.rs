//! Bounded lab-frame field chunk, filled one z-slice per step from the
//! boosted-frame cell-centred field.

use crate::transform::BoostFrame;
use anyhow::Result;
use btd_common::{FieldDispatch, FieldKind, FieldSegment, IndexBox, RealBox, MOVING_AXIS, SPACEDIM, SPEED_OF_LIGHT};
use rayon::prelude::*;

const C: f64 = SPEED_OF_LIGHT;
const NCOMP: usize = FieldKind::NCOMP;

/// Coarsest-level, cell-centred boosted-frame field handed to the diagnostics each
/// step. It always carries the ten canonical components in `FieldKind` order.
#[derive(Debug, Clone)]
pub struct CellCenteredField {
    /// Physical extent of the window at the current step.
    pub domain: RealBox,
    pub values: FieldSegment,
}

impl CellCenteredField {
    /// Zero field over `n_cell` cells of `domain`.
    pub fn zeros(domain: RealBox, n_cell: [i32; SPACEDIM]) -> Self {
        let index_box = IndexBox::new([0; SPACEDIM], [n_cell[0] - 1, n_cell[1] - 1, n_cell[2] - 1]);
        CellCenteredField {
            domain,
            values: FieldSegment::zeros(index_box, NCOMP),
        }
    }

    pub fn cell_size(&self, dim: usize) -> f64 {
        self.domain.length(dim) / self.values.index_box.length(dim) as f64
    }

    /// Cell-centre coordinate of cell `i` along `dim`.
    pub fn cell_center(&self, dim: usize, i: i32) -> f64 {
        self.domain.lo[dim] + (i as f64 + 0.5) * self.cell_size(dim)
    }

    pub fn set(&mut self, kind: FieldKind, idx: [i32; SPACEDIM], value: f64) {
        let n = self.values.index(kind.source_component(), idx);
        self.values.data[n] = value;
    }

    /// Fills every component of every cell from `f(cell centre) -> components`.
    pub fn fill_with<F>(&mut self, f: F)
    where
        F: Fn([f64; SPACEDIM]) -> [f64; NCOMP] + Sync,
    {
        let index_box = self.values.index_box;
        let ncells = index_box.num_cells();
        let nx = index_box.length(0);
        let ny = index_box.length(1);
        let centers: Vec<[f64; SPACEDIM]> = (0..ncells)
            .map(|n| {
                let i = (n % nx) as i32;
                let j = ((n / nx) % ny) as i32;
                let k = (n / (nx * ny)) as i32;
                [
                    self.cell_center(0, index_box.lo[0] + i),
                    self.cell_center(1, index_box.lo[1] + j),
                    self.cell_center(2, index_box.lo[2] + k),
                ]
            })
            .collect();
        let cells: Vec<[f64; NCOMP]> = centers.par_iter().map(|c| f(*c)).collect();
        for (n, comps) in cells.iter().enumerate() {
            for (c, value) in comps.iter().enumerate() {
                self.values.data[c * ncells + n] = *value;
            }
        }
    }

    /// All ten components at transverse cell `(i, j)`, linearly interpolated along
    /// the moving axis at boosted coordinate `z`. Outside the window the nearest
    /// cell is used.
    pub fn sample_z(&self, i: i32, j: i32, z: f64) -> [f64; NCOMP] {
        let index_box = self.values.index_box;
        let nz = index_box.length(MOVING_AXIS) as i32;
        let dz = self.cell_size(MOVING_AXIS);
        let s = (z - self.domain.lo[MOVING_AXIS]) / dz - 0.5;
        let (k0, k1, w1) = if s <= 0.0 || nz == 1 {
            (0, 0, 0.0)
        } else if s >= (nz - 1) as f64 {
            (nz - 1, nz - 1, 0.0)
        } else {
            let k0 = s.floor() as i32;
            (k0, k0 + 1, s - k0 as f64)
        };
        let lo_z = index_box.lo[MOVING_AXIS];
        let mut out = [0.0; NCOMP];
        for (c, v) in out.iter_mut().enumerate() {
            let a = self.values.get(c, [i, j, lo_z + k0]);
            let b = self.values.get(c, [i, j, lo_z + k1]);
            *v = (1.0 - w1) * a + w1 * b;
        }
        out
    }
}

/// Lorentz transform of the ten canonical components from the boosted frame to the lab frame.
pub fn lorentz_transform(frame: &BoostFrame, f: &[f64; NCOMP]) -> [f64; NCOMP] {
    let (g, b) = (frame.gamma, frame.beta);
    let [ex, ey, ez, bx, by, bz, jx, jy, jz, rho] = *f;
    [
        g * (ex + b * C * by),
        g * (ey - b * C * bx),
        ez,
        g * (bx - b * ey / C),
        g * (by + b * ex / C),
        bz,
        jx,
        jy,
        g * (jz + b * C * rho),
        g * (rho + b * jz / C),
    ]
}

/// Field data of the chunk currently accumulating for one snapshot.
#[derive(Debug, Clone)]
pub struct FieldBuffer {
    segment: FieldSegment,
}

impl FieldBuffer {
    /// Zero-filled buffer over `buffer_box` with one component per dispatched variable.
    pub fn new(buffer_box: IndexBox, dispatch: &FieldDispatch) -> Self {
        FieldBuffer {
            segment: FieldSegment::zeros(buffer_box, dispatch.ncomp()),
        }
    }

    pub fn index_box(&self) -> IndexBox {
        self.segment.index_box
    }

    pub fn segment(&self) -> &FieldSegment {
        &self.segment
    }

    pub fn into_segment(self) -> FieldSegment {
        self.segment
    }

    /// Writes the lab-frame slice at boosted `z_boost` into lab cell `k`.
    pub fn ingest_slice(
        &mut self,
        k: i32,
        source: &CellCenteredField,
        z_boost: f64,
        frame: &BoostFrame,
        dispatch: &FieldDispatch,
    ) -> Result<()> {
        let bx = self.segment.index_box;
        if k < bx.lo[MOVING_AXIS] || k > bx.hi[MOVING_AXIS] {
            anyhow::bail!(
                "Lab cell {} is outside the field buffer [{}, {}].",
                k,
                bx.lo[MOVING_AXIS],
                bx.hi[MOVING_AXIS]
            );
        }
        let src_box = source.values.index_box;
        let nx = bx.length(0);
        let ny = bx.length(1);

        let plane: Vec<[f64; NCOMP]> = (0..nx * ny)
            .into_par_iter()
            .map(|n| {
                let i = bx.lo[0] + (n % nx) as i32;
                let j = bx.lo[1] + (n / nx) as i32;
                if !src_box.contains([i, j, src_box.lo[MOVING_AXIS]]) {
                    return [0.0; NCOMP];
                }
                lorentz_transform(frame, &source.sample_z(i, j, z_boost))
            })
            .collect();

        for (n, lab) in plane.iter().enumerate() {
            let i = bx.lo[0] + (n % nx) as i32;
            let j = bx.lo[1] + (n / nx) as i32;
            for (out_comp, (_, src_comp)) in dispatch.entries.iter().enumerate() {
                let idx = self.segment.index(out_comp, [i, j, k]);
                self.segment.data[idx] = lab[*src_comp];
            }
        }
        Ok(())
    }
}

/// Per-component minimum and maximum of a segment.
pub fn component_min_max(segment: &FieldSegment) -> (Vec<f64>, Vec<f64>) {
    let n = segment.ncells().max(1);
    segment
        .data
        .par_chunks(n)
        .map(|values| {
            values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
        })
        .collect::<Vec<(f64, f64)>>()
        .into_iter()
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> BoostFrame {
        BoostFrame::new(2.0).unwrap()
    }

    fn source() -> CellCenteredField {
        let domain = RealBox::new([-2.0, -2.0, 0.0], [2.0, 2.0, 8.0]);
        let mut field = CellCenteredField::zeros(domain, [4, 4, 8]);
        field.fill_with(|c| {
            let mut f = [0.0; NCOMP];
            f[FieldKind::Ex as usize] = c[2];
            f[FieldKind::Rho as usize] = 1.0;
            f
        });
        field
    }

    #[test]
    fn sample_interpolates_between_cell_centres() {
        let field = source();
        let f = field.sample_z(0, 0, 3.0);
        assert!((f[FieldKind::Ex as usize] - 3.0).abs() < 1e-12);
        let edge = field.sample_z(0, 0, -10.0);
        assert!((edge[FieldKind::Ex as usize] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn transform_mixes_e_and_b() {
        let fr = frame();
        let mut f = [0.0; NCOMP];
        f[FieldKind::Ex as usize] = 1.0;
        f[FieldKind::By as usize] = 1.0 / C;
        let lab = lorentz_transform(&fr, &f);
        assert!((lab[FieldKind::Ex as usize] - fr.gamma * (1.0 + fr.beta)).abs() < 1e-12);
        assert!((lab[FieldKind::By as usize] * C - fr.gamma * (1.0 + fr.beta)).abs() < 1e-12);
        assert_eq!(lab[FieldKind::Ez as usize], 0.0);
    }

    #[test]
    fn rest_charge_is_contracted() {
        let fr = frame();
        let mut f = [0.0; NCOMP];
        f[FieldKind::Rho as usize] = 1.0;
        let lab = lorentz_transform(&fr, &f);
        assert!((lab[FieldKind::Rho as usize] - 2.0).abs() < 1e-12);
        assert!((lab[FieldKind::Jz as usize] - 2.0 * fr.beta * C).abs() < 1e-3);
    }

    #[test]
    fn slice_lands_in_its_cell_only() {
        let fr = frame();
        let names = vec!["rho".to_string(), "Ex".to_string()];
        let dispatch = FieldDispatch::resolve(&names).unwrap();
        let bx = IndexBox::new([0, 0, 4], [3, 3, 7]);
        let mut buffer = FieldBuffer::new(bx, &dispatch);
        buffer.ingest_slice(6, &source(), 3.0, &fr, &dispatch).unwrap();

        let seg = buffer.segment();
        assert!((seg.get(0, [1, 2, 6]) - 2.0).abs() < 1e-12);
        assert!((seg.get(1, [1, 2, 6]) - 2.0 * 3.0).abs() < 1e-9);
        assert_eq!(seg.get(0, [1, 2, 5]), 0.0);
        assert_eq!(seg.get(0, [1, 2, 7]), 0.0);

        assert!(buffer.ingest_slice(3, &source(), 3.0, &fr, &dispatch).is_err());
    }

    #[test]
    fn min_max_per_component() {
        let names = vec!["rho".to_string()];
        let dispatch = FieldDispatch::resolve(&names).unwrap();
        let mut buffer = FieldBuffer::new(IndexBox::new([0, 0, 0], [1, 1, 1]), &dispatch);
        buffer.ingest_slice(1, &source(), 3.0, &frame(), &dispatch).unwrap();
        let (min, max) = component_min_max(buffer.segment());
        assert_eq!(min, vec![0.0]);
        assert!((max[0] - 2.0).abs() < 1e-12);
    }
}

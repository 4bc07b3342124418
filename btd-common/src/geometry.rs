use serde::{Deserialize, Serialize};

/// Number of spatial dimensions carried by every box. Reduced-dimension runs keep
/// a single cell along the unused axes.
pub const SPACEDIM: usize = 3;

/// Index of the moving-window (and boost) axis.
pub const MOVING_AXIS: usize = 2;

/// A cell-centred box in integer index space, inclusive on both ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBox {
    pub lo: [i32; SPACEDIM],
    pub hi: [i32; SPACEDIM],
}

impl IndexBox {
    pub fn new(lo: [i32; SPACEDIM], hi: [i32; SPACEDIM]) -> Self {
        IndexBox { lo, hi }
    }

    /// Number of cells along `dim`. Zero if the box is empty along that axis.
    pub fn length(&self, dim: usize) -> usize {
        (self.hi[dim] - self.lo[dim] + 1).max(0) as usize
    }

    pub fn num_cells(&self) -> usize {
        (0..SPACEDIM).map(|d| self.length(d)).product()
    }

    pub fn is_empty(&self) -> bool {
        (0..SPACEDIM).any(|d| self.hi[d] < self.lo[d])
    }

    pub fn set_small(&mut self, dim: usize, value: i32) {
        self.lo[dim] = value;
    }

    pub fn set_big(&mut self, dim: usize, value: i32) {
        self.hi[dim] = value;
    }

    /// Grows (or shrinks, for negative `n`) the box by `n` cells on both ends of `dim`.
    pub fn grown(&self, dim: usize, n: i32) -> Self {
        let mut out = *self;
        out.lo[dim] -= n;
        out.hi[dim] += n;
        out
    }

    pub fn contains(&self, idx: [i32; SPACEDIM]) -> bool {
        (0..SPACEDIM).all(|d| idx[d] >= self.lo[d] && idx[d] <= self.hi[d])
    }

    /// True if `other` lies entirely inside `self` along `dim`.
    pub fn contains_along(&self, other: &IndexBox, dim: usize) -> bool {
        other.lo[dim] >= self.lo[dim] && other.hi[dim] <= self.hi[dim]
    }

    /// Smallest box enclosing both boxes.
    pub fn union(&self, other: &IndexBox) -> Self {
        let mut out = *self;
        for d in 0..SPACEDIM {
            out.lo[d] = self.lo[d].min(other.lo[d]);
            out.hi[d] = self.hi[d].max(other.hi[d]);
        }
        out
    }

    /// Linear offset of `idx` inside the box, x fastest (Fortran order).
    #[inline(always)]
    pub fn offset(&self, idx: [i32; SPACEDIM]) -> usize {
        let i = (idx[0] - self.lo[0]) as usize;
        let j = (idx[1] - self.lo[1]) as usize;
        let k = (idx[2] - self.lo[2]) as usize;
        i + self.length(0) * (j + self.length(1) * k)
    }
}

/// A box in physical coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealBox {
    pub lo: [f64; SPACEDIM],
    pub hi: [f64; SPACEDIM],
}

impl RealBox {
    pub fn new(lo: [f64; SPACEDIM], hi: [f64; SPACEDIM]) -> Self {
        RealBox { lo, hi }
    }

    pub fn length(&self, dim: usize) -> f64 {
        self.hi[dim] - self.lo[dim]
    }

    pub fn set_lo(&mut self, dim: usize, value: f64) {
        self.lo[dim] = value;
    }

    pub fn set_hi(&mut self, dim: usize, value: f64) {
        self.hi[dim] = value;
    }

    pub fn contains_along(&self, dim: usize, value: f64) -> bool {
        value >= self.lo[dim] && value <= self.hi[dim]
    }

    pub fn union(&self, other: &RealBox) -> Self {
        let mut out = *self;
        for d in 0..SPACEDIM {
            out.lo[d] = self.lo[d].min(other.lo[d]);
            out.hi[d] = self.hi[d].max(other.hi[d]);
        }
        out
    }

    /// Returns a copy shifted by `delta` along `dim`.
    pub fn shifted(&self, dim: usize, delta: f64) -> Self {
        let mut out = *self;
        out.lo[dim] += delta;
        out.hi[dim] += delta;
        out
    }
}

use serde::{Deserialize, Serialize};

/// A macro-particle expressed in the lab frame at a snapshot's lab time.
/// Momenta are `u = gamma * v` (m/s).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabParticle {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub ux: f64,
    pub uy: f64,
    pub uz: f64,
    pub w: f64,
}

impl LabParticle {
    pub const COMPONENT_NAMES: [&'static str; 7] = ["x", "y", "z", "ux", "uy", "uz", "w"];

    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

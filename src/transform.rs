//! Lorentz boost between the simulation (boosted) frame and the lab frame,
//! for a boost along the moving-window axis. Everything here is pure.

use anyhow::Result;
use btd_common::SPEED_OF_LIGHT;

const C: f64 = SPEED_OF_LIGHT;

/// Boost factors of the simulation frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoostFrame {
    pub gamma: f64,
    pub beta: f64,
}

impl BoostFrame {
    pub fn new(gamma: f64) -> Result<Self> {
        if !(gamma > 1.0) {
            anyhow::bail!("gamma_boost must be > 1 (got {}).", gamma);
        }
        Ok(BoostFrame {
            gamma,
            beta: (1.0 - 1.0 / (gamma * gamma)).sqrt(),
        })
    }

    /// Lab time of snapshot `i`: the first snapshot is taken when the lab-frame
    /// image of the initial window's upper edge has been fully crossed.
    pub fn snapshot_lab_time(&self, i: usize, dt_snapshots_lab: f64, zmax_boost0: f64) -> f64 {
        i as f64 * dt_snapshots_lab + self.gamma * self.beta * zmax_boost0 / C
    }

    /// Boosted-frame z of the plane that is at lab time `t_lab` when the boosted clock reads `t_boost`.
    #[inline]
    pub fn boost_z(&self, t_lab: f64, t_boost: f64) -> f64 {
        (t_lab / self.gamma - t_boost) * C / self.beta
    }

    /// Lab-frame z of the same plane.
    #[inline]
    pub fn lab_z(&self, t_lab: f64, t_boost: f64) -> f64 {
        (t_lab - t_boost / self.gamma) * C / self.beta
    }

    /// Lab-frame cell size swept by one boosted-frame step at a level with refinement `ref_ratio`.
    #[inline]
    pub fn dz_lab(&self, dt_boost: f64, ref_ratio: f64) -> f64 {
        C * dt_boost / (self.beta * self.gamma * ref_ratio)
    }

    /// Maps a boosted-frame domain coordinate along the moving axis to the lab
    /// frame at `t_lab`, for a window moving at `v`.
    #[inline]
    pub fn boosted_z_to_lab(&self, z_boost: f64, v: f64, t_lab: f64) -> f64 {
        z_boost / ((1.0 + self.beta) * self.gamma) + v * t_lab
    }

    /// Lorentz transform of an event `(t, z)` from the boosted frame to the lab frame.
    #[inline]
    pub fn event_to_lab(&self, t_boost: f64, z_boost: f64) -> (f64, f64) {
        let t_lab = self.gamma * (t_boost + self.beta * z_boost / C);
        let z_lab = self.gamma * (z_boost + self.beta * C * t_boost);
        (t_lab, z_lab)
    }
}

/// Lab cell that a slice at `current_lab_z` falls into. Cells are centred half a
/// cell above `domain_min_lab_z`; ties go to the lower cell (floor, not round).
#[inline]
pub fn lab_cell_index(current_lab_z: f64, domain_min_lab_z: f64, dz_lab: f64) -> i32 {
    ((current_lab_z - (domain_min_lab_z + 0.5 * dz_lab)) / dz_lab).floor() as i32
}

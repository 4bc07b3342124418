//! Lab-frame particle accumulation per snapshot and species, and the
//! back-transform collaborator that produces those particles.

use crate::snapshot::Snapshot;
use crate::transform::BoostFrame;
use anyhow::Result;
use btd_common::{IndexBox, LabParticle, RealBox, MOVING_AXIS, SPACEDIM, SPEED_OF_LIGHT};
use log::debug;
use rayon::prelude::*;

const C: f64 = SPEED_OF_LIGHT;

/// What the particle producer needs to know about the slice being reconstructed.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SliceContext {
    pub snapshot: usize,
    pub lab_time: f64,
    /// Boosted time of the current step and of the previous one.
    pub t_boost: f64,
    pub t_boost_previous: f64,
    pub current_boost_z: f64,
    pub previous_boost_z: f64,
    pub current_lab_z: f64,
    pub k: i32,
}

impl SliceContext {
    pub fn new(snapshot: &Snapshot, t_boost: f64, dt_boost: f64, k: i32) -> Self {
        SliceContext {
            snapshot: snapshot.index,
            lab_time: snapshot.lab_time,
            t_boost,
            t_boost_previous: t_boost - dt_boost,
            current_boost_z: snapshot.current_boost_z,
            previous_boost_z: snapshot.previous_boost_z,
            current_lab_z: snapshot.current_lab_z,
            k,
        }
    }
}

/// External producer of lab-frame particles for one slice of one snapshot.
pub trait ParticleTransform {
    /// Particles of `species` that belong to the slice, already expressed in the lab frame.
    fn transform_slice(&self, species: &str, ctx: &SliceContext, frame: &BoostFrame) -> Result<Vec<LabParticle>>;
}

/// Boosted-frame macro-particles of one species, stored as structure of arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleState {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub ux: Vec<f64>,
    pub uy: Vec<f64>,
    pub uz: Vec<f64>,
    pub w: Vec<f64>,
}

impl ParticleState {
    pub fn with_capacity(n: usize) -> Self {
        ParticleState {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
            ux: Vec::with_capacity(n),
            uy: Vec::with_capacity(n),
            uz: Vec::with_capacity(n),
            w: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    pub fn push(&mut self, pos: [f64; 3], u: [f64; 3], w: f64) {
        self.x.push(pos[0]);
        self.y.push(pos[1]);
        self.z.push(pos[2]);
        self.ux.push(u[0]);
        self.uy.push(u[1]);
        self.uz.push(u[2]);
        self.w.push(w);
    }
}

/// Two consecutive boosted-frame states of a species.
#[derive(Debug, Clone)]
pub struct BoostedSpecies {
    pub name: String,
    pub previous: ParticleState,
    pub current: ParticleState,
}

impl BoostedSpecies {
    pub fn new(name: &str, initial: ParticleState) -> Self {
        BoostedSpecies {
            name: name.to_string(),
            previous: initial.clone(),
            current: initial,
        }
    }

    /// Shifts `current` into `previous` and installs the new state.
    pub fn advance(&mut self, next: ParticleState) {
        self.previous = std::mem::replace(&mut self.current, next);
    }
}

/// Selects particles whose trajectory crossed the snapshot's slice plane between
/// the previous and the current step, and back-transforms them at the crossing.
#[derive(Debug, Clone, Default)]
pub struct CrossingTransform {
    pub species: Vec<BoostedSpecies>,
}

impl CrossingTransform {
    pub fn new(species: Vec<BoostedSpecies>) -> Self {
        CrossingTransform { species }
    }
}

impl ParticleTransform for CrossingTransform {
    fn transform_slice(&self, species: &str, ctx: &SliceContext, frame: &BoostFrame) -> Result<Vec<LabParticle>> {
        let Some(sp) = self.species.iter().find(|s| s.name == species) else {
            return Ok(Vec::new());
        };
        if sp.previous.len() != sp.current.len() {
            anyhow::bail!(
                "Species '{}' changed particle count between steps ({} -> {}).",
                species,
                sp.previous.len(),
                sp.current.len()
            );
        }
        let (old, new) = (&sp.previous, &sp.current);
        let out = (0..new.len())
            .into_par_iter()
            .filter_map(|n| {
                let d_old = old.z[n] - ctx.previous_boost_z;
                let d_new = new.z[n] - ctx.current_boost_z;
                // Half-open in time: a particle resting on the plane belongs to the step it leaves it.
                let crossed = (d_old >= 0.0 && d_new < 0.0) || (d_old <= 0.0 && d_new > 0.0);
                if !crossed {
                    return None;
                }
                let f = d_old / (d_old - d_new);
                let lerp = |a: f64, b: f64| a + f * (b - a);
                let t = lerp(ctx.t_boost_previous, ctx.t_boost);
                let pos = [lerp(old.x[n], new.x[n]), lerp(old.y[n], new.y[n]), lerp(old.z[n], new.z[n])];
                let u = [lerp(old.ux[n], new.ux[n]), lerp(old.uy[n], new.uy[n]), lerp(old.uz[n], new.uz[n])];
                Some(boost_particle_to_lab(frame, t, pos, u, old.w[n], ctx.lab_time))
            })
            .collect();
        Ok(out)
    }
}

/// Lorentz-transforms a boosted-frame particle event and drifts it to lab time `t_lab`.
pub fn boost_particle_to_lab(frame: &BoostFrame, t: f64, pos: [f64; 3], u: [f64; 3], w: f64, t_lab: f64) -> LabParticle {
    let (g, b) = (frame.gamma, frame.beta);
    let gamma_p = (1.0 + (u[0] * u[0] + u[1] * u[1] + u[2] * u[2]) / (C * C)).sqrt();
    let t_prime = g * (t + b * pos[2] / C);
    let z_prime = g * (pos[2] + b * C * t);
    let uz_prime = g * (u[2] + b * C * gamma_p);
    let gamma_p_prime = g * (gamma_p + b * u[2] / C);

    let dt = t_lab - t_prime;
    LabParticle {
        x: pos[0] + u[0] / gamma_p_prime * dt,
        y: pos[1] + u[1] / gamma_p_prime * dt,
        z: z_prime + uz_prime / gamma_p_prime * dt,
        ux: u[0],
        uy: u[1],
        uz: uz_prime,
        w,
    }
}

/// Lab-frame particles of one species collected for the current chunk of a snapshot.
#[derive(Debug, Clone, Default)]
pub struct ParticleBuffer {
    pub species: String,
    particles: Vec<LabParticle>,
    index_box: Option<IndexBox>,
    region: Option<RealBox>,
}

impl ParticleBuffer {
    pub fn new(species: &str) -> Self {
        ParticleBuffer {
            species: species.to_string(),
            ..Default::default()
        }
    }

    /// Re-targets the buffer at the snapshot's current chunk: one cell wider than the
    /// field chunk on each side of the moving axis.
    pub fn define(&mut self, snapshot: &Snapshot, dz_lab: f64) {
        let grown = snapshot.buffer_index_box.grown(MOVING_AXIS, 1);
        let z0 = snapshot.prob_domain_lab.lo[MOVING_AXIS];
        let mut region = snapshot.buffer_domain_lab;
        region.set_lo(MOVING_AXIS, z0 + grown.lo[MOVING_AXIS] as f64 * dz_lab);
        region.set_hi(MOVING_AXIS, z0 + (grown.hi[MOVING_AXIS] + 1) as f64 * dz_lab);
        self.index_box = Some(grown);
        self.region = Some(region);
        self.particles.clear();
    }

    pub fn index_box(&self) -> Option<IndexBox> {
        self.index_box
    }

    pub fn append(&mut self, mut particles: Vec<LabParticle>) -> usize {
        let n = particles.len();
        self.particles.append(&mut particles);
        n
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Drops particles that left the buffer region. Returns how many were removed.
    pub fn redistribute(&mut self) -> usize {
        let Some(region) = self.region else {
            return 0;
        };
        let before = self.particles.len();
        self.particles
            .retain(|p| (0..SPACEDIM).all(|d| region.contains_along(d, p.position()[d])));
        let dropped = before - self.particles.len();
        if dropped > 0 {
            debug!(
                "Species '{}': dropped {} particle(s) outside the chunk region.",
                self.species, dropped
            );
        }
        dropped
    }

    pub fn take(&mut self) -> Vec<LabParticle> {
        std::mem::take(&mut self.particles)
    }

    pub fn clear(&mut self) {
        self.particles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> BoostFrame {
        BoostFrame::new(2.0).unwrap()
    }

    #[test]
    fn particle_at_rest_on_the_plane_keeps_lab_time() {
        let fr = frame();
        let t_lab = 1.0e-7;
        let t = 2.0e-8;
        let z = fr.boost_z(t_lab, t);
        let p = boost_particle_to_lab(&fr, t, [0.1, 0.2, z], [0.0; 3], 3.0, t_lab);
        assert!((p.z - fr.lab_z(t_lab, t)).abs() < 1e-9);
        assert!((p.uz - fr.gamma * fr.beta * C).abs() < 1e-3);
        assert_eq!((p.x, p.y, p.w), (0.1, 0.2, 3.0));
    }

    #[test]
    fn only_crossing_particles_are_selected() {
        let fr = frame();
        let mut before = ParticleState::with_capacity(2);
        before.push([0.0, 0.0, 5.0], [0.0; 3], 1.0);
        before.push([0.0, 0.0, 20.0], [0.0; 3], 1.0);
        let transform = CrossingTransform::new(vec![BoostedSpecies::new("e", before)]);

        let ctx = SliceContext {
            snapshot: 0,
            lab_time: 0.0,
            t_boost: 1.0e-9,
            t_boost_previous: 0.0,
            current_boost_z: 4.0,
            previous_boost_z: 6.0,
            current_lab_z: 0.0,
            k: 0,
        };
        let out = transform.transform_slice("e", &ctx, &fr).unwrap();
        assert_eq!(out.len(), 1);
        assert!(transform.transform_slice("missing", &ctx, &fr).unwrap().is_empty());
    }

    #[test]
    fn particle_landing_on_the_plane_is_selected_once() {
        let fr = frame();
        let mut state = ParticleState::with_capacity(1);
        state.push([0.0, 0.0, 5.0], [0.0; 3], 1.0);
        let transform = CrossingTransform::new(vec![BoostedSpecies::new("e", state)]);
        let ctx = |previous: f64, current: f64, t: f64| SliceContext {
            snapshot: 0,
            lab_time: 0.0,
            t_boost: t + 1.0e-9,
            t_boost_previous: t,
            current_boost_z: current,
            previous_boost_z: previous,
            current_lab_z: 0.0,
            k: 0,
        };

        let arrives = transform.transform_slice("e", &ctx(6.0, 5.0, 0.0), &fr).unwrap();
        let leaves = transform.transform_slice("e", &ctx(5.0, 4.0, 1.0e-9), &fr).unwrap();
        assert_eq!(arrives.len() + leaves.len(), 1);
        assert_eq!(leaves.len(), 1);
    }

    #[test]
    fn redistribute_drops_outside_region() {
        let mut buffer = ParticleBuffer::new("e");
        buffer.region = Some(RealBox::new([-1.0; 3], [1.0; 3]));
        let inside = LabParticle { x: 0.0, y: 0.0, z: 0.5, ux: 0.0, uy: 0.0, uz: 0.0, w: 1.0 };
        let outside = LabParticle { z: 1.5, ..inside };
        buffer.append(vec![inside, outside, inside]);
        assert_eq!(buffer.redistribute(), 1);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.take().len(), 2);
        assert!(buffer.is_empty());
    }
}

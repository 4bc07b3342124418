//! Analytic boosted-frame run used by the engine binary: a plane-wave pulse on a
//! moving window plus ballistic particle beams.

use crate::diagnostics::StepInput;
use crate::field_buffer::CellCenteredField;
use crate::particle_buffer::{BoostedSpecies, CrossingTransform, ParticleState};
use anyhow::Result;
use btd_common::{BtdConfig, BtdParams, FieldKind, PulseConfig, RealBox, SpeciesConfig, MOVING_AXIS, SPEED_OF_LIGHT};
use log::{debug, info};
use rand::distr::Uniform;
use rand::prelude::*;
use rand_distr::Normal;
use rayon::prelude::*;

const C: f64 = SPEED_OF_LIGHT;

pub struct SyntheticRun {
    params: BtdParams,
    pulse: Option<PulseConfig>,
    field: CellCenteredField,
    particles: CrossingTransform,
    /// Number of completed steps.
    step: i64,
    t: f64,
}

impl SyntheticRun {
    pub fn new(config: &BtdConfig, params: &BtdParams) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.run.seed);
        let mut species = Vec::with_capacity(config.run.species.len());
        for sp in &config.run.species {
            let state = sample_beam(sp, &mut rng)?;
            info!("Species '{}': {} macro-particles in z = [{}, {}] m.", sp.name, state.len(), sp.z_min, sp.z_max);
            species.push(BoostedSpecies::new(&sp.name, state));
        }

        let window = window_at(params, 0.0);
        let mut run = SyntheticRun {
            params: params.clone(),
            pulse: config.run.pulse.clone(),
            field: CellCenteredField::zeros(window, params.n_cell),
            particles: CrossingTransform::new(species),
            step: 0,
            t: 0.0,
        };
        run.fill_field();
        Ok(run)
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn particle_count(&self) -> usize {
        self.particles.species.iter().map(|s| s.current.len()).sum()
    }

    /// Advances the boosted frame by one time step.
    pub fn advance(&mut self) {
        let dt = self.params.dt_boost;
        self.t += dt;
        self.step += 1;
        self.field.domain = window_at(&self.params, self.t);
        self.fill_field();
        for sp in &mut self.particles.species {
            let next = push_ballistic(&sp.current, dt);
            sp.advance(next);
        }
        debug!(
            "Synthetic step {}: t = {:.6e} s, window z = [{:.6e}, {:.6e}] m",
            self.step,
            self.t,
            self.field.domain.lo[MOVING_AXIS],
            self.field.domain.hi[MOVING_AXIS]
        );
    }

    /// Data handed to the diagnostics for the current state.
    pub fn input(&self) -> StepInput<'_> {
        StepInput {
            t_boost: self.t,
            boost_domain: self.field.domain,
            fields: &self.field,
            particles: &self.particles,
        }
    }

    fn fill_field(&mut self) {
        let Some(pulse) = self.pulse.clone() else {
            return;
        };
        let t = self.t;
        let k = 2.0 * std::f64::consts::PI / pulse.wavelength;
        self.field.fill_with(|c| {
            let xi = c[MOVING_AXIS] - pulse.z0 - C * t;
            let ex = pulse.e0 * (-(xi / pulse.length).powi(2)).exp() * (k * xi).cos();
            let mut f = [0.0; FieldKind::NCOMP];
            f[FieldKind::Ex as usize] = ex;
            f[FieldKind::By as usize] = ex / C;
            f
        });
    }
}

/// Boosted-frame window at time `t`.
pub fn window_at(params: &BtdParams, t: f64) -> RealBox {
    params.prob_domain().shifted(MOVING_AXIS, params.moving_window_v * t)
}

fn sample_beam(sp: &SpeciesConfig, rng: &mut StdRng) -> Result<ParticleState> {
    let z_dist = Uniform::new_inclusive(sp.z_min, sp.z_max)?;
    let transverse = Normal::new(0.0, sp.transverse_sigma)?;
    let momentum = Normal::new(0.0, sp.u_spread * C)?;
    let mut state = ParticleState::with_capacity(sp.num_particles);
    for _ in 0..sp.num_particles {
        let pos = [rng.sample(transverse), rng.sample(transverse), rng.sample(z_dist)];
        let u = [
            rng.sample(momentum),
            rng.sample(momentum),
            sp.uz_mean * C + rng.sample(momentum),
        ];
        state.push(pos, u, sp.weight);
    }
    Ok(state)
}

fn push_ballistic(state: &ParticleState, dt: f64) -> ParticleState {
    let drift = |p: &[f64], u: &[f64], n: usize| -> f64 {
        let g = (1.0 + (state.ux[n].powi(2) + state.uy[n].powi(2) + state.uz[n].powi(2)) / (C * C)).sqrt();
        p[n] + u[n] / g * dt
    };
    let n = state.len();
    let x = (0..n).into_par_iter().map(|i| drift(&state.x, &state.ux, i)).collect();
    let y = (0..n).into_par_iter().map(|i| drift(&state.y, &state.uy, i)).collect();
    let z = (0..n).into_par_iter().map(|i| drift(&state.z, &state.uz, i)).collect();
    ParticleState {
        x,
        y,
        z,
        ux: state.ux.clone(),
        uy: state.uy.clone(),
        uz: state.uz.clone(),
        w: state.w.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particles_at_rest_stay_put() {
        let mut s = ParticleState::with_capacity(1);
        s.push([1.0, 2.0, 3.0], [0.0; 3], 1.0);
        let next = push_ballistic(&s, 1.0e-9);
        assert_eq!(next, s);
    }

    #[test]
    fn relativistic_particle_moves_below_c() {
        let mut s = ParticleState::with_capacity(1);
        s.push([0.0; 3], [0.0, 0.0, 10.0 * C], 1.0);
        let next = push_ballistic(&s, 1.0e-9);
        assert!(next.z[0] > 0.0 && next.z[0] < C * 1.0e-9);
    }
}

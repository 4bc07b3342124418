use crate::fields::{FieldDispatch, FieldKind};
use crate::geometry::SPACEDIM;
use crate::layout::SegmentFormat;
use crate::params::{BtdParams, MergeStrategy};
use crate::SPEED_OF_LIGHT;
use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Lorentz boost of the simulation frame
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BoostConfig {
    pub gamma: f64,
    #[serde(default = "default_boost_direction")]
    pub direction: [i32; 3],
}

// Moving window of the boosted-frame simulation
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MovingWindowConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_moving_window_dir")]
    pub dir: String,
    /// Window speed in units of c.
    #[serde(default = "default_moving_window_v")]
    pub v: f64,
    #[serde(default)]
    pub start_step: i64,
    #[serde(default = "default_end_step")]
    pub end_step: i64,
}

// Boosted-frame simulation domain (level 0)
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DomainConfig {
    pub prob_lo: [f64; 3],
    pub prob_hi: [f64; 3],
    pub n_cell: [i32; 3],
    /// Explicit boosted-frame time step; derived from `cfl` when absent.
    #[serde(default)]
    pub dt: Option<f64>,
    #[serde(default = "default_cfl")]
    pub cfl: f64,
}

// Back-transformed diagnostic settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DiagConfig {
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    pub num_snapshots_lab: usize,
    #[serde(default)]
    pub dt_snapshots_lab: Option<f64>,
    #[serde(default)]
    pub dz_snapshots_lab: Option<f64>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: i32,
    #[serde(default = "default_fields_to_plot")]
    pub fields_to_plot: Vec<String>,
    #[serde(default)]
    pub species: Vec<String>,
    #[serde(default = "default_true")]
    pub write_species: bool,
    #[serde(default = "default_true")]
    pub do_back_transformed_fields: bool,
    #[serde(default = "default_true")]
    pub do_back_transformed_particles: bool,
    #[serde(default = "default_coarsening_ratio")]
    pub coarsening_ratio: [i32; 3],
    #[serde(default)]
    pub diag_lo: Option<[f64; 3]>,
    #[serde(default)]
    pub diag_hi: Option<[f64; 3]>,
    #[serde(default = "default_segment_format")]
    pub segment_format: SegmentFormat,
    #[serde(default = "default_merge_strategy")]
    pub merge_strategy: MergeStrategy,
    #[serde(default)]
    pub merge_open_retries: u32,
    #[serde(default = "default_merge_retry_delay_ms")]
    pub merge_retry_delay_ms: u64,
    #[serde(default = "default_file_min_digits")]
    pub file_min_digits: usize,
}

// Analytic laser pulse sampled by the synthetic driver
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PulseConfig {
    /// Peak electric field (V/m).
    pub e0: f64,
    pub wavelength: f64,
    /// Gaussian envelope length (m).
    pub length: f64,
    /// Pulse centre at t = 0 (m).
    pub z0: f64,
}

// A beam species pushed ballistically by the synthetic driver
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SpeciesConfig {
    pub name: String,
    pub num_particles: usize,
    pub z_min: f64,
    pub z_max: f64,
    #[serde(default)]
    pub transverse_sigma: f64,
    /// Mean longitudinal momentum `u_z / c` in the boosted frame.
    #[serde(default)]
    pub uz_mean: f64,
    /// Momentum spread `u / c` on every axis.
    #[serde(default)]
    pub u_spread: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

// Synthetic boosted-frame run driven by the engine binary
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunConfig {
    pub max_step: i64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub pulse: Option<PulseConfig>,
    #[serde(default)]
    pub species: Vec<SpeciesConfig>,
}

// Main configuration structure, loaded from a TOML file.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BtdConfig {
    pub boost: BoostConfig,
    #[serde(default)]
    pub moving_window: MovingWindowConfig,
    pub domain: DomainConfig,
    pub diag: DiagConfig,
    pub run: RunConfig,
}

impl Default for MovingWindowConfig {
    fn default() -> Self {
        MovingWindowConfig {
            enabled: true,
            dir: default_moving_window_dir(),
            v: default_moving_window_v(),
            start_step: 0,
            end_step: default_end_step(),
        }
    }
}

impl BtdConfig {
    /// Loads and validates the configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        debug!(
            "Loaded config '{}': gamma = {}, {} snapshot(s), {} species.",
            path_ref.display(),
            config.boost.gamma,
            config.diag.num_snapshots_lab,
            config.run.species.len()
        );
        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: BtdConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup checks. Every failure here is fatal and happens before any snapshot exists.
    pub fn validate(&self) -> Result<()> {
        // --- Boost ---
        if !(self.boost.gamma > 1.0) {
            anyhow::bail!("gamma_boost must be > 1 to use the back-transformed diagnostics (got {}).", self.boost.gamma);
        }
        if self.boost.direction != [0, 0, 1] {
            anyhow::bail!("The back-transformed diagnostics only work if the boost is along +z.");
        }

        // --- Moving window ---
        let mw = &self.moving_window;
        if !mw.enabled {
            anyhow::bail!("The moving window must be on when using the back-transformed diagnostics.");
        }
        if mw.dir != "z" {
            anyhow::bail!("The moving window must move along z for the back-transformed diagnostics (got '{}').", mw.dir);
        }
        if mw.start_step != 0 {
            anyhow::bail!("The moving window must start at step zero for the back-transformed diagnostics.");
        }
        if mw.end_step >= 0 {
            anyhow::bail!("The moving window must not stop when using the back-transformed diagnostics.");
        }
        if !(mw.v > 0.0) {
            anyhow::bail!("moving_window.v must be positive.");
        }

        // --- Domain ---
        for d in 0..SPACEDIM {
            if self.domain.n_cell[d] <= 0 {
                anyhow::bail!("domain.n_cell[{}] must be positive.", d);
            }
            if !(self.domain.prob_hi[d] > self.domain.prob_lo[d]) {
                anyhow::bail!("domain.prob_hi[{}] must be greater than domain.prob_lo[{}].", d, d);
            }
        }
        if let Some(dt) = self.domain.dt {
            if !(dt > 0.0) {
                anyhow::bail!("domain.dt must be positive.");
            }
        } else if !(self.domain.cfl > 0.0) {
            anyhow::bail!("domain.cfl must be positive when domain.dt is not given.");
        }

        // --- Diagnostic ---
        let diag = &self.diag;
        if diag.num_snapshots_lab == 0 {
            anyhow::bail!("diag.num_snapshots_lab must be greater than 0.");
        }
        match (diag.dt_snapshots_lab, diag.dz_snapshots_lab) {
            (None, None) => anyhow::bail!(
                "For back-transformed diagnostics, either dz_snapshots_lab or dt_snapshots_lab must be given."
            ),
            (Some(_), Some(_)) => anyhow::bail!("Give only one of dz_snapshots_lab and dt_snapshots_lab."),
            (Some(dt), None) if !(dt > 0.0) => anyhow::bail!("dt_snapshots_lab must be positive."),
            (None, Some(dz)) if !(dz > 0.0) => anyhow::bail!("dz_snapshots_lab must be positive."),
            _ => {}
        }
        if diag.buffer_size <= 0 {
            anyhow::bail!("diag.buffer_size must be greater than 0.");
        }
        if diag.coarsening_ratio != [1, 1, 1] {
            anyhow::bail!("Only a coarsening ratio of 1 in all directions is supported for back-transformed diagnostics.");
        }
        if !diag.do_back_transformed_fields {
            anyhow::bail!("Fields must be turned on for the back-transformed diagnostics.");
        }
        FieldDispatch::resolve(&diag.fields_to_plot)?;
        if diag.file_min_digits == 0 {
            anyhow::bail!("diag.file_min_digits must be at least 1.");
        }
        for name in &diag.species {
            if !self.run.species.iter().any(|s| &s.name == name) {
                anyhow::bail!("Species '{}' selected for output does not exist.", name);
            }
        }
        if let (Some(lo), Some(hi)) = (diag.diag_lo, diag.diag_hi) {
            for d in 0..SPACEDIM {
                if hi[d] < lo[d] {
                    anyhow::bail!("diag.diag_hi[{}] is below diag.diag_lo[{}].", d, d);
                }
            }
        }

        // --- Run ---
        if self.run.max_step < 0 {
            anyhow::bail!("run.max_step must not be negative.");
        }
        for s in &self.run.species {
            if !(s.z_max >= s.z_min) {
                anyhow::bail!("Species '{}' has z_max below z_min.", s.name);
            }
        }
        Ok(())
    }

    /// Names of the species written by the diagnostic.
    pub fn output_species(&self) -> Vec<String> {
        if !self.diag.do_back_transformed_particles {
            return Vec::new();
        }
        if !self.diag.species.is_empty() {
            return self.diag.species.clone();
        }
        if self.diag.write_species {
            self.run.species.iter().map(|s| s.name.clone()).collect()
        } else {
            Vec::new()
        }
    }

    /// Boosted-frame time step, explicit or from the CFL condition on the level-0 grid.
    pub fn dt_boost(&self) -> f64 {
        if let Some(dt) = self.domain.dt {
            return dt;
        }
        let inv_dx2: f64 = (0..SPACEDIM)
            .map(|d| {
                let dx = (self.domain.prob_hi[d] - self.domain.prob_lo[d]) / self.domain.n_cell[d] as f64;
                1.0 / (dx * dx)
            })
            .sum();
        self.domain.cfl / (SPEED_OF_LIGHT * inv_dx2.sqrt())
    }

    /// Converts the configuration into parameters used at runtime.
    pub fn get_btd_params(&self) -> Result<BtdParams> {
        let gamma_boost = self.boost.gamma;
        let beta_boost = (1.0 - 1.0 / (gamma_boost * gamma_boost)).sqrt();

        let dt_snapshots_lab = match (self.diag.dt_snapshots_lab, self.diag.dz_snapshots_lab) {
            (_, Some(dz)) => dz / SPEED_OF_LIGHT,
            (Some(dt), None) => dt,
            (None, None) => anyhow::bail!("Snapshot spacing is not specified."),
        };

        let fields = FieldDispatch::resolve(&self.diag.fields_to_plot)?;

        Ok(BtdParams {
            gamma_boost,
            beta_boost,
            moving_window_v: self.moving_window.v * SPEED_OF_LIGHT,
            prob_lo: self.domain.prob_lo,
            prob_hi: self.domain.prob_hi,
            n_cell: self.domain.n_cell,
            dt_boost: self.dt_boost(),
            ref_ratio: 1,
            diag_lo: self.diag.diag_lo.unwrap_or(self.domain.prob_lo),
            diag_hi: self.diag.diag_hi.unwrap_or(self.domain.prob_hi),
            num_snapshots_lab: self.diag.num_snapshots_lab,
            dt_snapshots_lab,
            buffer_size: self.diag.buffer_size,
            fields,
            species: self.output_species(),
            file_prefix: self.diag.file_prefix.clone(),
            file_min_digits: self.diag.file_min_digits,
            segment_format: self.diag.segment_format,
            merge_strategy: self.diag.merge_strategy,
            merge_open_retries: self.diag.merge_open_retries,
            merge_retry_delay_ms: self.diag.merge_retry_delay_ms,
        })
    }
}

// Default functions for optional settings
fn default_true() -> bool {
    true
}

fn default_boost_direction() -> [i32; 3] {
    [0, 0, 1]
}

fn default_moving_window_dir() -> String {
    "z".to_string()
}

fn default_moving_window_v() -> f64 {
    1.0
}

fn default_end_step() -> i64 {
    -1
}

fn default_cfl() -> f64 {
    0.999
}

fn default_file_prefix() -> String {
    "diags/btd".to_string()
}

fn default_buffer_size() -> i32 {
    256
}

fn default_fields_to_plot() -> Vec<String> {
    FieldKind::ALL.iter().map(|k| k.name().to_string()).collect()
}

fn default_coarsening_ratio() -> [i32; 3] {
    [1, 1, 1]
}

fn default_segment_format() -> SegmentFormat {
    SegmentFormat::Bincode
}

fn default_merge_strategy() -> MergeStrategy {
    MergeStrategy::Rename
}

fn default_merge_retry_delay_ms() -> u64 {
    50
}

fn default_file_min_digits() -> usize {
    5
}

fn default_weight() -> f64 {
    1.0
}

fn default_seed() -> u64 {
    42
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [boost]
        gamma = 2.0

        [domain]
        prob_lo = [-1.0e-5, -1.0e-5, -2.0e-5]
        prob_hi = [1.0e-5, 1.0e-5, 0.0]
        n_cell = [8, 8, 64]

        [diag]
        num_snapshots_lab = 3
        dz_snapshots_lab = 1.0e-4
        buffer_size = 16

        [run]
        max_step = 100
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = BtdConfig::from_toml_str(MINIMAL).unwrap();
        assert!(config.moving_window.enabled);
        assert_eq!(config.moving_window.end_step, -1);
        assert_eq!(config.diag.fields_to_plot.len(), 10);
        assert_eq!(config.diag.segment_format, SegmentFormat::Bincode);
        assert_eq!(config.diag.merge_strategy, MergeStrategy::Rename);
        assert_eq!(config.diag.file_min_digits, 5);
    }

    #[test]
    fn params_derive_beta_and_spacing() {
        let params = BtdConfig::from_toml_str(MINIMAL).unwrap().get_btd_params().unwrap();
        assert!((params.beta_boost - (3.0f64).sqrt() / 2.0).abs() < 1e-12);
        assert!((params.dt_snapshots_lab - 1.0e-4 / SPEED_OF_LIGHT).abs() < 1e-24);
        assert!(params.dt_boost > 0.0);
        assert!((params.moving_window_v - SPEED_OF_LIGHT).abs() < 1e-6);
        assert!(params.species.is_empty());
    }

    #[test]
    fn gamma_must_exceed_one() {
        let bad = MINIMAL.replace("gamma = 2.0", "gamma = 1.0");
        assert!(BtdConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn spacing_is_required() {
        let bad = MINIMAL.replace("dz_snapshots_lab = 1.0e-4", "");
        let err = BtdConfig::from_toml_str(&bad).unwrap_err();
        assert!(err.to_string().contains("dz_snapshots_lab"));
    }

    #[test]
    fn coarsening_must_be_unity() {
        let bad = MINIMAL.replace("buffer_size = 16", "buffer_size = 16\ncoarsening_ratio = [1, 1, 2]");
        assert!(BtdConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn moving_window_must_follow_z() {
        let bad = format!("{}\n[moving_window]\ndir = \"x\"\n", MINIMAL);
        assert!(BtdConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let bad = MINIMAL.replace("buffer_size = 16", "buffer_size = 16\nfields_to_plot = [\"Ex\", \"divE\"]");
        assert!(BtdConfig::from_toml_str(&bad).is_err());
    }
}

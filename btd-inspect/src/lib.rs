//! Reading and checking merged back-transformed snapshots.

use anyhow::{Context, Result};
use btd_common::layout::{header_path, read_field_segment, read_json, read_particle_segment, LEVEL0_DIR};
use btd_common::{FabRecord, SnapshotHeader, SpeciesHeader, MOVING_AXIS};
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::debug;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of checking one snapshot directory.
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub dir: PathBuf,
    pub header: SnapshotHeader,
    pub species: Vec<SpeciesHeader>,
    /// Human-readable description of every inconsistency found.
    pub problems: Vec<String>,
}

impl SnapshotReport {
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }

    /// Number of lab cells covered by the field segments along the moving axis.
    pub fn covered_z_cells(&self) -> usize {
        self.header.fabs.iter().map(|f| f.index_box.length(MOVING_AXIS)).sum()
    }
}

pub fn load_header(dir: &Path) -> Result<SnapshotHeader> {
    read_json(&header_path(dir)).with_context(|| format!("'{}' is not a snapshot directory", dir.display()))
}

/// Loads a snapshot and checks every segment it references.
pub fn inspect_snapshot(dir: &Path, progress: &ProgressBar) -> Result<SnapshotReport> {
    let header = load_header(dir)?;
    let mut problems = check_field_segments(dir, &header, progress);

    let mut species = Vec::new();
    for sp_dir in species_dirs(dir)? {
        let sp: SpeciesHeader = read_json(&header_path(&sp_dir))?;
        problems.extend(check_species(&sp_dir, &header, &sp));
        species.push(sp);
    }
    species.sort_by(|a, b| a.species.cmp(&b.species));

    Ok(SnapshotReport {
        dir: dir.to_path_buf(),
        header,
        species,
        problems,
    })
}

fn check_field_segments(dir: &Path, header: &SnapshotHeader, progress: &ProgressBar) -> Vec<String> {
    let ncomp = header.var_names.len();
    let mut problems: Vec<String> = header
        .fabs
        .par_iter()
        .progress_with(progress.clone())
        .filter_map(|fab| check_fab(dir, header, fab, ncomp).err().map(|e| format!("{:#}", e)))
        .collect();

    for (n, fab) in header.fabs.iter().enumerate() {
        if !header.domain.contains_along(&fab.index_box, MOVING_AXIS) {
            problems.push(format!("Segment {} lies outside the snapshot domain.", fab.file));
        }
        for other in &header.fabs[n + 1..] {
            let (a, b) = (fab.index_box, other.index_box);
            if a.lo[MOVING_AXIS] <= b.hi[MOVING_AXIS] && b.lo[MOVING_AXIS] <= a.hi[MOVING_AXIS] {
                problems.push(format!("Segments {} and {} overlap along z.", fab.file, other.file));
            }
        }
    }
    problems
}

fn check_fab(dir: &Path, header: &SnapshotHeader, fab: &FabRecord, ncomp: usize) -> Result<()> {
    let path = dir.join(&fab.file);
    let segment = read_field_segment(header.segment_format, &path)?;
    if segment.index_box != fab.index_box {
        anyhow::bail!("{}: box {:?} does not match the header box {:?}", fab.file, segment.index_box, fab.index_box);
    }
    if segment.ncomp != ncomp || segment.data.len() != segment.ncells() * ncomp {
        anyhow::bail!(
            "{}: holds {} value(s) in {} component(s), expected {} x {}",
            fab.file,
            segment.data.len(),
            segment.ncomp,
            segment.ncells(),
            ncomp
        );
    }
    debug!("{}: ok ({} cells)", fab.file, segment.ncells());
    Ok(())
}

fn check_species(sp_dir: &Path, header: &SnapshotHeader, sp: &SpeciesHeader) -> Vec<String> {
    let mut problems = Vec::new();
    let sum: u64 = sp.boxes.iter().map(|b| b.count).sum();
    if sum != sp.total_particles {
        problems.push(format!(
            "Species '{}': total {} differs from the per-box sum {}.",
            sp.species, sp.total_particles, sum
        ));
    }
    let mut offset = 0;
    for record in &sp.boxes {
        if record.offset != offset {
            problems.push(format!(
                "Species '{}': box {} starts at offset {}, expected {}.",
                sp.species, record.data_index, record.offset, offset
            ));
        }
        offset += record.count;
        match (&record.file, record.count) {
            (None, 0) => {}
            (None, n) => problems.push(format!(
                "Species '{}': box {} has {} particle(s) but no data file.",
                sp.species, record.data_index, n
            )),
            (Some(file), n) => match read_particle_segment(header.segment_format, &sp_dir.join(file)) {
                Ok(particles) if particles.len() as u64 == n => {}
                Ok(particles) => problems.push(format!(
                    "Species '{}': {} holds {} particle(s), header says {}.",
                    sp.species,
                    file,
                    particles.len(),
                    n
                )),
                Err(e) => problems.push(format!("Species '{}': {:#}", sp.species, e)),
            },
        }
    }
    problems
}

/// Species sub-directories of a snapshot: every directory with its own header,
/// excluding the field level and unmerged chunks.
pub fn species_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list '{}'", dir.display()))? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        if !path.is_dir() || name == LEVEL0_DIR || name.starts_with("buffer_") {
            continue;
        }
        if header_path(&path).exists() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Values of `var` along the moving axis through the central transverse cell,
/// as `(z, value)` pairs sorted by z.
pub fn axis_profile(dir: &Path, header: &SnapshotHeader, var: &str) -> Result<Vec<(f64, f64)>> {
    let comp = header
        .var_names
        .iter()
        .position(|v| v == var)
        .ok_or_else(|| anyhow::anyhow!("Variable '{}' is not in the snapshot (has {:?}).", var, header.var_names))?;
    let i = (header.domain.lo[0] + header.domain.hi[0]) / 2;
    let j = (header.domain.lo[1] + header.domain.hi[1]) / 2;
    let dz = header.cell_size[MOVING_AXIS];
    let z0 = header.prob_lo[MOVING_AXIS];
    let k0 = header.domain.lo[MOVING_AXIS];

    let mut rows: Vec<(f64, f64)> = header
        .fabs
        .par_iter()
        .map(|fab| -> Result<Vec<(f64, f64)>> {
            let segment = read_field_segment(header.segment_format, &dir.join(&fab.file))?;
            let b = segment.index_box;
            Ok((b.lo[MOVING_AXIS]..=b.hi[MOVING_AXIS])
                .map(|k| {
                    let z = z0 + ((k - k0) as f64 + 0.5) * dz;
                    (z, segment.get(comp, [i, j, k]))
                })
                .collect())
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(rows)
}

pub fn write_profile_csv(path: &Path, var: &str, rows: &[(f64, f64)]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Failed to create '{}'", path.display()))?;
    writer.write_record(["z_m", var])?;
    for (z, v) in rows {
        writer.write_record(&[format!("{:.9e}", z), format!("{:.9e}", v)])?;
    }
    writer.flush()?;
    Ok(())
}

//! On-disk layout of a back-transformed snapshot and of a flushed chunk.
//!
//! ```text
//! <prefix>/snapshot_<i>/Header.json
//! <prefix>/snapshot_<i>/run_info.json
//! <prefix>/snapshot_<i>/Level_0/Cell_D_<k>
//! <prefix>/snapshot_<i>/<species>/Header.json
//! <prefix>/snapshot_<i>/<species>/Level_0/DATA_<k>
//! <prefix>/snapshot_<i>/buffer_<step>/...      (chunk, same shape, ordinal 0)
//! ```

use crate::geometry::{IndexBox, SPACEDIM};
use crate::particle::LabParticle;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const HEADER_FILE: &str = "Header.json";
pub const RUN_INFO_FILE: &str = "run_info.json";
pub const LEVEL0_DIR: &str = "Level_0";
pub const FAB_FILE_PREFIX: &str = "Cell_D_";
pub const PARTICLE_FILE_PREFIX: &str = "DATA_";
/// Width of the ordinal in segment file names.
pub const SEGMENT_DIGITS: usize = 5;
pub const LAYOUT_VERSION: u32 = 1;

/// Encoding of binary data segments.
#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentFormat {
    Bincode,
    MessagePack,
}

/// Top-level metadata of a snapshot (or of one chunk before it is merged).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub version: u32,
    pub var_names: Vec<String>,
    /// Lab-frame time of the snapshot.
    pub time: f64,
    /// Simulation step of the most recent merged chunk.
    pub step: i64,
    pub prob_lo: [f64; SPACEDIM],
    pub prob_hi: [f64; SPACEDIM],
    /// Union of all merged chunk boxes.
    pub domain: IndexBox,
    pub cell_size: [f64; SPACEDIM],
    pub segment_format: SegmentFormat,
    /// Set by the last flush of the snapshot.
    pub complete: bool,
    pub fabs: Vec<FabRecord>,
}

/// One field data segment and the sub-box it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabRecord {
    pub index_box: IndexBox,
    pub file: String,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

/// Per-species metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesHeader {
    pub species: String,
    pub component_names: Vec<String>,
    pub total_particles: u64,
    pub boxes: Vec<ParticleBoxRecord>,
}

/// Particles of one chunk. `file` is `None` when the chunk held no particles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleBoxRecord {
    pub index_box: IndexBox,
    pub data_index: usize,
    pub count: u64,
    pub offset: u64,
    pub file: Option<String>,
}

/// Payload of a field data segment: `data[c * ncells + box.offset(idx)]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSegment {
    pub index_box: IndexBox,
    pub ncomp: usize,
    pub data: Vec<f64>,
}

impl FieldSegment {
    pub fn zeros(index_box: IndexBox, ncomp: usize) -> Self {
        FieldSegment {
            index_box,
            ncomp,
            data: vec![0.0; index_box.num_cells() * ncomp],
        }
    }

    pub fn ncells(&self) -> usize {
        self.index_box.num_cells()
    }

    #[inline(always)]
    pub fn index(&self, comp: usize, idx: [i32; SPACEDIM]) -> usize {
        comp * self.ncells() + self.index_box.offset(idx)
    }

    pub fn get(&self, comp: usize, idx: [i32; SPACEDIM]) -> f64 {
        self.data[self.index(comp, idx)]
    }

    /// Values of one component, in box order.
    pub fn component(&self, comp: usize) -> &[f64] {
        let n = self.ncells();
        &self.data[comp * n..(comp + 1) * n]
    }
}

/// Descriptive information about the run, placed in the snapshot on its first merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub engine_version: String,
    pub gamma_boost: f64,
    pub beta_boost: f64,
    pub snapshot_index: usize,
    pub num_snapshots_lab: usize,
    pub buffer_size: i32,
    pub var_names: Vec<String>,
    pub species: Vec<String>,
}

// --- Naming ---

pub fn snapshot_dir(file_prefix: &str, snapshot: usize, min_digits: usize) -> PathBuf {
    PathBuf::from(file_prefix).join(format!("snapshot_{:0width$}", snapshot, width = min_digits))
}

/// Temporary sub-tree a chunk is written to before it is merged.
pub fn chunk_dir(snapshot_dir: &Path, step: i64, min_digits: usize) -> PathBuf {
    snapshot_dir.join(format!("buffer_{:0width$}", step, width = min_digits))
}

pub fn fab_file_name(ordinal: usize) -> String {
    format!("{}{:0width$}", FAB_FILE_PREFIX, ordinal, width = SEGMENT_DIGITS)
}

pub fn particle_file_name(ordinal: usize) -> String {
    format!("{}{:0width$}", PARTICLE_FILE_PREFIX, ordinal, width = SEGMENT_DIGITS)
}

/// Name of field segment `ordinal` as recorded in a header, relative to the snapshot directory.
pub fn fab_record_name(ordinal: usize) -> String {
    format!("{}/{}", LEVEL0_DIR, fab_file_name(ordinal))
}

/// Name of particle segment `ordinal` as recorded in a header, relative to the species directory.
pub fn particle_record_name(ordinal: usize) -> String {
    format!("{}/{}", LEVEL0_DIR, particle_file_name(ordinal))
}

pub fn header_path(dir: &Path) -> PathBuf {
    dir.join(HEADER_FILE)
}

pub fn fab_path(dir: &Path, ordinal: usize) -> PathBuf {
    dir.join(LEVEL0_DIR).join(fab_file_name(ordinal))
}

pub fn species_dir(dir: &Path, species: &str) -> PathBuf {
    dir.join(species)
}

pub fn particle_path(dir: &Path, species: &str, ordinal: usize) -> PathBuf {
    dir.join(species).join(LEVEL0_DIR).join(particle_file_name(ordinal))
}

// --- Metadata I/O ---

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open '{}'", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse JSON from '{}'", path.display()))
}

/// Writes `value` as pretty JSON next to `path` and renames it into place, so a
/// reader never observes a half-written metadata file.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let file = File::create(&tmp).with_context(|| format!("Failed to create '{}'", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Failed to serialize JSON to '{}'", tmp.display()))?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move '{}' to '{}'", tmp.display(), path.display()))?;
    Ok(())
}

// --- Segment codec ---

pub fn write_segment<T: Serialize>(format: SegmentFormat, path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create segment '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    match format {
        SegmentFormat::Bincode => bincode::serialize_into(&mut writer, value)
            .map_err(|e| anyhow::anyhow!("Failed to encode bincode segment '{}': {}", path.display(), e))?,
        SegmentFormat::MessagePack => rmp_serde::encode::write(&mut writer, value)
            .map_err(|e| anyhow::anyhow!("Failed to encode MessagePack segment '{}': {}", path.display(), e))?,
    }
    writer.flush()?;
    Ok(())
}

pub fn read_segment<T: DeserializeOwned>(format: SegmentFormat, path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open segment '{}'", path.display()))?;
    let reader = BufReader::new(file);
    let value = match format {
        SegmentFormat::Bincode => bincode::deserialize_from(reader)
            .map_err(|e| anyhow::anyhow!("Failed to decode bincode segment '{}': {}", path.display(), e))?,
        SegmentFormat::MessagePack => rmp_serde::decode::from_read(reader)
            .map_err(|e| anyhow::anyhow!("Failed to decode MessagePack segment '{}': {}", path.display(), e))?,
    };
    Ok(value)
}

pub fn read_field_segment(format: SegmentFormat, path: &Path) -> Result<FieldSegment> {
    read_segment(format, path)
}

pub fn read_particle_segment(format: SegmentFormat, path: &Path) -> Result<Vec<LabParticle>> {
    read_segment(format, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(fab_file_name(3), "Cell_D_00003");
        assert_eq!(particle_file_name(12), "DATA_00012");
        assert_eq!(fab_record_name(1), "Level_0/Cell_D_00001");
        let dir = snapshot_dir("diags/btd", 7, 5);
        assert_eq!(dir, PathBuf::from("diags/btd/snapshot_00007"));
        assert_eq!(chunk_dir(&dir, 42, 5), PathBuf::from("diags/btd/snapshot_00007/buffer_00042"));
    }

    #[test]
    fn field_segment_indexes_component_major() {
        let b = IndexBox::new([0, 0, 4], [1, 0, 5]);
        let mut seg = FieldSegment::zeros(b, 2);
        let i = seg.index(1, [1, 0, 5]);
        seg.data[i] = 3.5;
        assert_eq!(seg.ncells(), 4);
        assert_eq!(i, 4 + 3);
        assert_eq!(seg.component(1)[3], 3.5);
        assert_eq!(seg.get(0, [1, 0, 5]), 0.0);
    }

    #[test]
    fn segments_decode_in_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let particles = vec![LabParticle { x: 1.0, y: 2.0, z: 3.0, ux: 0.0, uy: 0.0, uz: 1e8, w: 2.0 }];
        for format in [SegmentFormat::Bincode, SegmentFormat::MessagePack] {
            let path = dir.path().join(format!("{:?}", format));
            write_segment(format, &path, &particles).unwrap();
            let back = read_particle_segment(format, &path).unwrap();
            assert_eq!(back, particles);
        }
    }

    #[test]
    fn json_write_leaves_no_temporary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HEADER_FILE);
        let header = SpeciesHeader {
            species: "electrons".into(),
            component_names: vec!["x".into()],
            total_particles: 0,
            boxes: Vec::new(),
        };
        write_json(&path, &header).unwrap();
        let back: SpeciesHeader = read_json(&path).unwrap();
        assert_eq!(back, header);
        assert!(!path.with_extension("json.tmp").exists());
    }
}

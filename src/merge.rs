//! Folds a flushed chunk into the cumulative on-disk snapshot.
//!
//! The first chunk of a snapshot becomes the snapshot by renaming its files. Every
//! later chunk only has its data segments moved in under their ordinal name; the
//! small JSON headers are read, extended and rewritten.

use anyhow::{Context, Result};
use btd_common::layout::{
    fab_path, fab_record_name, header_path, particle_path, particle_record_name, read_json, species_dir,
    write_json, LEVEL0_DIR, RUN_INFO_FILE,
};
use btd_common::{BtdParams, FabRecord, MergeStrategy, ParticleBoxRecord, RealBox, SnapshotHeader, SpeciesHeader};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Merges chunks into snapshots. One engine serves every snapshot of a run.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    pub strategy: MergeStrategy,
    pub open_retries: u32,
    pub retry_delay: Duration,
}

impl MergeEngine {
    pub fn new(strategy: MergeStrategy, open_retries: u32, retry_delay: Duration) -> Self {
        MergeEngine {
            strategy,
            open_retries,
            retry_delay,
        }
    }

    pub fn from_params(params: &BtdParams) -> Self {
        Self::new(
            params.merge_strategy,
            params.merge_open_retries,
            Duration::from_millis(params.merge_retry_delay_ms),
        )
    }

    /// Merges the chunk written under `chunk_dir` as chunk number `ordinal` of the
    /// snapshot in `snapshot_dir`, then deletes `chunk_dir`.
    pub fn merge(&self, snapshot_dir: &Path, chunk_dir: &Path, ordinal: usize, species: &[String]) -> Result<()> {
        if ordinal == 0 {
            self.adopt_first_fields(snapshot_dir, chunk_dir)?;
        } else {
            self.append_fields(snapshot_dir, chunk_dir, ordinal)?;
        }
        for name in species {
            if ordinal == 0 {
                self.adopt_first_species(snapshot_dir, chunk_dir, name)?;
            } else {
                self.append_species(snapshot_dir, chunk_dir, ordinal, name)?;
            }
        }
        fs::remove_dir_all(chunk_dir)
            .with_context(|| format!("Failed to remove merged chunk '{}'", chunk_dir.display()))?;
        debug!("Merged chunk {} into '{}'.", ordinal, snapshot_dir.display());
        Ok(())
    }

    fn adopt_first_fields(&self, snapshot_dir: &Path, chunk_dir: &Path) -> Result<()> {
        let target = header_path(snapshot_dir);
        if target.exists() {
            anyhow::bail!(
                "Snapshot header '{}' already exists while merging the first chunk; remove stale output before rerunning.",
                target.display()
            );
        }
        let chunk: SnapshotHeader = self.read_with_retries(&header_path(chunk_dir))?;
        check_single_fab(&chunk, chunk_dir)?;

        fs::create_dir_all(snapshot_dir.join(LEVEL0_DIR))
            .with_context(|| format!("Failed to create '{}'", snapshot_dir.display()))?;
        self.move_file(&fab_path(chunk_dir, 0), &fab_path(snapshot_dir, 0))?;
        let run_info = chunk_dir.join(RUN_INFO_FILE);
        if run_info.exists() {
            self.move_file(&run_info, &snapshot_dir.join(RUN_INFO_FILE))?;
        }
        self.move_file(&header_path(chunk_dir), &target)
    }

    fn append_fields(&self, snapshot_dir: &Path, chunk_dir: &Path, ordinal: usize) -> Result<()> {
        let path = header_path(snapshot_dir);
        let mut snapshot: SnapshotHeader = self.read_with_retries(&path)?;
        if snapshot.fabs.len() != ordinal {
            anyhow::bail!(
                "Chunk ordinal mismatch in '{}': merging chunk {} but the snapshot holds {} segment(s).",
                snapshot_dir.display(),
                ordinal,
                snapshot.fabs.len()
            );
        }
        let chunk: SnapshotHeader = self.read_with_retries(&header_path(chunk_dir))?;
        check_single_fab(&chunk, chunk_dir)?;

        let merged = RealBox::new(snapshot.prob_lo, snapshot.prob_hi).union(&RealBox::new(chunk.prob_lo, chunk.prob_hi));
        snapshot.prob_lo = merged.lo;
        snapshot.prob_hi = merged.hi;
        snapshot.domain = snapshot.domain.union(&chunk.domain);
        snapshot.time = chunk.time;
        snapshot.step = chunk.step;
        snapshot.complete = chunk.complete;

        let fab = &chunk.fabs[0];
        self.move_file(&fab_path(chunk_dir, 0), &fab_path(snapshot_dir, ordinal))?;
        snapshot.fabs.push(FabRecord {
            index_box: fab.index_box,
            file: fab_record_name(ordinal),
            min: fab.min.clone(),
            max: fab.max.clone(),
        });
        write_json(&path, &snapshot)
    }

    fn adopt_first_species(&self, snapshot_dir: &Path, chunk_dir: &Path, species: &str) -> Result<()> {
        let chunk_species = species_dir(chunk_dir, species);
        let chunk: SpeciesHeader = self.read_with_retries(&header_path(&chunk_species))?;
        check_single_box(&chunk, &chunk_species)?;

        let target = species_dir(snapshot_dir, species);
        fs::create_dir_all(target.join(LEVEL0_DIR))
            .with_context(|| format!("Failed to create '{}'", target.display()))?;
        if chunk.boxes[0].count > 0 {
            self.move_file(&particle_path(chunk_dir, species, 0), &particle_path(snapshot_dir, species, 0))?;
        }
        self.move_file(&header_path(&chunk_species), &header_path(&target))
    }

    fn append_species(&self, snapshot_dir: &Path, chunk_dir: &Path, ordinal: usize, species: &str) -> Result<()> {
        let chunk_species = species_dir(chunk_dir, species);
        let chunk: SpeciesHeader = self.read_with_retries(&header_path(&chunk_species))?;
        check_single_box(&chunk, &chunk_species)?;

        let path = header_path(&species_dir(snapshot_dir, species));
        let mut merged: SpeciesHeader = self.read_with_retries(&path)?;
        let record = &chunk.boxes[0];
        let offset = merged.total_particles;
        merged.total_particles += record.count;

        let file = if record.count > 0 {
            self.move_file(
                &particle_path(chunk_dir, species, 0),
                &particle_path(snapshot_dir, species, ordinal),
            )?;
            Some(particle_record_name(ordinal))
        } else {
            None
        };
        merged.boxes.push(ParticleBoxRecord {
            index_box: record.index_box,
            data_index: ordinal,
            count: record.count,
            offset,
            file,
        });
        write_json(&path, &merged)
    }

    fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        match self.strategy {
            MergeStrategy::Rename => fs::rename(from, to)
                .with_context(|| format!("Failed to rename '{}' to '{}'", from.display(), to.display())),
            MergeStrategy::Copy => {
                fs::copy(from, to)
                    .with_context(|| format!("Failed to copy '{}' to '{}'", from.display(), to.display()))?;
                fs::remove_file(from).with_context(|| format!("Failed to remove '{}'", from.display()))
            }
        }
    }

    /// Reads a header, retrying a bounded number of times when a shared
    /// filesystem has not made it visible yet.
    fn read_with_retries<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let mut attempt = 0;
        loop {
            match read_json::<T>(path) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.open_retries => {
                    attempt += 1;
                    warn!(
                        "Reading '{}' failed (attempt {}/{}): {}",
                        path.display(),
                        attempt,
                        self.open_retries + 1,
                        e
                    );
                    thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn check_single_fab(chunk: &SnapshotHeader, dir: &Path) -> Result<()> {
    if chunk.fabs.len() != 1 {
        anyhow::bail!(
            "Chunk '{}' holds {} field boxes; exactly one is required for merging.",
            dir.display(),
            chunk.fabs.len()
        );
    }
    Ok(())
}

fn check_single_box(chunk: &SpeciesHeader, dir: &Path) -> Result<()> {
    if chunk.boxes.len() != 1 {
        anyhow::bail!(
            "Particle chunk '{}' holds {} boxes; exactly one is required for merging.",
            dir.display(),
            chunk.boxes.len()
        );
    }
    Ok(())
}

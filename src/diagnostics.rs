//! Per-step orchestration of the back-transformed diagnostics.

use crate::field_buffer::{CellCenteredField, FieldBuffer};
use crate::flush::{do_compute_and_pack, do_flush, ChunkWriter, FlushController};
use crate::particle_buffer::{ParticleBuffer, ParticleTransform, SliceContext};
use crate::slice::select_slice;
use crate::snapshot::{Snapshot, SnapshotRegistry};
use crate::transform::BoostFrame;
use anyhow::{Context, Result};
use btd_common::{BtdParams, RealBox, MOVING_AXIS};
use log::{debug, info, warn};
use std::path::Path;

/// What the boosted-frame simulation provides to the diagnostics after a step.
pub struct StepInput<'a> {
    /// Boosted-frame time reached by the step.
    pub t_boost: f64,
    /// Boosted-frame window at that time.
    pub boost_domain: RealBox,
    pub fields: &'a CellCenteredField,
    pub particles: &'a dyn ParticleTransform,
}

/// Chunk being accumulated for one snapshot.
#[derive(Debug, Clone, Default)]
struct ChunkState {
    field: Option<FieldBuffer>,
    particles: Vec<ParticleBuffer>,
    last_k: Option<i32>,
}

pub struct BtdDiagnostics {
    params: BtdParams,
    frame: BoostFrame,
    dz_lab: f64,
    registry: SnapshotRegistry,
    chunks: Vec<ChunkState>,
    flusher: FlushController,
}

impl BtdDiagnostics {
    pub fn new(params: &BtdParams) -> Result<Self> {
        Self::build(params, FlushController::new(params))
    }

    /// Same as `new` but writes chunks through `writer`.
    pub fn with_writer(params: &BtdParams, writer: Box<dyn ChunkWriter>) -> Result<Self> {
        Self::build(params, FlushController::with_writer(params, writer))
    }

    fn build(params: &BtdParams, flusher: FlushController) -> Result<Self> {
        let frame = BoostFrame::new(params.gamma_boost)?;
        let dz_lab = frame.dz_lab(params.dt_boost, params.ref_ratio as f64);
        let registry = SnapshotRegistry::new(params, &frame, 0.0);
        let chunks = (0..registry.len())
            .map(|_| ChunkState {
                field: None,
                particles: params.species.iter().map(|s| ParticleBuffer::new(s)).collect(),
                last_k: None,
            })
            .collect();
        info!(
            "Back-transformed diagnostics: {} snapshot(s), gamma = {:.4}, beta = {:.6}, dz_lab = {:.6e} m, chunk = {} cells.",
            registry.len(),
            frame.gamma,
            frame.beta,
            dz_lab,
            params.buffer_size
        );
        Ok(BtdDiagnostics {
            params: params.clone(),
            frame,
            dz_lab,
            registry,
            chunks,
            flusher,
        })
    }

    pub fn params(&self) -> &BtdParams {
        &self.params
    }

    pub fn frame(&self) -> &BoostFrame {
        &self.frame
    }

    pub fn dz_lab(&self) -> f64 {
        self.dz_lab
    }

    pub fn registry(&self) -> &SnapshotRegistry {
        &self.registry
    }

    pub fn all_full(&self) -> bool {
        self.registry.all_full()
    }

    pub fn snapshot_dir(&self, snapshot: usize) -> std::path::PathBuf {
        self.flusher.snapshot_dir(snapshot)
    }

    /// Regular step: ingest slices where they fall, flush full chunks.
    pub fn process_step(&mut self, step: i64, input: &StepInput) -> Result<()> {
        self.filter_compute_pack_flush(step, Some(input), false)
    }

    /// End of run: flush every non-empty chunk without ingesting anything.
    pub fn force_flush(&mut self, step: i64) -> Result<()> {
        self.filter_compute_pack_flush(step, None, true)
    }

    /// For every snapshot: update the slice position, ingest it when it lies in
    /// both domains, then flush the chunk if it is ready.
    pub fn filter_compute_pack_flush(&mut self, step: i64, input: Option<&StepInput>, force_flush: bool) -> Result<()> {
        let compute = do_compute_and_pack(step, force_flush);
        let input = match (compute, input) {
            (true, None) => anyhow::bail!("Step {} needs boosted-frame data to ingest slices.", step),
            (true, Some(input)) => Some(input),
            (false, _) => None,
        };

        for (snapshot, chunk) in self.registry.iter_mut().zip(self.chunks.iter_mut()) {
            if let Some(input) = input {
                snapshot.update_z(&self.frame, input.t_boost);
                if !snapshot.is_full {
                    let selection = select_slice(snapshot, &input.boost_domain, self.dz_lab);
                    if selection.in_domain {
                        ingest(
                            &self.params,
                            &self.frame,
                            self.dz_lab,
                            &self.flusher,
                            snapshot,
                            chunk,
                            input,
                            selection.k,
                            step,
                        )?;
                    }
                }
            }
            if do_flush(snapshot, step, force_flush) {
                if force_flush && !snapshot.last_slice_reached {
                    warn_incomplete(snapshot, self.dz_lab);
                }
                flush(&self.flusher, snapshot, chunk, step, self.dz_lab)?;
            }
        }
        Ok(())
    }

    /// Writes one CSV row per snapshot.
    pub fn write_summary<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create summary '{}'", path.display()))?;
        let mut header = vec![
            "snapshot".to_string(),
            "lab_time_s".to_string(),
            "chunks_flushed".to_string(),
            "max_chunks_expected".to_string(),
            "complete".to_string(),
        ];
        header.extend(self.params.species.iter().map(|s| format!("particles_{}", s)));
        writer.write_record(&header)?;
        for s in self.registry.iter() {
            let mut row = vec![
                s.index.to_string(),
                format!("{:.9e}", s.lab_time),
                s.chunks_flushed.to_string(),
                s.max_chunks_expected.to_string(),
                s.is_full.to_string(),
            ];
            row.extend(s.particles_flushed.iter().map(|n| n.to_string()));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        info!("Snapshot summary saved to {}", path.display());
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn ingest(
    params: &BtdParams,
    frame: &BoostFrame,
    dz_lab: f64,
    flusher: &FlushController,
    snapshot: &mut Snapshot,
    chunk: &mut ChunkState,
    input: &StepInput,
    k: i32,
    step: i64,
) -> Result<()> {
    if k < 0 {
        warn!("Snapshot {}: slice at lab cell {} is below the snapshot, skipped.", snapshot.index, k);
        return Ok(());
    }
    if let Some(field) = &chunk.field {
        let bx = field.index_box();
        if k < bx.lo[MOVING_AXIS] {
            warn!(
                "Snapshot {}: slice jumped to lab cell {} below the chunk [{}, {}]; flushing early.",
                snapshot.index, k, bx.lo[MOVING_AXIS], bx.hi[MOVING_AXIS]
            );
            // The early chunk is not the snapshot's last one even if this slice is.
            let reached = std::mem::replace(&mut snapshot.last_slice_reached, false);
            flush(flusher, snapshot, chunk, step, dz_lab)?;
            snapshot.last_slice_reached = reached;
        } else if k > bx.hi[MOVING_AXIS] {
            warn!("Snapshot {}: slice at lab cell {} is above the current chunk, skipped.", snapshot.index, k);
            return Ok(());
        }
    }

    if chunk.field.is_none() {
        if snapshot.chunks_flushed == 0 {
            snapshot.define_snapshot_geometry(k, params.buffer_size, dz_lab);
        }
        snapshot.define_buffer_box(k, params.buffer_size, dz_lab, &params.cell_sizes());
        chunk.field = Some(FieldBuffer::new(snapshot.buffer_index_box, &params.fields));
        for buffer in chunk.particles.iter_mut() {
            buffer.define(snapshot, dz_lab);
        }
        chunk.last_k = None;
    }

    if let Some(field) = chunk.field.as_mut() {
        field.ingest_slice(k, input.fields, snapshot.current_boost_z, frame, &params.fields)?;
    }
    let ctx = SliceContext::new(snapshot, input.t_boost, params.dt_boost, k);
    for (n, buffer) in chunk.particles.iter_mut().enumerate() {
        let particles = input.particles.transform_slice(&buffer.species, &ctx, frame)?;
        let added = buffer.append(particles) as u64;
        snapshot.particles_in_buffer[n] += added;
    }

    if chunk.last_k == Some(k) {
        debug!("Snapshot {}: lab cell {} filled twice; keeping the latest slice.", snapshot.index, k);
    } else {
        snapshot.slices_in_buffer += 1;
        chunk.last_k = Some(k);
    }
    Ok(())
}

/// Explains why a snapshot is being closed without its last slice.
fn warn_incomplete(snapshot: &Snapshot, dz_lab: f64) {
    let cell0 = snapshot.prob_domain_lab.lo[MOVING_AXIS] + 0.5 * dz_lab;
    if snapshot.lab_domain.contains_along(MOVING_AXIS, cell0) {
        warn!(
            "Snapshot {}: run ended before the slice reached lab cell 0; it stays incomplete.",
            snapshot.index
        );
    } else {
        warn!(
            "Snapshot {}: lab cell 0 (z = {:.6e}) lies outside the diagnostic domain [{:.6e}, {:.6e}], so the snapshot can only be force-flushed and stays incomplete.",
            snapshot.index,
            cell0,
            snapshot.lab_domain.lo[MOVING_AXIS],
            snapshot.lab_domain.hi[MOVING_AXIS]
        );
    }
}

fn flush(flusher: &FlushController, snapshot: &mut Snapshot, chunk: &mut ChunkState, step: i64, dz_lab: f64) -> Result<()> {
    let Some(field) = chunk.field.take() else {
        snapshot.set_full_status();
        return Ok(());
    };
    flusher.flush(snapshot, field, &mut chunk.particles, step, dz_lab)?;
    chunk.last_k = None;
    Ok(())
}

use anyhow::Result;
use btd_common::BtdConfig;
use btd_engine::{BtdDiagnostics, SyntheticRun};
use log::{debug, error, info, trace};
use std::time::Instant;

fn main() -> Result<()> {
    env_logger::init();

    info!("Starting back-transformed diagnostics engine...");

    // --- Load Configuration ---
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = BtdConfig::load(&config_path)?;
    let params = config.get_btd_params()?;
    debug!("Diagnostic parameters: {:#?}", params);
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize ---
    let mut run = SyntheticRun::new(&config, &params)?;
    let mut diags = BtdDiagnostics::new(&params)?;
    info!(
        "Synthetic run initialized: {} particles, {} steps of {:.4e} s.",
        run.particle_count(),
        config.run.max_step,
        params.dt_boost
    );

    // Pre-loop call, never ingests or flushes.
    diags.filter_compute_pack_flush(-1, Some(&run.input()), false)?;

    // --- Simulation Loop ---
    let total_steps = config.run.max_step;
    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    for step in 0..total_steps {
        let step_start_time = Instant::now();
        run.advance();
        if let Err(e) = diags.process_step(step, &run.input()) {
            error!("Error in diagnostics at step {}: {:#}", step, e);
            anyhow::bail!("Back-transformed diagnostics failed.");
        }
        let step_duration = step_start_time.elapsed();

        let current_time = Instant::now();
        let print_interval_secs = 5.0;
        let should_print_status = current_time.duration_since(previous_print_time).as_secs_f64() >= print_interval_secs;
        let is_last_step = step == total_steps - 1;

        if should_print_status || is_last_step {
            let complete = diags.registry().iter().filter(|s| s.is_full).count();
            info!(
                "Step [{}/{}] (t = {:.4e} s) | Snapshots complete: {}/{} | Step Time: {:6.2} ms | Elapsed: {:.2} s",
                step + 1,
                total_steps,
                run.time(),
                complete,
                diags.registry().len(),
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = current_time;
        } else {
            trace!("Step [{}/{}] completed in {:.2} ms", step + 1, total_steps, step_duration.as_secs_f64() * 1000.0);
        }

        if diags.all_full() {
            info!("All snapshots complete after step {}.", step + 1);
            break;
        }
    }

    // --- Flush what is left ---
    if let Err(e) = diags.force_flush(run.step()) {
        error!("Error flushing remaining chunks: {:#}", e);
        anyhow::bail!("Final flush failed.");
    }

    let total_duration = start_time.elapsed();
    info!("Run finished in {:.3} seconds.", total_duration.as_secs_f64());

    let summary = format!("{}_summary.csv", params.file_prefix);
    diags.write_summary(&summary)?;

    info!("Back-transformed diagnostics complete.");
    Ok(())
}

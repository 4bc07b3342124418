use anyhow::Result;
use btd_inspect::{axis_profile, inspect_snapshot, write_profile_csv};
use clap::Parser;
use env_logger::Builder;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, LevelFilter};
use std::path::PathBuf;

/// Command-line arguments for the snapshot inspector
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Merged snapshot directory (contains Header.json)
    #[arg(short, long)]
    snapshot: PathBuf,

    /// Variable to export along the axis, e.g. "Ex" or "rho"
    #[arg(short, long)]
    profile: Option<String>,

    /// Output CSV file for the profile
    #[arg(short, long, default_value = "profile.csv")]
    output: PathBuf,

    /// Log every segment that is checked
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Builder::from_default_env()
        .filter(None, if args.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .init();

    info!("Inspecting snapshot {}", args.snapshot.display());

    let header = btd_inspect::load_header(&args.snapshot)?;
    let progress = ProgressBar::new(header.fabs.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({percent}%)")?
            .progress_chars("#>-"),
    );
    let report = inspect_snapshot(&args.snapshot, &progress)?;
    progress.finish_and_clear();

    let h = &report.header;
    info!(
        "t_lab = {:.6e} s | step {} | {} segment(s), {} z-cells | complete: {}",
        h.time,
        h.step,
        h.fabs.len(),
        report.covered_z_cells(),
        h.complete
    );
    info!(
        "Domain z = [{:.6e}, {:.6e}] m, cells {:?} .. {:?}",
        h.prob_lo[2], h.prob_hi[2], h.domain.lo, h.domain.hi
    );
    for sp in &report.species {
        info!("Species '{}': {} particle(s) in {} box(es)", sp.species, sp.total_particles, sp.boxes.len());
    }

    if let Some(var) = &args.profile {
        let rows = axis_profile(&args.snapshot, h, var)?;
        write_profile_csv(&args.output, var, &rows)?;
        info!("Profile of {} ({} points) saved to {}", var, rows.len(), args.output.display());
    }

    if !report.is_consistent() {
        for problem in &report.problems {
            error!("{}", problem);
        }
        anyhow::bail!("Snapshot {} is inconsistent ({} problem(s)).", args.snapshot.display(), report.problems.len());
    }
    info!("Snapshot is consistent.");
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use md_control::{bead_spring, place_chains, Simulation, SimulationOptions, TypePair};
use serde::Serialize;
use simulation_common::{SimulationConfig, Stage, Vec3};
use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;

/// Runs an MD protocol described in a TOML configuration file.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory for the thermo log and summary.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Serialize)]
struct Summary {
    timestep: u64,
    stages_run: usize,
    dt: f64,
    real_time_step: f64,
    box_lengths: [f64; 3],
    box_lengths_reduced: [f64; 3],
    density: f64,
    density_reduced: f64,
    volume: f64,
    mass: f64,
    wall_clock_seconds: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting md-control...");
    let config = SimulationConfig::load(&args.config)?;

    // --- Build the initial configuration and forcefield ---
    let snapshot = place_chains(&config.system)?;
    info!(
        "Placed {} chains of {} beads in a box of side {:.4}.",
        config.system.n_chains, config.system.chain_length, snapshot.box_lengths.x
    );
    let forcefield = bead_spring(&config.forcefield)?;
    let options = SimulationOptions::from_control(&config.control)?;
    let mut sim = Simulation::from_snapshot(snapshot, forcefield, options)?;

    // --- Run the protocol ---
    let start_time = Instant::now();
    for (idx, stage) in config.protocol.iter().enumerate() {
        info!("Stage {}/{}: {:?}", idx + 1, config.protocol.len(), stage);
        if let Err(e) = run_stage(&mut sim, stage) {
            error!("Stage {} failed: {}", idx + 1, e);
            anyhow::bail!("Protocol aborted at stage {}.", idx + 1);
        }
    }
    let wall_clock = start_time.elapsed().as_secs_f64();
    info!("Protocol finished in {:.3} seconds at timestep {}.", wall_clock, sim.timestep());

    // --- Save outputs ---
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create output directory '{}'", args.output_dir.display()))?;
    let base = &config.output.base_filename;

    if config.output.save_thermo {
        let path = args.output_dir.join(format!("{}_thermo.csv", base));
        if sim.thermo_log().samples().is_empty() {
            warn!("No thermo samples were recorded; {} will only hold a header.", path.display());
        }
        sim.thermo_log()
            .write_csv(&path)
            .with_context(|| format!("Failed to write thermo log '{}'", path.display()))?;
        info!("Thermo log saved to {}", path.display());
    } else {
        info!("Skipping thermo log as per config (save_thermo is false).");
    }

    if config.output.save_summary {
        let path = args.output_dir.join(format!("{}_summary.json", base));
        let summary = Summary {
            timestep: sim.timestep(),
            stages_run: config.protocol.len(),
            dt: sim.dt(),
            real_time_step: sim.real_time_step(),
            box_lengths: sim.box_lengths()?.to_array(),
            box_lengths_reduced: sim.box_lengths_reduced()?.to_array(),
            density: sim.density()?,
            density_reduced: sim.density_reduced()?,
            volume: sim.volume()?,
            mass: sim.mass()?,
            wall_clock_seconds: wall_clock,
        };
        let file = File::create(&path).with_context(|| format!("Failed to create '{}'", path.display()))?;
        serde_json::to_writer_pretty(file, &summary)?;
        info!("Summary saved to {}", path.display());
    } else {
        info!("Skipping summary as per config (save_summary is false).");
    }

    info!("md-control finished.");
    Ok(())
}

fn run_stage(sim: &mut Simulation, stage: &Stage) -> Result<()> {
    match stage {
        Stage::Nvt { kt, tau_kt, n_steps } => sim.run_nvt(*kt, *tau_kt, *n_steps)?,
        Stage::NvtRamp { kt_start, kt_final, tau_kt, n_steps } => {
            let ramp = sim.temperature_ramp(*n_steps, *kt_start, *kt_final);
            sim.run_nvt(ramp, *tau_kt, *n_steps)?;
        }
        Stage::Npt { kt, tau_kt, pressure, tau_pressure, n_steps } => {
            sim.run_npt(*kt, *tau_kt, *pressure, *tau_pressure, *n_steps)?
        }
        Stage::Langevin { kt, alpha, n_steps } => sim.run_langevin(*n_steps, *kt, *alpha)?,
        Stage::Nve { n_steps } => sim.run_nve(*n_steps)?,
        Stage::UpdateVolume { kt, tau_kt, n_steps, period, final_box_lengths, final_box_scale } => {
            let target = match (final_box_lengths, final_box_scale) {
                (Some(lengths), _) => Vec3::from(*lengths),
                (None, Some(scale)) => sim.box_lengths()? * *scale,
                (None, None) => anyhow::bail!("update_volume needs final_box_lengths or final_box_scale"),
            };
            sim.run_update_volume(*kt, *tau_kt, *n_steps, *period, target)?;
        }
        Stage::DisplacementCap { n_steps, maximum_displacement } => {
            sim.run_displacement_cap(*n_steps, *maximum_displacement)?
        }
        Stage::Thermalize { kt } => sim.thermalize(*kt)?,
        Stage::SetDt { dt } => sim.set_dt(*dt)?,
        Stage::AdjustEpsilon { scale_by, shift_by, type_filter } => {
            let filter = type_filter.as_ref().map(|pairs| to_type_pairs(pairs));
            sim.adjust_epsilon(*scale_by, *shift_by, filter.as_deref())?;
        }
        Stage::AdjustSigma { scale_by, shift_by, type_filter } => {
            let filter = type_filter.as_ref().map(|pairs| to_type_pairs(pairs));
            sim.adjust_sigma(*scale_by, *shift_by, filter.as_deref())?;
        }
        Stage::AddWalls { axis, sigma, epsilon, r_cut } => sim.add_walls(*axis, *sigma, *epsilon, *r_cut)?,
        Stage::RemoveWalls { axis } => {
            sim.remove_walls(*axis);
        }
    }
    Ok(())
}

fn to_type_pairs(pairs: &[[String; 2]]) -> Vec<TypePair> {
    pairs.iter().map(|[a, b]| TypePair::new(a.as_str(), b.as_str())).collect()
}

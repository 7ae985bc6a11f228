use lbm_interactive::{
    config::{BackendKind, UserAction},
    ComputeBackend, Config, CpuBackend, FluidSimulation, GPUContext, VTKWriter,
};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <config.json>", args[0]);
        eprintln!("  config.json - JSON file with grid, physics, output settings and scripted input");
        std::process::exit(1);
    }

    info!("Loading configuration from: {}", args[1]);
    let config = Config::from_file(&args[1])?;

    info!("Simulation parameters:");
    info!("  Domain: {}x{}", config.grid.width, config.grid.height);
    info!("  Viscosity: {}", config.physics.viscosity);
    info!("  Frames: {} (dt = {})", config.simulation.frames, config.simulation.dt);
    info!("  Output frequency: {}", config.output.output_frequency);
    info!("  Scripted actions: {}", config.script.len());

    match config.simulation.backend {
        BackendKind::Gpu => {
            let gpu = GPUContext::new().await?;
            info!("  Adapter: {}", gpu.adapter_name());
            run(FluidSimulation::new(gpu, &config)?, &config)?;
        }
        BackendKind::Cpu => run(FluidSimulation::new(CpuBackend::new(), &config)?, &config)?,
    }

    info!("Output files written to: {}", config.output.output_directory);
    Ok(())
}

fn run<B: ComputeBackend>(mut simulation: FluidSimulation<B>, config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.output.output_directory)?;
    let mut vtk_writer = VTKWriter::new(simulation.grid());

    let frames = config.simulation.frames;
    let progress = ProgressBar::new(frames);
    progress.set_style(ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} frames {msg}")?);

    for frame in 0..frames {
        for action in config.actions_at(frame) {
            apply_action(&mut simulation, action)?;
        }

        let summary = simulation.frame(config.simulation.dt)?;
        if let Some(stroke) = summary.stroke {
            progress.set_message(format!("stroke strength {:.3}", stroke.strength));
        }

        if simulation.frames() % config.output.output_frequency == 0 {
            let lattice = simulation.read_lattice()?;
            let filename = format!("{}/output_{:06}.vtk", config.output.output_directory, simulation.frames());
            vtk_writer.write(&filename, &lattice, simulation.frames(), summary.params.time)?;

            let mass: f64 = lattice.iter().map(|cell| cell.rho as f64).sum();
            info!("Frame {}: wrote {} (total mass {:.4})", simulation.frames(), filename, mass);
        }

        progress.inc(1);
    }
    progress.finish_with_message("done");

    if config.output.write_collection && vtk_writer.get_file_count() > 0 {
        let collection = format!("{}/simulation.pvd", config.output.output_directory);
        vtk_writer.write_collection(&collection)?;
        info!("Wrote collection file: {}", collection);
    }

    Ok(())
}

fn apply_action<B: ComputeBackend>(simulation: &mut FluidSimulation<B>, action: &UserAction) -> Result<()> {
    match *action {
        UserAction::Paint { x, y, radius, value } => {
            let brush = simulation.interaction();
            let (radius, value) = (radius.unwrap_or(brush.paint_radius), value.unwrap_or(brush.paint_value));
            simulation.paint(x, y, radius, value)?;
        }
        UserAction::Pointer { x, y } => simulation.record_pointer(x, y),
        UserAction::Viscosity { value } => simulation.set_viscosity(value),
        UserAction::Reset => simulation.reset()?,
    }
    Ok(())
}

use anyhow::Result;
use log::info;
use crate::{
    backend::{ComputeBackend, Frame, Kernel},
    config::{Config, InteractionConfig},
    density::DensityInjector,
    lattice::{Grid, LatticeCell},
    params::{ParameterState, SimParams},
    solver::LBMStepper,
    velocity::{VelocityInjector, VelocityStroke},
    Float,
};

/// What one call to [`FluidSimulation::frame`] submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub params: SimParams,
    pub dispatches: Vec<Kernel>,
    pub stroke: Option<VelocityStroke>,
}

/// A full interactive session: parameter state, lattice stepper and both
/// injectors, sharing one backend.
///
/// Each frame is built in a fixed order (parameters, density paint,
/// velocity stroke, collision, streaming) and submitted as one unit.
pub struct FluidSimulation<B: ComputeBackend> {
    backend: B,
    params: ParameterState,
    stepper: LBMStepper,
    density: DensityInjector,
    velocity: VelocityInjector,
    interaction: InteractionConfig,
    frames: u64,
}

impl<B: ComputeBackend> FluidSimulation<B> {
    pub fn new(mut backend: B, config: &Config) -> Result<Self> {
        let grid = config.grid();
        info!("Creating fluid simulation on '{}' backend, grid {}x{}, viscosity {}",
              backend.name(), grid.width, grid.height, config.physics.viscosity);

        let params = ParameterState::new(&mut backend, grid, config.physics.viscosity)?;
        let stepper = LBMStepper::new(&mut backend, grid, params.buffer())?;
        let density = DensityInjector::new(&mut backend, grid, params.buffer(), stepper.current_buffer())?;
        let velocity = VelocityInjector::new(
            &mut backend,
            grid,
            config.interaction.stroke_tuning(),
            params.buffer(),
            stepper.current_buffer(),
        )?;

        Ok(Self {
            backend,
            params,
            stepper,
            density,
            velocity,
            interaction: config.interaction.clone(),
            frames: 0,
        })
    }

    /// Build and submit one frame.
    pub fn frame(&mut self, dt: Float) -> Result<FrameSummary> {
        let mut frame = Frame::new();

        let params = self.params.advance(&mut self.backend, dt)?;
        self.density.apply(&mut frame);
        let stroke = self.velocity.apply(&mut self.backend, &mut frame)?;
        self.stepper.step(&mut frame, dt);

        let dispatches = frame.kernels();
        self.backend.submit(frame)?;
        self.frames += 1;

        Ok(FrameSummary {
            params,
            dispatches,
            stroke,
        })
    }

    /// Paint a density circle, applied on the next frame.
    pub fn paint(&mut self, x: Float, y: Float, radius: Float, value: Float) -> Result<usize> {
        self.density.paint(&mut self.backend, x, y, radius, value)
    }

    /// Paint with the configured click brush.
    pub fn click(&mut self, x: Float, y: Float) -> Result<usize> {
        let (radius, value) = (self.interaction.paint_radius, self.interaction.paint_value);
        self.paint(x, y, radius, value)
    }

    pub fn record_pointer(&mut self, x: Float, y: Float) {
        self.velocity.record_pointer(x, y);
    }

    pub fn set_viscosity(&mut self, viscosity: Float) {
        self.params.set_viscosity(viscosity);
    }

    /// Restore the rest equilibrium, zero elapsed time and drop all
    /// pending user input.
    pub fn reset(&mut self) -> Result<()> {
        self.stepper.reset(&mut self.backend)?;
        self.params.reset_time();
        self.density.clear(&mut self.backend)?;
        self.velocity.clear_pointer();
        info!("Simulation reset");
        Ok(())
    }

    /// Read the canonical lattice buffer back to the host.
    pub fn read_lattice(&mut self) -> Result<Vec<LatticeCell>> {
        self.stepper.read_current(&mut self.backend)
    }

    pub fn read_stroke(&mut self) -> Result<VelocityStroke> {
        let bytes = self.backend.read_buffer(self.velocity.stroke_buffer())?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    pub fn grid(&self) -> Grid {
        self.stepper.grid()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn params(&self) -> &ParameterState {
        &self.params
    }

    pub fn stepper(&self) -> &LBMStepper {
        &self.stepper
    }

    pub fn density(&self) -> &DensityInjector {
        &self.density
    }

    pub fn interaction(&self) -> &InteractionConfig {
        &self.interaction
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

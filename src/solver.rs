use anyhow::Result;
use log::{debug, info};
use crate::{
    backend::{BindingsId, BufferId, BufferKind, ComputeBackend, Frame, Kernel, KernelBindings},
    lattice::{initial_lattice, Grid, LatticeCell},
    Float,
};

/// Owns the lattice double-buffer and records one LBM step per call.
///
/// Buffer A holds the canonical state between steps. Collision reads A and
/// writes B, streaming reads B and writes A, so roles swap through the
/// pre-built bindings and no copy or explicit swap is ever needed.
pub struct LBMStepper {
    grid: Grid,
    current: BufferId,
    scratch: BufferId,
    collision_bindings: BindingsId,
    streaming_bindings: BindingsId,
    steps: u64,
    time_elapsed: Float,
}

impl LBMStepper {
    pub fn new<B: ComputeBackend>(backend: &mut B, grid: Grid, params: BufferId) -> Result<Self> {
        info!("Initializing D2Q9 lattice with domain size: {}x{}", grid.width, grid.height);

        let initial = initial_lattice(grid);
        let current = backend.create_buffer("Lattice Buffer A", BufferKind::Storage, bytemuck::cast_slice(&initial))?;
        let scratch = backend.create_buffer("Lattice Buffer B", BufferKind::Storage, bytemuck::cast_slice(&initial))?;

        let collision_bindings = backend.create_bindings(KernelBindings::Collision {
            params,
            src: current,
            dst: scratch,
        })?;
        let streaming_bindings = backend.create_bindings(KernelBindings::Streaming {
            params,
            src: scratch,
            dst: current,
        })?;

        Ok(Self {
            grid,
            current,
            scratch,
            collision_bindings,
            streaming_bindings,
            steps: 0,
            time_elapsed: 0.0,
        })
    }

    /// Record collision then streaming over the full grid.
    ///
    /// `dt` only advances the stepper's clock; every call records exactly
    /// two dispatches.
    pub fn step(&mut self, frame: &mut Frame, dt: Float) {
        let workgroups = self.grid.workgroups();

        // Collision step - read from current, write to scratch
        frame.dispatch(Kernel::Collision, self.collision_bindings, workgroups);
        // Streaming step - read from scratch, write back to current
        frame.dispatch(Kernel::Streaming, self.streaming_bindings, workgroups);

        self.steps += 1;
        self.time_elapsed += dt;
    }

    /// Rewrite both buffers to the rest equilibrium and zero the clock.
    /// Must not be interleaved with a recorded but unsubmitted step.
    pub fn reset<B: ComputeBackend>(&mut self, backend: &mut B) -> Result<()> {
        let initial = initial_lattice(self.grid);
        let data = bytemuck::cast_slice(&initial);
        backend.write_buffer(self.current, data)?;
        backend.write_buffer(self.scratch, data)?;
        debug!("Lattice reset after {} steps", self.steps);
        self.steps = 0;
        self.time_elapsed = 0.0;
        Ok(())
    }

    /// Buffer holding the latest completed step, safe for visualization.
    pub fn current_buffer(&self) -> BufferId {
        self.current
    }

    /// Buffer holding post-collision values mid-step; never canonical.
    pub fn scratch_buffer(&self) -> BufferId {
        self.scratch
    }

    pub fn read_current<B: ComputeBackend>(&self, backend: &mut B) -> Result<Vec<LatticeCell>> {
        let bytes = backend.read_buffer(self.current)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn time_elapsed(&self) -> Float {
        self.time_elapsed
    }
}

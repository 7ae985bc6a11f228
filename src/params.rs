use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use log::warn;
use crate::{
    backend::{BufferId, BufferKind, ComputeBackend},
    lattice::Grid,
    Float,
};

/// Smallest viscosity accepted at runtime. Anything below (or non-finite)
/// is clamped up to it, keeping omega inside (0, 2).
pub const MIN_VISCOSITY: Float = 1e-3;

/// Viscosity used when nothing else is configured.
pub const DEFAULT_VISCOSITY: Float = 0.1;

/// Uniform record read by every kernel.
///
/// Layout is fixed at six 32-bit slots:
/// `[width, height, time, omega, viscosity, reserved]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SimParams {
    pub width: u32,
    pub height: u32,
    pub time: f32,
    pub omega: f32,
    pub viscosity: f32,
    pub reserved: f32,
}

impl SimParams {
    pub fn new(grid: Grid, time: Float, viscosity: Float) -> Self {
        Self {
            width: grid.width,
            height: grid.height,
            time,
            omega: relaxation_omega(viscosity),
            viscosity,
            reserved: 0.0,
        }
    }
}

/// BGK relaxation coefficient for a lattice kinematic viscosity.
pub fn relaxation_omega(viscosity: Float) -> Float {
    1.0 / (3.0 * viscosity + 0.5)
}

/// Owns elapsed time and viscosity, and is the single writer of the
/// parameter buffer shared by all kernels.
pub struct ParameterState {
    grid: Grid,
    buffer: BufferId,
    time: Float,
    viscosity: Float,
}

impl ParameterState {
    pub fn new<B: ComputeBackend>(backend: &mut B, grid: Grid, viscosity: Float) -> Result<Self> {
        let viscosity = sanitize_viscosity(viscosity);
        let initial = SimParams::new(grid, 0.0, viscosity);
        let buffer = backend.create_buffer(
            "Sim Params Buffer",
            BufferKind::Uniform,
            bytemuck::bytes_of(&initial),
        )?;

        Ok(Self {
            grid,
            buffer,
            time: 0.0,
            viscosity,
        })
    }

    /// Advance time by `dt`, recompute omega and publish the record.
    pub fn advance<B: ComputeBackend>(&mut self, backend: &mut B, dt: Float) -> Result<SimParams> {
        self.time += dt;
        let record = self.record();
        backend.write_buffer(self.buffer, bytemuck::bytes_of(&record))?;
        Ok(record)
    }

    /// Takes effect on the next `advance`.
    pub fn set_viscosity(&mut self, viscosity: Float) {
        self.viscosity = sanitize_viscosity(viscosity);
    }

    pub fn reset_time(&mut self) {
        self.time = 0.0;
    }

    /// Current record, without advancing time.
    pub fn record(&self) -> SimParams {
        SimParams::new(self.grid, self.time, self.viscosity)
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn time(&self) -> Float {
        self.time
    }

    pub fn viscosity(&self) -> Float {
        self.viscosity
    }

    pub fn omega(&self) -> Float {
        relaxation_omega(self.viscosity)
    }
}

fn sanitize_viscosity(viscosity: Float) -> Float {
    if viscosity.is_finite() && viscosity >= MIN_VISCOSITY {
        viscosity
    } else {
        warn!("Viscosity {} is out of range, clamping to {}", viscosity, MIN_VISCOSITY);
        MIN_VISCOSITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use approx::assert_relative_eq;

    #[test]
    fn omega_from_viscosity() {
        assert_relative_eq!(relaxation_omega(0.1), 1.25, epsilon = 1e-6);
        assert_relative_eq!(relaxation_omega(1.0), 1.0 / 3.5, epsilon = 1e-6);
    }

    #[test]
    fn record_is_six_slots() {
        assert_eq!(std::mem::size_of::<SimParams>(), 24);
    }

    #[test]
    fn advance_accumulates_time_and_publishes() {
        let mut backend = CpuBackend::new();
        let mut params = ParameterState::new(&mut backend, Grid::new(8, 4), 0.1).unwrap();

        params.advance(&mut backend, 0.016).unwrap();
        let record = params.advance(&mut backend, 0.016).unwrap();

        assert_relative_eq!(record.time, 0.032, epsilon = 1e-6);
        assert_eq!((record.width, record.height), (8, 4));
        assert_eq!(record.reserved, 0.0);

        let published: SimParams = bytemuck::pod_read_unaligned(&backend.read_buffer(params.buffer()).unwrap());
        assert_eq!(published, record);
    }

    #[test]
    fn viscosity_change_applies_on_next_advance() {
        let mut backend = CpuBackend::new();
        let mut params = ParameterState::new(&mut backend, Grid::new(4, 4), 0.1).unwrap();
        params.advance(&mut backend, 0.016).unwrap();

        params.set_viscosity(1.0);
        let stale: SimParams = bytemuck::pod_read_unaligned(&backend.read_buffer(params.buffer()).unwrap());
        assert_relative_eq!(stale.viscosity, 0.1);

        let record = params.advance(&mut backend, 0.016).unwrap();
        assert_relative_eq!(record.viscosity, 1.0);
        assert_relative_eq!(record.omega, 0.2857143, epsilon = 1e-6);
    }

    #[test]
    fn non_positive_viscosity_is_clamped() {
        let mut backend = CpuBackend::new();
        let mut params = ParameterState::new(&mut backend, Grid::new(4, 4), 0.1).unwrap();

        for bad in [0.0, -2.0, Float::NAN, Float::INFINITY] {
            params.set_viscosity(bad);
            assert_eq!(params.viscosity(), MIN_VISCOSITY);
            assert!(params.omega() < 2.0 && params.omega() > 0.0);
        }
    }
}

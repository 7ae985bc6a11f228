pub mod backend;
pub mod config;
pub mod cpu;
pub mod density;
pub mod gpu;
pub mod lattice;
pub mod output;
pub mod params;
pub mod simulation;
pub mod solver;
pub mod velocity;

pub use backend::{ComputeBackend, Frame, Kernel};
pub use config::Config;
pub use cpu::CpuBackend;
pub use density::DensityInjector;
pub use gpu::GPUContext;
pub use lattice::{D2Q9, Grid, LatticeCell};
pub use output::VTKWriter;
pub use params::{ParameterState, SimParams};
pub use simulation::{FluidSimulation, FrameSummary};
pub use solver::LBMStepper;
pub use velocity::{VelocityInjector, VelocityStroke};

pub type Float = f32;

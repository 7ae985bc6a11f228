//! Session-level tests against the host backend.

use approx::assert_relative_eq;
use lbm_interactive::{
    cpu::{collide_cells, stream_cells},
    lattice::initial_lattice,
    ComputeBackend, Config, CpuBackend, FluidSimulation, Frame, Grid, Kernel, LBMStepper, LatticeCell,
    ParameterState, VelocityStroke, D2Q9,
};

const DT: f32 = 0.016;

fn simulation(width: u32, height: u32) -> FluidSimulation<CpuBackend> {
    FluidSimulation::new(CpuBackend::new(), &Config::with_grid(width, height)).unwrap()
}

fn total_mass(lattice: &[LatticeCell]) -> f64 {
    lattice.iter().map(|cell| cell.f.iter().map(|&f| f as f64).sum::<f64>()).sum()
}

// Initial state and reset

#[test]
fn starts_at_rest_equilibrium() {
    let mut sim = simulation(24, 16);
    let lattice = sim.read_lattice().unwrap();

    assert_eq!(lattice.len(), 24 * 16);
    for cell in &lattice {
        assert_eq!(cell.rho, 1.0);
        assert_eq!(cell.velocity, [0.0, 0.0]);
        assert_eq!(cell.f, D2Q9::WEIGHTS);
    }
    assert_relative_eq!(D2Q9::WEIGHTS.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
}

#[test]
fn reset_restores_equilibrium_and_time() {
    let mut sim = simulation(32, 32);
    sim.click(16.0, 16.0).unwrap();
    sim.record_pointer(4.0, 4.0);
    sim.record_pointer(20.0, 12.0);
    for _ in 0..5 {
        sim.frame(DT).unwrap();
    }
    assert_ne!(sim.read_lattice().unwrap(), initial_lattice(sim.grid()));

    sim.reset().unwrap();

    assert_eq!(sim.read_lattice().unwrap(), initial_lattice(sim.grid()));
    assert_eq!(sim.params().time(), 0.0);
    assert_eq!(sim.stepper().steps(), 0);
    assert_eq!(sim.stepper().time_elapsed(), 0.0);

    let summary = sim.frame(DT).unwrap();
    assert_relative_eq!(summary.params.time, DT);
}

#[test]
fn reset_drops_pending_input() {
    let mut sim = simulation(32, 32);
    sim.paint(8.0, 8.0, 3.0, 1.5).unwrap();
    sim.frame(DT).unwrap();
    sim.paint(24.0, 24.0, 3.0, 1.5).unwrap();
    sim.record_pointer(2.0, 2.0);
    sim.record_pointer(30.0, 30.0);

    sim.reset().unwrap();

    assert!(!sim.density().is_pending());
    assert!(sim.density().field().iter().all(|&value| value == 0.0));

    let summary = sim.frame(DT).unwrap();
    assert_eq!(summary.dispatches, vec![Kernel::Collision, Kernel::Streaming]);
    assert_eq!(summary.stroke, None);

    // A paint after reset uploads only its own circle.
    let painted = sim.paint(16.0, 16.0, 2.0, 1.0).unwrap();
    let nonzero = sim.density().field().iter().filter(|&&value| value != 0.0).count();
    assert_eq!(nonzero, painted);

    // The first sample after reset only anchors.
    sim.record_pointer(10.0, 10.0);
    assert_eq!(sim.frame(DT).unwrap().stroke, None);
}

// Parameter publication

#[test]
fn each_frame_publishes_time_and_omega() {
    let mut sim = simulation(8, 8);

    let first = sim.frame(DT).unwrap();
    assert_relative_eq!(first.params.time, DT);
    assert_relative_eq!(first.params.omega, 1.0 / 0.8, epsilon = 1e-6);

    sim.set_viscosity(1.0);
    let second = sim.frame(DT).unwrap();
    assert_relative_eq!(second.params.time, 2.0 * DT);
    assert_relative_eq!(second.params.omega, 0.2857143, epsilon = 1e-6);
    assert_eq!((second.params.width, second.params.height), (8, 8));
}

// Stepping

#[test]
fn plain_frame_dispatches_collision_then_streaming() {
    let mut sim = simulation(16, 16);

    let summary = sim.frame(DT).unwrap();

    assert_eq!(summary.dispatches, vec![Kernel::Collision, Kernel::Streaming]);
    assert_eq!(sim.backend().executed(), &[Kernel::Collision, Kernel::Streaming]);
    assert_eq!(summary.stroke, None);
}

#[test]
fn step_records_two_dispatches_regardless_of_dt() {
    let mut backend = CpuBackend::new();
    let grid = Grid::new(20, 20);
    let params = ParameterState::new(&mut backend, grid, 0.1).unwrap();
    let mut stepper = LBMStepper::new(&mut backend, grid, params.buffer()).unwrap();

    for dt in [0.0, DT, 10.0] {
        let mut frame = Frame::new();
        stepper.step(&mut frame, dt);
        assert_eq!(frame.kernels(), vec![Kernel::Collision, Kernel::Streaming]);
        assert_eq!(frame.commands().len(), 2);
    }
    assert_eq!(stepper.steps(), 3);
}

#[test]
fn step_writes_scratch_then_current() {
    let mut backend = CpuBackend::new();
    let grid = Grid::new(12, 10);
    let params = ParameterState::new(&mut backend, grid, 0.05).unwrap();
    let mut stepper = LBMStepper::new(&mut backend, grid, params.buffer()).unwrap();
    assert_ne!(stepper.current_buffer(), stepper.scratch_buffer());

    let mut start = initial_lattice(grid);
    start[grid.index(3, 4)].f[1] += 0.05;
    start[grid.index(7, 2)].f[6] += 0.02;
    backend.write_buffer(stepper.current_buffer(), bytemuck::cast_slice(&start)).unwrap();

    let mut frame = Frame::new();
    stepper.step(&mut frame, DT);
    backend.submit(frame).unwrap();

    let record = params.record();
    let mut collided = start.clone();
    collide_cells(&record, &start, &mut collided).unwrap();
    let mut streamed = collided.clone();
    stream_cells(&record, &collided, &mut streamed).unwrap();

    let scratch: Vec<LatticeCell> =
        bytemuck::pod_collect_to_vec(&backend.read_buffer(stepper.scratch_buffer()).unwrap());
    assert_eq!(scratch, collided);
    assert_eq!(stepper.read_current(&mut backend).unwrap(), streamed);
}

#[test]
fn mass_is_conserved_while_stirring() {
    let mut sim = simulation(32, 32);
    let before = total_mass(&sim.read_lattice().unwrap());

    for i in 0..30 {
        let x = 4.0 + i as f32;
        sim.record_pointer(x, 16.0);
        sim.record_pointer(x + 3.0, 18.0);
        sim.frame(DT).unwrap();
    }

    let lattice = sim.read_lattice().unwrap();
    assert_relative_eq!(total_mass(&lattice), before, max_relative = 1e-4);
    assert!(lattice.iter().any(|cell| cell.velocity[0].abs() > 1e-4));
    assert!(lattice.iter().all(|cell| cell.rho > 0.0 && cell.rho.is_finite()));
}

// Density injection

#[test]
fn paint_writes_circle_into_field() {
    let mut sim = simulation(32, 32);
    let grid = sim.grid();

    sim.paint(20.0, 20.0, 3.0, 0.5).unwrap();
    let written = sim.paint(10.0, 10.0, 2.0, 1.0).unwrap();
    assert_eq!(written, 13);

    let field = sim.density().field();
    for y in 0..grid.height {
        for x in 0..grid.width {
            let (dx, dy) = (x as f32 - 10.0, y as f32 - 10.0);
            let value = field[grid.index(x, y)];
            if dx * dx + dy * dy <= 4.0 {
                assert_eq!(value, 1.0);
            } else {
                let (ex, ey) = (x as f32 - 20.0, y as f32 - 20.0);
                let expected = if ex * ex + ey * ey <= 9.0 { 0.5 } else { 0.0 };
                assert_eq!(value, expected, "cell ({}, {})", x, y);
            }
        }
    }
}

#[test]
fn paint_overwrites_overlapping_cells() {
    let mut sim = simulation(16, 16);
    let grid = sim.grid();

    sim.paint(8.0, 8.0, 2.0, 3.0).unwrap();
    sim.paint(9.0, 8.0, 1.0, 0.25).unwrap();

    let field = sim.density().field();
    assert_eq!(field[grid.index(9, 8)], 0.25);
    assert_eq!(field[grid.index(7, 8)], 3.0);
}

#[test]
fn paint_is_applied_on_the_next_frame_only() {
    let mut sim = simulation(32, 32);
    let grid = sim.grid();
    sim.paint(16.0, 16.0, 3.0, 2.0).unwrap();
    assert!(sim.density().is_pending());

    let first = sim.frame(DT).unwrap();
    assert_eq!(first.dispatches, vec![Kernel::Paint, Kernel::Collision, Kernel::Streaming]);
    assert!(!sim.density().is_pending());

    let lattice = sim.read_lattice().unwrap();
    assert_relative_eq!(lattice[grid.index(16, 16)].rho, 2.0, epsilon = 1e-5);
    assert_relative_eq!(lattice[grid.index(2, 2)].rho, 1.0, epsilon = 1e-6);

    let second = sim.frame(DT).unwrap();
    assert_eq!(second.dispatches, vec![Kernel::Collision, Kernel::Streaming]);
}

#[test]
fn click_uses_default_brush() {
    let mut sim = simulation(64, 64);
    let grid = sim.grid();

    sim.click(32.0, 32.0).unwrap();

    let field = sim.density().field();
    assert_eq!(field[grid.index(52, 32)], 1.0);
    assert_eq!(field[grid.index(53, 32)], 0.0);
}

// Velocity injection

#[test]
fn small_pointer_motion_skips_velocity_kernel() {
    let mut sim = simulation(16, 16);
    sim.record_pointer(0.0, 0.0);
    sim.record_pointer(0.5, 0.5);

    let summary = sim.frame(DT).unwrap();

    assert_eq!(summary.stroke, None);
    assert!(!summary.dispatches.contains(&Kernel::Velocity));
}

#[test]
fn pointer_drag_dispatches_velocity_kernel() {
    let mut sim = simulation(16, 16);
    sim.record_pointer(0.0, 0.0);
    sim.record_pointer(10.0, 10.0);

    let summary = sim.frame(DT).unwrap();

    assert_eq!(summary.dispatches, vec![Kernel::Velocity, Kernel::Collision, Kernel::Streaming]);
    let stroke = summary.stroke.unwrap();
    assert_relative_eq!(stroke.strength, 0.0707107, epsilon = 1e-5);
    assert_eq!(stroke.radius, 50.0);
}

#[test]
fn long_drag_saturates_strength() {
    let mut sim = simulation(16, 16);
    sim.record_pointer(0.0, 0.0);
    sim.record_pointer(400.0, 0.0);

    let stroke = sim.frame(DT).unwrap().stroke.unwrap();
    assert_eq!(stroke.strength, 0.6);
}

#[test]
fn stroke_record_is_cleared_after_use() {
    let mut sim = simulation(16, 16);
    sim.record_pointer(2.0, 2.0);
    sim.record_pointer(12.0, 6.0);

    assert!(sim.frame(DT).unwrap().stroke.is_some());
    assert_eq!(sim.read_stroke().unwrap(), VelocityStroke::default());

    // A stale pointer sample must not be replayed.
    let next = sim.frame(DT).unwrap();
    assert_eq!(next.stroke, None);
    assert_eq!(next.dispatches, vec![Kernel::Collision, Kernel::Streaming]);
}

#[test]
fn stroke_moves_fluid_along_the_drag() {
    let mut sim = simulation(64, 32);
    let grid = sim.grid();
    sim.record_pointer(10.0, 16.0);
    sim.record_pointer(50.0, 16.0);

    sim.frame(DT).unwrap();

    let cell = sim.read_lattice().unwrap()[grid.index(30, 16)];
    assert!(cell.velocity[0] > 0.05);
    assert!(cell.velocity[1].abs() < 1e-4);
}

// Frame ordering

#[test]
fn injectors_run_before_the_step() {
    let mut sim = simulation(32, 32);
    sim.click(8.0, 8.0).unwrap();
    sim.record_pointer(0.0, 0.0);
    sim.record_pointer(20.0, 0.0);

    let summary = sim.frame(DT).unwrap();

    let expected = vec![Kernel::Paint, Kernel::Velocity, Kernel::Collision, Kernel::Streaming];
    assert_eq!(summary.dispatches, expected);
    assert_eq!(sim.backend().executed(), expected.as_slice());
    assert_eq!(sim.frames(), 1);
}

#[test]
fn clamped_viscosity_keeps_simulation_finite() {
    let mut sim = simulation(16, 16);
    sim.set_viscosity(-1.0);
    sim.record_pointer(0.0, 8.0);
    sim.record_pointer(15.0, 8.0);

    let summary = sim.frame(DT).unwrap();
    assert!(summary.params.omega > 0.0 && summary.params.omega < 2.0);
    assert!(sim.read_lattice().unwrap().iter().all(|cell| cell.rho.is_finite()));
}

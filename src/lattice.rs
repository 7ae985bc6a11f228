use bytemuck::{Pod, Zeroable};
use crate::Float;

/// D2Q9 Lattice-Boltzmann model constants
pub struct D2Q9;

impl D2Q9 {
    /// Number of discrete velocities
    pub const Q: usize = 9;

    /// Discrete velocities: center, E, N, W, S, NE, NW, SW, SE
    pub const VELOCITIES: [[i32; 2]; 9] = [
        [0, 0],
        [1, 0], [0, 1], [-1, 0], [0, -1],
        [1, 1], [-1, 1], [-1, -1], [1, -1],
    ];

    /// Weights for each direction
    pub const WEIGHTS: [Float; 9] = [
        4.0 / 9.0,
        1.0 / 9.0, 1.0 / 9.0, 1.0 / 9.0, 1.0 / 9.0,
        1.0 / 36.0, 1.0 / 36.0, 1.0 / 36.0, 1.0 / 36.0,
    ];

    /// Speed of sound squared
    pub const CS2: Float = 1.0 / 3.0;
}

/// Below this density a cell is treated as empty and its velocity as zero.
pub const MIN_DENSITY: Float = 1e-10;

/// Grid dimensions, fixed for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub width: u32,
    pub height: u32,
}

impl Grid {
    /// Threads per workgroup along each axis, must match the WGSL kernels.
    pub const WORKGROUP_SIZE: u32 = 16;

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Workgroup counts covering the full grid.
    pub fn workgroups(&self) -> [u32; 2] {
        [
            self.width.div_ceil(Self::WORKGROUP_SIZE),
            self.height.div_ceil(Self::WORKGROUP_SIZE),
        ]
    }
}

/// A single lattice cell: 9 distributions followed by the macroscopic
/// density and velocity (12 f32 values, 48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LatticeCell {
    /// Distribution functions (f_i)
    pub f: [Float; 9],
    /// Macroscopic density
    pub rho: Float,
    /// Macroscopic velocity
    pub velocity: [Float; 2],
}

impl Default for LatticeCell {
    fn default() -> Self {
        Self::new_equilibrium(1.0, [0.0; 2])
    }
}

impl LatticeCell {
    /// Initialize with the equilibrium distribution for the given moments
    pub fn new_equilibrium(rho: Float, velocity: [Float; 2]) -> Self {
        Self {
            f: equilibrium(rho, velocity),
            rho,
            velocity,
        }
    }

    /// Recompute density and velocity from the distributions.
    pub fn update_macroscopic(&mut self) {
        let (rho, velocity) = moments(&self.f);
        self.rho = rho;
        self.velocity = velocity;
    }

    /// Apply BGK collision toward the local equilibrium.
    ///
    /// Stored moments are refreshed from the pre-collision distributions,
    /// which is what the kernels publish alongside the relaxed values.
    pub fn collide(&mut self, omega: Float) {
        self.update_macroscopic();
        let feq = equilibrium(self.rho, self.velocity);
        for i in 0..D2Q9::Q {
            self.f[i] += omega * (feq[i] - self.f[i]);
        }
    }
}

/// Equilibrium distribution function for one direction
pub fn equilibrium_distribution(direction: usize, rho: Float, velocity: [Float; 2]) -> Float {
    let weight = D2Q9::WEIGHTS[direction];
    let c = D2Q9::VELOCITIES[direction];

    let cu = c[0] as Float * velocity[0] + c[1] as Float * velocity[1];
    let u2 = velocity[0] * velocity[0] + velocity[1] * velocity[1];

    weight * rho * (1.0 + cu / D2Q9::CS2
        + cu * cu / (2.0 * D2Q9::CS2 * D2Q9::CS2)
        - u2 / (2.0 * D2Q9::CS2))
}

/// Equilibrium distributions for all nine directions
pub fn equilibrium(rho: Float, velocity: [Float; 2]) -> [Float; 9] {
    std::array::from_fn(|i| equilibrium_distribution(i, rho, velocity))
}

/// Density and velocity carried by a set of distributions
pub fn moments(f: &[Float; 9]) -> (Float, [Float; 2]) {
    let rho: Float = f.iter().sum();
    let mut velocity = [0.0; 2];
    if rho > MIN_DENSITY {
        for i in 0..D2Q9::Q {
            let c = D2Q9::VELOCITIES[i];
            velocity[0] += f[i] * c[0] as Float;
            velocity[1] += f[i] * c[1] as Float;
        }
        velocity[0] /= rho;
        velocity[1] /= rho;
    }
    (rho, velocity)
}

/// The session's initial condition: every cell at rest with unit density.
pub fn initial_lattice(grid: Grid) -> Vec<LatticeCell> {
    vec![LatticeCell::default(); grid.cell_count()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn weights_sum_to_one() {
        let sum: Float = D2Q9::WEIGHTS.iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn rest_equilibrium_equals_weights() {
        let cell = LatticeCell::default();
        assert_eq!(cell.f, D2Q9::WEIGHTS);
        assert_eq!(cell.rho, 1.0);
        assert_eq!(cell.velocity, [0.0, 0.0]);
    }

    #[test]
    fn equilibrium_reproduces_its_moments() {
        let (rho, velocity) = moments(&equilibrium(1.3, [0.05, -0.02]));
        assert_relative_eq!(rho, 1.3, epsilon = 1e-5);
        assert_relative_eq!(velocity[0], 0.05, epsilon = 1e-5);
        assert_relative_eq!(velocity[1], -0.02, epsilon = 1e-5);
    }

    #[test]
    fn collision_conserves_mass_and_momentum() {
        let mut cell = LatticeCell::new_equilibrium(1.0, [0.0; 2]);
        cell.f[1] += 0.02;
        cell.f[3] -= 0.01;
        let (rho_before, u_before) = moments(&cell.f);

        cell.collide(1.7);
        let (rho_after, u_after) = moments(&cell.f);

        assert_relative_eq!(rho_before, rho_after, epsilon = 1e-6);
        assert_relative_eq!(u_before[0], u_after[0], epsilon = 1e-6);
        assert_relative_eq!(u_before[1], u_after[1], epsilon = 1e-6);
    }

    #[test]
    fn empty_cell_has_zero_velocity() {
        let (rho, velocity) = moments(&[0.0; 9]);
        assert_eq!(rho, 0.0);
        assert_eq!(velocity, [0.0, 0.0]);
    }

    #[test]
    fn workgroups_cover_the_grid() {
        assert_eq!(Grid::new(500, 500).workgroups(), [32, 32]);
        assert_eq!(Grid::new(16, 17).workgroups(), [1, 2]);
        assert_eq!(std::mem::size_of::<LatticeCell>(), 48);
    }
}

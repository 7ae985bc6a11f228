use anyhow::Result;
use log::debug;
use crate::{
    backend::{BindingsId, BufferId, BufferKind, ComputeBackend, Frame, Kernel, KernelBindings},
    lattice::Grid,
    Float,
};

/// Paints target densities into the lattice through a dense per-cell field.
///
/// The host copy of the field is only cleared by [`DensityInjector::clear`]:
/// each paint overwrites the cells inside its circle and uploads the whole
/// field.
pub struct DensityInjector {
    grid: Grid,
    field: Vec<Float>,
    field_buffer: BufferId,
    bindings: BindingsId,
    pending: bool,
}

impl DensityInjector {
    pub fn new<B: ComputeBackend>(
        backend: &mut B,
        grid: Grid,
        params: BufferId,
        lattice: BufferId,
    ) -> Result<Self> {
        let field = vec![0.0; grid.cell_count()];
        let field_buffer = backend.create_buffer("User Input Buffer", BufferKind::Storage, bytemuck::cast_slice(&field))?;
        let bindings = backend.create_bindings(KernelBindings::Paint {
            params,
            lattice,
            field: field_buffer,
        })?;

        Ok(Self {
            grid,
            field,
            field_buffer,
            bindings,
            pending: false,
        })
    }

    /// Write `value` into every cell whose center lies within `radius` of
    /// `(x, y)` and upload the field. Returns the number of cells written.
    pub fn paint<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
        x: Float,
        y: Float,
        radius: Float,
        value: Float,
    ) -> Result<usize> {
        let cells = circle_cells(self.grid, x, y, radius);
        for &index in &cells {
            self.field[index] = value;
        }
        backend.write_buffer(self.field_buffer, bytemuck::cast_slice(&self.field))?;
        self.pending = true;

        debug!("Painted {} cells at ({:.1}, {:.1}) with value {}", cells.len(), x, y, value);
        Ok(cells.len())
    }

    /// Record the paint dispatch if a paint arrived since the last frame.
    pub fn apply(&mut self, frame: &mut Frame) -> bool {
        if !self.pending {
            return false;
        }
        frame.dispatch(Kernel::Paint, self.bindings, self.grid.workgroups());
        self.pending = false;
        true
    }

    /// Zero the field on host and device and drop any pending paint.
    pub fn clear<B: ComputeBackend>(&mut self, backend: &mut B) -> Result<()> {
        self.field.fill(0.0);
        backend.write_buffer(self.field_buffer, bytemuck::cast_slice(&self.field))?;
        self.pending = false;
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Host copy of the injection field.
    pub fn field(&self) -> &[Float] {
        &self.field
    }
}

/// Indices of grid cells within `radius` of `(x, y)`, inclusive, clamped
/// to the grid.
pub fn circle_cells(grid: Grid, x: Float, y: Float, radius: Float) -> Vec<usize> {
    if grid.cell_count() == 0 || !(radius >= 0.0) {
        return Vec::new();
    }

    let max_x = grid.width as i64 - 1;
    let max_y = grid.height as i64 - 1;
    let x_min = ((x - radius).floor() as i64).max(0);
    let x_max = ((x + radius).ceil() as i64).min(max_x);
    let y_min = ((y - radius).floor() as i64).max(0);
    let y_max = ((y + radius).ceil() as i64).min(max_y);

    let radius_squared = radius * radius;
    let mut cells = Vec::new();
    for py in y_min..=y_max {
        let dy = py as Float - y;
        for px in x_min..=x_max {
            let dx = px as Float - x;
            if dx * dx + dy * dy <= radius_squared {
                cells.push(grid.index(px as u32, py as u32));
            }
        }
    }
    cells
}

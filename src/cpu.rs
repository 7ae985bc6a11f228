//! Host implementation of the compute backend.
//!
//! Executes the same four kernels as the WGSL shaders, cell by cell and in
//! recorded order, so a submitted [`Frame`] has the same effect as on the GPU.

use anyhow::{bail, Context, Result};
use log::debug;
use nalgebra::Vector2;
use crate::{
    backend::{BindingsId, BufferId, BufferKind, Command, ComputeBackend, Frame, Kernel, KernelBindings},
    lattice::{equilibrium, moments, Grid, LatticeCell, D2Q9, MIN_DENSITY},
    params::SimParams,
    velocity::VelocityStroke,
};

struct HostBuffer {
    label: String,
    kind: BufferKind,
    words: Vec<u32>,
}

impl HostBuffer {
    fn byte_len(&self) -> usize {
        self.words.len() * 4
    }
}

/// Reference backend that runs the kernels on the calling thread.
#[derive(Default)]
pub struct CpuBackend {
    buffers: Vec<HostBuffer>,
    bindings: Vec<KernelBindings>,
    executed: Vec<Kernel>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every kernel executed so far, in execution order.
    pub fn executed(&self) -> &[Kernel] {
        &self.executed
    }

    fn buffer(&self, id: BufferId) -> Result<&HostBuffer> {
        self.buffers
            .get(id.0)
            .with_context(|| format!("unknown buffer {:?}", id))
    }

    fn expect_kind(&self, id: BufferId, kind: BufferKind) -> Result<&HostBuffer> {
        let buffer = self.buffer(id)?;
        if buffer.kind != kind {
            bail!("buffer '{}' is {:?}, expected {:?}", buffer.label, buffer.kind, kind);
        }
        Ok(buffer)
    }

    fn expect_record(&self, id: BufferId, size: usize) -> Result<()> {
        let buffer = self.expect_kind(id, BufferKind::Uniform)?;
        if buffer.byte_len() != size {
            bail!("uniform '{}' is {} bytes, expected {}", buffer.label, buffer.byte_len(), size);
        }
        Ok(())
    }

    fn expect_lattice(&self, id: BufferId) -> Result<usize> {
        let buffer = self.expect_kind(id, BufferKind::Storage)?;
        let cell_size = std::mem::size_of::<LatticeCell>();
        if buffer.byte_len() % cell_size != 0 {
            bail!("buffer '{}' is not a whole number of lattice cells", buffer.label);
        }
        Ok(buffer.byte_len() / cell_size)
    }

    fn params(&self, id: BufferId) -> Result<SimParams> {
        let buffer = self.buffer(id)?;
        Ok(bytemuck::pod_read_unaligned(bytemuck::cast_slice(&buffer.words)))
    }

    fn execute(&mut self, bindings: KernelBindings) -> Result<()> {
        match bindings {
            KernelBindings::Collision { params, src, dst } => {
                let params = self.params(params)?;
                self.run_between(src, dst, |src, dst| collide_cells(&params, src, dst))
            }
            KernelBindings::Streaming { params, src, dst } => {
                let params = self.params(params)?;
                self.run_between(src, dst, |src, dst| stream_cells(&params, src, dst))
            }
            KernelBindings::Paint { params, lattice, field } => {
                let params = self.params(params)?;
                let mut field_words = std::mem::take(&mut self.buffers[field.0].words);
                let result = self.with_lattice(lattice, &params, |cells| {
                    paint_cells(cells, bytemuck::cast_slice_mut(&mut field_words));
                });
                self.buffers[field.0].words = field_words;
                result
            }
            KernelBindings::Velocity { params, lattice, stroke } => {
                let params = self.params(params)?;
                let stroke: VelocityStroke =
                    bytemuck::pod_read_unaligned(bytemuck::cast_slice(&self.buffer(stroke)?.words));
                self.with_lattice(lattice, &params, |cells| apply_stroke(&params, cells, &stroke))
            }
        }
    }

    fn with_lattice(
        &mut self,
        lattice: BufferId,
        params: &SimParams,
        kernel: impl FnOnce(&mut [LatticeCell]),
    ) -> Result<()> {
        let cells: &mut [LatticeCell] = bytemuck::cast_slice_mut(&mut self.buffers[lattice.0].words);
        check_extent(params, cells.len())?;
        kernel(cells);
        Ok(())
    }

    fn run_between(
        &mut self,
        src: BufferId,
        dst: BufferId,
        kernel: impl FnOnce(&[LatticeCell], &mut [LatticeCell]) -> Result<()>,
    ) -> Result<()> {
        let mut out = std::mem::take(&mut self.buffers[dst.0].words);
        let result = kernel(
            bytemuck::cast_slice(&self.buffers[src.0].words),
            bytemuck::cast_slice_mut(&mut out),
        );
        self.buffers[dst.0].words = out;
        result
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn create_buffer(&mut self, label: &str, kind: BufferKind, contents: &[u8]) -> Result<BufferId> {
        if contents.is_empty() || contents.len() % 4 != 0 {
            bail!("buffer '{}' must be a non-empty multiple of 4 bytes, got {}", label, contents.len());
        }
        self.buffers.push(HostBuffer {
            label: label.to_string(),
            kind,
            words: bytemuck::pod_collect_to_vec(contents),
        });
        Ok(BufferId(self.buffers.len() - 1))
    }

    fn write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<()> {
        let target = self
            .buffers
            .get_mut(buffer.0)
            .with_context(|| format!("unknown buffer {:?}", buffer))?;
        if data.len() % 4 != 0 || data.len() > target.byte_len() {
            bail!("write of {} bytes does not fit buffer '{}'", data.len(), target.label);
        }
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut target.words);
        bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId) -> Result<Vec<u8>> {
        Ok(bytemuck::cast_slice(&self.buffer(buffer)?.words).to_vec())
    }

    fn create_bindings(&mut self, bindings: KernelBindings) -> Result<BindingsId> {
        let record = std::mem::size_of::<SimParams>();
        match bindings {
            KernelBindings::Collision { params, src, dst }
            | KernelBindings::Streaming { params, src, dst } => {
                self.expect_record(params, record)?;
                if src == dst {
                    bail!("{:?} must read and write different buffers", bindings.kernel());
                }
                if self.expect_lattice(src)? != self.expect_lattice(dst)? {
                    bail!("{:?} source and destination differ in size", bindings.kernel());
                }
            }
            KernelBindings::Paint { params, lattice, field } => {
                self.expect_record(params, record)?;
                let cells = self.expect_lattice(lattice)?;
                let field_len = self.expect_kind(field, BufferKind::Storage)?.words.len();
                if field_len != cells {
                    bail!("injection field has {} entries for {} cells", field_len, cells);
                }
            }
            KernelBindings::Velocity { params, lattice, stroke } => {
                self.expect_record(params, record)?;
                self.expect_lattice(lattice)?;
                self.expect_record(stroke, std::mem::size_of::<VelocityStroke>())?;
            }
        }
        self.bindings.push(bindings);
        Ok(BindingsId(self.bindings.len() - 1))
    }

    fn submit(&mut self, frame: Frame) -> Result<()> {
        for command in frame.commands() {
            match *command {
                Command::Dispatch { kernel, bindings, .. } => {
                    let bound = *self
                        .bindings
                        .get(bindings.0)
                        .with_context(|| format!("unknown bindings {:?}", bindings))?;
                    if bound.kernel() != kernel {
                        bail!("{:?} dispatched with bindings for {:?}", kernel, bound.kernel());
                    }
                    self.execute(bound)?;
                    self.executed.push(kernel);
                }
                Command::ClearBuffer { buffer } => {
                    let target = self
                        .buffers
                        .get_mut(buffer.0)
                        .with_context(|| format!("unknown buffer {:?}", buffer))?;
                    target.words.fill(0);
                }
            }
        }
        debug!("CPU frame executed {} commands", frame.commands().len());
        Ok(())
    }
}

fn check_extent(params: &SimParams, cells: usize) -> Result<()> {
    let expected = Grid::new(params.width, params.height).cell_count();
    if expected != cells {
        bail!("parameters describe {} cells but the lattice holds {}", expected, cells);
    }
    Ok(())
}

/// BGK collision: `dst = src + omega * (feq - src)` per cell.
pub fn collide_cells(params: &SimParams, src: &[LatticeCell], dst: &mut [LatticeCell]) -> Result<()> {
    check_extent(params, src.len())?;
    for (out, cell) in dst.iter_mut().zip(src) {
        let mut cell = *cell;
        cell.collide(params.omega);
        *out = cell;
    }
    Ok(())
}

/// Pull streaming with periodic wrap on both axes.
pub fn stream_cells(params: &SimParams, src: &[LatticeCell], dst: &mut [LatticeCell]) -> Result<()> {
    check_extent(params, src.len())?;
    let grid = Grid::new(params.width, params.height);
    let (w, h) = (grid.width as i64, grid.height as i64);

    for y in 0..grid.height {
        for x in 0..grid.width {
            let mut cell = LatticeCell { f: [0.0; 9], rho: 0.0, velocity: [0.0; 2] };
            for i in 0..D2Q9::Q {
                let c = D2Q9::VELOCITIES[i];
                let sx = (x as i64 - c[0] as i64).rem_euclid(w) as u32;
                let sy = (y as i64 - c[1] as i64).rem_euclid(h) as u32;
                cell.f[i] = src[grid.index(sx, sy)].f[i];
            }
            cell.update_macroscopic();
            dst[grid.index(x, y)] = cell;
        }
    }
    Ok(())
}

/// Reset every cell with a nonzero field entry to equilibrium at that
/// density, keeping its velocity, and consume the entry.
pub fn paint_cells(lattice: &mut [LatticeCell], field: &mut [f32]) {
    for (cell, value) in lattice.iter_mut().zip(field.iter_mut()) {
        if *value != 0.0 {
            *cell = LatticeCell::new_equilibrium(*value, cell.velocity);
            *value = 0.0;
        }
    }
}

/// Add momentum to every cell within `radius` of the stroke segment,
/// fading linearly with distance. Mass is preserved.
pub fn apply_stroke(params: &SimParams, lattice: &mut [LatticeCell], stroke: &VelocityStroke) {
    let start = Vector2::new(stroke.start_x, stroke.start_y);
    let end = Vector2::new(stroke.end_x, stroke.end_y);
    let segment = end - start;
    let length_squared = segment.norm_squared();
    if stroke.strength == 0.0 || stroke.radius <= 0.0 || length_squared == 0.0 {
        return;
    }
    let direction = segment / length_squared.sqrt();
    let grid = Grid::new(params.width, params.height);

    for y in 0..grid.height {
        for x in 0..grid.width {
            let p = Vector2::new(x as f32, y as f32);
            let t = ((p - start).dot(&segment) / length_squared).clamp(0.0, 1.0);
            let distance = (p - (start + segment * t)).norm();
            if distance >= stroke.radius {
                continue;
            }

            let cell = &mut lattice[grid.index(x, y)];
            let (rho, velocity) = moments(&cell.f);
            if rho <= MIN_DENSITY {
                continue;
            }
            let boost = direction * (stroke.strength * (1.0 - distance / stroke.radius));
            let boosted = [velocity[0] + boost.x, velocity[1] + boost.y];

            let before = equilibrium(rho, velocity);
            let after = equilibrium(rho, boosted);
            for i in 0..D2Q9::Q {
                cell.f[i] += after[i] - before[i];
            }
            cell.rho = rho;
            cell.velocity = boosted;
        }
    }
}

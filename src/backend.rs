//! Accelerator seam.
//!
//! Components never talk to a device directly. They allocate buffers and
//! pre-built binding sets through [`ComputeBackend`], and record their
//! dispatches into a [`Frame`], which the backend executes as one ordered
//! submission. Two implementations exist: [`crate::gpu::GPUContext`] (wgpu)
//! and [`crate::cpu::CpuBackend`] (host reference kernels).

use anyhow::Result;

/// Handle to a buffer owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

/// Handle to a pre-built binding set for one kernel entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingsId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Small read-only records (parameters, velocity stroke)
    Uniform,
    /// Lattice buffers and the injection field
    Storage,
}

/// Kernel entry points exposed by the compute collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Collision,
    Streaming,
    Paint,
    Velocity,
}

impl Kernel {
    pub fn entry_point(&self) -> &'static str {
        match self {
            Kernel::Collision => "collision",
            Kernel::Streaming => "streaming",
            Kernel::Paint => "paint",
            Kernel::Velocity => "velocity",
        }
    }
}

/// Buffers bound to one kernel entry point, by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelBindings {
    Collision { params: BufferId, src: BufferId, dst: BufferId },
    Streaming { params: BufferId, src: BufferId, dst: BufferId },
    Paint { params: BufferId, lattice: BufferId, field: BufferId },
    Velocity { params: BufferId, lattice: BufferId, stroke: BufferId },
}

impl KernelBindings {
    pub fn kernel(&self) -> Kernel {
        match self {
            KernelBindings::Collision { .. } => Kernel::Collision,
            KernelBindings::Streaming { .. } => Kernel::Streaming,
            KernelBindings::Paint { .. } => Kernel::Paint,
            KernelBindings::Velocity { .. } => Kernel::Velocity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Dispatch {
        kernel: Kernel,
        bindings: BindingsId,
        workgroups: [u32; 2],
    },
    ClearBuffer {
        buffer: BufferId,
    },
}

/// One ordered unit of work, submitted atomically.
///
/// Commands run in recorded order; each observes everything written by the
/// commands before it.
#[derive(Debug, Default)]
pub struct Frame {
    commands: Vec<Command>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, kernel: Kernel, bindings: BindingsId, workgroups: [u32; 2]) {
        self.commands.push(Command::Dispatch { kernel, bindings, workgroups });
    }

    pub fn clear_buffer(&mut self, buffer: BufferId) {
        self.commands.push(Command::ClearBuffer { buffer });
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Kernels dispatched by this frame, in order.
    pub fn kernels(&self) -> Vec<Kernel> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Dispatch { kernel, .. } => Some(*kernel),
                Command::ClearBuffer { .. } => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A device that can hold buffers and run the LBM kernels.
pub trait ComputeBackend {
    fn name(&self) -> &str;

    fn create_buffer(&mut self, label: &str, kind: BufferKind, contents: &[u8]) -> Result<BufferId>;

    /// Queue write; lands before the next submitted frame executes.
    fn write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<()>;

    /// Blocking readback of a whole buffer.
    fn read_buffer(&mut self, buffer: BufferId) -> Result<Vec<u8>>;

    fn create_bindings(&mut self, bindings: KernelBindings) -> Result<BindingsId>;

    fn submit(&mut self, frame: Frame) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_keeps_recorded_order() {
        let mut frame = Frame::new();
        assert!(frame.is_empty());

        frame.dispatch(Kernel::Velocity, BindingsId(3), [1, 1]);
        frame.clear_buffer(BufferId(7));
        frame.dispatch(Kernel::Collision, BindingsId(0), [2, 2]);
        frame.dispatch(Kernel::Streaming, BindingsId(1), [2, 2]);

        assert_eq!(frame.kernels(), vec![Kernel::Velocity, Kernel::Collision, Kernel::Streaming]);
        assert_eq!(frame.commands()[1], Command::ClearBuffer { buffer: BufferId(7) });
    }

    #[test]
    fn bindings_name_their_entry_point() {
        let bindings = KernelBindings::Streaming {
            params: BufferId(0),
            src: BufferId(2),
            dst: BufferId(1),
        };
        assert_eq!(bindings.kernel(), Kernel::Streaming);
        assert_eq!(bindings.kernel().entry_point(), "streaming");
    }
}

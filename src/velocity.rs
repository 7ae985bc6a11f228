use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use log::{debug, trace};
use nalgebra::Vector2;
use crate::{
    backend::{BindingsId, BufferId, BufferKind, ComputeBackend, Frame, Kernel, KernelBindings},
    lattice::Grid,
    Float,
};

/// One-shot momentum stroke read by the velocity kernel.
///
/// Layout: `[startX, startY, endX, endY, strength, radius]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct VelocityStroke {
    pub start_x: f32,
    pub start_y: f32,
    pub end_x: f32,
    pub end_y: f32,
    pub strength: f32,
    pub radius: f32,
}

/// Response of the injector to pointer motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeTuning {
    /// Motion below this distance (grid units) is ignored
    pub min_motion: Float,
    /// Strength per grid unit of motion
    pub gain: Float,
    /// Strength cap
    pub max_strength: Float,
    /// Width of the stroke
    pub radius: Float,
}

impl Default for StrokeTuning {
    fn default() -> Self {
        Self {
            min_motion: 1.0,
            gain: 0.005,
            max_strength: 0.6,
            radius: 50.0,
        }
    }
}

impl StrokeTuning {
    pub fn strength(&self, distance: Float) -> Float {
        (distance * self.gain).min(self.max_strength)
    }
}

/// Turns pointer drags into velocity strokes, at most one per step.
///
/// Pointer samples land in a single slot that each new sample overwrites;
/// `apply` consumes it once per frame.
pub struct VelocityInjector {
    grid: Grid,
    tuning: StrokeTuning,
    stroke_buffer: BufferId,
    bindings: BindingsId,
    last: Option<Vector2<Float>>,
    current: Option<Vector2<Float>>,
}

impl VelocityInjector {
    pub fn new<B: ComputeBackend>(
        backend: &mut B,
        grid: Grid,
        tuning: StrokeTuning,
        params: BufferId,
        lattice: BufferId,
    ) -> Result<Self> {
        let stroke_buffer = backend.create_buffer(
            "Velocity Input Buffer",
            BufferKind::Uniform,
            bytemuck::bytes_of(&VelocityStroke::zeroed()),
        )?;
        let bindings = backend.create_bindings(KernelBindings::Velocity {
            params,
            lattice,
            stroke: stroke_buffer,
        })?;

        Ok(Self {
            grid,
            tuning,
            stroke_buffer,
            bindings,
            last: None,
            current: None,
        })
    }

    /// Store the latest pointer position.
    ///
    /// With no anchor from the previous step, the pending sample becomes the
    /// anchor, so a drag that starts between two steps still yields a stroke.
    pub fn record_pointer(&mut self, x: Float, y: Float) {
        if self.last.is_none() {
            self.last = self.current;
        }
        self.current = Some(Vector2::new(x, y));
    }

    /// Publish and record a stroke if the pointer moved far enough.
    ///
    /// The stroke record is cleared inside the same frame right after the
    /// dispatch, so it is all zero before the next frame begins.
    pub fn apply<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
        frame: &mut Frame,
    ) -> Result<Option<VelocityStroke>> {
        let current = self.current.take();
        let last = std::mem::replace(&mut self.last, current);

        let (start, end) = match (last, current) {
            (Some(start), Some(end)) => (start, end),
            _ => return Ok(None),
        };

        let distance = (end - start).norm();
        if distance < self.tuning.min_motion {
            trace!("Pointer moved {:.3}, below threshold", distance);
            return Ok(None);
        }

        let stroke = VelocityStroke {
            start_x: start.x,
            start_y: start.y,
            end_x: end.x,
            end_y: end.y,
            strength: self.tuning.strength(distance),
            radius: self.tuning.radius,
        };
        backend.write_buffer(self.stroke_buffer, bytemuck::bytes_of(&stroke))?;
        frame.dispatch(Kernel::Velocity, self.bindings, self.grid.workgroups());
        frame.clear_buffer(self.stroke_buffer);

        debug!("Velocity stroke {:?}", stroke);
        Ok(Some(stroke))
    }

    /// Forget the anchor and any pending sample.
    pub fn clear_pointer(&mut self) {
        self.last = None;
        self.current = None;
    }

    pub fn stroke_buffer(&self) -> BufferId {
        self.stroke_buffer
    }
}

use wgpu::util::DeviceExt;
use anyhow::{bail, Context, Result};
use log::{debug, info};
use crate::backend::{BindingsId, BufferId, BufferKind, Command, ComputeBackend, Frame, Kernel, KernelBindings};

const SIMULATE_SHADER: &str = concat!(include_str!("shaders/common.wgsl"), include_str!("shaders/simulate.wgsl"));
const PAINT_SHADER: &str = concat!(include_str!("shaders/common.wgsl"), include_str!("shaders/paint.wgsl"));
const VELOCITY_SHADER: &str = concat!(include_str!("shaders/common.wgsl"), include_str!("shaders/velocity.wgsl"));

struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

/// wgpu implementation of [`ComputeBackend`].
pub struct GPUContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,

    // Compute pipelines
    collision_pipeline: wgpu::ComputePipeline,
    streaming_pipeline: wgpu::ComputePipeline,
    paint_pipeline: wgpu::ComputePipeline,
    velocity_pipeline: wgpu::ComputePipeline,

    // Bind group layouts
    simulate_layout: wgpu::BindGroupLayout,
    paint_layout: wgpu::BindGroupLayout,
    velocity_layout: wgpu::BindGroupLayout,

    buffers: Vec<GpuBuffer>,
    bind_groups: Vec<(Kernel, wgpu::BindGroup)>,
}

impl GPUContext {
    /// Acquire an adapter and device and build all pipelines.
    ///
    /// Fails before any simulation component exists if no adapter is available.
    pub async fn new() -> Result<Self> {
        // Initialize WGPU
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .context("no suitable GPU adapter")?;

        // Log GPU information for debugging
        let adapter_info = adapter.get_info();
        info!("GPU Adapter Selected: {} ({:?}, {:?}, {:?})",
              adapter_info.name, adapter_info.vendor, adapter_info.device_type, adapter_info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    label: Some("LBM Device"),
                    memory_hints: wgpu::MemoryHints::Performance,
                    ..Default::default()
                },
            )
            .await
            .context("failed to create GPU device")?;

        // Collision and streaming: params, read-only source, read-write destination
        let simulate_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Simulate Bind Group Layout"),
            entries: &[uniform_entry(0), storage_entry(1, true), storage_entry(2, false)],
        });

        // Paint: params, lattice, user input field (consumed by the kernel)
        let paint_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Paint Bind Group Layout"),
            entries: &[uniform_entry(0), storage_entry(1, false), storage_entry(2, false)],
        });

        // Velocity: params, lattice, stroke record
        let velocity_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Velocity Bind Group Layout"),
            entries: &[uniform_entry(0), storage_entry(1, false), uniform_entry(2)],
        });

        let simulate_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Simulate Shader"),
            source: wgpu::ShaderSource::Wgsl(SIMULATE_SHADER.into()),
        });

        let paint_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Paint Shader"),
            source: wgpu::ShaderSource::Wgsl(PAINT_SHADER.into()),
        });

        let velocity_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Velocity Shader"),
            source: wgpu::ShaderSource::Wgsl(VELOCITY_SHADER.into()),
        });

        let collision_pipeline = create_pipeline(&device, &simulate_layout, &simulate_shader, Kernel::Collision);
        let streaming_pipeline = create_pipeline(&device, &simulate_layout, &simulate_shader, Kernel::Streaming);
        let paint_pipeline = create_pipeline(&device, &paint_layout, &paint_shader, Kernel::Paint);
        let velocity_pipeline = create_pipeline(&device, &velocity_layout, &velocity_shader, Kernel::Velocity);

        Ok(Self {
            device,
            queue,
            adapter_name: adapter_info.name,
            collision_pipeline,
            streaming_pipeline,
            paint_pipeline,
            velocity_pipeline,
            simulate_layout,
            paint_layout,
            velocity_layout,
            buffers: Vec::new(),
            bind_groups: Vec::new(),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn buffer(&self, id: BufferId) -> Result<&GpuBuffer> {
        self.buffers
            .get(id.0)
            .with_context(|| format!("unknown buffer {:?}", id))
    }

    fn pipeline(&self, kernel: Kernel) -> &wgpu::ComputePipeline {
        match kernel {
            Kernel::Collision => &self.collision_pipeline,
            Kernel::Streaming => &self.streaming_pipeline,
            Kernel::Paint => &self.paint_pipeline,
            Kernel::Velocity => &self.velocity_pipeline,
        }
    }
}

impl ComputeBackend for GPUContext {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_buffer(&mut self, label: &str, kind: BufferKind, contents: &[u8]) -> Result<BufferId> {
        if contents.is_empty() || contents.len() % 4 != 0 {
            bail!("buffer '{}' must be a non-empty multiple of 4 bytes, got {}", label, contents.len());
        }
        let usage = match kind {
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
            BufferKind::Storage => wgpu::BufferUsages::STORAGE,
        } | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;

        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        });
        self.buffers.push(GpuBuffer {
            buffer,
            size: contents.len() as u64,
        });
        Ok(BufferId(self.buffers.len() - 1))
    }

    fn write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<()> {
        let target = self.buffer(buffer)?;
        if data.len() as u64 > target.size || data.len() % 4 != 0 {
            bail!("write of {} bytes does not fit buffer of {} bytes", data.len(), target.size);
        }
        self.queue.write_buffer(&target.buffer, 0, data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId) -> Result<Vec<u8>> {
        let source = self.buffer(buffer)?;
        let size = source.size;

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Copy Encoder"),
        });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging_buffer, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        self.device.poll(wgpu::PollType::Wait)?;
        pollster::block_on(receiver)??;

        let data = buffer_slice.get_mapped_range();
        let result = data.to_vec();

        drop(data);
        staging_buffer.unmap();

        Ok(result)
    }

    fn create_bindings(&mut self, bindings: KernelBindings) -> Result<BindingsId> {
        let (layout, entries) = match bindings {
            KernelBindings::Collision { params, src, dst }
            | KernelBindings::Streaming { params, src, dst } => {
                if src == dst {
                    bail!("{:?} must read and write different buffers", bindings.kernel());
                }
                (&self.simulate_layout, [params, src, dst])
            }
            KernelBindings::Paint { params, lattice, field } => (&self.paint_layout, [params, lattice, field]),
            KernelBindings::Velocity { params, lattice, stroke } => (&self.velocity_layout, [params, lattice, stroke]),
        };

        let resources = entries
            .iter()
            .map(|id| self.buffer(*id).map(|b| b.buffer.as_entire_binding()))
            .collect::<Result<Vec<_>>>()?;
        let entries: Vec<wgpu::BindGroupEntry> = resources
            .into_iter()
            .enumerate()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource,
            })
            .collect();

        let label = format!("{:?} Bind Group", bindings.kernel());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&label),
            layout,
            entries: &entries,
        });

        self.bind_groups.push((bindings.kernel(), bind_group));
        Ok(BindingsId(self.bind_groups.len() - 1))
    }

    fn submit(&mut self, frame: Frame) -> Result<()> {
        let start_time = std::time::Instant::now();

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("LBM Frame Encoder"),
        });

        // Each command gets its own pass; wgpu orders passes and inserts the
        // barriers between them.
        for command in frame.commands() {
            match *command {
                Command::Dispatch { kernel, bindings, workgroups } => {
                    let (bound, bind_group) = self
                        .bind_groups
                        .get(bindings.0)
                        .with_context(|| format!("unknown bindings {:?}", bindings))?;
                    if *bound != kernel {
                        bail!("{:?} dispatched with bindings for {:?}", kernel, bound);
                    }

                    let label = format!("{:?} Pass", kernel);
                    let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(&label),
                        timestamp_writes: None,
                    });
                    compute_pass.set_pipeline(self.pipeline(kernel));
                    compute_pass.set_bind_group(0, bind_group, &[]);
                    compute_pass.dispatch_workgroups(workgroups[0], workgroups[1], 1);
                }
                Command::ClearBuffer { buffer } => {
                    encoder.clear_buffer(&self.buffer(buffer)?.buffer, 0, None);
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));

        // Wait for GPU operations to complete this frame
        self.device.poll(wgpu::PollType::Wait)?;

        let elapsed = start_time.elapsed();
        if elapsed.as_millis() > 10 { // Only log slow frames
            debug!("GPU frame took: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
        }

        Ok(())
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    kernel: Kernel,
) -> wgpu::ComputePipeline {
    let label = format!("{:?} Pipeline", kernel);
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&label),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some(kernel.entry_point()),
        compilation_options: Default::default(),
        cache: None,
    })
}

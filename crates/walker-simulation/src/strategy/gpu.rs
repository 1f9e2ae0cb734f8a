//! GPU-offloaded walk
//!
//! The voxel grid is uploaded once as a bit-packed storage buffer. Walkers
//! stay resident on the device when they fit in one block; larger
//! populations are streamed through the device block by block every batch.
//! Per-sub-step magnetization is summed with fixed-point atomics and
//! converted back to floating point after each batch.

use super::{LatticeInputs, StrategyKind, WalkStrategy};
use crate::error::{DeviceError, SimulationError};
use crate::params::WalkParams;
use crate::seed::batch_seeds;
use bytemuck::Pod;
use rand::rngs::StdRng;
use std::sync::mpsc;
use walker_physics::{Walker, BATCH_STEPS};
use wgpu::util::DeviceExt;

/// Largest number of walkers held on the device at once
pub const GPU_WALKER_BLOCK: usize = 1 << 20;

/// Fixed-point scale of the magnetization sums (matches `FIXED_SCALE` in walk.wgsl)
const FIXED_SCALE: f64 = (1u64 << 24) as f64;

const WORKGROUP_SIZE: u32 = 256;

/// Env var restricting the wgpu backend (`vulkan`, `metal`, `dx12`, `gl`)
pub const BACKEND_ENV: &str = "NMR_WALK_WGPU_BACKEND";

fn create_instance() -> wgpu::Instance {
    let backends = match std::env::var(BACKEND_ENV).as_deref() {
        Ok("vulkan") => wgpu::Backends::VULKAN,
        Ok("metal") => wgpu::Backends::METAL,
        Ok("dx12") => wgpu::Backends::DX12,
        Ok("gl") => wgpu::Backends::GL,
        _ => wgpu::Backends::all(),
    };
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    })
}

/// Headless device and queue
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
}

impl GpuContext {
    pub fn new() -> Result<Self, DeviceError> {
        pollster::block_on(Self::request())
    }

    async fn request() -> Result<Self, DeviceError> {
        let instance = create_instance();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| DeviceError::NoAdapter(e.to_string()))?;

        let adapter_name = adapter.get_info().name;
        log::info!("✓ Using GPU: {adapter_name}");

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Walk Device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| DeviceError::DeviceCreation(e.to_string()))?;

        Ok(Self {
            device,
            queue,
            adapter_name,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn check_storage_size(&self, what: &'static str, requested: u64) -> Result<(), DeviceError> {
        let limits = self.device.limits();
        let limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        if requested > limit {
            return Err(DeviceError::BufferTooLarge {
                what,
                requested,
                limit,
            });
        }
        Ok(())
    }

    fn push_scopes(&self) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
    }

    fn pop_scopes(&self) -> Result<(), DeviceError> {
        let validation = pollster::block_on(self.device.pop_error_scope());
        let memory = pollster::block_on(self.device.pop_error_scope());
        match validation.or(memory) {
            Some(e) => Err(DeviceError::Validation(e.to_string())),
            None => Ok(()),
        }
    }

    /// Map `staging` and copy its first `bytes` out. Blocks until the GPU is done.
    fn read_staging<T: Pod>(&self, staging: &wgpu::Buffer, bytes: u64) -> Result<Vec<T>, DeviceError> {
        let slice = staging.slice(..bytes);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| DeviceError::Readback(e.to_string()))?;
        rx.recv()
            .map_err(|e| DeviceError::Readback(e.to_string()))?
            .map_err(|e| DeviceError::Readback(e.to_string()))?;
        let data = {
            let view = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, T>(&view).to_vec()
        };
        staging.unmap();
        Ok(data)
    }
}

pub struct GpuWalkStrategy {
    context: GpuContext,
    dimension: u32,
    params: WalkParams,

    // Buffers
    walker_buffer: wgpu::Buffer,
    seed_buffer: wgpu::Buffer,
    _grid_buffer: wgpu::Buffer,
    sums_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    walker_staging: wgpu::Buffer,
    sums_staging: wgpu::Buffer,

    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,

    /// Walkers fit in one block and live on the device between batches
    resident: bool,
    /// Device copy is newer than the host array (resident mode only)
    host_stale: bool,
}

impl GpuWalkStrategy {
    pub fn new(
        context: GpuContext,
        lattice: LatticeInputs,
        walker_count: usize,
    ) -> Result<Self, SimulationError> {
        log::info!("Initializing GpuWalkStrategy...");
        let device = &context.device;
        let dimensions = lattice.grid.dimensions();

        if lattice.grid.voxel_count() > u32::MAX as u64 {
            return Err(DeviceError::BufferTooLarge {
                what: "voxel index",
                requested: lattice.grid.voxel_count(),
                limit: u32::MAX as u64,
            }
            .into());
        }

        let mut words = lattice.grid.solid_words();
        if words.is_empty() {
            words.push(0);
        }
        let grid_bytes = (words.len() * std::mem::size_of::<u32>()) as u64;
        context.check_storage_size("voxel grid", grid_bytes)?;

        let block = walker_count.clamp(1, GPU_WALKER_BLOCK);
        let walker_bytes = (block * std::mem::size_of::<Walker>()) as u64;
        context.check_storage_size("walker block", walker_bytes)?;
        let seed_bytes = (block * std::mem::size_of::<u32>()) as u64;
        let sums_bytes = (2 * BATCH_STEPS * std::mem::size_of::<u32>()) as u64;
        let params = WalkParams::new(dimensions, lattice.dimension, &lattice.dephasing);

        context.push_scopes();
        let grid_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Voxel Grid Buffer"),
            contents: bytemuck::cast_slice(&words),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let walker_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Walker Buffer"),
            size: walker_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let seed_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Seed Buffer"),
            size: seed_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Layout: [lo, hi] per sub-step, 64-bit fixed point
        let sums_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Magnetization Sums Buffer"),
            size: sums_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Walk Params Buffer"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let walker_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Walker Staging Buffer"),
            size: walker_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sums_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sums Staging Buffer"),
            size: sums_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Walk Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/walk.wgsl").into()),
        });

        // 0: walkers (rw), 1: seeds, 2: solid words, 3: sums (atomic), 4: params
        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Walk Bind Group Layout"),
                entries: &[
                    storage(0, false),
                    storage(1, true),
                    storage(2, true),
                    storage(3, false),
                    wgpu::BindGroupLayoutEntry {
                        binding: 4,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Walk Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Walk Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Walk Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: walker_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: seed_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: grid_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: sums_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        context.pop_scopes()?;

        log::info!(
            "Walk pipeline ready: grid {}x{}x{}, block {} walkers",
            dimensions.x,
            dimensions.y,
            dimensions.z,
            block
        );

        Ok(Self {
            context,
            dimension: lattice.dimension,
            params,
            walker_buffer,
            seed_buffer,
            _grid_buffer: grid_buffer,
            sums_buffer,
            params_buffer,
            walker_staging,
            sums_staging,
            pipeline,
            bind_group,
            resident: walker_count <= GPU_WALKER_BLOCK,
            host_stale: false,
        })
    }

    fn upload_walkers(&self, walkers: &[Walker]) {
        self.context
            .queue
            .write_buffer(&self.walker_buffer, 0, bytemuck::cast_slice(walkers));
    }

    fn download_walkers(&self, walkers: &mut [Walker]) -> Result<(), DeviceError> {
        let bytes = std::mem::size_of_val(walkers) as u64;
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Walker Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.walker_buffer, 0, &self.walker_staging, 0, bytes);
        self.context.queue.submit(std::iter::once(encoder.finish()));
        let data: Vec<Walker> = self.context.read_staging(&self.walker_staging, bytes)?;
        walkers.copy_from_slice(&data);
        Ok(())
    }

    /// Walk one block of walkers already on the device, adding its sums
    fn walk_block(
        &self,
        walker_count: usize,
        seeds: &[u32],
        steps: usize,
        sums: &mut [f64],
    ) -> Result<(), DeviceError> {
        let device = &self.context.device;
        let queue = &self.context.queue;
        let params = self.params.with_batch(walker_count as u32, steps as u32);
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        queue.write_buffer(&self.seed_buffer, 0, bytemuck::cast_slice(seeds));

        let sums_bytes = (2 * steps * std::mem::size_of::<u32>()) as u64;
        self.context.push_scopes();
        {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Walk Encoder"),
            });
            encoder.clear_buffer(&self.sums_buffer, 0, None);
            {
                let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Walk Compute Pass"),
                    timestamp_writes: None,
                });
                compute_pass.set_pipeline(&self.pipeline);
                compute_pass.set_bind_group(0, &self.bind_group, &[]);
                compute_pass.dispatch_workgroups(
                    (walker_count as u32).div_ceil(WORKGROUP_SIZE),
                    1,
                    1,
                );
            }
            encoder.copy_buffer_to_buffer(&self.sums_buffer, 0, &self.sums_staging, 0, sums_bytes);
            queue.submit(std::iter::once(encoder.finish()));
        }
        self.context.pop_scopes()?;

        let words: Vec<u32> = self.context.read_staging(&self.sums_staging, sums_bytes)?;
        for (sum, pair) in sums.iter_mut().zip(words.chunks_exact(2)) {
            let fixed = pair[0] as u64 | (pair[1] as u64) << 32;
            *sum += fixed as f64 / FIXED_SCALE;
        }
        Ok(())
    }
}

impl WalkStrategy for GpuWalkStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Gpu {
            dimension: self.dimension,
        }
    }

    fn begin(&mut self, walkers: &[Walker], _run_seed: u64) -> Result<(), SimulationError> {
        if self.resident {
            self.upload_walkers(walkers);
            self.host_stale = false;
        }
        log::debug!(
            "gpu walk on {}: {} walkers, resident: {}",
            self.context.adapter_name(),
            walkers.len(),
            self.resident
        );
        Ok(())
    }

    fn advance_batch(
        &mut self,
        walkers: &mut [Walker],
        rng: &mut StdRng,
        steps: usize,
        sums: &mut [f64],
    ) -> Result<(), SimulationError> {
        let seeds = batch_seeds(rng, walkers.len());
        if self.resident {
            self.walk_block(walkers.len(), &seeds, steps, sums)?;
            self.host_stale = true;
            return Ok(());
        }
        for (block, block_seeds) in walkers
            .chunks_mut(GPU_WALKER_BLOCK)
            .zip(seeds.chunks(GPU_WALKER_BLOCK))
        {
            self.upload_walkers(block);
            self.walk_block(block.len(), block_seeds, steps, sums)?;
            self.download_walkers(block)?;
        }
        Ok(())
    }

    fn sync_walkers(&mut self, walkers: &mut [Walker]) -> Result<(), SimulationError> {
        if self.host_stale {
            self.download_walkers(walkers)?;
            self.host_stale = false;
        }
        Ok(())
    }

    fn walkers_changed(&mut self, walkers: &[Walker]) -> Result<(), SimulationError> {
        if self.resident {
            self.upload_walkers(walkers);
            self.host_stale = false;
        }
        Ok(())
    }
}

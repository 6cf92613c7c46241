use bevy::log::{debug, info, warn};
use bevy::render::render_resource::{Texture, TextureView};
use bevy::render::renderer::{RenderDevice, RenderQueue};
use bevy::tasks::block_on;
use std::collections::HashMap;
use wgpu::util::DeviceExt;

use crate::error::{WireworldError, WireworldResult};
use crate::simulation::backend::{ComputeBackend, EdgeMode, SurfaceId};
use crate::simulation::compute_pipeline::{CELL_FORMAT, KernelParams, WireworldPipeline, workgroup_count};

/// Bytes per texel of a cell surface
const TEXEL_BYTES: u32 = 4;

/// Passes recorded before they are handed to the queue
pub const MAX_PENDING_PASSES: usize = 1024;

/// Device and queue the backend records into
enum GpuContext {
    /// Bevy's renderer; its systems can sample the surfaces directly
    Render { device: RenderDevice, queue: RenderQueue },
    /// A private device for headless runs and tests
    Standalone { device: wgpu::Device, queue: wgpu::Queue },
}

impl GpuContext {
    fn device(&self) -> &wgpu::Device {
        match self {
            Self::Render { device, .. } => device.wgpu_device(),
            Self::Standalone { device, .. } => device,
        }
    }

    fn queue(&self) -> &wgpu::Queue {
        match self {
            Self::Render { queue, .. } => {
                let queue: &wgpu::Queue = queue;
                queue
            }
            Self::Standalone { queue, .. } => queue,
        }
    }
}

/// A cell surface living on the GPU
struct GpuSurface {
    texture: Texture,
    view: TextureView,
    width: u32,
    height: u32,
}

/// Bind group plus the uniform buffer it references
struct PassBinding {
    bind_group: wgpu::BindGroup,
    _params: wgpu::Buffer,
}

/// Kernel host running the transition rule as a wgpu compute shader.
///
/// Passes queued with `dispatch` are recorded into one command encoder and
/// submitted together, at most [`MAX_PENDING_PASSES`] at a time. Reads and
/// writes submit pending passes first to keep ordering.
pub struct GpuBackend {
    context: GpuContext,
    adapter_info: Option<wgpu::AdapterInfo>,
    pipeline: Option<WireworldPipeline>,
    surfaces: HashMap<u32, GpuSurface>,
    next_id: u32,
    /// A simulation only ever alternates between two input/output pairings.
    bindings: HashMap<(u32, u32, EdgeMode), PassBinding>,
    pending: Vec<(SurfaceId, SurfaceId, EdgeMode)>,
}

impl GpuBackend {
    /// Run on bevy's render device so the renderer can read the front grid
    /// without a readback.
    pub fn from_render_device(device: RenderDevice, queue: RenderQueue) -> WireworldResult<Self> {
        let pipeline = WireworldPipeline::new(device.wgpu_device())?;
        info!("GPU backend sharing the render device");
        Ok(Self::with_context(GpuContext::Render { device, queue }, None, pipeline))
    }

    /// Request a private adapter and device and compile the kernel.
    pub fn new() -> WireworldResult<Self> {
        block_on(Self::new_async())
    }

    pub async fn new_async() -> WireworldResult<Self> {
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
            .ok_or_else(|| WireworldError::BackendResource("no GPU adapter found".to_string()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("wireworld_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|err| WireworldError::BackendResource(format!("failed to request device: {err}")))?;

        let adapter_info = adapter.get_info();
        info!("GPU backend using {} ({:?})", adapter_info.name, adapter_info.backend);

        let pipeline = WireworldPipeline::new(&device)?;

        Ok(Self::with_context(
            GpuContext::Standalone { device, queue },
            Some(adapter_info),
            pipeline,
        ))
    }

    fn with_context(context: GpuContext, adapter_info: Option<wgpu::AdapterInfo>, pipeline: WireworldPipeline) -> Self {
        Self {
            context,
            adapter_info,
            pipeline: Some(pipeline),
            surfaces: HashMap::new(),
            next_id: 0,
            bindings: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Adapter of a standalone device; `None` when sharing bevy's renderer.
    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        self.adapter_info.as_ref()
    }

    /// Passes recorded but not yet submitted.
    pub fn pending_passes(&self) -> usize {
        self.pending.len()
    }

    fn surface(&self, id: SurfaceId) -> WireworldResult<&GpuSurface> {
        self.surfaces
            .get(&id.0)
            .ok_or_else(|| WireworldError::BackendResource(format!("unknown {id}")))
    }

    /// Make sure a bind group exists for the `input -> output` pairing.
    fn prepare_binding(&mut self, input: SurfaceId, output: SurfaceId, edges: EdgeMode) -> WireworldResult<()> {
        let key = (input.0, output.0, edges);
        if self.bindings.contains_key(&key) {
            return Ok(());
        }

        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| WireworldError::BackendResource("kernel program released".to_string()))?;
        let source = self.surface(input)?;
        let target = self.surface(output)?;

        let params = KernelParams::new(target.width, target.height, edges).to_bytes()?;
        let device = self.context.device();
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("wireworld_params"),
            contents: &params,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = pipeline.create_bind_group(device, &source.view, &target.view, &params);
        self.bindings.insert(
            key,
            PassBinding {
                bind_group,
                _params: params,
            },
        );
        Ok(())
    }

    fn texel_copy<'a>(texture: &'a wgpu::Texture) -> wgpu::TexelCopyTextureInfo<'a> {
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &str {
        "gpu"
    }

    fn allocate(&mut self, width: u32, height: u32) -> WireworldResult<SurfaceId> {
        if width == 0 || height == 0 {
            return Err(WireworldError::InvalidDimensions { width, height });
        }

        let device = self.context.device();
        let max = device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(WireworldError::BackendResource(format!(
                "{width}x{height} exceeds the device texture limit of {max}"
            )));
        }

        // wgpu zero-initialises new textures, which is the all-empty grid.
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("wireworld_cells"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CELL_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = TextureView::from(texture.create_view(&wgpu::TextureViewDescriptor::default()));
        let texture = Texture::from(texture);

        let id = self.next_id;
        self.next_id += 1;
        self.surfaces.insert(
            id,
            GpuSurface {
                texture,
                view,
                width,
                height,
            },
        );
        debug!("Allocated GPU {} ({}x{})", SurfaceId(id), width, height);
        Ok(SurfaceId(id))
    }

    fn release(&mut self, surface: SurfaceId) {
        if !self.surfaces.contains_key(&surface.0) {
            return;
        }

        if self
            .pending
            .iter()
            .any(|(input, output, _)| *input == surface || *output == surface)
            && let Err(err) = self.submit()
        {
            warn!("Failed to flush passes before releasing {}: {}", surface, err);
        }

        self.bindings
            .retain(|(input, output, _), _| *input != surface.0 && *output != surface.0);
        // Dropped rather than destroyed: the renderer may still hold the view
        // for the frame in flight.
        self.surfaces.remove(&surface.0);
    }

    fn write(&mut self, surface: SurfaceId, cells: &[u8]) -> WireworldResult<()> {
        self.submit()?;

        let target = self.surface(surface)?;
        let expected = target.width as usize * target.height as usize;
        if cells.len() != expected {
            return Err(WireworldError::SizeMismatch {
                expected,
                actual: cells.len(),
            });
        }

        // Widen each cell byte to an R32Uint texel.
        let texels: Vec<u8> = cells
            .iter()
            .flat_map(|&cell| u32::from(cell).to_le_bytes())
            .collect();

        self.context.queue().write_texture(
            Self::texel_copy(&target.texture),
            &texels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(target.width * TEXEL_BYTES),
                rows_per_image: Some(target.height),
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read(&mut self, surface: SurfaceId) -> WireworldResult<Vec<u8>> {
        self.submit()?;

        let source = self.surface(surface)?;
        let unpadded_row_bytes = source.width * TEXEL_BYTES;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = unpadded_row_bytes.div_ceil(align) * align;

        let device = self.context.device();
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("wireworld_readback"),
            size: padded_row_bytes as u64 * source.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("wireworld_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            Self::texel_copy(&source.texture),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(source.height),
                },
            },
            wgpu::Extent3d {
                width: source.width,
                height: source.height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue().submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| WireworldError::BackendResource("readback channel closed".to_string()))?
            .map_err(|err| WireworldError::BackendResource(format!("readback failed: {err}")))?;

        let mut cells = Vec::with_capacity(source.width as usize * source.height as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded_row_bytes as usize) {
                cells.extend(
                    row[..unpadded_row_bytes as usize]
                        .chunks_exact(TEXEL_BYTES as usize)
                        .map(|texel| {
                            let value = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
                            u8::try_from(value).unwrap_or(0)
                        }),
                );
            }
        }
        staging.unmap();
        Ok(cells)
    }

    fn dispatch(&mut self, input: SurfaceId, output: SurfaceId, edges: EdgeMode) -> WireworldResult<()> {
        if input == output {
            return Err(WireworldError::BindingConflict(format!(
                "{input} cannot be both kernel input and output"
            )));
        }

        let (source, target) = (self.surface(input)?, self.surface(output)?);
        if source.width != target.width || source.height != target.height {
            return Err(WireworldError::SizeMismatch {
                expected: target.width as usize * target.height as usize,
                actual: source.width as usize * source.height as usize,
            });
        }

        self.prepare_binding(input, output, edges)?;
        self.pending.push((input, output, edges));
        if self.pending.len() >= MAX_PENDING_PASSES {
            self.submit()?;
        }
        Ok(())
    }

    fn submit(&mut self) -> WireworldResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let passes = std::mem::take(&mut self.pending);
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| WireworldError::BackendResource("kernel program released".to_string()))?;

        let mut encoder = self
            .context
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("wireworld_step_encoder"),
            });

        for (input, output, edges) in &passes {
            let binding = self
                .bindings
                .get(&(input.0, output.0, *edges))
                .ok_or_else(|| WireworldError::BackendResource(format!("no binding for {input} -> {output}")))?;
            let target = self
                .surfaces
                .get(&output.0)
                .ok_or_else(|| WireworldError::BackendResource(format!("unknown {output}")))?;
            let (groups_x, groups_y) = workgroup_count(target.width, target.height);

            // One pass per generation; wgpu orders the texture usages between passes.
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("wireworld_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &binding.bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }

        self.context.queue().submit(Some(encoder.finish()));
        debug!("Submitted {} GPU passes", passes.len());
        Ok(())
    }

    fn release_kernel(&mut self) {
        self.pending.clear();
        self.bindings.clear();
        self.pipeline = None;
    }

    fn texture_view(&self, surface: SurfaceId) -> Option<&TextureView> {
        self.surfaces.get(&surface.0).map(|s| &s.view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::rule;

    // Every test returns early when the machine has no usable adapter.
    fn backend() -> Option<GpuBackend> {
        GpuBackend::new().ok()
    }

    #[test]
    fn test_gpu_backend_name() {
        let Some(backend) = backend() else { return };
        assert_eq!(backend.name(), "gpu");
    }

    #[test]
    fn test_gpu_write_read_round_trip() {
        let Some(mut backend) = backend() else { return };
        // Width 70 forces padded readback rows.
        let (width, height) = (70u32, 3u32);
        let cells: Vec<u8> = (0..width * height)
            .map(|i| [0u8, 50, 100, 255][(i % 4) as usize])
            .collect();

        let surface = backend.allocate(width, height).unwrap();
        assert_eq!(backend.read(surface).unwrap(), vec![0; cells.len()]);
        backend.write(surface, &cells).unwrap();
        assert_eq!(backend.read(surface).unwrap(), cells);
    }

    #[test]
    fn test_gpu_matches_cpu_rule() {
        let Some(mut backend) = backend() else { return };
        let (width, height) = (19u32, 13u32);
        let cells: Vec<u8> = (0..width * height)
            .map(|i| match (i * 5 + i / 3) % 9 {
                0 => 255,
                1 => 100,
                2..=5 => 50,
                _ => 0,
            })
            .collect();

        for edges in [EdgeMode::Wrap, EdgeMode::Bounded] {
            let input = backend.allocate(width, height).unwrap();
            let output = backend.allocate(width, height).unwrap();
            backend.write(input, &cells).unwrap();
            backend.dispatch(input, output, edges).unwrap();
            backend.submit().unwrap();

            assert_eq!(
                backend.read(output).unwrap(),
                rule::evaluate_grid(&cells, width, height, edges)
            );
            backend.release(input);
            backend.release(output);
        }
    }

    #[test]
    fn test_gpu_pending_passes_stay_bounded() {
        let Some(mut backend) = backend() else { return };
        let a = backend.allocate(8, 8).unwrap();
        let b = backend.allocate(8, 8).unwrap();

        for pass in 0..(2 * MAX_PENDING_PASSES + 10) {
            let (input, output) = if pass % 2 == 0 { (a, b) } else { (b, a) };
            backend.dispatch(input, output, EdgeMode::Wrap).unwrap();
            assert!(backend.pending_passes() < MAX_PENDING_PASSES);
        }
        assert_eq!(backend.pending_passes(), 10);
        backend.submit().unwrap();
        assert_eq!(backend.pending_passes(), 0);
    }

    #[test]
    fn test_gpu_release_kernel_blocks_dispatch() {
        let Some(mut backend) = backend() else { return };
        let input = backend.allocate(4, 4).unwrap();
        let output = backend.allocate(4, 4).unwrap();
        backend.release_kernel();
        assert!(matches!(
            backend.dispatch(input, output, EdgeMode::Wrap),
            Err(WireworldError::BackendResource(_))
        ));
    }
}

use bevy::log::info;
use bevy::render::render_resource::{ShaderType, encase};
use bevy::tasks::block_on;
use std::borrow::Cow;

use crate::error::{WireworldError, WireworldResult};
use crate::simulation::backend::EdgeMode;

/// WGSL source of the transition kernel
pub const WIREWORLD_SHADER: &str = include_str!("../../assets/shaders/wireworld.wgsl");

/// Workgroup edge length; must match `@workgroup_size` in the shader
pub const WORKGROUP_SIZE: u32 = 8;

/// Cell surfaces hold one canonical byte per cell widened to `R32Uint`
pub const CELL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;

/// Uniform data for the kernel
#[derive(ShaderType, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct KernelParams {
    pub width: u32,
    pub height: u32,
    pub wrap_edges: u32,
    pub _padding: u32,
}

impl KernelParams {
    pub fn new(width: u32, height: u32, edges: EdgeMode) -> Self {
        Self {
            width,
            height,
            wrap_edges: u32::from(edges == EdgeMode::Wrap),
            _padding: 0,
        }
    }

    /// Encode with std140 layout for upload.
    pub fn to_bytes(self) -> WireworldResult<Vec<u8>> {
        let mut buffer = encase::UniformBuffer::new(Vec::<u8>::new());
        buffer
            .write(&self)
            .map_err(|err| WireworldError::BackendResource(format!("kernel params: {err}")))?;
        Ok(buffer.into_inner())
    }
}

/// Compiled kernel plus the layout its bind groups must follow
pub(crate) struct WireworldPipeline {
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub pipeline: wgpu::ComputePipeline,
}

impl WireworldPipeline {
    /// Compile the shader and build the compute pipeline.
    ///
    /// Validation failures are caught with an error scope and reported instead
    /// of panicking inside wgpu.
    pub fn new(device: &wgpu::Device) -> WireworldResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("wireworld_bind_group_layout"),
            entries: &[
                // Previous generation, read with textureLoad
                texture_2d_uint(0),
                // Next generation
                texture_storage_2d(1, CELL_FORMAT, wgpu::StorageTextureAccess::WriteOnly),
                // Kernel parameters
                uniform_buffer::<KernelParams>(2, false),
            ],
        });

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("wireworld.wgsl"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(WIREWORLD_SHADER)),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("wireworld_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("wireworld_pipeline"),
            layout: Some(&layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(err) = block_on(device.pop_error_scope()) {
            return Err(WireworldError::BackendResource(format!(
                "failed to build kernel program: {err}"
            )));
        }

        info!("Wireworld compute pipeline initialized");

        Ok(Self {
            bind_group_layout,
            pipeline,
        })
    }

    /// Bind group for one `input -> output` pass
    pub fn create_bind_group(
        &self,
        device: &wgpu::Device,
        input: &wgpu::TextureView,
        output: &wgpu::TextureView,
        params: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("wireworld_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(output),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }
}

/// Workgroups needed to cover a `width x height` grid
pub fn workgroup_count(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(WORKGROUP_SIZE), height.div_ceil(WORKGROUP_SIZE))
}

fn texture_2d_uint(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Uint,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn texture_storage_2d(
    binding: u32,
    format: wgpu::TextureFormat,
    access: wgpu::StorageTextureAccess,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access,
            format,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

fn uniform_buffer<T: ShaderType>(binding: u32, has_dynamic_offset: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset,
            min_binding_size: Some(T::min_size()),
        },
        count: None,
    }
}

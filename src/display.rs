//! Draws the front grid of a GPU simulation without reading it back.
//!
//! The main world binds the front grid and publishes its texture view in
//! [`GridDisplaySource`]. A render graph node then runs a small compute pass
//! that paints each cell in its palette color into the sprite's image.

use bevy::asset::weak_handle;
use bevy::color::ColorToComponents;
use bevy::prelude::*;
use bevy::render::extract_resource::{ExtractResource, ExtractResourcePlugin};
use bevy::render::render_asset::{RenderAssetUsages, RenderAssets};
use bevy::render::render_graph::{self, RenderGraph, RenderLabel};
use bevy::render::render_resource::binding_types::{texture_2d, texture_storage_2d, uniform_buffer};
use bevy::render::render_resource::*;
use bevy::render::renderer::{RenderContext, RenderDevice, RenderQueue};
use bevy::render::texture::GpuImage;
use bevy::render::{Render, RenderApp, RenderSet};

use crate::palette::Palette;
use crate::simulation::compute_pipeline::workgroup_count;

/// WGSL source of the display pass
pub const GRID_DISPLAY_SHADER: &str = include_str!("../assets/shaders/grid_display.wgsl");

const GRID_DISPLAY_SHADER_HANDLE: Handle<Shader> = weak_handle!("5b0e7a52-3c1f-4d8e-9a6b-2f4c8d1e7a90");

/// Storage-writable format of the sprite image
pub const DISPLAY_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Palette colors in linear space, as the display shader writes them
#[derive(ShaderType, Clone, Copy, Debug, Default, PartialEq)]
pub struct DisplayParams {
    pub empty: Vec4,
    pub wire: Vec4,
    pub head: Vec4,
    pub tail: Vec4,
}

impl From<&Palette> for DisplayParams {
    fn from(palette: &Palette) -> Self {
        let linear = |color: image::Rgba<u8>| {
            let [r, g, b, a] = color.0;
            LinearRgba::from(Srgba::rgba_u8(r, g, b, a)).to_vec4()
        };
        Self {
            empty: linear(palette.empty),
            wire: linear(palette.wire),
            head: linear(palette.head),
            tail: linear(palette.tail),
        }
    }
}

/// What the display node draws this frame
#[derive(Resource, Clone, Default, ExtractResource)]
pub struct GridDisplaySource {
    /// Front grid view; `None` skips the pass
    pub cells: Option<TextureView>,
    /// Sprite image the pass writes into
    pub target: Handle<Image>,
    pub size: UVec2,
    pub params: DisplayParams,
}

/// Blank image the display pass can write to.
pub fn display_image(width: u32, height: u32) -> Image {
    let mut image = Image::new(
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        vec![0u8; width as usize * height as usize * 4],
        DISPLAY_FORMAT,
        RenderAssetUsages::RENDER_WORLD,
    );
    image.texture_descriptor.usage =
        TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST;
    image
}

/// Render-world pipeline of the display pass
#[derive(Resource)]
struct GridDisplayPipeline {
    bind_group_layout: BindGroupLayout,
    pipeline: CachedComputePipelineId,
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
struct GridDisplayLabel;

fn prepare_display_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: ResMut<PipelineCache>,
    existing_pipeline: Option<Res<GridDisplayPipeline>>,
) {
    if existing_pipeline.is_some() {
        return;
    }

    let bind_group_layout = render_device.create_bind_group_layout(
        "grid_display_bind_group_layout",
        &BindGroupLayoutEntries::sequential(
            ShaderStages::COMPUTE,
            (
                // Front grid
                texture_2d(TextureSampleType::Uint),
                // Sprite image
                texture_storage_2d(DISPLAY_FORMAT, StorageTextureAccess::WriteOnly),
                uniform_buffer::<DisplayParams>(false),
            ),
        ),
    );

    let pipeline = pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
        label: Some("grid_display_pipeline".into()),
        layout: vec![bind_group_layout.clone()],
        push_constant_ranges: vec![],
        shader: GRID_DISPLAY_SHADER_HANDLE,
        shader_defs: vec![],
        entry_point: "main".into(),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(GridDisplayPipeline {
        bind_group_layout,
        pipeline,
    });
    info!("Grid display pipeline initialized");
}

struct GridDisplayNode;

impl render_graph::Node for GridDisplayNode {
    fn run(
        &self,
        _graph: &mut render_graph::RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> Result<(), render_graph::NodeRunError> {
        let (Some(source), Some(pipeline)) = (
            world.get_resource::<GridDisplaySource>(),
            world.get_resource::<GridDisplayPipeline>(),
        ) else {
            return Ok(());
        };
        let Some(cells) = &source.cells else {
            return Ok(());
        };

        let pipeline_cache = world.resource::<PipelineCache>();
        let Some(compute_pipeline) = pipeline_cache.get_compute_pipeline(pipeline.pipeline) else {
            return Ok(());
        };
        let gpu_images = world.resource::<RenderAssets<GpuImage>>();
        let Some(target) = gpu_images.get(&source.target) else {
            return Ok(());
        };

        let render_device = world.resource::<RenderDevice>();
        let render_queue = world.resource::<RenderQueue>();
        let mut uniform_buffer = UniformBuffer::from(source.params);
        uniform_buffer.write_buffer(render_device, render_queue);
        let Some(uniform_binding) = uniform_buffer.binding() else {
            return Ok(());
        };

        let bind_group = render_device.create_bind_group(
            "grid_display_bind_group",
            &pipeline.bind_group_layout,
            &BindGroupEntries::sequential((cells, &target.texture_view, uniform_binding.clone())),
        );

        let mut pass = render_context
            .command_encoder()
            .begin_compute_pass(&ComputePassDescriptor {
                label: Some("grid_display_pass"),
                timestamp_writes: None,
            });
        pass.set_pipeline(compute_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let (groups_x, groups_y) = workgroup_count(source.size.x, source.size.y);
        pass.dispatch_workgroups(groups_x, groups_y, 1);

        Ok(())
    }
}

/// Render-world half of the GPU display.
pub struct GridDisplayPlugin;

impl Plugin for GridDisplayPlugin {
    fn build(&self, app: &mut App) {
        if let Some(mut shaders) = app.world_mut().get_resource_mut::<Assets<Shader>>() {
            shaders.insert(
                &GRID_DISPLAY_SHADER_HANDLE,
                Shader::from_wgsl(GRID_DISPLAY_SHADER, "grid_display.wgsl"),
            );
        }

        app.init_resource::<GridDisplaySource>()
            .add_plugins(ExtractResourcePlugin::<GridDisplaySource>::default());

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };
        render_app.add_systems(Render, prepare_display_pipeline.in_set(RenderSet::Prepare));

        let mut render_graph = render_app.world_mut().resource_mut::<RenderGraph>();
        render_graph.add_node(GridDisplayLabel, GridDisplayNode);
        // Paint before the cameras sample the sprite
        render_graph.add_node_edge(GridDisplayLabel, bevy::render::graph::CameraDriverLabel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellState;
    use crate::simulation::compute_pipeline::WORKGROUP_SIZE;

    #[test]
    fn test_display_params_from_palette() {
        let params = DisplayParams::from(&Palette::default());
        assert_eq!(params.empty, Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert_eq!(params.head, Vec4::ONE);

        // sRGB 0x99 is about 0.318 in linear space
        assert!((params.tail.x - 0.318).abs() < 0.01);
        assert_eq!(params.tail.y, 1.0);
        assert_eq!(params.tail.z, 0.0);
    }

    #[test]
    fn test_display_params_keep_alpha() {
        let mut palette = Palette::default();
        palette.set(CellState::Wire, image::Rgba([0, 0, 0, 0]));
        let params = DisplayParams::from(&palette);
        assert_eq!(params.wire, Vec4::ZERO);
    }

    #[test]
    fn test_display_image_is_storage_target() {
        let image = display_image(5, 3);
        assert_eq!(image.width(), 5);
        assert_eq!(image.height(), 3);
        assert_eq!(image.texture_descriptor.format, DISPLAY_FORMAT);
        assert!(image.texture_descriptor.usage.contains(TextureUsages::STORAGE_BINDING));
        assert!(image.texture_descriptor.usage.contains(TextureUsages::TEXTURE_BINDING));
        assert_eq!(image.data.as_ref().map(Vec::len), Some(5 * 3 * 4));
    }

    #[test]
    fn test_display_shader_constants_match_cell_states() {
        for (name, state) in [
            ("CELL_WIRE", CellState::Wire),
            ("CELL_TAIL", CellState::Tail),
            ("CELL_HEAD", CellState::Head),
        ] {
            let line = format!("const {name}: u32 = {}u;", state.as_byte());
            assert!(GRID_DISPLAY_SHADER.contains(&line), "missing `{line}`");
        }
        assert!(GRID_DISPLAY_SHADER.contains(&format!(
            "@workgroup_size({WORKGROUP_SIZE}, {WORKGROUP_SIZE}, 1)"
        )));
        assert!(GRID_DISPLAY_SHADER.contains("texture_storage_2d<rgba8unorm, write>"));
    }
}

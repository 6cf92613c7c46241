//! Interactive viewer and headless batch runner.

use bevy::app::AppExit;
use bevy::input::mouse::{MouseMotion, MouseWheel};
use bevy::log::LogPlugin;
use bevy::prelude::*;
use bevy::render::render_asset::RenderAssetUsages;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};
use bevy::render::renderer::{RenderDevice, RenderQueue};
use bevy::window::{MonitorSelection, PrimaryWindow, WindowMode, WindowResolution};
use image::RgbaImage;
use std::path::Path;
use std::time::Duration;

use crate::clock::{ClockController, FrequencyMeter, format_frequency};
use crate::config::{AppConfig, BackendKind, HeadlessRun};
use crate::display::{DisplayParams, GridDisplayPlugin, GridDisplaySource, display_image};
use crate::error::WireworldResult;
use crate::simulation::{Bindable, ComputeBackend, CpuBackend, GpuBackend, Simulation};
use crate::state_files::{current_stamp, find_latest_state, state_file_path};

/// Readback is slow, so a CPU-backed sprite is refreshed at most this often.
const DISPLAY_REFRESH: Duration = Duration::from_millis(1000 / 30);
/// Texture unit the display pass reads the front grid from
const DISPLAY_UNIT: u32 = 1;
const ZOOM_STEP: f32 = 0.9;
const MIN_ZOOM: f32 = 0.01;
const MAX_ZOOM: f32 = 100.0;

/// The running simulation and whether the clock drives it
#[derive(Resource)]
pub struct SimulationState {
    pub simulation: Simulation,
    pub running: bool,
    /// Set when the grid was replaced and the display must be redrawn.
    pub reloaded: bool,
}

impl SimulationState {
    pub fn new(simulation: Simulation) -> Self {
        Self {
            simulation,
            running: true,
            reloaded: true,
        }
    }

    fn load(&mut self, path: &Path, config: &AppConfig) {
        match self.simulation.load_image_file(path, &config.palette) {
            Ok(()) => self.reloaded = true,
            Err(err) => warn!("Failed to load {}: {}", path.display(), err),
        }
    }
}

/// How the sprite image gets the front grid's pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisplayPath {
    /// A render pass reads the bound front texture directly
    Shader,
    /// The front grid is exported and copied into the image
    Readback,
}

/// Texture the front grid is shown through
#[derive(Resource)]
struct GridDisplay {
    image: Handle<Image>,
    path: DisplayPath,
    size: (u32, u32),
    shown_generation: Option<u64>,
    last_refresh: Option<Duration>,
}

#[derive(Resource)]
struct TitleTimer(Timer);

#[derive(Component)]
struct GridSprite;

/// Backend for `kind`, falling back to the CPU when no GPU adapter is usable.
pub fn create_backend(kind: BackendKind) -> Box<dyn ComputeBackend> {
    match kind {
        BackendKind::Gpu => match GpuBackend::new() {
            Ok(gpu) => Box::new(gpu),
            Err(err) => {
                warn!("GPU backend unavailable ({}), falling back to cpu", err);
                Box::new(CpuBackend::new())
            }
        },
        BackendKind::Cpu => Box::new(CpuBackend::new()),
    }
}

/// Backend for the windowed viewer. The GPU backend shares bevy's render
/// device so the sprite can be drawn from the front texture.
pub fn create_render_backend(
    kind: BackendKind,
    device: Option<&RenderDevice>,
    queue: Option<&RenderQueue>,
) -> Box<dyn ComputeBackend> {
    match (kind, device, queue) {
        (BackendKind::Gpu, Some(device), Some(queue)) => {
            match GpuBackend::from_render_device(device.clone(), queue.clone()) {
                Ok(gpu) => Box::new(gpu),
                Err(err) => {
                    warn!("GPU backend unavailable ({}), falling back to cpu", err);
                    Box::new(CpuBackend::new())
                }
            }
        }
        (BackendKind::Gpu, _, _) => {
            warn!("No render device, falling back to cpu");
            Box::new(CpuBackend::new())
        }
        (BackendKind::Cpu, _, _) => Box::new(CpuBackend::new()),
    }
}

/// Load the configured input onto the configured backend.
pub fn build_simulation(config: &AppConfig) -> WireworldResult<Simulation> {
    load_simulation(create_backend(config.backend), config)
}

fn load_simulation(backend: Box<dyn ComputeBackend>, config: &AppConfig) -> WireworldResult<Simulation> {
    Simulation::from_image_file(backend, &config.input, &config.palette, config.simulation)
}

/// Run `steps` generations and write the result to `output`.
pub fn run_batch(simulation: &mut Simulation, run: &HeadlessRun, config: &AppConfig) -> WireworldResult<()> {
    let steps = i64::try_from(run.steps).unwrap_or(i64::MAX);
    simulation.step(steps)?;
    simulation.save_image(&run.output, &config.palette)
}

/// Entry point shared by the windowed and headless modes.
pub fn run(config: AppConfig) -> AppExit {
    let Some(run) = config.headless.clone() else {
        return App::new()
            .add_plugins(window_plugins(&config))
            .add_plugins(WireworldPlugin { config })
            .run();
    };

    // The batch runs to completion here; the app only installs logging
    let mut app = App::new();
    app.add_plugins((MinimalPlugins, LogPlugin::default()));

    let mut simulation = match build_simulation(&config) {
        Ok(simulation) => simulation,
        Err(err) => {
            error!("Failed to load {}: {}", config.input.display(), err);
            return AppExit::from_code(1);
        }
    };
    match run_batch(&mut simulation, &run, &config) {
        Ok(()) => AppExit::Success,
        Err(err) => {
            error!("Headless run failed: {}", err);
            AppExit::from_code(1)
        }
    }
}

fn window_plugins(config: &AppConfig) -> impl PluginGroup + use<> {
    let (width, height) = config.window_size;
    let mode = if config.fullscreen {
        WindowMode::BorderlessFullscreen(MonitorSelection::Current)
    } else {
        WindowMode::Windowed
    };

    DefaultPlugins
        .set(WindowPlugin {
            primary_window: Some(Window {
                title: window_title(false, 0.0),
                resolution: WindowResolution::new(width as f32, height as f32),
                mode,
                ..default()
            }),
            ..default()
        })
        .set(ImagePlugin::default_nearest())
}

/// Viewer systems. Loads the configured input at startup and exits with an
/// error code if that fails.
pub struct WireworldPlugin {
    pub config: AppConfig,
}

impl Plugin for WireworldPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(GridDisplayPlugin)
            .insert_resource(self.config.clone())
            .insert_resource(ClockController::new(self.config.interval_overflow))
            .init_resource::<FrequencyMeter>()
            .insert_resource(TitleTimer(Timer::from_seconds(1.0, TimerMode::Repeating)))
            .add_systems(Startup, (load_input, setup_display).chain())
            .add_systems(
                Update,
                (
                    release_display,
                    handle_window_keys,
                    handle_clock_keys,
                    handle_state_keys,
                    pan_camera,
                    zoom_camera,
                    drive_simulation,
                    refresh_display,
                    update_title,
                )
                    .chain()
                    .run_if(resource_exists::<SimulationState>),
            );

        info!("Wireworld plugin initialized");
    }
}

fn load_input(
    mut commands: Commands,
    config: Res<AppConfig>,
    device: Option<Res<RenderDevice>>,
    queue: Option<Res<RenderQueue>>,
    mut exit: EventWriter<AppExit>,
) {
    let backend = create_render_backend(config.backend, device.as_deref(), queue.as_deref());
    match load_simulation(backend, &config) {
        Ok(simulation) => commands.insert_resource(SimulationState::new(simulation)),
        Err(err) => {
            error!("Failed to load {}: {}", config.input.display(), err);
            exit.write(AppExit::from_code(1));
        }
    }
}

fn setup_display(
    mut commands: Commands,
    mut images: ResMut<Assets<Image>>,
    state: Option<Res<SimulationState>>,
) {
    let Some(state) = state else {
        return;
    };
    commands.spawn(Camera2d);

    let size = state.simulation.size();
    let (path, image) = if state.simulation.front_texture_view().is_some() {
        (DisplayPath::Shader, display_image(size.0, size.1))
    } else {
        (DisplayPath::Readback, blank_image(size.0, size.1))
    };
    let image = images.add(image);
    commands.spawn((Sprite::from_image(image.clone()), Transform::default(), GridSprite));
    commands.insert_resource(GridDisplay {
        image,
        path,
        size,
        shown_generation: None,
        last_refresh: None,
    });

    info!(
        "Showing {}x{} grid on the {} backend ({:?} display)",
        size.0,
        size.1,
        state.simulation.backend_name(),
        path
    );
}

/// Hand the front grid back to the simulation so this frame can step it.
fn release_display(mut state: ResMut<SimulationState>, display: Res<GridDisplay>) {
    if display.path != DisplayPath::Shader {
        return;
    }
    if let Err(err) = state.simulation.unbind(DISPLAY_UNIT) {
        warn!("Display unbind failed: {}", err);
    }
}

fn handle_window_keys(
    keys: Res<ButtonInput<KeyCode>>,
    mut windows: Query<&mut Window, With<PrimaryWindow>>,
    mut cameras: Query<(&mut Transform, &mut Projection), With<Camera2d>>,
    mut exit: EventWriter<AppExit>,
) {
    if keys.just_pressed(KeyCode::Escape) {
        exit.write(AppExit::Success);
    }

    if keys.just_pressed(KeyCode::F11)
        && let Ok(mut window) = windows.single_mut()
    {
        window.mode = match window.mode {
            WindowMode::Windowed => WindowMode::BorderlessFullscreen(MonitorSelection::Current),
            _ => WindowMode::Windowed,
        };
    }

    if keys.just_pressed(KeyCode::KeyC)
        && let Ok((mut transform, mut projection)) = cameras.single_mut()
    {
        transform.translation = Vec3::ZERO;
        if let Projection::Orthographic(ortho) = projection.as_mut() {
            ortho.scale = 1.0;
        }
    }
}

fn handle_clock_keys(
    keys: Res<ButtonInput<KeyCode>>,
    time: Res<Time>,
    mut state: ResMut<SimulationState>,
    mut clock: ResMut<ClockController>,
    mut meter: ResMut<FrequencyMeter>,
) {
    if keys.just_pressed(KeyCode::KeyQ) {
        state.running = !state.running;
        meter.reset();
        info!("Simulation {}", if state.running { "running" } else { "stopped" });
    }

    if keys.just_pressed(KeyCode::KeyE) {
        match state.simulation.step(1) {
            Ok(()) => meter.record(time.elapsed(), 1),
            Err(err) => warn!("Step failed: {}", err),
        }
    }

    if keys.just_pressed(KeyCode::KeyW) {
        clock.faster();
    }
    if keys.just_pressed(KeyCode::KeyS) {
        clock.slower();
    }
}

fn handle_state_keys(keys: Res<ButtonInput<KeyCode>>, config: Res<AppConfig>, mut state: ResMut<SimulationState>) {
    if keys.just_pressed(KeyCode::F1) {
        let path = state_file_path(&config.input, current_stamp());
        if let Err(err) = state.simulation.save_image(&path, &config.palette) {
            warn!("Failed to save state to {}: {}", path.display(), err);
        }
    }

    if keys.just_pressed(KeyCode::F2) {
        match find_latest_state(&config.input) {
            Some(path) => state.load(&path, &config),
            None => {
                info!("No state file found, reloading {}", config.input.display());
                state.load(&config.input, &config);
            }
        }
    }

    if keys.just_pressed(KeyCode::F5) {
        state.load(&config.input, &config);
    }
}

/// Camera movement for a mouse `delta` in window pixels, so the grid follows
/// the cursor.
fn pan_offset(delta: Vec2, scale: f32) -> Vec2 {
    Vec2::new(-delta.x, delta.y) * scale
}

/// World position under `cursor` for a 2D camera at `translation`.
fn cursor_world(cursor: Vec2, window_size: Vec2, translation: Vec2, scale: f32) -> Vec2 {
    let offset = cursor - window_size / 2.0;
    translation + Vec2::new(offset.x, -offset.y) * scale
}

/// Camera translation that keeps `anchor` fixed on screen across a zoom.
fn zoom_about(translation: Vec2, anchor: Vec2, old_scale: f32, new_scale: f32) -> Vec2 {
    anchor + (translation - anchor) * (new_scale / old_scale)
}

/// Holding Space drags the grid with the mouse.
fn pan_camera(
    keys: Res<ButtonInput<KeyCode>>,
    mut motion: EventReader<MouseMotion>,
    mut cameras: Query<(&mut Transform, &Projection), With<Camera2d>>,
) {
    let delta: Vec2 = motion.read().map(|event| event.delta).sum();
    if !keys.pressed(KeyCode::Space) || delta == Vec2::ZERO {
        return;
    }

    if let Ok((mut transform, projection)) = cameras.single_mut()
        && let Projection::Orthographic(ortho) = projection
    {
        transform.translation += pan_offset(delta, ortho.scale).extend(0.0);
    }
}

/// Mouse wheel zoom, centred on the cursor when it is over the window.
fn zoom_camera(
    mut wheel: EventReader<MouseWheel>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut cameras: Query<(&mut Transform, &mut Projection), With<Camera2d>>,
) {
    let scroll: f32 = wheel.read().map(|event| event.y).sum();
    if scroll == 0.0 {
        return;
    }

    let Ok((mut transform, mut projection)) = cameras.single_mut() else {
        return;
    };
    let Projection::Orthographic(ortho) = projection.as_mut() else {
        return;
    };

    let old_scale = ortho.scale;
    ortho.scale = (old_scale * ZOOM_STEP.powf(scroll)).clamp(MIN_ZOOM, MAX_ZOOM);

    if let Ok(window) = windows.single()
        && let Some(cursor) = window.cursor_position()
    {
        let translation = transform.translation.truncate();
        let anchor = cursor_world(cursor, window.size(), translation, old_scale);
        let moved = zoom_about(translation, anchor, old_scale, ortho.scale);
        transform.translation = moved.extend(transform.translation.z);
    }
}

fn drive_simulation(
    time: Res<Time>,
    mut state: ResMut<SimulationState>,
    mut clock: ResMut<ClockController>,
    mut meter: ResMut<FrequencyMeter>,
) {
    let now = time.elapsed();
    if !state.running {
        meter.record(now, 0);
        return;
    }

    match clock.drive(now, &mut state.simulation) {
        Ok(steps) => meter.record(now, steps),
        Err(err) => {
            error!("Simulation stopped: {}", err);
            state.running = false;
        }
    }
}

fn refresh_display(
    time: Res<Time>,
    config: Res<AppConfig>,
    mut state: ResMut<SimulationState>,
    mut display: ResMut<GridDisplay>,
    mut source: ResMut<GridDisplaySource>,
    mut images: ResMut<Assets<Image>>,
    mut sprites: Query<&mut Sprite, With<GridSprite>>,
) {
    let path = display.path;
    match path {
        DisplayPath::Shader => {
            let size = state.simulation.size();
            if size != display.size {
                display.image = images.add(display_image(size.0, size.1));
                display.size = size;
                if let Ok(mut sprite) = sprites.single_mut() {
                    sprite.image = display.image.clone();
                }
            }
            publish_front(&mut state, &display, &config, &mut source);
        }
        DisplayPath::Readback => refresh_readback(time.elapsed(), &config, &mut state, &mut display, &mut images),
    }
}

/// Bind the front grid for the display pass until the next frame starts.
fn publish_front(
    state: &mut SimulationState,
    display: &GridDisplay,
    config: &AppConfig,
    source: &mut GridDisplaySource,
) {
    source.cells = match state.simulation.bind(DISPLAY_UNIT) {
        Ok(()) => state.simulation.front_texture_view().cloned(),
        Err(err) => {
            debug!("Display bind skipped: {}", err);
            None
        }
    };
    source.target = display.image.clone();
    source.size = UVec2::new(display.size.0, display.size.1);
    source.params = DisplayParams::from(&config.palette);
    state.reloaded = false;
}

/// Copy the front grid into the sprite image, throttled and only when the
/// generation changed.
fn refresh_readback(
    now: Duration,
    config: &AppConfig,
    state: &mut SimulationState,
    display: &mut GridDisplay,
    images: &mut Assets<Image>,
) {
    let generation = state.simulation.generation();
    if !state.reloaded && display.shown_generation == Some(generation) {
        return;
    }
    if let Some(last) = display.last_refresh
        && now.saturating_sub(last) < DISPLAY_REFRESH
    {
        return;
    }

    let exported = match state.simulation.export(&config.palette) {
        Ok(exported) => exported,
        Err(err) => {
            debug!("Display refresh skipped: {}", err);
            return;
        }
    };

    if let Some(image) = images.get_mut(&display.image) {
        *image = to_bevy_image(exported);
    }
    state.reloaded = false;
    display.size = state.simulation.size();
    display.shown_generation = Some(generation);
    display.last_refresh = Some(now);
}

fn update_title(
    time: Res<Time>,
    state: Res<SimulationState>,
    meter: Res<FrequencyMeter>,
    mut timer: ResMut<TitleTimer>,
    mut windows: Query<&mut Window, With<PrimaryWindow>>,
) {
    if !timer.0.tick(time.delta()).just_finished() {
        return;
    }
    if let Ok(mut window) = windows.single_mut() {
        window.title = window_title(state.running, meter.rate());
    }
}

/// `wireworld-gpu <version> - [running|stopped] clock: <frequency>`
pub fn window_title(running: bool, rate: f64) -> String {
    format!(
        "wireworld-gpu {} - [{}] clock: {}",
        env!("CARGO_PKG_VERSION"),
        if running { "running" } else { "stopped" },
        format_frequency(rate)
    )
}

fn blank_image(width: u32, height: u32) -> Image {
    to_bevy_image(RgbaImage::new(width, height))
}

fn to_bevy_image(image: RgbaImage) -> Image {
    let (width, height) = image.dimensions();
    Image::new(
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        image.into_raw(),
        TextureFormat::Rgba8UnormSrgb,
        RenderAssetUsages::RENDER_WORLD | RenderAssetUsages::MAIN_WORLD,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellState;
    use crate::config::Cli;
    use clap::Parser;

    fn config_for(args: &[&str]) -> AppConfig {
        AppConfig::from(Cli::try_parse_from(args).unwrap())
    }

    #[test]
    fn test_window_title() {
        let title = window_title(true, 1_500.0);
        assert!(title.starts_with("wireworld-gpu "));
        assert!(title.ends_with(" - [running] clock: 1.50 kHz"));
        assert!(window_title(false, 0.0).ends_with("[stopped] clock: 0 Hz"));
    }

    #[test]
    fn test_to_bevy_image_keeps_pixels() {
        let mut source = RgbaImage::new(3, 2);
        source.put_pixel(2, 1, image::Rgba([1, 2, 3, 4]));
        let converted = to_bevy_image(source.clone());
        assert_eq!(converted.width(), 3);
        assert_eq!(converted.height(), 2);
        assert_eq!(converted.data.as_deref(), Some(source.as_raw().as_slice()));
    }

    #[test]
    fn test_render_backend_falls_back_without_device() {
        assert_eq!(create_render_backend(BackendKind::Gpu, None, None).name(), "cpu");
        assert_eq!(create_render_backend(BackendKind::Cpu, None, None).name(), "cpu");
    }

    #[test]
    fn test_pan_follows_cursor() {
        // Dragging right moves the camera left, so the grid moves right
        assert_eq!(pan_offset(Vec2::new(10.0, 0.0), 1.0), Vec2::new(-10.0, 0.0));
        // Window y grows downwards, world y upwards
        assert_eq!(pan_offset(Vec2::new(0.0, 4.0), 0.5), Vec2::new(0.0, 2.0));
    }

    #[test]
    fn test_cursor_world() {
        let window = Vec2::new(800.0, 600.0);
        assert_eq!(cursor_world(Vec2::new(400.0, 300.0), window, Vec2::new(5.0, 7.0), 2.0), Vec2::new(5.0, 7.0));
        assert_eq!(cursor_world(Vec2::new(500.0, 200.0), window, Vec2::ZERO, 2.0), Vec2::new(200.0, 200.0));
    }

    #[test]
    fn test_zoom_keeps_cursor_point_fixed() {
        let window = Vec2::new(800.0, 600.0);
        let cursor = Vec2::new(650.0, 120.0);
        let translation = Vec2::new(-30.0, 45.0);
        let (old_scale, new_scale) = (1.0, 0.9);

        let anchor = cursor_world(cursor, window, translation, old_scale);
        let moved = zoom_about(translation, anchor, old_scale, new_scale);
        let after = cursor_world(cursor, window, moved, new_scale);
        assert!((after - anchor).length() < 1e-3);

        // Zooming about the camera centre does not move it
        assert_eq!(zoom_about(translation, translation, old_scale, new_scale), translation);
    }

    #[test]
    fn test_headless_batch() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("line.png");
        let output = dir.path().join("out.png");
        let input_arg = input.to_string_lossy().into_owned();
        let output_arg = output.to_string_lossy().into_owned();
        let config = config_for(&[
            "wireworld-gpu",
            &input_arg,
            "--backend",
            "cpu",
            "--edges",
            "bounded",
            "--steps",
            "2",
            "--output",
            &output_arg,
        ]);

        let palette = config.palette;
        let mut line = RgbaImage::from_pixel(4, 1, palette.wire);
        line.put_pixel(0, 0, palette.head);
        line.save(&input).unwrap();

        let mut simulation = build_simulation(&config).unwrap();
        assert_eq!(simulation.backend_name(), "cpu");
        let run = config.headless.clone().unwrap();
        run_batch(&mut simulation, &run, &config).unwrap();

        let result = image::open(&output).unwrap().to_rgba8();
        let states: Vec<CellState> = result.pixels().map(|pixel| palette.decode(*pixel)).collect();
        assert_eq!(
            states,
            vec![CellState::Wire, CellState::Tail, CellState::Head, CellState::Wire]
        );
    }
}

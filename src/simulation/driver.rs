//! The double-buffered Wireworld simulation.

use bevy::log::{debug, info, warn};
use bevy::render::render_resource::TextureView;
use image::{DynamicImage, ImageReader, RgbaImage};
use std::path::Path;

use crate::cell::CellState;
use crate::error::{WireworldError, WireworldResult};
use crate::palette::Palette;
use crate::simulation::backend::{ComputeBackend, EdgeMode, SurfaceId};
use crate::simulation::grid::{BindState, Bindable, Grid};

/// Texture unit the kernel reads the front grid from
const KERNEL_INPUT_UNIT: u32 = 0;

/// Passes queued before the backend is asked to submit, bounding queued work
/// no matter how many generations a single `step` runs.
pub const PASSES_PER_SUBMIT: i64 = 1024;

/// Construction-time settings of a [`Simulation`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationOptions {
    pub edges: EdgeMode,
}

/// Two equally sized grids stepped in ping-pong fashion on a compute backend.
///
/// `grids[front]` always holds the most recently completed generation. A step
/// writes the other grid and then flips `front`; no cell data is copied.
///
/// A backend failure while stepping or exporting faults the simulation. Every
/// later call returns [`WireworldError::Faulted`] until one of the `load_*`
/// methods succeeds.
pub struct Simulation {
    backend: Box<dyn ComputeBackend>,
    grids: [Grid; 2],
    front: usize,
    options: SimulationOptions,
    generation: u64,
    faulted: bool,
    released: bool,
}

impl Simulation {
    /// Create an all-empty simulation.
    pub fn new(
        mut backend: Box<dyn ComputeBackend>,
        width: u32,
        height: u32,
        options: SimulationOptions,
    ) -> WireworldResult<Self> {
        let grids = allocate_pair(backend.as_mut(), width, height)?;
        info!(
            "Created {}x{} simulation on the {} backend ({:?} edges)",
            width,
            height,
            backend.name(),
            options.edges
        );

        Ok(Self {
            backend,
            grids,
            front: 0,
            options,
            generation: 0,
            faulted: false,
            released: false,
        })
    }

    /// Create a simulation whose first generation is `cells` (row-major bytes).
    pub fn from_cells(
        backend: Box<dyn ComputeBackend>,
        width: u32,
        height: u32,
        cells: &[u8],
        options: SimulationOptions,
    ) -> WireworldResult<Self> {
        let mut simulation = Self::new(backend, width, height, options)?;
        // On failure `simulation` is dropped here, which releases both grids.
        simulation.write_front(cells, width, height)?;
        Ok(simulation)
    }

    /// Create a simulation from an already decoded image.
    pub fn from_image(
        backend: Box<dyn ComputeBackend>,
        image: &DynamicImage,
        palette: &Palette,
        options: SimulationOptions,
    ) -> WireworldResult<Self> {
        let (cells, width, height) = palette.image_to_grid(image);
        Self::from_cells(backend, width, height, &cells, options)
    }

    /// Create a simulation from an image file. PNG, GIF, JPEG and PNM are supported.
    pub fn from_image_file(
        backend: Box<dyn ComputeBackend>,
        path: impl AsRef<Path>,
        palette: &Palette,
        options: SimulationOptions,
    ) -> WireworldResult<Self> {
        let path = path.as_ref();
        let image = decode_image_file(path)?;
        info!("Loading simulation from {}", path.display());
        Self::from_image(backend, &image, palette, options)
    }

    /// Replace the state with the contents of an image file.
    ///
    /// The file is decoded before anything is touched, so a bad file leaves the
    /// running simulation as it was.
    pub fn load_image_file(&mut self, path: impl AsRef<Path>, palette: &Palette) -> WireworldResult<()> {
        let path = path.as_ref();
        let image = decode_image_file(path)?;
        info!("Reloading simulation from {}", path.display());
        self.load_image(&image, palette)
    }

    /// Replace the state with the contents of a decoded image.
    pub fn load_image(&mut self, image: &DynamicImage, palette: &Palette) -> WireworldResult<()> {
        let (cells, width, height) = palette.image_to_grid(image);
        self.load_cells(&cells, width, height)
    }

    /// Replace the state with `cells`, reallocating when the dimensions change.
    ///
    /// A successful load clears a previous fault.
    pub fn load_cells(&mut self, cells: &[u8], width: u32, height: u32) -> WireworldResult<()> {
        if self.released {
            return Err(WireworldError::BackendResource("simulation has been released".to_string()));
        }
        let expected = width as usize * height as usize;
        if cells.len() != expected {
            return Err(WireworldError::SizeMismatch {
                expected,
                actual: cells.len(),
            });
        }
        self.check_unbound()?;

        if (width, height) != self.size() || !self.grids.iter().all(Grid::is_allocated) {
            // Only give up the old pair once the new one exists.
            let fresh = allocate_pair(self.backend.as_mut(), width, height)?;
            let old = std::mem::replace(&mut self.grids, fresh);
            for mut grid in old {
                grid.release(self.backend.as_mut());
            }
            debug!("Reallocated grids to {}x{}", width, height);
        }

        self.front = 0;
        self.generation = 0;
        self.faulted = false;
        self.write_front(cells, width, height)
    }

    /// Run `n` generations. `n < 1` does nothing.
    pub fn step(&mut self, n: i64) -> WireworldResult<()> {
        if n < 1 {
            return Ok(());
        }
        self.ensure_usable()?;
        self.check_unbound()?;

        for pass in 1..=n {
            let result = self.run_pass();
            self.fault_on_error(result)?;
            if pass % PASSES_PER_SUBMIT == 0 {
                let result = self.backend.submit();
                self.fault_on_error(result)?;
            }
        }
        let result = self.backend.submit();
        self.fault_on_error(result)?;

        debug!("Stepped {} generations, now at {}", n, self.generation);
        Ok(())
    }

    /// One kernel pass followed by the buffer swap.
    fn run_pass(&mut self) -> WireworldResult<()> {
        let [first, second] = &mut self.grids;
        let (front, back) = if self.front == 0 {
            (first, second)
        } else {
            (second, first)
        };

        back.bind_as_target()?;
        if let Err(err) = front.bind(KERNEL_INPUT_UNIT) {
            back.unbind_target();
            return Err(err);
        }

        let result = match (front.surface(), back.surface()) {
            (Ok(input), Ok(output)) => self.backend.dispatch(input, output, self.options.edges),
            (Err(err), _) | (_, Err(err)) => Err(err),
        };

        front.unbind(KERNEL_INPUT_UNIT)?;
        back.unbind_target();
        result?;

        self.front ^= 1;
        self.generation += 1;
        Ok(())
    }

    /// Read the front grid back and encode it with `palette`.
    ///
    /// This is a blocking readback; call it for saving state, not every frame.
    pub fn export(&mut self, palette: &Palette) -> WireworldResult<RgbaImage> {
        let cells = self.read_front()?;
        let (width, height) = self.size();
        palette.grid_to_image(&cells, width, height)
    }

    /// Export and write to `path`; the format follows the file extension.
    pub fn save_image(&mut self, path: impl AsRef<Path>, palette: &Palette) -> WireworldResult<()> {
        let path = path.as_ref();
        let image = self.export(palette)?;
        image.save(path)?;
        info!("Saved generation {} to {}", self.generation, path.display());
        Ok(())
    }

    /// Cell states of the front grid, row-major. Blocking like [`export`](Self::export).
    pub fn cells(&mut self) -> WireworldResult<Vec<CellState>> {
        Ok(self
            .read_front()?
            .into_iter()
            .map(CellState::from_byte)
            .collect())
    }

    pub fn size(&self) -> (u32, u32) {
        self.grids[self.front].size()
    }

    /// Generations completed since the last load.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn edge_mode(&self) -> EdgeMode {
        self.options.edges
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Backend handle of the front grid, for an external consumer.
    pub fn front_surface(&self) -> WireworldResult<SurfaceId> {
        self.grids[self.front].surface()
    }

    /// GPU texture view of the front grid, when the backend has one.
    pub fn front_texture_view(&self) -> Option<&TextureView> {
        let surface = self.front_surface().ok()?;
        self.backend.texture_view(surface)
    }

    /// Release both grids and the kernel program. Idempotent; also run on drop.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        for grid in &mut self.grids {
            grid.release(self.backend.as_mut());
        }
        self.backend.release_kernel();
        self.released = true;
        debug!("Released simulation resources");
    }

    fn ensure_usable(&self) -> WireworldResult<()> {
        if self.released {
            return Err(WireworldError::BackendResource("simulation has been released".to_string()));
        }
        if self.faulted {
            return Err(WireworldError::Faulted);
        }
        Ok(())
    }

    fn check_unbound(&self) -> WireworldResult<()> {
        if self.grids.iter().any(|grid| grid.bind_state() != BindState::Unbound) {
            return Err(WireworldError::BindingConflict(
                "the front grid is bound by a consumer; unbind it first".to_string(),
            ));
        }
        Ok(())
    }

    fn read_front(&mut self) -> WireworldResult<Vec<u8>> {
        self.ensure_usable()?;
        let result = self.grids[self.front].read_data(self.backend.as_mut());
        self.fault_on_error(result)
    }

    fn write_front(&mut self, cells: &[u8], width: u32, height: u32) -> WireworldResult<()> {
        let result = self.grids[self.front].set_data(self.backend.as_mut(), cells, width, height);
        self.fault_on_error(result)
    }

    /// Backend failures are fatal for this instance; usage errors are not.
    fn fault_on_error<T>(&mut self, result: WireworldResult<T>) -> WireworldResult<T> {
        if let Err(WireworldError::BackendResource(message)) = &result {
            warn!("Simulation faulted: {}", message);
            self.faulted = true;
        }
        result
    }
}

impl Bindable for Simulation {
    /// Expose the front grid on `unit`. Stepping is refused while it is bound.
    fn bind(&mut self, unit: u32) -> WireworldResult<()> {
        self.ensure_usable()?;
        self.grids[self.front].bind(unit)
    }

    fn unbind(&mut self, unit: u32) -> WireworldResult<()> {
        self.grids[self.front].unbind(unit)
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decode an image file, guessing the format from its contents.
pub fn decode_image_file(path: &Path) -> WireworldResult<DynamicImage> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

/// Allocate a front/back pair, releasing the first grid if the second fails.
fn allocate_pair(backend: &mut dyn ComputeBackend, width: u32, height: u32) -> WireworldResult<[Grid; 2]> {
    let mut front = Grid::allocate(backend, width, height)?;
    match Grid::allocate(backend, width, height) {
        Ok(back) => Ok([front, back]),
        Err(err) => {
            front.release(backend);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::cpu_simulation::CpuBackend;
    use crate::simulation::rule;
    use image::Rgba;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const E: u8 = 0;
    const W: u8 = 50;
    const T: u8 = 100;
    const H: u8 = 255;

    fn cpu() -> Box<dyn ComputeBackend> {
        Box::new(CpuBackend::new())
    }

    fn bytes(simulation: &mut Simulation) -> Vec<u8> {
        simulation
            .cells()
            .unwrap()
            .into_iter()
            .map(CellState::as_byte)
            .collect()
    }

    fn ring_image(palette: &Palette) -> DynamicImage {
        let mut image = RgbaImage::from_pixel(3, 3, palette.wire);
        image.put_pixel(1, 1, palette.empty);
        image.put_pixel(0, 0, palette.head);
        DynamicImage::ImageRgba8(image)
    }

    /// Backend that starts failing dispatches after a fixed number of passes.
    struct FlakyBackend {
        inner: CpuBackend,
        passes_left: u32,
    }

    impl ComputeBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }
        fn allocate(&mut self, width: u32, height: u32) -> WireworldResult<SurfaceId> {
            self.inner.allocate(width, height)
        }
        fn release(&mut self, surface: SurfaceId) {
            self.inner.release(surface)
        }
        fn write(&mut self, surface: SurfaceId, cells: &[u8]) -> WireworldResult<()> {
            self.inner.write(surface, cells)
        }
        fn read(&mut self, surface: SurfaceId) -> WireworldResult<Vec<u8>> {
            self.inner.read(surface)
        }
        fn dispatch(&mut self, input: SurfaceId, output: SurfaceId, edges: EdgeMode) -> WireworldResult<()> {
            if self.passes_left == 0 {
                return Err(WireworldError::BackendResource("device lost".to_string()));
            }
            self.passes_left -= 1;
            self.inner.dispatch(input, output, edges)
        }
    }

    /// Dispatch and submit counters shared with the test body.
    #[derive(Default)]
    struct SubmitStats {
        queued: AtomicUsize,
        max_queued: AtomicUsize,
        submits: AtomicUsize,
    }

    /// Backend that tracks how many dispatches wait for a submit.
    struct SubmitCountingBackend {
        inner: CpuBackend,
        stats: Arc<SubmitStats>,
    }

    impl ComputeBackend for SubmitCountingBackend {
        fn name(&self) -> &str {
            "counting"
        }
        fn allocate(&mut self, width: u32, height: u32) -> WireworldResult<SurfaceId> {
            self.inner.allocate(width, height)
        }
        fn release(&mut self, surface: SurfaceId) {
            self.inner.release(surface)
        }
        fn write(&mut self, surface: SurfaceId, cells: &[u8]) -> WireworldResult<()> {
            self.inner.write(surface, cells)
        }
        fn read(&mut self, surface: SurfaceId) -> WireworldResult<Vec<u8>> {
            self.inner.read(surface)
        }
        fn dispatch(&mut self, input: SurfaceId, output: SurfaceId, edges: EdgeMode) -> WireworldResult<()> {
            let queued = self.stats.queued.fetch_add(1, Ordering::Relaxed) + 1;
            self.stats.max_queued.fetch_max(queued, Ordering::Relaxed);
            self.inner.dispatch(input, output, edges)
        }
        fn submit(&mut self) -> WireworldResult<()> {
            if self.stats.queued.swap(0, Ordering::Relaxed) > 0 {
                self.stats.submits.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }
    }

    #[test]
    fn test_long_step_submits_in_bounded_batches() {
        let stats = Arc::new(SubmitStats::default());
        let backend = Box::new(SubmitCountingBackend {
            inner: CpuBackend::new(),
            stats: Arc::clone(&stats),
        });
        let mut simulation =
            Simulation::from_cells(backend, 3, 1, &[H, W, W], SimulationOptions::default()).unwrap();

        let n = 4 * PASSES_PER_SUBMIT + 7;
        simulation.step(n).unwrap();

        assert_eq!(simulation.generation(), n as u64);
        assert_eq!(stats.max_queued.load(Ordering::Relaxed), PASSES_PER_SUBMIT as usize);
        assert_eq!(stats.submits.load(Ordering::Relaxed), 5);
        assert_eq!(stats.queued.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_new_is_empty() {
        let mut simulation = Simulation::new(cpu(), 4, 3, SimulationOptions::default()).unwrap();
        assert_eq!(simulation.size(), (4, 3));
        assert_eq!(simulation.generation(), 0);
        assert!(simulation.cells().unwrap().iter().all(|c| *c == CellState::Empty));
    }

    #[test]
    fn test_new_invalid_dimensions() {
        let result = Simulation::new(cpu(), 0, 5, SimulationOptions::default());
        assert!(matches!(result, Err(WireworldError::InvalidDimensions { .. })));
    }

    #[test]
    fn test_ring_end_to_end_bounded() {
        let palette = Palette::default();
        let options = SimulationOptions {
            edges: EdgeMode::Bounded,
        };
        let mut simulation = Simulation::from_image(cpu(), &ring_image(&palette), &palette, options).unwrap();

        simulation.step(1).unwrap();

        #[rustfmt::skip]
        let expected = vec![
            T, H, W,
            H, E, W,
            W, W, W,
        ];
        assert_eq!(bytes(&mut simulation), expected);
        assert_eq!(simulation.generation(), 1);
    }

    #[test]
    fn test_ring_end_to_end_wrapped() {
        // On a wrapped 3x3 grid every cell touches every other, so all wires see one head.
        let palette = Palette::default();
        let mut simulation =
            Simulation::from_image(cpu(), &ring_image(&palette), &palette, SimulationOptions::default()).unwrap();

        simulation.step(1).unwrap();

        #[rustfmt::skip]
        let expected = vec![
            T, H, H,
            H, E, H,
            H, H, H,
        ];
        assert_eq!(bytes(&mut simulation), expected);
    }

    #[test]
    fn test_toroidal_neighbour_on_width_two_grid() {
        // The wire sees the head at column 0 twice: directly and across the edge.
        #[rustfmt::skip]
        let cells = [
            E, E,
            H, W,
            E, E,
        ];
        let mut simulation = Simulation::from_cells(cpu(), 2, 3, &cells, SimulationOptions::default()).unwrap();
        simulation.step(1).unwrap();
        assert_eq!(bytes(&mut simulation), vec![E, E, T, H, E, E]);

        // Only the wrap connects the head at column 0 to the wire at column 2.
        #[rustfmt::skip]
        let cells = [
            E, E, E,
            H, E, W,
            E, E, E,
        ];
        let mut wrapped = Simulation::from_cells(cpu(), 3, 3, &cells, SimulationOptions::default()).unwrap();
        let mut bounded = Simulation::from_cells(
            cpu(),
            3,
            3,
            &cells,
            SimulationOptions {
                edges: EdgeMode::Bounded,
            },
        )
        .unwrap();
        wrapped.step(1).unwrap();
        bounded.step(1).unwrap();
        assert_eq!(bytes(&mut wrapped)[5], H);
        assert_eq!(bytes(&mut bounded)[5], W);
    }

    #[test]
    fn test_step_non_positive_is_noop() {
        let palette = Palette::default();
        let mut simulation =
            Simulation::from_image(cpu(), &ring_image(&palette), &palette, SimulationOptions::default()).unwrap();
        let before = bytes(&mut simulation);

        simulation.step(0).unwrap();
        simulation.step(-3).unwrap();

        assert_eq!(bytes(&mut simulation), before);
        assert_eq!(simulation.generation(), 0);
    }

    #[test]
    fn test_front_swaps_each_pass() {
        let mut simulation = Simulation::new(cpu(), 2, 2, SimulationOptions::default()).unwrap();
        let first = simulation.front_surface().unwrap();
        simulation.step(1).unwrap();
        let second = simulation.front_surface().unwrap();
        assert_ne!(first, second);
        simulation.step(1).unwrap();
        assert_eq!(simulation.front_surface().unwrap(), first);
    }

    #[test]
    fn test_export_matches_source_image() {
        let palette = Palette::default();
        let image = ring_image(&palette);
        let mut simulation = Simulation::from_image(cpu(), &image, &palette, SimulationOptions::default()).unwrap();
        let exported = simulation.export(&palette).unwrap();
        assert_eq!(exported.as_raw(), image.to_rgba8().as_raw());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("ring.png");
        let palette = Palette::default();
        ring_image(&palette).save(&source).unwrap();

        let mut simulation =
            Simulation::from_image_file(cpu(), &source, &palette, SimulationOptions::default()).unwrap();
        simulation.step(2).unwrap();
        let saved = dir.path().join("state.png");
        simulation.save_image(&saved, &palette).unwrap();
        let after_two = bytes(&mut simulation);

        let mut reloaded = Simulation::from_image_file(cpu(), &saved, &palette, SimulationOptions::default()).unwrap();
        assert_eq!(bytes(&mut reloaded), after_two);
    }

    #[test]
    fn test_from_image_file_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.png");
        std::fs::write(&bogus, b"definitely not an image").unwrap();
        let result = Simulation::from_image_file(cpu(), &bogus, &Palette::default(), SimulationOptions::default());
        assert!(matches!(result, Err(WireworldError::Decode(_))));

        let missing = dir.path().join("missing.png");
        let result = Simulation::from_image_file(cpu(), &missing, &Palette::default(), SimulationOptions::default());
        assert!(matches!(result, Err(WireworldError::Io(_))));
    }

    #[test]
    fn test_load_cells_reallocates_on_new_size() {
        let mut simulation = Simulation::new(cpu(), 2, 2, SimulationOptions::default()).unwrap();
        simulation.step(3).unwrap();

        simulation.load_cells(&[W, W, H, W, W, W], 3, 2).unwrap();
        assert_eq!(simulation.size(), (3, 2));
        assert_eq!(simulation.generation(), 0);
        assert_eq!(bytes(&mut simulation), vec![W, W, H, W, W, W]);
    }

    #[test]
    fn test_failed_reload_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.png");
        std::fs::write(&bogus, b"nope").unwrap();

        let palette = Palette::default();
        let mut simulation =
            Simulation::from_image(cpu(), &ring_image(&palette), &palette, SimulationOptions::default()).unwrap();
        simulation.step(1).unwrap();
        let before = bytes(&mut simulation);

        assert!(simulation.load_image_file(&bogus, &palette).is_err());
        assert!(simulation.load_cells(&[W; 5], 2, 2).is_err());
        assert_eq!(bytes(&mut simulation), before);
        assert_eq!(simulation.generation(), 1);
    }

    #[test]
    fn test_bound_front_blocks_step() {
        let mut simulation = Simulation::new(cpu(), 2, 2, SimulationOptions::default()).unwrap();
        simulation.bind(3).unwrap();
        assert!(matches!(simulation.step(1), Err(WireworldError::BindingConflict(_))));
        assert!(!simulation.is_faulted());

        simulation.unbind(3).unwrap();
        simulation.step(1).unwrap();
        assert_eq!(simulation.generation(), 1);
    }

    #[test]
    fn test_backend_failure_faults_until_reload() {
        let backend = Box::new(FlakyBackend {
            inner: CpuBackend::new(),
            passes_left: 2,
        });
        let mut simulation = Simulation::from_cells(backend, 2, 1, &[H, W], SimulationOptions::default()).unwrap();

        assert!(matches!(simulation.step(3), Err(WireworldError::BackendResource(_))));
        assert!(simulation.is_faulted());
        assert!(matches!(simulation.step(1), Err(WireworldError::Faulted)));
        assert!(matches!(simulation.export(&Palette::default()), Err(WireworldError::Faulted)));

        simulation.load_cells(&[W, W], 2, 1).unwrap();
        assert!(!simulation.is_faulted());
        assert_eq!(bytes(&mut simulation), vec![W, W]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut simulation = Simulation::new(cpu(), 2, 2, SimulationOptions::default()).unwrap();
        simulation.release();
        simulation.release();
        assert!(simulation.step(1).is_err());
        assert!(simulation.export(&Palette::default()).is_err());
        assert!(simulation.load_cells(&[E; 4], 2, 2).is_err());
    }

    #[test]
    fn test_stray_color_is_background() {
        let palette = Palette::default();
        let mut image = RgbaImage::from_pixel(3, 1, palette.wire);
        image.put_pixel(2, 0, Rgba([0x12, 0x34, 0x56, 0xff]));
        let mut simulation = Simulation::from_image(
            cpu(),
            &DynamicImage::ImageRgba8(image),
            &palette,
            SimulationOptions::default(),
        )
        .unwrap();
        assert_eq!(bytes(&mut simulation), vec![W, W, E]);
    }

    #[test]
    fn test_gpu_agrees_with_cpu() {
        let Ok(gpu) = crate::simulation::gpu_simulation::GpuBackend::new() else {
            return;
        };
        let palette = Palette::default();
        let image = ring_image(&palette);
        let mut on_gpu = Simulation::from_image(Box::new(gpu), &image, &palette, SimulationOptions::default()).unwrap();
        let mut on_cpu = Simulation::from_image(cpu(), &image, &palette, SimulationOptions::default()).unwrap();

        on_gpu.step(7).unwrap();
        on_cpu.step(7).unwrap();
        assert_eq!(bytes(&mut on_gpu), bytes(&mut on_cpu));
        assert!(on_gpu.front_texture_view().is_some());
        assert!(on_cpu.front_texture_view().is_none());
    }

    fn cell_strategy() -> impl Strategy<Value = u8> {
        prop::sample::select(vec![E, W, W, W, T, H])
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn test_step_n_equals_n_single_steps(
            width in 1u32..9,
            height in 1u32..9,
            seed in prop::collection::vec(cell_strategy(), 64),
            n in 1i64..8,
            bounded in any::<bool>(),
        ) {
            let cells = &seed[..(width * height) as usize];
            let options = SimulationOptions {
                edges: if bounded { EdgeMode::Bounded } else { EdgeMode::Wrap },
            };

            let mut batched = Simulation::from_cells(cpu(), width, height, cells, options).unwrap();
            let mut single = Simulation::from_cells(cpu(), width, height, cells, options).unwrap();
            batched.step(n).unwrap();
            for _ in 0..n {
                single.step(1).unwrap();
            }

            let mut reference = cells.to_vec();
            for _ in 0..n {
                reference = rule::evaluate_grid(&reference, width, height, options.edges);
            }

            let batched = bytes(&mut batched);
            prop_assert_eq!(&batched, &bytes(&mut single));
            prop_assert_eq!(&batched, &reference);
        }
    }
}

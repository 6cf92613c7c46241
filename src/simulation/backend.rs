//! The seam between the simulation driver and the hardware that runs the kernel.

use bevy::render::render_resource::TextureView;
use std::fmt;

use crate::error::WireworldResult;

/// How neighbour lookups behave at the grid boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EdgeMode {
    /// Coordinates wrap to the opposite edge (toroidal grid).
    #[default]
    Wrap,
    /// Cells outside the grid read as `Empty`.
    Bounded,
}

/// Handle to a 2D cell surface owned by a [`ComputeBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub(crate) u32);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Capabilities every kernel host provides.
///
/// A backend owns an arena of equally addressable surfaces holding one byte of
/// cell state per cell. Passes queued with [`dispatch`](Self::dispatch) run in
/// order; [`read`](Self::read) observes every pass queued before it.
pub trait ComputeBackend: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &str;

    /// Allocate a zeroed (all `Empty`) surface.
    fn allocate(&mut self, width: u32, height: u32) -> WireworldResult<SurfaceId>;

    /// Free a surface. Unknown or already released handles are ignored.
    fn release(&mut self, surface: SurfaceId);

    /// Overwrite every cell of `surface`. `cells.len()` must equal the surface area.
    fn write(&mut self, surface: SurfaceId, cells: &[u8]) -> WireworldResult<()>;

    /// Read every cell of `surface`, blocking until queued passes have finished.
    fn read(&mut self, surface: SurfaceId) -> WireworldResult<Vec<u8>>;

    /// Queue one kernel pass reading `input` and writing `output`.
    fn dispatch(&mut self, input: SurfaceId, output: SurfaceId, edges: EdgeMode) -> WireworldResult<()>;

    /// Hand queued passes to the hardware without waiting for them.
    fn submit(&mut self) -> WireworldResult<()> {
        Ok(())
    }

    /// Drop the kernel program. Later dispatches fail.
    fn release_kernel(&mut self) {}

    /// Texture view of a surface, for backends whose surfaces live on the GPU.
    fn texture_view(&self, _surface: SurfaceId) -> Option<&TextureView> {
        None
    }
}

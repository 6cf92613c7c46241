//! One generation of cell state held in backend storage.

use crate::cell::CellState;
use crate::error::{WireworldError, WireworldResult};
use crate::simulation::backend::{ComputeBackend, SurfaceId};

/// Something that can be exposed to a consumer as a read-only texture unit.
pub trait Bindable {
    fn bind(&mut self, unit: u32) -> WireworldResult<()>;
    fn unbind(&mut self, unit: u32) -> WireworldResult<()>;
}

/// Role a grid currently plays in a kernel pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindState {
    #[default]
    Unbound,
    /// Readable input on the given unit
    Input(u32),
    /// Write destination of the kernel
    Target,
}

/// A `width x height` cell surface plus its binding role.
///
/// Backend storage is owned by the backend; the grid holds the handle. The
/// owning simulation passes the backend in for every operation that touches
/// storage.
#[derive(Debug)]
pub struct Grid {
    surface: Option<SurfaceId>,
    width: u32,
    height: u32,
    state: BindState,
}

impl Grid {
    /// Allocate an all-`Empty` grid.
    pub fn allocate(backend: &mut dyn ComputeBackend, width: u32, height: u32) -> WireworldResult<Self> {
        if width == 0 || height == 0 {
            return Err(WireworldError::InvalidDimensions { width, height });
        }
        let surface = backend.allocate(width, height)?;
        Ok(Self {
            surface: Some(surface),
            width,
            height,
            state: BindState::Unbound,
        })
    }

    /// Free backend storage. Safe to call any number of times.
    pub fn release(&mut self, backend: &mut dyn ComputeBackend) {
        if let Some(surface) = self.surface.take() {
            backend.release(surface);
        }
        self.state = BindState::Unbound;
    }

    pub fn is_allocated(&self) -> bool {
        self.surface.is_some()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bind_state(&self) -> BindState {
        self.state
    }

    /// Backend handle of the grid's storage.
    pub fn surface(&self) -> WireworldResult<SurfaceId> {
        self.surface
            .ok_or_else(|| WireworldError::BackendResource("grid has been released".to_string()))
    }

    /// Overwrite every cell. Non-canonical bytes are stored as `Empty`.
    pub fn set_data(
        &mut self,
        backend: &mut dyn ComputeBackend,
        cells: &[u8],
        width: u32,
        height: u32,
    ) -> WireworldResult<()> {
        let expected = width as usize * height as usize;
        if cells.len() != expected {
            return Err(WireworldError::SizeMismatch {
                expected,
                actual: cells.len(),
            });
        }
        if (width, height) != (self.width, self.height) {
            return Err(WireworldError::SizeMismatch {
                expected: self.len(),
                actual: expected,
            });
        }

        let canonical: Vec<u8> = cells.iter().map(|&cell| CellState::canonicalize(cell)).collect();
        backend.write(self.surface()?, &canonical)
    }

    /// Read every cell back. Blocks until queued passes are done; keep it out of
    /// per-frame paths.
    pub fn read_data(&self, backend: &mut dyn ComputeBackend) -> WireworldResult<Vec<u8>> {
        backend.read(self.surface()?)
    }

    pub fn bind_as_target(&mut self) -> WireworldResult<()> {
        self.surface()?;
        match self.state {
            BindState::Input(unit) => Err(WireworldError::BindingConflict(format!(
                "grid is bound as input on unit {unit}"
            ))),
            _ => {
                self.state = BindState::Target;
                Ok(())
            }
        }
    }

    pub fn unbind_target(&mut self) {
        if self.state == BindState::Target {
            self.state = BindState::Unbound;
        }
    }
}

impl Bindable for Grid {
    fn bind(&mut self, unit: u32) -> WireworldResult<()> {
        self.surface()?;
        match self.state {
            BindState::Target => Err(WireworldError::BindingConflict(
                "grid is bound as kernel target".to_string(),
            )),
            _ => {
                self.state = BindState::Input(unit);
                Ok(())
            }
        }
    }

    fn unbind(&mut self, unit: u32) -> WireworldResult<()> {
        match self.state {
            BindState::Input(bound) if bound == unit => {
                self.state = BindState::Unbound;
                Ok(())
            }
            BindState::Input(bound) => Err(WireworldError::BindingConflict(format!(
                "grid is bound on unit {bound}, not {unit}"
            ))),
            _ => Ok(()),
        }
    }
}

use bevy::log::debug;
use bevy::tasks::{ComputeTaskPool, TaskPool};
use std::collections::HashMap;

use crate::error::{WireworldError, WireworldResult};
use crate::simulation::backend::{ComputeBackend, EdgeMode, SurfaceId};
use crate::simulation::rule;

/// Surface storage for the CPU backend
struct CpuSurface {
    width: u32,
    height: u32,
    cells: Vec<u8>,
}

/// Kernel host that evaluates the rule on bevy's compute task pool.
///
/// Each pass splits the output surface into bands of whole rows and runs one
/// task per band. Tasks share the input surface read-only and each writes only
/// its own band, so no synchronisation is needed beyond the scope join.
#[derive(Default)]
pub struct CpuBackend {
    surfaces: HashMap<u32, CpuSurface>,
    next_id: u32,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn surface(&self, id: SurfaceId) -> WireworldResult<&CpuSurface> {
        self.surfaces
            .get(&id.0)
            .ok_or_else(|| WireworldError::BackendResource(format!("unknown {id}")))
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn allocate(&mut self, width: u32, height: u32) -> WireworldResult<SurfaceId> {
        if width == 0 || height == 0 {
            return Err(WireworldError::InvalidDimensions { width, height });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.surfaces.insert(
            id,
            CpuSurface {
                width,
                height,
                cells: vec![0; width as usize * height as usize],
            },
        );
        Ok(SurfaceId(id))
    }

    fn release(&mut self, surface: SurfaceId) {
        self.surfaces.remove(&surface.0);
    }

    fn write(&mut self, surface: SurfaceId, cells: &[u8]) -> WireworldResult<()> {
        let target = self
            .surfaces
            .get_mut(&surface.0)
            .ok_or_else(|| WireworldError::BackendResource(format!("unknown {surface}")))?;
        if cells.len() != target.cells.len() {
            return Err(WireworldError::SizeMismatch {
                expected: target.cells.len(),
                actual: cells.len(),
            });
        }
        target.cells.copy_from_slice(cells);
        Ok(())
    }

    fn read(&mut self, surface: SurfaceId) -> WireworldResult<Vec<u8>> {
        Ok(self.surface(surface)?.cells.clone())
    }

    fn dispatch(&mut self, input: SurfaceId, output: SurfaceId, edges: EdgeMode) -> WireworldResult<()> {
        if input == output {
            return Err(WireworldError::BindingConflict(format!(
                "{input} cannot be both kernel input and output"
            )));
        }

        // Take the output out of the map so the input can stay borrowed.
        let mut target = self
            .surfaces
            .remove(&output.0)
            .ok_or_else(|| WireworldError::BackendResource(format!("unknown {output}")))?;

        let result = match self.surface(input) {
            Ok(source) if source.width != target.width || source.height != target.height => {
                Err(WireworldError::SizeMismatch {
                    expected: target.cells.len(),
                    actual: source.cells.len(),
                })
            }
            Ok(source) => {
                evaluate_parallel(&source.cells, &mut target.cells, source.width, source.height, edges);
                Ok(())
            }
            Err(err) => Err(err),
        };

        self.surfaces.insert(output.0, target);
        result
    }
}

/// Evaluate one generation from `input` into `output` using the compute task pool.
fn evaluate_parallel(input: &[u8], output: &mut [u8], width: u32, height: u32, edges: EdgeMode) {
    let pool = ComputeTaskPool::get_or_init(TaskPool::default);

    // A few bands per thread keeps tasks balanced without spawning per row.
    let bands = (pool.thread_num().max(1) * 4).min(height as usize);
    let rows_per_band = (height as usize).div_ceil(bands);
    let band_len = rows_per_band * width as usize;

    debug!(
        "CPU pass over {}x{} in {} bands of {} rows",
        width, height, bands, rows_per_band
    );

    pool.scope(|scope| {
        for (band, chunk) in output.chunks_mut(band_len).enumerate() {
            scope.spawn(async move {
                let first_row = band * rows_per_band;
                for (offset, row) in chunk.chunks_mut(width as usize).enumerate() {
                    rule::evaluate_row(input, width, height, (first_row + offset) as u32, edges, row);
                }
            });
        }
    });
}

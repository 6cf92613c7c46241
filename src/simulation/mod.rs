//! Wireworld simulation core
//!
//! The transition rule runs as a compute kernel on one of two backends:
//! a wgpu compute shader or a parallel CPU fallback. A [`Simulation`] owns a
//! pair of grids on its backend and swaps them after every generation.

pub mod backend;
pub mod compute_pipeline;
pub mod cpu_simulation;
pub mod driver;
pub mod gpu_simulation;
pub mod grid;
pub mod rule;

pub use backend::{ComputeBackend, EdgeMode, SurfaceId};
pub use cpu_simulation::CpuBackend;
pub use driver::{Simulation, SimulationOptions, decode_image_file};
pub use gpu_simulation::GpuBackend;
pub use grid::{BindState, Bindable, Grid};

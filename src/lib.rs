//! Wireworld cellular automaton with a GPU compute backend.
//!
//! The engine lives in [`simulation`]; [`app`] hosts it in a bevy window or
//! runs it headless from the command line.

pub mod app;
pub mod cell;
pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod palette;
pub mod simulation;
pub mod state_files;

pub use cell::CellState;
pub use error::{WireworldError, WireworldResult};
pub use palette::Palette;
pub use simulation::{EdgeMode, Simulation, SimulationOptions};

//! Command line configuration.

use bevy::prelude::Resource;
use clap::{Parser, ValueEnum};
use image::Rgba;
use std::path::PathBuf;

use crate::cell::CellState;
use crate::clock::IntervalOverflow;
use crate::palette::{Palette, parse_hex_color};
use crate::simulation::{EdgeMode, SimulationOptions};

/// Which compute backend runs the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendKind {
    /// wgpu compute shader; falls back to cpu when no adapter is found
    #[default]
    Gpu,
    /// Parallel CPU evaluation
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EdgeArg {
    #[default]
    Wrap,
    Bounded,
}

impl From<EdgeArg> for EdgeMode {
    fn from(value: EdgeArg) -> Self {
        match value {
            EdgeArg::Wrap => EdgeMode::Wrap,
            EdgeArg::Bounded => EdgeMode::Bounded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OverflowArg {
    #[default]
    Clamp,
    Wrap,
}

impl From<OverflowArg> for IntervalOverflow {
    fn from(value: OverflowArg) -> Self {
        match value {
            OverflowArg::Clamp => IntervalOverflow::Clamp,
            OverflowArg::Wrap => IntervalOverflow::Wrap,
        }
    }
}

/// Wireworld cellular automaton simulator with GPU compute.
#[derive(Debug, Parser)]
#[command(name = "wireworld-gpu", version, about, long_about = None)]
pub struct Cli {
    /// Image holding the initial state (PNG, GIF, JPEG or PNM).
    #[arg(value_name = "IMAGE")]
    pub input: PathBuf,

    /// Window width in pixels.
    #[arg(long, default_value_t = 1280, value_parser = clap::value_parser!(u32).range(1..))]
    pub width: u32,

    /// Window height in pixels.
    #[arg(long, default_value_t = 600, value_parser = clap::value_parser!(u32).range(1..))]
    pub height: u32,

    /// Start in borderless fullscreen.
    #[arg(long)]
    pub fullscreen: bool,

    /// Color of empty cells as hex rrggbb.
    #[arg(long, value_name = "HEX", value_parser = parse_hex_color)]
    pub pal_empty: Option<Rgba<u8>>,

    /// Color of wire cells as hex rrggbb.
    #[arg(long, value_name = "HEX", value_parser = parse_hex_color)]
    pub pal_wire: Option<Rgba<u8>>,

    /// Color of electron heads as hex rrggbb.
    #[arg(long, value_name = "HEX", value_parser = parse_hex_color)]
    pub pal_head: Option<Rgba<u8>>,

    /// Color of electron tails as hex rrggbb.
    #[arg(long, value_name = "HEX", value_parser = parse_hex_color)]
    pub pal_tail: Option<Rgba<u8>>,

    /// Compute backend.
    #[arg(long, value_enum, default_value_t = BackendKind::Gpu)]
    pub backend: BackendKind,

    /// Grid edge handling.
    #[arg(long, value_enum, default_value_t = EdgeArg::Wrap)]
    pub edges: EdgeArg,

    /// What slowing down past one second per step does.
    #[arg(long, value_enum, default_value_t = OverflowArg::Clamp)]
    pub interval_overflow: OverflowArg,

    /// Run this many generations without a window, then save to --output.
    #[arg(long, value_name = "N", requires = "output")]
    pub steps: Option<u64>,

    /// Where the headless run writes its final state.
    #[arg(long, value_name = "PATH", requires = "steps")]
    pub output: Option<PathBuf>,
}

/// Batch run requested on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessRun {
    pub steps: u64,
    pub output: PathBuf,
}

/// Validated runtime configuration
#[derive(Resource, Debug, Clone)]
pub struct AppConfig {
    pub input: PathBuf,
    pub window_size: (u32, u32),
    pub fullscreen: bool,
    pub palette: Palette,
    pub backend: BackendKind,
    pub simulation: SimulationOptions,
    pub interval_overflow: IntervalOverflow,
    pub headless: Option<HeadlessRun>,
}

impl From<Cli> for AppConfig {
    fn from(cli: Cli) -> Self {
        let mut palette = Palette::default();
        for (state, color) in [
            (CellState::Empty, cli.pal_empty),
            (CellState::Wire, cli.pal_wire),
            (CellState::Head, cli.pal_head),
            (CellState::Tail, cli.pal_tail),
        ] {
            if let Some(color) = color {
                palette.set(state, color);
            }
        }

        let headless = match (cli.steps, cli.output) {
            (Some(steps), Some(output)) => Some(HeadlessRun { steps, output }),
            _ => None,
        };

        Self {
            input: cli.input,
            window_size: (cli.width, cli.height),
            fullscreen: cli.fullscreen,
            palette,
            backend: cli.backend,
            simulation: SimulationOptions {
                edges: cli.edges.into(),
            },
            interval_overflow: cli.interval_overflow.into(),
            headless,
        }
    }
}

//! The Wireworld transition function.
//!
//! These functions are the CPU rendition of the kernel in
//! `assets/shaders/wireworld.wgsl`; both must stay in agreement.

use crate::cell::CellState;
use crate::simulation::backend::EdgeMode;

/// Moore neighbourhood offsets, `(dx, dy)`.
pub const NEIGHBOUR_OFFSETS: [(i32, i32); 8] = [
    (-1, 1),
    (0, 1),
    (1, 1),
    (-1, 0),
    (1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Next state of a single cell given how many of its neighbours are heads.
#[inline]
pub fn next_state(cell: CellState, head_neighbours: u8) -> CellState {
    match cell {
        CellState::Empty => CellState::Empty,
        CellState::Wire if head_neighbours == 1 || head_neighbours == 2 => CellState::Head,
        CellState::Wire => CellState::Wire,
        CellState::Head => CellState::Tail,
        CellState::Tail => CellState::Wire,
    }
}

/// Row-major index of `(x, y)`, computed in `usize` so large grids do not wrap.
#[inline]
pub fn cell_index(width: u32, x: u32, y: u32) -> usize {
    y as usize * width as usize + x as usize
}

/// State of the cell at `(x, y)`, resolving out-of-range coordinates
/// according to `edges`.
#[inline]
fn cell_at(cells: &[u8], width: u32, height: u32, x: i64, y: i64, edges: EdgeMode) -> CellState {
    let (w, h) = (width as i64, height as i64);
    let (x, y) = match edges {
        EdgeMode::Wrap => (x.rem_euclid(w), y.rem_euclid(h)),
        EdgeMode::Bounded => {
            if x < 0 || y < 0 || x >= w || y >= h {
                return CellState::Empty;
            }
            (x, y)
        }
    };
    CellState::from_byte(cells[cell_index(width, x as u32, y as u32)])
}

/// Number of `Head` cells among the 8 neighbours of `(x, y)`.
pub fn count_head_neighbours(
    cells: &[u8],
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    edges: EdgeMode,
) -> u8 {
    NEIGHBOUR_OFFSETS
        .iter()
        .filter(|(dx, dy)| {
            cell_at(cells, width, height, x as i64 + *dx as i64, y as i64 + *dy as i64, edges)
                == CellState::Head
        })
        .count() as u8
}

/// Evaluate row `y` of the next generation into `out`.
///
/// `input` is the whole previous generation; `out` is exactly one row.
pub fn evaluate_row(input: &[u8], width: u32, height: u32, y: u32, edges: EdgeMode, out: &mut [u8]) {
    for (x, target) in out.iter_mut().enumerate() {
        let x = x as u32;
        let cell = CellState::from_byte(input[cell_index(width, x, y)]);
        // Only wires care about their neighbourhood.
        let heads = if cell == CellState::Wire {
            count_head_neighbours(input, width, height, x, y, edges)
        } else {
            0
        };
        *target = next_state(cell, heads).as_byte();
    }
}

/// Sequential reference evaluation of a whole generation.
pub fn evaluate_grid(input: &[u8], width: u32, height: u32, edges: EdgeMode) -> Vec<u8> {
    let mut output = vec![0u8; input.len()];
    for (y, row) in output.chunks_mut(width as usize).enumerate() {
        evaluate_row(input, width, height, y as u32, edges, row);
    }
    output
}

use std::fmt;

/// Wireworld cell states.
///
/// The discriminants are the bytes stored in a grid surface. The compute
/// kernel in `assets/shaders/wireworld.wgsl` uses the same values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CellState {
    #[default]
    Empty = 0,
    Wire = 50,
    Tail = 100,
    Head = 255,
}

impl CellState {
    /// Every state, in palette order.
    pub const ALL: [CellState; 4] = [
        CellState::Empty,
        CellState::Wire,
        CellState::Head,
        CellState::Tail,
    ];

    /// Convert from a stored byte. Unknown values become `Empty`.
    pub fn from_byte(value: u8) -> Self {
        match value {
            50 => CellState::Wire,
            100 => CellState::Tail,
            255 => CellState::Head,
            _ => CellState::Empty,
        }
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Replace any non-canonical byte with `Empty`.
    #[inline]
    pub fn canonicalize(value: u8) -> u8 {
        Self::from_byte(value).as_byte()
    }

    pub fn name(self) -> &'static str {
        match self {
            CellState::Empty => "empty",
            CellState::Wire => "wire",
            CellState::Head => "head",
            CellState::Tail => "tail",
        }
    }
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

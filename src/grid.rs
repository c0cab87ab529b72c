use serde::{Deserialize, Serialize};

/// One decoded grid of sensor readings.
pub type Frame = Grid<u16>;

/// Side length of the all-zero frame published when acquisition fails.
pub const FALLBACK_SIZE: usize = 10;

/// Row-major 2D grid. Dimensions are fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    cells: Vec<T>,
}

impl<T: Clone> Grid<T> {
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            rows,
            cols,
            cells: vec![value; rows * cols],
        }
    }

    /// Wraps `cells` as a `rows x cols` grid; `None` if the length does not match.
    pub fn from_vec(rows: usize, cols: usize, cells: Vec<T>) -> Option<Self> {
        (cells.len() == rows * cols).then_some(Self { rows, cols, cells })
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut cells = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                cells.push(f(r, c));
            }
        }
        Self { rows, cols, cells }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, row: usize) -> &[T] {
        &self.cells[row * self.cols..(row + 1) * self.cols]
    }

    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Grid<U> {
        Grid {
            rows: self.rows,
            cols: self.cols,
            cells: self.cells.iter().map(f).collect(),
        }
    }

    /// Rotates clockwise by `rotation`.
    pub fn rotated(&self, rotation: Rotation) -> Self {
        let (rows, cols) = (self.rows, self.cols);
        let at = |r: usize, c: usize| self.cells[r * cols + c].clone();
        match rotation {
            Rotation::Deg0 => self.clone(),
            Rotation::Deg90 => Self::from_fn(cols, rows, |r, c| at(rows - 1 - c, r)),
            Rotation::Deg180 => Self::from_fn(rows, cols, |r, c| at(rows - 1 - r, cols - 1 - c)),
            Rotation::Deg270 => Self::from_fn(cols, rows, |r, c| at(c, cols - 1 - r)),
        }
    }

    /// Flips left to right.
    pub fn mirrored(&self) -> Self {
        let cols = self.cols;
        Self::from_fn(self.rows, cols, |r, c| self.cells[r * cols + (cols - 1 - c)].clone())
    }
}

impl Frame {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0)
    }

    pub fn fallback() -> Self {
        Self::zeros(FALLBACK_SIZE, FALLBACK_SIZE)
    }

    pub fn peak(&self) -> u16 {
        self.cells.iter().copied().max().unwrap_or(0)
    }
}

/// Clockwise rotation in quarter turns. Serialized as degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Composition: rotating by `self` and then by `other`.
    pub fn then(self, other: Rotation) -> Rotation {
        Rotation::try_from((self.degrees() + other.degrees()) % 360).unwrap_or_default()
    }

    pub fn next(self) -> Rotation {
        self.then(Rotation::Deg90)
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(format!("rotation must be 0, 90, 180 or 270, got {other}")),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Grid<u16> {
        // 2 x 3
        Grid::from_vec(2, 3, vec![1, 2, 3, 4, 5, 6]).unwrap()
    }

    #[test]
    fn rotate_90_is_clockwise() {
        let rotated = sample().rotated(Rotation::Deg90);
        assert_eq!((rotated.rows(), rotated.cols()), (3, 2));
        assert_eq!(rotated.cells(), &[4, 1, 5, 2, 6, 3]);
    }

    #[test]
    fn rotate_270_is_counter_clockwise() {
        let rotated = sample().rotated(Rotation::Deg270);
        assert_eq!(rotated.cells(), &[3, 6, 2, 5, 1, 4]);
    }

    #[test]
    fn four_quarter_turns_are_identity() {
        let grid = sample();
        let mut turned = grid.clone();
        for _ in 0..4 {
            turned = turned.rotated(Rotation::Deg90);
        }
        assert_eq!(turned, grid);
    }

    #[test]
    fn half_turn_is_two_quarter_turns() {
        let grid = sample();
        assert_eq!(
            grid.rotated(Rotation::Deg180),
            grid.rotated(Rotation::Deg90).rotated(Rotation::Deg90)
        );
        assert_eq!(
            grid.rotated(Rotation::Deg270),
            grid.rotated(Rotation::Deg180).rotated(Rotation::Deg90)
        );
    }

    #[test]
    fn mirror_is_an_involution() {
        let grid = sample();
        assert_eq!(grid.mirrored().cells(), &[3, 2, 1, 6, 5, 4]);
        assert_eq!(grid.mirrored().mirrored(), grid);
    }

    #[test]
    fn rotation_composition_wraps() {
        assert_eq!(Rotation::Deg270.then(Rotation::Deg180), Rotation::Deg90);
        assert_eq!(Rotation::Deg270.next(), Rotation::Deg0);
        assert!(Rotation::try_from(45).is_err());
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(Grid::from_vec(2, 2, vec![0u16; 3]).is_none());
    }

    #[test]
    fn fallback_is_ten_by_ten_zeros() {
        let frame = Frame::fallback();
        assert_eq!((frame.rows(), frame.cols()), (10, 10));
        assert_eq!(frame.peak(), 0);
    }
}

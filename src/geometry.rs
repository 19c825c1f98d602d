//! Cells, rectangular windows and tile coordinates on the bounded plane.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single integer cell on the plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const ORIGIN: Cell = Cell { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Cell { x, y }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Row-major index of a cell relative to a window's min corner.
pub type CellIndex = u32;

/// Inclusive rectangle of cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Bounds {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Bounds {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Square window of side `2 * radius + 1` centred on `center`, clipped to the `i32` range.
    pub fn centered(center: Cell, radius: i32) -> Self {
        Bounds::new(
            center.x.saturating_sub(radius),
            center.y.saturating_sub(radius),
            center.x.saturating_add(radius),
            center.y.saturating_add(radius),
        )
    }

    pub fn width(&self) -> i32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> i32 {
        self.max_y - self.min_y + 1
    }

    pub fn is_empty(&self) -> bool {
        self.max_x < self.min_x || self.max_y < self.min_y
    }

    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width() as usize * self.height() as usize
        }
    }

    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= self.min_x && cell.x <= self.max_x && cell.y >= self.min_y && cell.y <= self.max_y
    }

    pub fn index_of(&self, cell: Cell) -> Option<CellIndex> {
        if !self.contains(cell) {
            return None;
        }
        let local_x = (cell.x - self.min_x) as u32;
        let local_y = (cell.y - self.min_y) as u32;
        Some(local_y * self.width() as u32 + local_x)
    }

    pub fn cell_at(&self, index: CellIndex) -> Option<Cell> {
        if self.is_empty() || index as usize >= self.area() {
            return None;
        }
        let width = self.width() as u32;
        Some(Cell::new(
            self.min_x + (index % width) as i32,
            self.min_y + (index / width) as i32,
        ))
    }

    #[cfg(test)]
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (self.min_y..=self.max_y)
            .flat_map(move |y| (self.min_x..=self.max_x).map(move |x| Cell::new(x, y)))
    }
}

/// Coordinate of a fixed-size square tile; tile `(x, y)` starts at cell `(x * S, y * S)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        TileCoord { x, y }
    }

    pub fn containing(cell: Cell, size: u32) -> Self {
        let size = size as i32;
        TileCoord::new(cell.x.div_euclid(size), cell.y.div_euclid(size))
    }

    pub fn bounds(&self, size: u32) -> Bounds {
        let size = size as i32;
        Bounds::new(
            self.x * size,
            self.y * size,
            self.x * size + size - 1,
            self.y * size + size - 1,
        )
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        TileCoord::new(self.x + dx, self.y + dy)
    }
}

/// The configured world extent plus its tile grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Plane {
    pub bounds: Bounds,
    pub tile_size: u32,
}

impl Plane {
    pub fn new(bounds: Bounds, tile_size: u32) -> Self {
        Plane { bounds, tile_size }
    }

    pub fn contains(&self, cell: Cell) -> bool {
        self.bounds.contains(cell)
    }

    /// Range of tiles that overlap the plane, inclusive.
    pub fn tile_range(&self) -> (TileCoord, TileCoord) {
        let b = &self.bounds;
        let min = TileCoord::containing(Cell::new(b.min_x, b.min_y), self.tile_size);
        let max = TileCoord::containing(Cell::new(b.max_x, b.max_y), self.tile_size);
        (min, max)
    }

    pub fn contains_tile(&self, tile: TileCoord) -> bool {
        let (min, max) = self.tile_range();
        tile.x >= min.x && tile.x <= max.x && tile.y >= min.y && tile.y <= max.y
    }

    pub fn tile_of(&self, cell: Cell) -> TileCoord {
        TileCoord::containing(cell, self.tile_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip() {
        let window = Bounds::new(-3, 4, 2, 9);
        assert_eq!(window.width(), 6);
        assert_eq!(window.index_of(Cell::new(-3, 4)), Some(0));
        assert_eq!(window.index_of(Cell::new(2, 4)), Some(5));
        assert_eq!(window.index_of(Cell::new(-3, 5)), Some(6));
        assert_eq!(window.cell_at(7), Some(Cell::new(-2, 5)));
        assert_eq!(window.index_of(Cell::new(3, 4)), None);
        assert_eq!(window.cell_at(36), None);
    }

    #[test]
    fn test_centered_window_clips_at_coordinate_limits() {
        assert_eq!(Bounds::centered(Cell::new(0, 5), 2), Bounds::new(-2, 3, 2, 7));
        let edge = Bounds::centered(Cell::new(i32::MAX - 1, i32::MIN), 4);
        assert_eq!(edge, Bounds::new(i32::MAX - 5, i32::MIN, i32::MAX, i32::MIN + 4));
    }

    #[test]
    fn test_tile_containing_negative_cells() {
        assert_eq!(TileCoord::containing(Cell::new(0, 0), 64), TileCoord::new(0, 0));
        assert_eq!(TileCoord::containing(Cell::new(63, 64), 64), TileCoord::new(0, 1));
        assert_eq!(TileCoord::containing(Cell::new(-1, -64), 64), TileCoord::new(-1, -1));
        assert_eq!(TileCoord::containing(Cell::new(-65, 0), 64), TileCoord::new(-2, 0));
    }

    #[test]
    fn test_plane_tile_range() {
        let plane = Plane::new(Bounds::new(-1000, -1000, 1000, 1000), 64);
        let (min, max) = plane.tile_range();
        assert_eq!(min, TileCoord::new(-16, -16));
        assert_eq!(max, TileCoord::new(15, 15));
        assert!(plane.contains_tile(TileCoord::new(3, 3)));
        assert!(!plane.contains_tile(TileCoord::new(16, 0)));
    }

    #[test]
    fn test_tile_bounds() {
        let bounds = TileCoord::new(-1, 2).bounds(64);
        assert_eq!(bounds, Bounds::new(-64, 128, -1, 191));
        assert_eq!(bounds.area(), 64 * 64);
    }
}

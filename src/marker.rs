use crate::geometry::Cell;
use serde::{Deserialize, Serialize};

pub type MarkerId = u64;
pub type OwnerId = u16;

/// A player-owned base on the plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub id: MarkerId,
    pub owner: OwnerId,
    pub x: i32,
    pub y: i32,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds of the last write.
    pub updated_at: i64,
}

impl Marker {
    pub fn cell(&self) -> Cell {
        Cell::new(self.x, self.y)
    }
}

/// Markers flattened to an owner-agnostic point list.
pub fn cells(markers: &[Marker]) -> Vec<Cell> {
    markers.iter().map(Marker::cell).collect()
}

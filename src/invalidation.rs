use crate::cache::TileCache;
use crate::events::{MutationEvent, Subscriber};
use crate::geometry::{Cell, Plane, TileCoord};
use anyhow::{anyhow, Result};
use tracing::debug;

/// Evicts cached tiles touched by marker mutations.
pub struct InvalidationService {
    cache: TileCache,
    plane: Plane,
}

impl InvalidationService {
    pub fn new(cache: TileCache, plane: Plane) -> Self {
        InvalidationService { cache, plane }
    }

    /// The tile owning `cell`, plus the neighbour across any tile edge the cell sits on.
    ///
    /// Only the owning tile can change; the neighbours are an extra margin.
    pub fn affected_tiles(&self, cell: Cell) -> Vec<TileCoord> {
        let size = self.plane.tile_size as i32;
        let owner = self.plane.tile_of(cell);
        let on_left = cell.x.rem_euclid(size) == 0;
        let on_top = cell.y.rem_euclid(size) == 0;

        let mut tiles = vec![owner];
        if on_left {
            tiles.push(owner.offset(-1, 0));
        }
        if on_top {
            tiles.push(owner.offset(0, -1));
        }
        tiles.retain(|tile| self.plane.contains_tile(*tile));
        tiles
    }

    pub fn invalidate_cell(&self, cell: Cell) -> Result<usize> {
        if !self.plane.contains(cell) {
            return Err(anyhow!("Mutation at ({}, {}) lies outside the plane", cell.x, cell.y));
        }
        let mut evicted = 0;
        for tile in self.affected_tiles(cell) {
            if self.cache.invalidate(tile) {
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}

impl Subscriber for InvalidationService {
    fn name(&self) -> &str {
        "tile-invalidation"
    }

    fn notify(&self, event: &MutationEvent) -> Result<()> {
        let mut evicted = 0;
        let mut failed = Vec::new();
        for cell in event.cells() {
            match self.invalidate_cell(cell) {
                Ok(n) => evicted += n,
                Err(e) => failed.push(e),
            }
        }
        debug!(event = event.kind(), evicted, "Invalidated tiles");
        match failed.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

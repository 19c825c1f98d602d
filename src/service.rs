//! Marker placement, tile fetches and restriction queries over shared state.

use crate::cache::TileCache;
use crate::config::Config;
use crate::error::ServiceError;
use crate::events::{MutationEvent, MutationEventBus};
use crate::geometry::{Bounds, Cell, CellIndex, Plane, TileCoord};
use crate::marker::{self, Marker, OwnerId};
use crate::restriction::{self, Direction, SlopeSet, ViewportTracker};
use crate::store::MarkerStore;
use crate::tile::{MarkerTileGenerator, Tile, TileGenerator};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// A tile plus the metadata sent alongside it.
#[derive(Clone, Debug)]
pub struct TileResponse {
    pub tile: Arc<Tile>,
    pub bounds: Bounds,
    pub max_age_secs: u16,
}

impl TileResponse {
    pub fn etag(&self) -> String {
        self.tile.etag()
    }
}

pub struct MapService {
    plane: Plane,
    slopes: SlopeSet,
    seed_world_origin: bool,
    viewport_radius: i32,
    tile_max_age_secs: u16,
    store: Arc<dyn MarkerStore>,
    cache: TileCache,
    generator: Arc<dyn TileGenerator>,
    bus: Arc<MutationEventBus>,
}

impl MapService {
    pub fn new(
        config: &Config,
        store: Arc<dyn MarkerStore>,
        cache: TileCache,
        bus: Arc<MutationEventBus>,
    ) -> Self {
        let generator: Arc<dyn TileGenerator> =
            Arc::new(MarkerTileGenerator::new(Arc::clone(&store), config.tile_size));
        MapService {
            plane: config.plane(),
            slopes: config.slopes.resolve(),
            seed_world_origin: config.seed_world_origin,
            viewport_radius: config.viewport_radius,
            tile_max_age_secs: config.tile_max_age_secs,
            store,
            cache,
            generator,
            bus,
        }
    }

    /// Runs `f` on the blocking pool; tile fetches may read and write the disk store.
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&MapService) -> T + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || f(&service)).await?)
    }

    pub fn viewport(&self) -> ViewportTracker {
        ViewportTracker::new(self.viewport_radius)
    }

    pub fn generator(&self) -> &Arc<dyn TileGenerator> {
        &self.generator
    }

    fn check_cell(&self, cell: Cell) -> Result<(), ServiceError> {
        if self.plane.contains(cell) {
            Ok(())
        } else {
            Err(ServiceError::Validation(format!("cell {} is outside the plane", cell)))
        }
    }

    /// Cells whose lines restrict placement; an empty set may be seeded with the world origin.
    fn restriction_sources(&self, markers: &[Marker]) -> Vec<Cell> {
        if markers.is_empty() && self.seed_world_origin {
            vec![Cell::ORIGIN]
        } else {
            marker::cells(markers)
        }
    }

    fn publish(&self, event: MutationEvent) {
        let delivered = self.bus.publish(&event);
        debug!(event = event.kind(), delivered, "Published mutation");
    }

    pub fn place_marker(&self, owner: OwnerId, cell: Cell) -> Result<Marker, ServiceError> {
        self.check_cell(cell)?;
        let markers = self.store.all()?;
        if markers.iter().any(|m| m.owner == owner && m.cell() == cell) {
            return Err(ServiceError::Occupied(cell));
        }
        let sources = self.restriction_sources(&markers);
        let blockers = restriction::blockers(cell, &sources, &self.slopes);
        if !blockers.is_empty() {
            return Err(ServiceError::Restricted { cell, blockers });
        }

        let placed = self
            .store
            .insert_if_absent(owner, cell)?
            .ok_or(ServiceError::Occupied(cell))?;
        info!(owner, x = cell.x, y = cell.y, id = placed.id, "Marker placed");
        self.publish(MutationEvent::Created(placed));
        Ok(placed)
    }

    pub fn touch_marker(&self, owner: OwnerId, cell: Cell) -> Result<Marker, ServiceError> {
        self.check_cell(cell)?;
        let touched = self.store.touch(owner, cell)?.ok_or(ServiceError::NotFound(cell))?;
        self.publish(MutationEvent::Updated(touched));
        Ok(touched)
    }

    pub fn remove_marker(&self, owner: OwnerId, cell: Cell) -> Result<Marker, ServiceError> {
        self.check_cell(cell)?;
        let removed = self.store.delete(owner, cell)?.ok_or(ServiceError::NotFound(cell))?;
        info!(owner, x = cell.x, y = cell.y, id = removed.id, "Marker removed");
        self.publish(MutationEvent::Deleted(removed));
        Ok(removed)
    }

    /// Deletes every marker of `owner`, returning how many were removed.
    pub fn clear_markers(&self, owner: OwnerId) -> Result<usize, ServiceError> {
        let markers = self.store.delete_owner(owner)?;
        let count = markers.len();
        if count > 0 {
            info!(owner, count, "Markers cleared");
            self.publish(MutationEvent::BulkDeleted { owner, markers });
        }
        Ok(count)
    }

    pub fn fetch_tile(&self, coord: TileCoord) -> Result<TileResponse, ServiceError> {
        if !self.plane.contains_tile(coord) {
            return Err(ServiceError::Validation(format!(
                "tile ({}, {}) is outside the plane",
                coord.x, coord.y
            )));
        }
        let tile = self.cache.get_or_generate(coord, &self.generator)?;
        Ok(TileResponse {
            bounds: tile.bounds(),
            tile,
            max_age_secs: self.tile_max_age_secs,
        })
    }

    /// Returns the subset of `indices` that are restricted in the viewport centred on `origin`.
    ///
    /// `tracker` carries the peer's previous window so a scroll only scans the new border strip.
    pub fn restricted_cells(
        &self,
        tracker: &mut ViewportTracker,
        origin: Cell,
        direction: Direction,
        indices: &[CellIndex],
    ) -> Result<Vec<CellIndex>, ServiceError> {
        self.check_cell(origin)?;
        let window = tracker.window_for(origin);
        if let Some(bad) = indices.iter().find(|&&index| window.cell_at(index).is_none()) {
            return Err(ServiceError::Validation(format!(
                "cell index {} is outside the {}x{} window",
                bad,
                window.width(),
                window.height()
            )));
        }

        let generation = self.bus.generation();
        let markers = self.store.all()?;
        let sources = self.restriction_sources(&markers);
        let (restricted, scan) =
            tracker.update(origin, direction, &sources, &self.slopes, generation);
        debug!(
            x = origin.x,
            y = origin.y,
            ?direction,
            ?scan,
            restricted = restricted.len(),
            "Restriction query"
        );

        let restricted: HashSet<CellIndex> = restricted
            .into_iter()
            .filter_map(|cell| window.index_of(cell))
            .collect();
        Ok(indices.iter().copied().filter(|index| restricted.contains(index)).collect())
    }
}

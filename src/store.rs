//! Marker storage.

use crate::geometry::{Bounds, Cell};
use crate::marker::{Marker, MarkerId, OwnerId};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Marker store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed by `(owner, x, y)`; markers of different owners may share a cell.
pub trait MarkerStore: Send + Sync {
    fn all(&self) -> Result<Vec<Marker>, StoreError>;

    fn within(&self, bounds: &Bounds) -> Result<Vec<Marker>, StoreError>;

    /// Inserts a marker unless `owner` already has one at `cell`.
    fn insert_if_absent(&self, owner: OwnerId, cell: Cell) -> Result<Option<Marker>, StoreError>;

    /// Refreshes the last-write timestamp.
    fn touch(&self, owner: OwnerId, cell: Cell) -> Result<Option<Marker>, StoreError>;

    fn delete(&self, owner: OwnerId, cell: Cell) -> Result<Option<Marker>, StoreError>;

    fn delete_owner(&self, owner: OwnerId) -> Result<Vec<Marker>, StoreError>;
}

#[derive(Default)]
struct Inner {
    markers: HashMap<(OwnerId, Cell), Marker>,
    next_id: MarkerId,
}

/// In-process marker store, snapshotted to the save file on shutdown.
#[derive(Default)]
pub struct MemoryMarkerStore {
    inner: RwLock<Inner>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_markers(markers: impl IntoIterator<Item = Marker>) -> Self {
        let mut inner = Inner::default();
        for marker in markers {
            inner.next_id = inner.next_id.max(marker.id + 1);
            inner.markers.insert((marker.owner, marker.cell()), marker);
        }
        MemoryMarkerStore {
            inner: RwLock::new(inner),
        }
    }

    /// Markers ordered by id.
    pub fn snapshot(&self) -> Vec<Marker> {
        let mut markers: Vec<Marker> = self.inner.read().markers.values().copied().collect();
        markers.sort_by_key(|marker| marker.id);
        markers
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.read().markers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn all(&self) -> Result<Vec<Marker>, StoreError> {
        Ok(self.inner.read().markers.values().copied().collect())
    }

    fn within(&self, bounds: &Bounds) -> Result<Vec<Marker>, StoreError> {
        Ok(self
            .inner
            .read()
            .markers
            .values()
            .filter(|marker| bounds.contains(marker.cell()))
            .copied()
            .collect())
    }

    fn insert_if_absent(&self, owner: OwnerId, cell: Cell) -> Result<Option<Marker>, StoreError> {
        let mut inner = self.inner.write();
        if inner.markers.contains_key(&(owner, cell)) {
            return Ok(None);
        }
        let now = Utc::now().timestamp_millis();
        let marker = Marker {
            id: inner.next_id,
            owner,
            x: cell.x,
            y: cell.y,
            created_at: now,
            updated_at: now,
        };
        inner.next_id += 1;
        inner.markers.insert((owner, cell), marker);
        Ok(Some(marker))
    }

    fn touch(&self, owner: OwnerId, cell: Cell) -> Result<Option<Marker>, StoreError> {
        let mut inner = self.inner.write();
        Ok(inner.markers.get_mut(&(owner, cell)).map(|marker| {
            marker.updated_at = Utc::now().timestamp_millis().max(marker.updated_at);
            *marker
        }))
    }

    fn delete(&self, owner: OwnerId, cell: Cell) -> Result<Option<Marker>, StoreError> {
        Ok(self.inner.write().markers.remove(&(owner, cell)))
    }

    fn delete_owner(&self, owner: OwnerId) -> Result<Vec<Marker>, StoreError> {
        let mut inner = self.inner.write();
        let mut removed = Vec::new();
        inner.markers.retain(|&(marker_owner, _), marker| {
            if marker_owner == owner {
                removed.push(*marker);
                false
            } else {
                true
            }
        });
        removed.sort_by_key(|marker| marker.id);
        Ok(removed)
    }
}

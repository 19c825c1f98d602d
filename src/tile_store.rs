//! Durable tile storage.
//!
//! Tiles are always regenerable from markers, so writes are plain
//! last-write-wins per coordinate.

use crate::codec::CodecError;
use crate::geometry::TileCoord;
use crate::tile::Tile;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TileStoreError {
    #[error("Tile store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Stored tile is corrupt: {0}")]
    Corrupt(#[from] CodecError),
}

pub trait TileStore: Send + Sync {
    fn get(&self, coord: TileCoord, size: u32) -> Result<Option<Tile>, TileStoreError>;

    fn put(&self, tile: &Tile) -> Result<(), TileStoreError>;
}

/// One file per tile: `[last_updated: i64 BE][container]`.
pub struct DiskTileStore {
    dir: PathBuf,
}

impl DiskTileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, TileStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DiskTileStore { dir })
    }

    fn path(&self, coord: TileCoord) -> PathBuf {
        self.dir.join(format!("{}_{}.tile", coord.x, coord.y))
    }
}

impl TileStore for DiskTileStore {
    fn get(&self, coord: TileCoord, size: u32) -> Result<Option<Tile>, TileStoreError> {
        let raw = match fs::read(self.path(coord)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut cursor = Cursor::new(&raw[..]);
        let last_updated = cursor.read_i64::<BigEndian>()?;
        let container = raw[cursor.position() as usize..].to_vec();
        Ok(Some(Tile::from_container(coord, size, container, last_updated)?))
    }

    fn put(&self, tile: &Tile) -> Result<(), TileStoreError> {
        let mut raw = Vec::with_capacity(8 + tile.compressed.len());
        raw.write_i64::<BigEndian>(tile.last_updated)?;
        raw.extend_from_slice(&tile.compressed);

        // each write goes through its own temp file, renamed into place whole
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&raw)?;
        tmp.persist(self.path(tile.coord)).map_err(|e| e.error)?;
        debug!(tile = ?tile.coord, bytes = raw.len(), "Persisted tile");
        Ok(())
    }
}

/// Keeps containers in memory; used where no tile directory is configured.
#[derive(Default)]
pub struct MemoryTileStore {
    tiles: Mutex<HashMap<TileCoord, (i64, Vec<u8>)>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tiles.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TileStore for MemoryTileStore {
    fn get(&self, coord: TileCoord, size: u32) -> Result<Option<Tile>, TileStoreError> {
        let stored = self.tiles.lock().get(&coord).cloned();
        match stored {
            Some((last_updated, container)) => {
                let tile = Tile::from_container(coord, size, container, last_updated)?;
                Ok(Some(tile))
            }
            None => Ok(None),
        }
    }

    fn put(&self, tile: &Tile) -> Result<(), TileStoreError> {
        self.tiles
            .lock()
            .insert(tile.coord, (tile.last_updated, tile.compressed.clone()));
        Ok(())
    }
}

use crate::codec::{self, Bitmap, CodecError};
use crate::geometry::{Bounds, TileCoord};
use crate::marker::Marker;
use crate::store::{MarkerStore, StoreError};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

/// A rendered tile; a pure function of its coordinate and the marker set it was built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    pub coord: TileCoord,
    pub bitmap: Bitmap,
    /// Wire container: format version byte followed by the compressed bitmap.
    pub compressed: Vec<u8>,
    pub format_version: u8,
    /// Unix milliseconds.
    pub last_updated: i64,
}

impl Tile {
    /// Rebuilds a tile from its wire container.
    pub fn from_container(
        coord: TileCoord,
        size: u32,
        compressed: Vec<u8>,
        last_updated: i64,
    ) -> Result<Tile, CodecError> {
        let bitmap = codec::decode(&compressed, size)?;
        Ok(Tile {
            coord,
            bitmap,
            format_version: compressed[0],
            compressed,
            last_updated,
        })
    }

    pub fn bounds(&self) -> Bounds {
        self.coord.bounds(self.bitmap.size())
    }

    /// Validator for conditional fetches, derived from `last_updated` and the coordinate.
    pub fn etag(&self) -> String {
        format!("\"{}:{}:{:x}\"", self.coord.x, self.coord.y, self.last_updated)
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Could not read markers: {0}")]
    Store(#[from] StoreError),

    #[error("Could not encode tile: {0}")]
    Codec(#[from] CodecError),
}

/// Produces a fresh tile for a coordinate.
pub trait TileGenerator: Send + Sync {
    fn generate(&self, coord: TileCoord) -> Result<Tile, GenerateError>;
}

impl<F> TileGenerator for F
where
    F: Fn(TileCoord) -> Result<Tile, GenerateError> + Send + Sync,
{
    fn generate(&self, coord: TileCoord) -> Result<Tile, GenerateError> {
        self(coord)
    }
}

/// Renders tiles from the current contents of a [`MarkerStore`].
pub struct MarkerTileGenerator {
    store: Arc<dyn MarkerStore>,
    tile_size: u32,
}

impl MarkerTileGenerator {
    pub fn new(store: Arc<dyn MarkerStore>, tile_size: u32) -> Self {
        MarkerTileGenerator { store, tile_size }
    }
}

impl TileGenerator for MarkerTileGenerator {
    fn generate(&self, coord: TileCoord) -> Result<Tile, GenerateError> {
        let bounds = coord.bounds(self.tile_size);
        let markers = self.store.within(&bounds)?;
        let cells = markers.iter().map(Marker::cell).collect::<Vec<_>>();
        let (bitmap, compressed) = codec::encode_cells(&bounds, self.tile_size, &cells)?;
        Ok(Tile {
            coord,
            bitmap,
            format_version: compressed[0],
            compressed,
            last_updated: Utc::now().timestamp_millis(),
        })
    }
}

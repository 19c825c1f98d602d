//! In-memory tile cache with TTL expiry and LRU eviction.
//!
//! Lookups go memory, then durable storage, then the generator. Entries past
//! the refresh threshold are still served while a background refresh runs;
//! entries past the TTL are misses.

use crate::geometry::TileCoord;
use crate::tile::{GenerateError, Tile, TileGenerator};
use crate::tile_store::TileStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct TileCacheConfig {
    /// Age after which an entry is a miss (default: 30s)
    pub ttl: Duration,
    /// Age after which a hit schedules a background refresh (default: 20s)
    pub refresh_after: Duration,
    /// Maximum number of cached tiles (default: 1024)
    pub max_entries: usize,
    /// Side length of a tile in cells (default: 64)
    pub tile_size: u32,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            refresh_after: Duration::from_secs(20),
            max_entries: 1024,
            tile_size: 64,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub expired: u64,
    pub durable_hits: u64,
    pub generations: u64,
    pub generation_failures: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

#[derive(Debug)]
struct CacheEntry {
    tile: Arc<Tile>,
    cached_at: Instant,
    last_accessed: Instant,
    /// Set while a background refresh is in flight; such entries are not evicted.
    refreshing: bool,
}

impl CacheEntry {
    fn new(tile: Arc<Tile>) -> Self {
        let now = Instant::now();
        Self {
            tile,
            cached_at: now,
            last_accessed: now,
            refreshing: false,
        }
    }
}

/// Per-coordinate bookkeeping that outlives cache entries.
#[derive(Debug, Default, Clone, Copy)]
struct KeyState {
    /// Bumped on every invalidation; results generated under an older version are not cached.
    version: u64,
    /// The durable copy may predate the last invalidation.
    durable_stale: bool,
    /// Durable writes that passed the version check and have not finished.
    writes_in_flight: u32,
    /// Bumped whenever a durable write turns out to be outdated.
    outdated_writes: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<TileCoord, CacheEntry>,
    keys: HashMap<TileCoord, KeyState>,
    stats: CacheStats,
}

impl CacheState {
    fn key(&self, coord: TileCoord) -> KeyState {
        self.keys.get(&coord).copied().unwrap_or_default()
    }

    /// Evicts least recently used entries, sparing `populating` and entries being refreshed.
    fn evict_over(&mut self, max_entries: usize, populating: TileCoord) {
        while self.entries.len() > max_entries {
            let victim = self
                .entries
                .iter()
                .filter(|(coord, entry)| **coord != populating && !entry.refreshing)
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(coord, _)| *coord);
            let Some(coord) = victim else {
                break;
            };
            self.entries.remove(&coord);
            self.stats.evictions += 1;
            debug!(tile = ?coord, "Evicted least recently used tile");
        }
    }
}

struct Inner {
    config: TileCacheConfig,
    durable: Arc<dyn TileStore>,
    state: Mutex<CacheState>,
}

enum Lookup {
    Hit(Arc<Tile>, Option<u64>),
    Miss(KeyState),
}

/// Process-local tile cache. Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct TileCache {
    inner: Arc<Inner>,
}

impl TileCache {
    pub fn new(config: TileCacheConfig, durable: Arc<dyn TileStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                durable,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Returns the tile at `coord`, generating it when neither memory nor durable
    /// storage has a usable copy.
    ///
    /// A generator failure is returned as-is and leaves the cache untouched.
    pub fn get_or_generate(
        &self,
        coord: TileCoord,
        generator: &Arc<dyn TileGenerator>,
    ) -> Result<Arc<Tile>, GenerateError> {
        match self.lookup(coord) {
            Lookup::Hit(tile, refresh) => {
                if let Some(version) = refresh {
                    self.spawn_refresh(coord, version, Arc::clone(generator));
                }
                Ok(tile)
            }
            Lookup::Miss(key) => {
                if !key.durable_stale {
                    if let Some(tile) = self.load_durable(coord) {
                        return Ok(self.install(coord, key.version, tile));
                    }
                }

                let tile = match generator.generate(coord) {
                    Ok(tile) => tile,
                    Err(e) => {
                        self.inner.state.lock().stats.generation_failures += 1;
                        warn!(tile = ?coord, error = %e, "Tile generation failed");
                        return Err(e);
                    }
                };
                self.inner.state.lock().stats.generations += 1;
                self.persist_current(&tile, key.version);
                Ok(self.install(coord, key.version, Arc::new(tile)))
            }
        }
    }

    fn lookup(&self, coord: TileCoord) -> Lookup {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock();
        let key = state.key(coord);

        let now = Instant::now();
        let mut expired = false;
        let mut hit = None;
        if let Some(entry) = state.entries.get_mut(&coord) {
            let age = now.duration_since(entry.cached_at);
            if age < config.ttl {
                entry.last_accessed = now;
                let refresh = age >= config.refresh_after && !entry.refreshing;
                if refresh {
                    entry.refreshing = true;
                }
                hit = Some((Arc::clone(&entry.tile), refresh));
            } else {
                expired = true;
            }
        }

        match hit {
            Some((tile, refresh)) => {
                state.stats.hits += 1;
                if refresh {
                    state.stats.stale_hits += 1;
                }
                Lookup::Hit(tile, refresh.then_some(key.version))
            }
            None => {
                if expired {
                    state.entries.remove(&coord);
                    state.stats.expired += 1;
                }
                state.stats.misses += 1;
                Lookup::Miss(key)
            }
        }
    }

    fn load_durable(&self, coord: TileCoord) -> Option<Arc<Tile>> {
        match self.inner.durable.get(coord, self.inner.config.tile_size) {
            Ok(Some(tile)) => {
                self.inner.state.lock().stats.durable_hits += 1;
                debug!(tile = ?coord, "Loaded tile from durable storage");
                Some(Arc::new(tile))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(tile = ?coord, error = %e, "Ignoring unreadable durable tile");
                None
            }
        }
    }

    /// Persists `tile` if it was generated under the coordinate's current version.
    ///
    /// The durable copy is only marked fresh when no outdated write can have
    /// landed after this one: none in flight, none finished meanwhile.
    fn persist_current(&self, tile: &Tile, version: u64) -> bool {
        let coord = tile.coord;
        let outdated_before = {
            let mut state = self.inner.state.lock();
            let key = state.keys.entry(coord).or_default();
            if key.version != version {
                debug!(tile = ?coord, "Skipping persist of outdated tile");
                return false;
            }
            key.writes_in_flight += 1;
            key.outdated_writes
        };

        let persisted = self.persist(tile);

        let mut state = self.inner.state.lock();
        let key = state.keys.entry(coord).or_default();
        key.writes_in_flight -= 1;
        if key.version != version {
            key.durable_stale = true;
            key.outdated_writes += 1;
            return false;
        }
        if persisted && key.writes_in_flight == 0 && key.outdated_writes == outdated_before {
            key.durable_stale = false;
        }
        persisted
    }

    fn persist(&self, tile: &Tile) -> bool {
        match self.inner.durable.put(tile) {
            Ok(()) => true,
            Err(e) => {
                warn!(tile = ?tile.coord, error = %e, "Failed to persist tile");
                false
            }
        }
    }

    /// Caches `tile` unless `coord` was invalidated after `version` was read.
    fn install(&self, coord: TileCoord, version: u64, tile: Arc<Tile>) -> Arc<Tile> {
        let max_entries = self.inner.config.max_entries;
        let mut state = self.inner.state.lock();
        let key = state.key(coord);
        if key.version != version {
            debug!(tile = ?coord, "Tile invalidated during generation, not caching");
            return tile;
        }
        state.entries.insert(coord, CacheEntry::new(Arc::clone(&tile)));
        state.evict_over(max_entries, coord);
        tile
    }

    fn spawn_refresh(&self, coord: TileCoord, version: u64, generator: Arc<dyn TileGenerator>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // no runtime: keep serving until the entry expires
            if let Some(entry) = self.inner.state.lock().entries.get_mut(&coord) {
                entry.refreshing = false;
            }
            return;
        };
        let cache = self.clone();
        handle.spawn_blocking(move || cache.refresh(coord, version, generator.as_ref()));
    }

    fn refresh(&self, coord: TileCoord, version: u64, generator: &dyn TileGenerator) {
        let tile = match generator.generate(coord) {
            Ok(tile) => tile,
            Err(e) => {
                let mut state = self.inner.state.lock();
                state.stats.generation_failures += 1;
                if let Some(entry) = state.entries.get_mut(&coord) {
                    entry.refreshing = false;
                }
                warn!(tile = ?coord, error = %e, "Background tile refresh failed");
                return;
            }
        };
        self.persist_current(&tile, version);

        let mut state = self.inner.state.lock();
        state.stats.generations += 1;
        if state.key(coord).version != version {
            return;
        }
        if let Some(entry) = state.entries.get_mut(&coord) {
            entry.tile = Arc::new(tile);
            entry.cached_at = Instant::now();
            entry.refreshing = false;
            debug!(tile = ?coord, "Refreshed stale tile");
        }
    }

    /// Drops the cached copy of `coord`; the next read regenerates from current markers.
    ///
    /// Returns whether an entry was present.
    pub fn invalidate(&self, coord: TileCoord) -> bool {
        let mut state = self.inner.state.lock();
        let key = state.keys.entry(coord).or_default();
        key.version += 1;
        key.durable_stale = true;
        state.stats.invalidations += 1;
        state.entries.remove(&coord).is_some()
    }

    /// Regenerates and persists every tile whose durable copy is known to be stale.
    pub fn flush_stale(&self, generator: &dyn TileGenerator) -> usize {
        let stale: Vec<(TileCoord, u64)> = self
            .inner
            .state
            .lock()
            .keys
            .iter()
            .filter(|(_, key)| key.durable_stale)
            .map(|(coord, key)| (*coord, key.version))
            .collect();

        let mut flushed = 0;
        for (coord, version) in stale {
            let Ok(tile) = generator.generate(coord) else {
                warn!(tile = ?coord, "Could not regenerate stale tile for flush");
                continue;
            };
            if self.persist_current(&tile, version) {
                flushed += 1;
            }
        }
        flushed
    }

    #[cfg(test)]
    pub fn contains(&self, coord: TileCoord) -> bool {
        self.inner.state.lock().entries.contains_key(&coord)
    }

    pub fn entry_count(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.state.lock().stats.clone()
    }
}

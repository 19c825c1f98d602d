mod cache;
mod codec;
mod command;
mod config;
mod error;
mod events;
mod geometry;
mod invalidation;
mod logging;
mod marker;
mod peer;
mod restriction;
mod service;
mod state;
mod store;
mod tile;
mod tile_store;

use anyhow::Result;
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    signal,
};
use tracing::{debug, error, info, warn};

use crate::{
    cache::TileCache,
    command::{Command, Status, TileFrame},
    config::{Config, DEFAULT_CONFIG_FILE},
    events::MutationEventBus,
    geometry::{Cell, TileCoord},
    invalidation::InvalidationService,
    peer::Peer,
    restriction::Direction,
    service::MapService,
    state::{PeerBroadcast, SaveData, State},
    store::MemoryMarkerStore,
    tile_store::{DiskTileStore, MemoryTileStore, TileStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging()?;
    let config = Config::load(DEFAULT_CONFIG_FILE)?;

    let save = SaveData::load(&config.save_file)?;
    info!(markers = save.markers.len(), owners = save.id_map.len(), "Save file loaded");
    let store = Arc::new(MemoryMarkerStore::from_markers(save.markers));
    let state = Arc::new(Mutex::new(State::new(save.id_map)));

    let tiles: Arc<dyn TileStore> = match &config.tile_dir {
        Some(dir) => Arc::new(DiskTileStore::new(dir)?),
        None => Arc::new(MemoryTileStore::new()),
    };
    let cache = TileCache::new(config.cache(), tiles);
    let bus = Arc::new(MutationEventBus::new());
    bus.subscribe(Arc::new(InvalidationService::new(cache.clone(), config.plane())));
    bus.subscribe(Arc::new(PeerBroadcast::new(Arc::clone(&state))));
    debug!(subscribers = bus.subscriber_count(), "Event bus ready");
    let service = Arc::new(MapService::new(&config, store.clone(), cache.clone(), bus));

    let listener: TcpListener = TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                let generator = Arc::clone(service.generator());
                let pending = cache.clone();
                let flushed =
                    tokio::task::spawn_blocking(move || pending.flush_stale(generator.as_ref()))
                        .await?;
                let save = SaveData {
                    id_map: state.lock().id_map.clone(),
                    markers: store.snapshot(),
                };
                save.save(&config.save_file)?;
                info!(
                    markers = save.markers.len(),
                    flushed,
                    cached = cache.entry_count(),
                    "Saved, shutting down"
                );
                debug!(stats = ?cache.stats(), "Tile cache statistics");
                break
            }
            socket = listener.accept() => {
                handle_connection(socket?, Arc::clone(&state), Arc::clone(&service))
            }
        }
    }

    Ok(())
}

fn handle_connection(
    socket: (TcpStream, SocketAddr),
    state: Arc<Mutex<State>>,
    service: Arc<MapService>,
) {
    let (mut socket, addr) = socket;

    tokio::spawn(async move {
        let mut peer = Peer::new(&state, addr, service.viewport());
        let mut buf = vec![0u8; 1024 * 32];
        let mut buf_send = vec![0u8; 1024 * 32];
        let mut pending: Vec<u8> = Vec::new();
        debug!(%addr, "Peer connected");

        'thread: loop {
            tokio::select! {
                command = peer.rx.recv() => {
                    let Some(command) = command else { break 'thread };
                    if let Err(e) = command.send(&mut buf_send, &mut socket).await {
                        warn!(%addr, error = %e, "Push failed");
                        break 'thread;
                    }
                },
                result = socket.read(&mut buf) => {
                    let n = match result {
                        Ok(0) => break 'thread,
                        Ok(n) => n,
                        Err(e) => {
                            info!(
                                %addr,
                                owner = ?peer.id,
                                error = %e,
                                "Peer disconnected abruptly"
                            );
                            break 'thread;
                        }
                    };
                    pending.extend_from_slice(&buf[0..n]);

                    let mut consumed = 0;
                    loop {
                        let (command, used) = match Command::parse(&pending[consumed..]) {
                            Ok(Some(frame)) => frame,
                            Ok(None) => break,
                            Err(e) => {
                                warn!(%addr, error = %e, "Malformed frame, dropping connection");
                                break 'thread;
                            }
                        };
                        consumed += used;
                        debug!(%addr, ?command, "Received");

                        if command == Command::Disconnect {
                            break 'thread;
                        }
                        let result = handle_command(
                            command,
                            &mut peer,
                            &mut buf_send,
                            &mut socket,
                            &state,
                            &service,
                        )
                        .await;
                        match result {
                            Ok(Some(warning)) => warn!(%addr, "{}", warning),
                            Ok(None) => {}
                            Err(e) => {
                                error!(%addr, error = %e, "Command failed");
                                break 'thread;
                            }
                        }
                    }
                    pending.drain(..consumed);
                }
            }
        }

        peer.leave(&state);
        debug!(%addr, "Peer left");
    });
}

async fn handle_command(
    command: Command,
    peer: &mut Peer,
    buf: &mut Vec<u8>,
    socket: &mut TcpStream,
    state: &Mutex<State>,
    service: &Arc<MapService>,
) -> Result<Option<String>> {
    match command {
        Command::Handshake(ver, uid) => {
            if ver != crate::command::VERSION {
                Command::Handshaken(Status::VersionMismatch, 0).send(buf, socket).await?;
                return Ok(Some("Protocol version mismatch".into()));
            }
            if peer.is_registered() {
                Command::Response(Status::ERR).send(buf, socket).await?;
                return Ok(Some("Handshake sent from registered client".into()));
            }
            let id = peer.register(uid, state)?;
            info!(addr = %peer.addr, owner = id, "Peer registered");
            Command::Handshaken(Status::OK, id).send(buf, socket).await?;
        }
        Command::PlaceMarker(x, y) | Command::TouchMarker(x, y) | Command::RemoveMarker(x, y) => {
            let Some(owner) = peer.id else {
                Command::Response(Status::Unregistered).send(buf, socket).await?;
                return Ok(Some("Mutation from unregistered client".into()));
            };
            let cell = Cell::new(x, y);
            let result = match command {
                Command::PlaceMarker(..) => {
                    service.blocking(move |s| s.place_marker(owner, cell)).await?
                }
                Command::TouchMarker(..) => {
                    service.blocking(move |s| s.touch_marker(owner, cell)).await?
                }
                _ => service.blocking(move |s| s.remove_marker(owner, cell)).await?,
            };
            let status = match result {
                Ok(_) => Status::OK,
                Err(e) => {
                    debug!(owner, %cell, error = %e, "Mutation rejected");
                    e.kind().into()
                }
            };
            Command::Response(status).send(buf, socket).await?;
        }
        Command::ClearMarkers => {
            let Some(owner) = peer.id else {
                Command::Response(Status::Unregistered).send(buf, socket).await?;
                return Ok(Some("Mutation from unregistered client".into()));
            };
            let status = match service.blocking(move |s| s.clear_markers(owner)).await? {
                Ok(_) => Status::OK,
                Err(e) => e.kind().into(),
            };
            Command::Response(status).send(buf, socket).await?;
        }
        Command::FetchTile(x, y) => match service
            .blocking(move |s| s.fetch_tile(TileCoord::new(x, y)))
            .await?
        {
            Ok(response) => {
                let frame = TileFrame {
                    tile_x: x,
                    tile_y: y,
                    format_version: response.tile.format_version,
                    last_updated_ms: response.tile.last_updated,
                    max_age_secs: response.max_age_secs,
                    min_x: response.bounds.min_x,
                    min_y: response.bounds.min_y,
                    max_x: response.bounds.max_x,
                    max_y: response.bounds.max_y,
                    bytes: response.tile.compressed.clone(),
                };
                debug!(x, y, etag = %response.etag(), "Serving tile");
                Command::TileData(frame).send(buf, socket).await?;
            }
            Err(e) => {
                Command::Response(e.kind().into()).send(buf, socket).await?;
                if e.is_transient() {
                    return Ok(Some(format!("Tile ({}, {}) not served: {}", x, y, e)));
                }
                debug!(x, y, error = %e, "Tile request rejected");
            }
        },
        Command::QueryRestricted {
            x,
            y,
            direction,
            indices,
        } => {
            let Ok(direction) = Direction::try_from(direction) else {
                Command::Response(Status::Invalid).send(buf, socket).await?;
                return Ok(Some(format!("Unknown scroll direction {}", direction)));
            };
            let origin = Cell::new(x, y);
            let mut tracker = std::mem::replace(&mut peer.viewport, service.viewport());
            let (tracker, result) = service
                .blocking(move |s| {
                    let result = s.restricted_cells(&mut tracker, origin, direction, &indices);
                    (tracker, result)
                })
                .await?;
            peer.viewport = tracker;
            match result {
                Ok(restricted) => Command::RestrictedCells(restricted).send(buf, socket).await?,
                Err(e) => {
                    Command::Response(e.kind().into()).send(buf, socket).await?;
                    return Ok(Some(format!("Restriction query rejected: {}", e)));
                }
            }
        }
        _ => {}
    }

    Ok(None)
}

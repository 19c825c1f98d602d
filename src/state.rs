use crate::command::Command;
use crate::events::{MutationEvent, Subscriber};
use crate::marker::{Marker, OwnerId};
use anyhow::anyhow;
use anyhow::Result;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::{collections::HashMap, net::SocketAddr};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Connected peers plus the player hash to owner id assignments.
pub struct State {
    pub peers: HashMap<SocketAddr, UnboundedSender<Command>>,
    pub id_map: HashMap<u64, OwnerId>,
}

impl State {
    pub fn new(id_map: HashMap<u64, OwnerId>) -> Self {
        State {
            peers: HashMap::new(),
            id_map,
        }
    }

    /// Returns the owner id for `uid`, assigning the next free one on first sight.
    pub fn owner_id(&mut self, uid: u64) -> Result<OwnerId> {
        if let Some(id) = self.id_map.get(&uid) {
            return Ok(*id);
        }
        let id = OwnerId::try_from(self.id_map.len()).map_err(|_| anyhow!("Owner ids exhausted"))?;
        self.id_map.insert(uid, id);
        Ok(id)
    }

    pub fn broadcast_all(&mut self, message: Command) {
        for peer in self.peers.iter_mut() {
            let _ = peer.1.send(message.clone());
        }
    }
}

/// What survives a restart: the owner ids and every marker.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveData {
    pub id_map: HashMap<u64, OwnerId>,
    pub markers: Vec<Marker>,
}

impl SaveData {
    /// Reads `path`, or returns an empty save when it does not exist.
    pub fn load(path: &Path) -> Result<SaveData> {
        if !path.exists() {
            return Ok(SaveData::default());
        }
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        Ok(serde_json::from_str(contents.as_str())?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_vec(self)?;
        let mut file = File::create(path)?;
        file.write_all(&serialized)?;
        Ok(())
    }
}

/// Pushes every mutation to all connected peers.
pub struct PeerBroadcast {
    state: Arc<Mutex<State>>,
}

impl PeerBroadcast {
    pub fn new(state: Arc<Mutex<State>>) -> Self {
        PeerBroadcast { state }
    }
}

impl Subscriber for PeerBroadcast {
    fn name(&self) -> &str {
        "peer-broadcast"
    }

    fn notify(&self, event: &MutationEvent) -> Result<()> {
        let mut state = self.state.lock();
        debug!(event = event.kind(), peers = state.peers.len(), "Broadcasting");
        for command in Command::from_event(event) {
            state.broadcast_all(command);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::EventKind;
    use tokio::sync::mpsc;

    fn marker() -> Marker {
        Marker {
            id: 4,
            owner: 1,
            x: 10,
            y: -3,
            created_at: 100,
            updated_at: 100,
        }
    }

    #[test]
    fn test_owner_ids_are_stable() {
        let mut state = State::new(HashMap::new());
        assert_eq!(state.owner_id(0xaaaa).unwrap(), 0);
        assert_eq!(state.owner_id(0xbbbb).unwrap(), 1);
        assert_eq!(state.owner_id(0xaaaa).unwrap(), 0);
    }

    #[test]
    fn test_save_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("save.dat");
        assert_eq!(SaveData::load(&path).unwrap(), SaveData::default());

        let mut save = SaveData::default();
        save.id_map.insert(77, 0);
        save.markers.push(marker());
        save.save(&path).unwrap();
        assert_eq!(SaveData::load(&path).unwrap(), save);
    }

    #[test]
    fn test_broadcast_reaches_every_peer() {
        let state = Arc::new(Mutex::new(State::new(HashMap::new())));
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        state.lock().peers.insert("127.0.0.1:1000".parse().unwrap(), tx_a);
        state.lock().peers.insert("127.0.0.1:1001".parse().unwrap(), tx_b);

        let broadcast = PeerBroadcast::new(Arc::clone(&state));
        broadcast.notify(&MutationEvent::Created(marker())).unwrap();

        let expected = Command::MarkerEvent(EventKind::Created, marker());
        assert_eq!(rx_a.try_recv().unwrap(), expected);
        assert_eq!(rx_b.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_closed_peer_does_not_fail_broadcast() {
        let state = Arc::new(Mutex::new(State::new(HashMap::new())));
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        state.lock().peers.insert("127.0.0.1:1000".parse().unwrap(), tx);

        let broadcast = PeerBroadcast::new(state);
        let event = MutationEvent::BulkDeleted {
            owner: 1,
            markers: vec![marker()],
        };
        assert!(broadcast.notify(&event).is_ok());
    }
}

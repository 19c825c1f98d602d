use crate::{command::Command, marker::OwnerId, restriction::ViewportTracker, state::State};
use anyhow::Result;
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc::{self, UnboundedReceiver};

pub struct Peer {
    pub addr: SocketAddr,
    pub uid: Option<u64>,
    pub id: Option<OwnerId>,
    pub rx: UnboundedReceiver<Command>,
    /// Running restricted set for this peer's viewport.
    pub viewport: ViewportTracker,
}

impl Peer {
    pub fn new(state: &Mutex<State>, addr: SocketAddr, viewport: ViewportTracker) -> Peer {
        let (tx, rx) = mpsc::unbounded_channel();
        state.lock().peers.insert(addr, tx);
        Peer {
            addr,
            uid: None,
            id: None,
            rx,
            viewport,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.uid.is_some()
    }

    pub fn register(&mut self, uid: u64, state: &Mutex<State>) -> Result<OwnerId> {
        let id = state.lock().owner_id(uid)?;
        self.uid = Some(uid);
        self.id = Some(id);
        Ok(id)
    }

    /// Removes the peer's push channel.
    pub fn leave(&self, state: &Arc<Mutex<State>>) {
        state.lock().peers.remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_register_and_leave() {
        let state = Arc::new(Mutex::new(State::new(HashMap::new())));
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let mut peer = Peer::new(&state, addr, ViewportTracker::new(4));
        assert!(!peer.is_registered());
        assert!(state.lock().peers.contains_key(&addr));

        assert_eq!(peer.register(9, &state).unwrap(), 0);
        assert!(peer.is_registered());
        assert_eq!(peer.id, Some(0));

        peer.leave(&state);
        assert!(state.lock().peers.is_empty());
    }
}

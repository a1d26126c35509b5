use thiserror::Error;

use channel_machine::ChannelMachine;
use wire::{ChannelPoint, PeerId};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    #[error("peer {0:?} is not connected")]
    UnknownPeer(PeerId),

    #[error("channel {0:?} is already registered")]
    DuplicateChannel(ChannelPoint),
}

#[derive(Default)]
struct PeerRecord {
    channels: Vec<ChannelPoint>,
}

/// Explicit lookup object for active peers and channels, owned by whoever
/// runs the dispatch loop. Insertion and removal are tied to peer
/// connect/disconnect and channel open/close events; there is no ambient
/// global map.
///
/// Every channel machine sits behind its own mutex: that lock is the
/// per-channel serialization token, held only across a state-machine
/// transition and never across I/O.
pub struct Registry {
    peers: Mutex<HashMap<PeerId, PeerRecord>>,
    channels: Mutex<HashMap<ChannelPoint, Arc<Mutex<ChannelMachine>>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            peers: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn connect_peer(&self, peer: PeerId) {
        locked(&self.peers).entry(peer).or_default();
    }

    /// Removes the peer and every channel registered under it.
    pub fn disconnect_peer(&self, peer: PeerId) {
        if let Some(record) = locked(&self.peers).remove(&peer) {
            let mut channels = locked(&self.channels);
            for point in record.channels {
                channels.remove(&point);
            }
        }
    }

    pub fn peer_connected(&self, peer: &PeerId) -> bool {
        locked(&self.peers).contains_key(peer)
    }

    pub fn register_channel(
        &self,
        peer: PeerId,
        machine: ChannelMachine,
    ) -> Result<(), RegistryError> {
        let point = machine.channel();
        let mut peers = locked(&self.peers);
        let record = peers.get_mut(&peer).ok_or(RegistryError::UnknownPeer(peer))?;

        let mut channels = locked(&self.channels);
        if channels.contains_key(&point) {
            return Err(RegistryError::DuplicateChannel(point));
        }
        channels.insert(point, Arc::new(Mutex::new(machine)));
        record.channels.push(point);
        Ok(())
    }

    pub fn channel(&self, point: &ChannelPoint) -> Option<Arc<Mutex<ChannelMachine>>> {
        locked(&self.channels).get(point).cloned()
    }

    /// Locks a channel machine for one transition.
    pub fn with_channel<T, F>(&self, point: &ChannelPoint, f: F) -> Option<T>
    where
        F: FnOnce(&mut ChannelMachine) -> T,
    {
        let machine = self.channel(point)?;
        let mut guard = machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(f(&mut guard))
    }
}

#[cfg(test)]
mod tests {
    use super::{Registry, RegistryError};
    use wire::PeerId;

    #[test]
    fn channel_registration_requires_the_peer() {
        let registry = Registry::new();
        let peer = PeerId::from([1; 16]);
        assert!(!registry.peer_connected(&peer));

        registry.connect_peer(peer);
        assert!(registry.peer_connected(&peer));

        registry.disconnect_peer(peer);
        assert!(!registry.peer_connected(&peer));
    }

    #[test]
    fn unknown_peer_is_an_error() {
        use channel::{ChannelConfig, Party};
        use secp256k1::{Secp256k1, SecretKey};
        use wire::{ChannelPoint, Hash256, MilliSatoshi};

        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let machine = channel_machine::ChannelMachine::new(
            ChannelPoint::new(Hash256::from([1; 32]), 0),
            channel_machine::ChannelKeys {
                commit_sk: sk.clone(),
                remote_commit_pk: secp256k1::PublicKey::from_secret_key(&secp, &sk),
            },
            {
                let mut config = ChannelConfig::default();
                config.initiator = Party::Local;
                config
            },
            [7; 32],
            MilliSatoshi::from(1000),
            MilliSatoshi::from(1000),
        );

        let registry = Registry::new();
        let peer = PeerId::from([2; 16]);
        assert_eq!(
            registry.register_channel(peer, machine),
            Err(RegistryError::UnknownPeer(peer)),
        );
    }
}

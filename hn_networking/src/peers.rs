// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use hn_protocol::{Contact, NodeId};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::time::Instant;

/// A contact is dropped from the cache after this many unanswered probes.
pub(crate) const PEER_TIMEOUT_STRIKES: u8 = 2;

struct PeerEntry {
    contact: Contact,
    last_seen: Instant,
    strikes: u8,
}

/// Directory of recently seen peers.
///
/// Feeds probe address resolution (`get_addr`) and the join loop's bootstrap
/// seed (`get_first`). Timeout strikes accumulate until the entry is dropped;
/// any fresh sighting clears them.
pub(crate) struct PeerCache {
    entries: HashMap<NodeId, PeerEntry>,
    capacity: usize,
}

impl PeerCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn add_node(&mut self, contact: Contact, now: Instant) {
        if contact.id.is_zero() {
            return;
        }
        let _ = self.entries.insert(
            contact.id,
            PeerEntry {
                contact,
                last_seen: now,
                strikes: 0,
            },
        );

        while self.entries.len() > self.capacity {
            let stalest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| *id);
            match stalest {
                Some(id) => {
                    let _ = self.entries.remove(&id);
                }
                None => break,
            }
        }
    }

    pub(crate) fn get_addr(&self, id: &NodeId) -> Option<SocketAddr> {
        self.entries.get(id).map(|entry| entry.contact.addr)
    }

    /// Marks an unanswered probe against `id`.
    pub(crate) fn add_timeout(&mut self, id: &NodeId) {
        let drop_entry = match self.entries.get_mut(id) {
            Some(entry) => {
                entry.strikes = entry.strikes.saturating_add(1);
                entry.strikes >= PEER_TIMEOUT_STRIKES
            }
            None => false,
        };
        if drop_entry {
            let _ = self.entries.remove(id);
        }
    }

    /// The most recently seen contact, if any. The join loop seeds its
    /// bootstrap lookup from here.
    pub(crate) fn get_first(&self) -> Option<Contact> {
        self.entries
            .values()
            .max_by_key(|entry| entry.last_seen)
            .map(|entry| entry.contact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn contact(byte: u8, port: u16) -> Contact {
        let mut bytes = [0u8; 20];
        bytes[0] = byte;
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("addr");
        Contact::new(NodeId::new(bytes), addr)
    }

    #[tokio::test(start_paused = true)]
    async fn most_recent_peer_is_first() {
        let mut cache = PeerCache::new(8);
        cache.add_node(contact(1, 1), Instant::now());
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.add_node(contact(2, 2), Instant::now());

        assert_eq!(cache.get_first().map(|c| c.addr.port()), Some(2));

        // a fresh sighting of peer 1 moves it back to the front
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.add_node(contact(1, 1), Instant::now());
        assert_eq!(cache.get_first().map(|c| c.addr.port()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn strikes_drop_the_peer() {
        let mut cache = PeerCache::new(8);
        let peer = contact(1, 1);
        cache.add_node(peer, Instant::now());

        cache.add_timeout(&peer.id);
        assert!(cache.get_addr(&peer.id).is_some());

        cache.add_timeout(&peer.id);
        assert!(cache.get_addr(&peer.id).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sighting_clears_strikes() {
        let mut cache = PeerCache::new(8);
        let peer = contact(1, 1);
        cache.add_node(peer, Instant::now());
        cache.add_timeout(&peer.id);
        cache.add_node(peer, Instant::now());
        cache.add_timeout(&peer.id);

        // one strike since the last sighting, still cached
        assert!(cache.get_addr(&peer.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_least_recently_seen() {
        let mut cache = PeerCache::new(2);
        cache.add_node(contact(1, 1), Instant::now());
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.add_node(contact(2, 2), Instant::now());
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.add_node(contact(3, 3), Instant::now());

        assert_eq!(cache.len(), 2);
        assert!(cache.get_addr(&contact(1, 1).id).is_none());
        assert!(cache.get_addr(&contact(3, 3).id).is_some());
    }
}

// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use bytes::Bytes;
use hn_protocol::{NodeId, StorePayload};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// A key/value replica held by this node.
pub(crate) struct StoredRecord {
    pub(crate) id: NodeId,
    pub(crate) key: Bytes,
    pub(crate) value: Bytes,
    pub(crate) ttl: Duration,
    pub(crate) stored_at: Instant,
    /// Peers that delivered this record to us. Republication skips them and
    /// stops entirely once the record has reached its natural custodians.
    pub(crate) confirmers: HashSet<NodeId>,
}

/// In-memory record store, keyed by `(id, key)`.
#[derive(Default)]
pub(crate) struct RecordStore {
    records: HashMap<(NodeId, Bytes), StoredRecord>,
}

impl RecordStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn get(&self, id: &NodeId, key: &Bytes) -> Option<&StoredRecord> {
        self.records.get(&(*id, key.clone()))
    }

    /// Applies an inbound `store` from `sender`.
    ///
    /// A replica matching an existing record refreshes its TTL window and
    /// adds the sender as a confirmer. A key that exists with a different
    /// value is ignored: first-stored wins for the current TTL window.
    pub(crate) fn apply_store(&mut self, sender: NodeId, payload: StorePayload, now: Instant) {
        let ttl = Duration::from_secs(u64::from(payload.ttl_secs));
        match self.records.get_mut(&(payload.id, payload.key.clone())) {
            Some(record) => {
                if record.value == payload.value {
                    record.ttl = ttl;
                    record.stored_at = now;
                    let _ = record.confirmers.insert(sender);
                }
            }
            None => {
                let mut confirmers = HashSet::new();
                let _ = confirmers.insert(sender);
                let _ = self.records.insert(
                    (payload.id, payload.key.clone()),
                    StoredRecord {
                        id: payload.id,
                        key: payload.key,
                        value: payload.value,
                        ttl,
                        stored_at: now,
                        confirmers,
                    },
                );
            }
        }
    }

    /// Drops every record whose TTL has lapsed.
    pub(crate) fn refresh(&mut self, now: Instant) {
        self.records
            .retain(|_, record| now.duration_since(record.stored_at) <= record.ttl);
    }

    pub(crate) fn remove(&mut self, id: &NodeId, key: &Bytes) {
        let _ = self.records.remove(&(*id, key.clone()));
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &StoredRecord> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes[0] = byte;
        NodeId::new(bytes)
    }

    fn payload(record: u8, key: &str, value: &str, ttl_secs: u16) -> StorePayload {
        StorePayload {
            id: id(record),
            key: Bytes::copy_from_slice(key.as_bytes()),
            value: Bytes::copy_from_slice(value.as_bytes()),
            ttl_secs,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_record_tracks_its_sender() {
        let mut store = RecordStore::new();
        store.apply_store(id(9), payload(1, "k", "v", 60), Instant::now());

        let record = store.get(&id(1), &Bytes::from_static(b"k")).expect("stored");
        assert_eq!(record.value, Bytes::from_static(b"v"));
        assert!(record.confirmers.contains(&id(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn matching_replica_refreshes_ttl_and_confirms() {
        let mut store = RecordStore::new();
        store.apply_store(id(9), payload(1, "k", "v", 60), Instant::now());

        tokio::time::advance(Duration::from_secs(50)).await;
        store.apply_store(id(8), payload(1, "k", "v", 60), Instant::now());

        // the refreshed window keeps the record alive past the original one
        tokio::time::advance(Duration::from_secs(50)).await;
        store.refresh(Instant::now());
        let record = store.get(&id(1), &Bytes::from_static(b"k")).expect("still stored");
        assert!(record.confirmers.contains(&id(8)));
        assert!(record.confirmers.contains(&id(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn conflicting_value_is_ignored() {
        let mut store = RecordStore::new();
        store.apply_store(id(9), payload(1, "k", "v", 60), Instant::now());
        store.apply_store(id(8), payload(1, "k", "other", 600), Instant::now());

        let record = store.get(&id(1), &Bytes::from_static(b"k")).expect("stored");
        assert_eq!(record.value, Bytes::from_static(b"v"));
        assert!(!record.confirmers.contains(&id(8)));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_expires_lapsed_records() {
        let mut store = RecordStore::new();
        store.apply_store(id(9), payload(1, "k", "v", 60), Instant::now());
        store.apply_store(id(9), payload(2, "k", "v", 600), Instant::now());

        tokio::time::advance(Duration::from_secs(61)).await;
        store.refresh(Instant::now());

        assert!(store.get(&id(1), &Bytes::from_static(b"k")).is_none());
        assert!(store.get(&id(2), &Bytes::from_static(b"k")).is_some());
        assert_eq!(store.len(), 1);
    }
}

// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use hn_protocol::{Contact, NodeId};
use std::collections::VecDeque;

/// One bucket per bit of the id space.
const BUCKET_COUNT: usize = 160;

/// Bucketized contact storage with XOR-nearest lookup.
///
/// Contacts are partitioned by the index of the highest bit in which their id
/// differs from ours. Within a bucket the freshest contact sits at the front.
pub(crate) struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<VecDeque<Contact>>,
    bucket_capacity: usize,
}

impl RoutingTable {
    pub(crate) fn new(local_id: NodeId, bucket_capacity: usize) -> Self {
        Self {
            local_id,
            buckets: (0..BUCKET_COUNT).map(|_| VecDeque::new()).collect(),
            bucket_capacity,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    /// Inserts or refreshes a contact. A known id moves to the front of its
    /// bucket and takes the new address; a full bucket evicts its oldest
    /// entry.
    pub(crate) fn add(&mut self, contact: Contact) {
        if contact.id == self.local_id || contact.id.is_zero() {
            return;
        }
        let Some(index) = contact.id.bucket_index(&self.local_id) else {
            return;
        };
        let bucket = &mut self.buckets[index];

        if let Some(pos) = bucket.iter().position(|c| c.id == contact.id) {
            let _ = bucket.remove(pos);
        } else if bucket.len() >= self.bucket_capacity {
            let _ = bucket.pop_back();
        }
        bucket.push_front(contact);
    }

    pub(crate) fn remove(&mut self, id: &NodeId) {
        let Some(index) = id.bucket_index(&self.local_id) else {
            return;
        };
        self.buckets[index].retain(|c| c.id != *id);
    }

    pub(crate) fn contains(&self, id: &NodeId) -> bool {
        id.bucket_index(&self.local_id)
            .map(|index| self.buckets[index].iter().any(|c| c.id == *id))
            .unwrap_or(false)
    }

    /// Every contact currently held, in bucket order.
    pub(crate) fn all(&self) -> Vec<Contact> {
        self.buckets.iter().flatten().copied().collect()
    }

    /// The up-to-`k` known contacts nearest `target`, ascending by XOR
    /// distance.
    pub(crate) fn closest(&self, target: &NodeId, k: usize) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self.buckets.iter().flatten().copied().collect();
        contacts.sort_by_key(|c| c.id.distance(target));
        contacts.truncate(k);
        contacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn id(byte: u8) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        NodeId::new(bytes)
    }

    fn contact(byte: u8, port: u16) -> Contact {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("addr");
        Contact::new(id(byte), addr)
    }

    #[test]
    fn closest_orders_by_xor_distance() {
        let mut table = RoutingTable::new(id(0), 20);
        for byte in [0x08, 0x01, 0x04, 0x02] {
            table.add(contact(byte, 4000 + byte as u16));
        }

        let target = id(0x03);
        let closest = table.closest(&target, 3);
        let ids: Vec<NodeId> = closest.iter().map(|c| c.id).collect();
        // distances to 0x03: 0x02 -> 1, 0x01 -> 2, 0x04 -> 7, 0x08 -> 11
        assert_eq!(ids, vec![id(0x02), id(0x01), id(0x04)]);
    }

    #[test]
    fn refresh_moves_to_front_and_updates_address() {
        let mut table = RoutingTable::new(id(0), 20);
        table.add(contact(0x01, 4001));
        table.add(contact(0x01, 5001));

        assert_eq!(table.len(), 1);
        let got = table.closest(&id(0x01), 1);
        assert_eq!(got[0].addr.port(), 5001);
    }

    #[test]
    fn full_bucket_evicts_oldest() {
        let mut table = RoutingTable::new(id(0), 2);
        // 0x04..0x06 share their highest differing bit, so one bucket
        table.add(contact(0x04, 1));
        table.add(contact(0x05, 2));
        table.add(contact(0x06, 3));

        assert_eq!(table.len(), 2);
        assert!(!table.contains(&id(0x04)));
        assert!(table.contains(&id(0x05)));
        assert!(table.contains(&id(0x06)));
    }

    #[test]
    fn ignores_self_and_zero() {
        let mut table = RoutingTable::new(id(7), 20);
        table.add(contact(7, 1));
        table.add(Contact::new(NodeId::ZERO, "127.0.0.1:1".parse().expect("addr")));
        assert!(table.is_empty());
    }

    #[test]
    fn remove_drops_the_contact() {
        let mut table = RoutingTable::new(id(0), 20);
        table.add(contact(0x01, 1));
        table.remove(&id(0x01));
        assert!(table.is_empty());
    }
}

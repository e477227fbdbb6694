// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Iterative lookup engine.
//!
//! Each live query is keyed by a 32-bit nonce in a driver-owned registry.
//! Probes are bounded by `max_query`; every probe arms a timer, and whichever
//! of reply or timeout fires second finds the probed id gone from the
//! query's timer set and becomes a no-op.

use crate::driver::{Driver, DtunFollowUp, TimerEvent};
use crate::error::Result;
use bytes::Bytes;
use hn_protocol::{AddressFamily, Contact, Message, NodeId, StorePayload};
use itertools::Itertools;
use std::collections::HashSet;
use tokio::sync::oneshot;

/// Where the contact list of a finished `find_node` goes.
pub(crate) enum NodeSink {
    /// An API caller; `None` for lookups nobody waits on (the join loop).
    Caller(Option<oneshot::Sender<Result<Vec<Contact>>>>),
    /// Continue by sending the payload to the located custodians.
    Store(StorePayload),
    /// Continue by republishing the whole record store.
    Restore,
}

/// Where the outcome of a finished `find_value` goes.
pub(crate) enum ValueSink {
    Caller(oneshot::Sender<Result<Option<Bytes>>>),
    /// A proxy server forwarding on behalf of a registered client.
    ProxyClient { src: NodeId, nonce: u32 },
}

pub(crate) enum QueryKind {
    FindNode(NodeSink),
    FindValue { key: Bytes, sink: ValueSink },
}

/// A lookup in progress.
pub(crate) struct Query {
    pub(crate) dst: NodeId,
    pub(crate) kind: QueryKind,
    /// Up to K known contacts, ascending by XOR distance to `dst`.
    pub(crate) candidates: Vec<Contact>,
    /// Ids already probed. Contains the local id from construction so the
    /// fan-out loop never probes ourselves.
    pub(crate) sent: HashSet<NodeId>,
    /// Ids with an outstanding probe timer. Always `in_flight` entries.
    pub(crate) timers: HashSet<NodeId>,
    pub(crate) in_flight: usize,
    pub(crate) nonce: u32,
}

impl Query {
    pub(crate) fn is_find_value(&self) -> bool {
        matches!(self.kind, QueryKind::FindValue { .. })
    }
}

/// Sorts contacts ascending by XOR distance to `target`. Stable, so earlier
/// entries win ties.
pub(crate) fn sort_by_distance(target: &NodeId, contacts: &mut [Contact]) {
    contacts.sort_by_key(|c| c.id.distance(target));
}

/// Merges a reply's contact list into the current candidate set: dedupe by
/// id with existing entries winning, re-sort, truncate to `k`.
pub(crate) fn merge_candidates(
    target: &NodeId,
    existing: Vec<Contact>,
    fresh: Vec<Contact>,
    k: usize,
) -> Vec<Contact> {
    let mut merged: Vec<Contact> = existing
        .into_iter()
        .chain(fresh)
        .unique_by(|c| c.id)
        .collect();
    sort_by_distance(target, &mut merged);
    merged.truncate(k);
    merged
}

impl Driver {
    pub(crate) fn alloc_query_nonce(&mut self) -> u32 {
        loop {
            let nonce = rand::Rng::gen(&mut self.rng);
            if !self.queries.contains_key(&nonce) {
                return nonce;
            }
        }
    }

    /// Entry point shared by `find_node` and `find_value` lookups.
    pub(crate) fn start_query(&mut self, dst: NodeId, kind: QueryKind) {
        let candidates = self.routing_table.closest(&dst, self.config.k);
        if candidates.is_empty() {
            // nothing to ask; the callback contract still fires exactly once
            self.conclude_with_dst(dst, kind, Vec::new(), None);
            return;
        }

        let nonce = self.alloc_query_nonce();
        let mut sent = HashSet::new();
        let _ = sent.insert(self.local_id);

        let query = Query {
            dst,
            kind,
            candidates,
            sent,
            timers: HashSet::new(),
            in_flight: 0,
            nonce,
        };
        let _ = self.queries.insert(nonce, query);
        self.drive_query(nonce);
    }

    /// The seeded bootstrap variant: a single `find_node` for our own id
    /// against a known socket address, with a zero-id probe so the reply
    /// handler can match a responder we do not know yet.
    pub(crate) fn start_bootstrap_query(&mut self, addr: std::net::SocketAddr, sink: NodeSink) {
        let nonce = self.alloc_query_nonce();
        let mut sent = HashSet::new();
        let _ = sent.insert(self.local_id);
        let mut timers = HashSet::new();
        let _ = timers.insert(NodeId::ZERO);

        let query = Query {
            dst: self.local_id,
            kind: QueryKind::FindNode(sink),
            candidates: Vec::new(),
            sent,
            timers,
            in_flight: 1,
            nonce,
        };
        let _ = self.queries.insert(nonce, query);

        self.arm_timer(
            self.config.query_timeout,
            TimerEvent::ProbeTimeout {
                nonce,
                id: NodeId::ZERO,
            },
        );
        let target = self.local_id;
        self.send_probe(nonce, target, None, Contact::new(NodeId::ZERO, addr));
    }

    /// The fan-out rule: probe best-unprobed candidates while capacity
    /// remains; if nothing is in flight afterwards, the query is done.
    pub(crate) fn drive_query(&mut self, nonce: u32) {
        let max_query = self.config.max_query;
        let (to_probe, target, key, finished) = {
            let Some(query) = self.queries.get_mut(&nonce) else {
                return;
            };
            let mut to_probe = Vec::new();
            for contact in &query.candidates {
                if query.in_flight >= max_query {
                    break;
                }
                if query.sent.contains(&contact.id) {
                    continue;
                }
                let _ = query.sent.insert(contact.id);
                let _ = query.timers.insert(contact.id);
                query.in_flight += 1;
                to_probe.push(*contact);
            }
            let key = match &query.kind {
                QueryKind::FindValue { key, .. } => Some(key.clone()),
                QueryKind::FindNode(_) => None,
            };
            (to_probe, query.dst, key, query.in_flight == 0)
        };

        if finished {
            if let Some(query) = self.queries.remove(&nonce) {
                self.conclude(query, None);
            }
            return;
        }

        for contact in to_probe {
            self.arm_timer(
                self.config.query_timeout,
                TimerEvent::ProbeTimeout {
                    nonce,
                    id: contact.id,
                },
            );
            self.send_probe(nonce, target, key.clone(), contact);
        }
    }

    /// Emits one probe, going through dtun when the peers cache has no
    /// address for the contact.
    pub(crate) fn send_probe(
        &mut self,
        nonce: u32,
        target: NodeId,
        key: Option<Bytes>,
        contact: Contact,
    ) {
        if self.use_dtun && !contact.id.is_zero() && self.peers.get_addr(&contact.id).is_none() {
            self.request_via_dtun(contact.id, DtunFollowUp::Probe { nonce, target, key });
            return;
        }

        let family = AddressFamily::of(&contact.addr);
        let msg = match key {
            Some(key) => Message::FindValue {
                nonce,
                family,
                target,
                key,
            },
            None => Message::FindNode {
                nonce,
                family,
                target,
            },
        };
        self.send_message(&contact.id, &msg, contact.addr);
    }

    /// A probe timer fired. If the reply beat us here the id is gone from
    /// the timer set and there is nothing to do; otherwise the unresponsive
    /// contact is pruned and the fan-out continues.
    pub(crate) fn handle_probe_timeout(&mut self, nonce: u32, id: NodeId) {
        {
            let Some(query) = self.queries.get_mut(&nonce) else {
                return;
            };
            if !query.timers.remove(&id) {
                return;
            }
            let _ = query.sent.insert(id);
            query.in_flight -= 1;
            if !id.is_zero() {
                query.candidates.retain(|c| c.id != id);
            }
        }

        if !id.is_zero() {
            trace!("probe to {id:?} timed out, pruning");
            self.peers.add_timeout(&id);
            self.routing_table.remove(&id);
        }
        self.drive_query(nonce);
    }

    /// The single callback site. `value` is `Some` only for a successful
    /// `find_value`.
    pub(crate) fn conclude(&mut self, query: Query, value: Option<Bytes>) {
        trace!("query {:#010x} towards {:?} concluded", query.nonce, query.dst);
        let dst = query.dst;
        self.conclude_with_dst(dst, query.kind, query.candidates, value);
    }

    fn conclude_with_dst(
        &mut self,
        dst: NodeId,
        kind: QueryKind,
        candidates: Vec<Contact>,
        value: Option<Bytes>,
    ) {
        match kind {
            QueryKind::FindNode(NodeSink::Caller(Some(sender))) => {
                let _ = sender.send(Ok(candidates));
            }
            QueryKind::FindNode(NodeSink::Caller(None)) => {}
            QueryKind::FindNode(NodeSink::Store(payload)) => {
                self.send_store_to_custodians(&candidates, payload);
            }
            QueryKind::FindNode(NodeSink::Restore) => {
                self.republish_records();
            }
            QueryKind::FindValue { sink, .. } => match sink {
                ValueSink::Caller(sender) => {
                    let _ = sender.send(Ok(value));
                }
                ValueSink::ProxyClient { src, nonce } => {
                    self.send_proxy_get_reply(src, nonce, dst, value);
                }
            },
        }
    }

    fn send_store_to_custodians(&mut self, custodians: &[Contact], payload: StorePayload) {
        for contact in custodians {
            if contact.id == self.local_id {
                continue;
            }
            self.send_message(
                &contact.id,
                &Message::Store(payload.clone()),
                contact.addr,
            );
        }
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

    fn contact(byte: u8) -> Contact {
        let addr: SocketAddr = format!("127.0.0.1:{}", 4000 + u16::from(byte))
            .parse()
            .expect("addr");
        Contact::new(id(byte), addr)
    }

    #[test]
    fn merge_is_sorted_and_truncated() {
        let target = id(0);
        let existing = vec![contact(2), contact(8)];
        let fresh = vec![contact(1), contact(4), contact(16), contact(32)];

        let merged = merge_candidates(&target, existing, fresh, 4);
        let ids: Vec<NodeId> = merged.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![id(1), id(2), id(4), id(8)]);
    }

    #[test]
    fn merge_keeps_existing_entry_on_duplicate_id() {
        let target = id(0);
        let known = contact(2);
        let mut rival = contact(2);
        rival.addr = "127.0.0.1:9999".parse().expect("addr");

        let merged = merge_candidates(&target, vec![known], vec![rival], 4);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].addr, known.addr);
    }
}

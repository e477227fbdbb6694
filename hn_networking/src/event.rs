// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Inbound datagram handling.
//!
//! The codec already enforced the header guards (magic, version, length,
//! destination local-or-zero). Handlers add the per-message validation the
//! protocol requires, silently dropping anything that fails.

use crate::driver::Driver;
use crate::query::{merge_candidates, sort_by_distance, QueryKind, ValueSink};
use hn_protocol::{
    wire::{self, Envelope},
    AddressFamily, Contact, Message, NodeId, StorePayload, ValueReply,
};
use std::net::SocketAddr;
use tokio::time::Instant;

impl Driver {
    pub(crate) fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        let envelope = match wire::decode(datagram, &self.local_id) {
            Ok(envelope) => envelope,
            Err(err) => {
                trace!("dropping datagram from {from}: {err}");
                return;
            }
        };
        let Envelope { dst, src, msg } = envelope;

        match msg {
            Message::Ping { nonce } => self.handle_ping(src, from, nonce),
            Message::PingReply { nonce } => self.handle_ping_reply(dst, src, from, nonce),
            Message::FindNode {
                nonce,
                family,
                target,
            } => self.handle_find_node(src, from, nonce, family, target),
            Message::FindNodeReply {
                nonce,
                family,
                target,
                contacts,
            } => self.handle_find_node_reply(dst, src, from, nonce, family, target, contacts),
            Message::FindValue {
                nonce,
                family,
                target,
                key,
            } => self.handle_find_value(dst, src, from, nonce, family, target, key),
            Message::FindValueReply {
                nonce,
                target,
                reply,
            } => self.handle_find_value_reply(dst, src, from, nonce, target, reply),
            Message::Store(payload) => self.handle_store(dst, src, from, payload),
            Message::ProxyRegister { session, nonce } => {
                self.handle_proxy_register(dst, src, from, session, nonce)
            }
            Message::ProxyRegisterReply { nonce } => {
                self.handle_proxy_register_reply(dst, src, from, nonce)
            }
            Message::ProxyStore(payload) => self.handle_proxy_store(dst, src, payload),
            Message::ProxyGet { nonce, id, key } => {
                self.handle_proxy_get(dst, src, nonce, id, key)
            }
            Message::ProxyGetReply { nonce, value, .. } => {
                self.handle_proxy_get_reply(dst, nonce, value)
            }
        }
    }

    // --------------------------------------------
    // ---------- Ping ----------------------------
    // --------------------------------------------

    fn handle_ping(&mut self, src: NodeId, from: SocketAddr, nonce: u32) {
        if src != self.local_id && !src.is_zero() {
            self.peers.add_node(Contact::new(src, from), Instant::now());
        }
        self.send_message(&src, &Message::PingReply { nonce }, from);
    }

    fn handle_ping_reply(&mut self, dst: NodeId, src: NodeId, from: SocketAddr, nonce: u32) {
        if dst != self.local_id {
            return;
        }
        match self.pending_pings.get(&nonce) {
            Some(expected) if *expected == src => {}
            _ => return,
        }
        let _ = self.pending_pings.remove(&nonce);
        self.peers.add_node(Contact::new(src, from), Instant::now());
    }

    // --------------------------------------------
    // ---------- find_node -----------------------
    // --------------------------------------------

    fn handle_find_node(
        &mut self,
        src: NodeId,
        from: SocketAddr,
        nonce: u32,
        family: AddressFamily,
        target: NodeId,
    ) {
        // requests may be addressed to the zero id (bootstrap), so only the
        // family needs checking here
        if family != self.family {
            return;
        }
        self.register_peer(Contact::new(src, from));

        let contacts = self.routing_table.closest(&target, self.config.k);
        let reply = Message::FindNodeReply {
            nonce,
            family,
            target,
            contacts,
        };
        self.send_message(&src, &reply, from);
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_find_node_reply(
        &mut self,
        dst: NodeId,
        src: NodeId,
        from: SocketAddr,
        nonce: u32,
        family: AddressFamily,
        target: NodeId,
        mut contacts: Vec<Contact>,
    ) {
        if dst != self.local_id {
            return;
        }
        {
            let Some(query) = self.queries.get(&nonce) else {
                return;
            };
            if query.dst != target || query.is_find_value() {
                return;
            }
        }
        if !src.is_zero() {
            self.register_peer(Contact::new(src, from));
        }

        let Some(query) = self.queries.get_mut(&nonce) else {
            return;
        };
        // the probe timer is keyed by the responder id, or by the zero
        // sentinel for a bootstrap probe whose responder we did not know
        let timer_id = if query.timers.contains(&src) {
            src
        } else if query.timers.contains(&NodeId::ZERO) {
            NodeId::ZERO
        } else {
            return;
        };
        let _ = query.timers.remove(&timer_id);
        let _ = query.sent.insert(src);
        query.in_flight -= 1;

        if family != self.family {
            contacts.clear();
        }
        sort_by_distance(&target, &mut contacts);
        let existing = std::mem::take(&mut query.candidates);
        query.candidates = merge_candidates(&target, existing, contacts, self.config.k);

        self.drive_query(nonce);
    }

    // --------------------------------------------
    // ---------- find_value ----------------------
    // --------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn handle_find_value(
        &mut self,
        dst: NodeId,
        src: NodeId,
        from: SocketAddr,
        nonce: u32,
        family: AddressFamily,
        target: NodeId,
        key: bytes::Bytes,
    ) {
        if dst != self.local_id {
            return;
        }
        self.register_peer(Contact::new(src, from));

        let reply = match self.record_store.get(&target, &key) {
            Some(record) => ValueReply::Found {
                key: record.key.clone(),
                value: record.value.clone(),
            },
            None => {
                if family != self.family {
                    return;
                }
                ValueReply::Nodes {
                    family,
                    contacts: self.routing_table.closest(&target, self.config.k),
                }
            }
        };
        self.send_message(
            &src,
            &Message::FindValueReply {
                nonce,
                target,
                reply,
            },
            from,
        );
    }

    fn handle_find_value_reply(
        &mut self,
        dst: NodeId,
        src: NodeId,
        from: SocketAddr,
        nonce: u32,
        target: NodeId,
        reply: ValueReply,
    ) {
        if dst != self.local_id {
            return;
        }
        {
            let Some(query) = self.queries.get(&nonce) else {
                return;
            };
            if query.dst != target || !query.timers.contains(&src) || !query.is_find_value() {
                return;
            }
        }
        self.register_peer(Contact::new(src, from));

        let Some(query) = self.queries.get_mut(&nonce) else {
            return;
        };
        let _ = query.timers.remove(&src);
        let _ = query.sent.insert(src);
        query.in_flight -= 1;

        match reply {
            ValueReply::Found { key, value } => {
                let expected = match &query.kind {
                    QueryKind::FindValue { key, .. } => key.clone(),
                    QueryKind::FindNode(_) => return,
                };
                if key != expected {
                    // wrong record; treat it like a miss so the lookup keeps
                    // moving and still concludes exactly once
                    self.drive_query(nonce);
                    return;
                }
                if let Some(query) = self.queries.remove(&nonce) {
                    self.conclude(query, Some(value));
                }
            }
            ValueReply::Nodes {
                family,
                mut contacts,
            } => {
                if family != self.family {
                    contacts.clear();
                }
                sort_by_distance(&target, &mut contacts);
                let existing = std::mem::take(&mut query.candidates);
                query.candidates = merge_candidates(&target, existing, contacts, self.config.k);
                self.drive_query(nonce);
            }
        }
    }

    // --------------------------------------------
    // ---------- store ---------------------------
    // --------------------------------------------

    fn handle_store(&mut self, dst: NodeId, src: NodeId, from: SocketAddr, payload: StorePayload) {
        if dst != self.local_id {
            return;
        }
        self.register_peer(Contact::new(src, from));
        self.record_store.apply_store(src, payload, Instant::now());
    }
}

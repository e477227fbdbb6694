// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::query::{NodeSink, QueryKind, ValueSink};
use bytes::Bytes;
use hn_protocol::{Contact, NodeId, StorePayload};
use std::fmt::Debug;
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// Commands a `Network` handle sends into the driver.
pub enum NetworkCmd {
    /// Iterative lookup of the K contacts nearest `target`.
    FindNode {
        target: NodeId,
        sender: oneshot::Sender<Result<Vec<Contact>>>,
    },
    /// Iterative value lookup; resolves to `None` when the lookup exhausts.
    FindValue {
        target: NodeId,
        key: Bytes,
        sender: oneshot::Sender<Result<Option<Bytes>>>,
    },
    /// Locate the custodians of `id` and hand them the record.
    Store {
        id: NodeId,
        key: Bytes,
        value: Bytes,
        ttl_secs: u16,
    },
    /// Seeded lookup of our own id against a known address.
    Bootstrap {
        addr: SocketAddr,
        sender: Option<oneshot::Sender<Result<Vec<Contact>>>>,
    },
    /// Liveness probe.
    Ping { dst: Contact },
    /// Client side: pick a proxy server via dtun and register.
    ProxyRegister,
    /// Client side: store through the registered server.
    ProxyStore {
        id: NodeId,
        key: Bytes,
        value: Bytes,
        ttl_secs: u16,
    },
    /// Client side: fetch through the registered server.
    ProxyGet {
        id: NodeId,
        key: Bytes,
        sender: oneshot::Sender<Result<Option<Bytes>>>,
    },
    /// Every contact currently in the routing table.
    GetKnownPeers {
        sender: oneshot::Sender<Vec<Contact>>,
    },
    GetLocalState {
        sender: oneshot::Sender<LocalState>,
    },
}

/// Snapshot of the driver's local state.
#[derive(Debug, Clone)]
pub struct LocalState {
    pub known_peers: usize,
    pub cached_peers: usize,
    pub stored_records: usize,
    pub live_queries: usize,
    pub registered_clients: usize,
    pub proxy_registered: bool,
}

/// Debug impl that elides key and value bytes.
impl Debug for NetworkCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkCmd::FindNode { target, .. } => {
                write!(f, "NetworkCmd::FindNode {{ target: {target:?} }}")
            }
            NetworkCmd::FindValue { target, key, .. } => {
                write!(
                    f,
                    "NetworkCmd::FindValue {{ target: {target:?}, keylen: {} }}",
                    key.len()
                )
            }
            NetworkCmd::Store { id, key, value, ttl_secs } => {
                write!(
                    f,
                    "NetworkCmd::Store {{ id: {id:?}, keylen: {}, valuelen: {}, ttl: {ttl_secs}s }}",
                    key.len(),
                    value.len()
                )
            }
            NetworkCmd::Bootstrap { addr, .. } => {
                write!(f, "NetworkCmd::Bootstrap {{ addr: {addr:?} }}")
            }
            NetworkCmd::Ping { dst } => write!(f, "NetworkCmd::Ping {{ dst: {dst:?} }}"),
            NetworkCmd::ProxyRegister => write!(f, "NetworkCmd::ProxyRegister"),
            NetworkCmd::ProxyStore { id, key, value, ttl_secs } => {
                write!(
                    f,
                    "NetworkCmd::ProxyStore {{ id: {id:?}, keylen: {}, valuelen: {}, ttl: {ttl_secs}s }}",
                    key.len(),
                    value.len()
                )
            }
            NetworkCmd::ProxyGet { id, key, .. } => {
                write!(
                    f,
                    "NetworkCmd::ProxyGet {{ id: {id:?}, keylen: {} }}",
                    key.len()
                )
            }
            NetworkCmd::GetKnownPeers { .. } => write!(f, "NetworkCmd::GetKnownPeers"),
            NetworkCmd::GetLocalState { .. } => write!(f, "NetworkCmd::GetLocalState"),
        }
    }
}

impl Driver {
    pub(crate) fn handle_cmd(&mut self, cmd: NetworkCmd) {
        trace!("handling {cmd:?}");
        match cmd {
            NetworkCmd::FindNode { target, sender } => {
                if !self.nat.state().direct_dht_allowed() {
                    let _ = sender.send(Err(Error::WrongNatState));
                    return;
                }
                self.start_query(target, QueryKind::FindNode(NodeSink::Caller(Some(sender))));
            }
            NetworkCmd::FindValue { target, key, sender } => {
                if !self.nat.state().direct_dht_allowed() {
                    let _ = sender.send(Err(Error::WrongNatState));
                    return;
                }
                self.start_query(
                    target,
                    QueryKind::FindValue {
                        key,
                        sink: ValueSink::Caller(sender),
                    },
                );
            }
            NetworkCmd::Store { id, key, value, ttl_secs } => {
                self.store_record(StorePayload {
                    id,
                    key,
                    value,
                    ttl_secs,
                });
            }
            NetworkCmd::Bootstrap { addr, sender } => {
                if !self.nat.state().direct_dht_allowed() {
                    if let Some(sender) = sender {
                        let _ = sender.send(Err(Error::WrongNatState));
                    }
                    return;
                }
                self.start_bootstrap_query(addr, NodeSink::Caller(sender));
            }
            NetworkCmd::Ping { dst } => self.start_ping(dst),
            NetworkCmd::ProxyRegister => self.start_proxy_register(),
            NetworkCmd::ProxyStore { id, key, value, ttl_secs } => {
                self.client_proxy_store(StorePayload {
                    id,
                    key,
                    value,
                    ttl_secs,
                });
            }
            NetworkCmd::ProxyGet { id, key, sender } => self.client_proxy_get(id, key, sender),
            NetworkCmd::GetKnownPeers { sender } => {
                let _ = sender.send(self.routing_table.all());
            }
            NetworkCmd::GetLocalState { sender } => {
                let state = LocalState {
                    known_peers: self.routing_table.len(),
                    cached_peers: self.peers.len(),
                    stored_records: self.record_store.len(),
                    live_queries: self.queries.len(),
                    registered_clients: self.proxy_server.len(),
                    proxy_registered: self.proxy_client.is_registered(),
                };
                let _ = sender.send(state);
            }
        }
    }
}

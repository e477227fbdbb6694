// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Event-driven core of the hivenet overlay.
//!
//! A [`NetworkBuilder`] produces a cloneable [`Network`] handle and a
//! [`Driver`]; spawn [`Driver::run`] and talk to the overlay through the
//! handle. The driver owns the routing table, peers cache, record store and
//! query registry and mutates them from a single `select!` loop.

#[macro_use]
extern crate tracing;

mod bootstrap;
mod cmd;
mod driver;
mod dtun;
mod error;
mod event;
mod nat;
mod peers;
mod proxy;
mod query;
mod record_store;
mod routing_table;
mod transport;

pub use self::{
    cmd::{LocalState, NetworkCmd},
    driver::{Config, Driver, NetworkBuilder},
    dtun::{DtunService, NoDtun},
    error::Error,
    nat::{NatState, NatWatch},
    transport::{DatagramSender, UdpTransport},
};

use self::error::Result;
use bytes::Bytes;
use hn_protocol::{wire, AddressFamily, Contact, NodeId, StorePayload};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Replication and fan-out width: lookups track the K nearest candidates and
/// records replicate to the K nearest custodians.
pub const K: usize = 6;

/// At most this many probes in flight per query.
pub const MAX_QUERY: usize = 3;

/// Per-probe timer.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Minimum spacing between republication sweeps.
pub const RESTORE_INTERVAL: Duration = Duration::from_secs(360);

/// Cadence of the maintenance sweep (record expiry, registration expiry,
/// republication gate).
pub const TIMER_INTERVAL: Duration = Duration::from_secs(180);

/// Proxy client registration timeout.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(2);

/// Proxy client `get` timeout.
pub const GET_TIMEOUT: Duration = Duration::from_secs(10);

/// Sorts contacts ascending by XOR distance to `target`.
pub fn sort_contacts_by_distance(target: &NodeId, contacts: &mut [Contact]) {
    query::sort_by_distance(target, contacts);
}

/// API to interact with the overlay driver.
#[derive(Clone)]
pub struct Network {
    pub(crate) cmd_sender: mpsc::Sender<NetworkCmd>,
    pub(crate) local_id: NodeId,
    pub(crate) listen_addr: Option<SocketAddr>,
}

impl Network {
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// The bound socket address, when the driver owns a UDP transport.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    /// Iterative lookup of the K contacts nearest `target`. Resolves with an
    /// empty list when nothing is known.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<Contact>> {
        let (sender, receiver) = oneshot::channel();
        self.send_cmd(NetworkCmd::FindNode { target, sender }).await?;
        receiver
            .await
            .map_err(|_| Error::InternalMsgChannelDropped)?
    }

    /// Iterative value lookup under `(target, key)`.
    pub async fn find_value(&self, target: NodeId, key: Bytes) -> Result<Option<Bytes>> {
        check_lookup_key_size(&target, &key)?;
        let (sender, receiver) = oneshot::channel();
        self.send_cmd(NetworkCmd::FindValue {
            target,
            key,
            sender,
        })
        .await?;
        receiver
            .await
            .map_err(|_| Error::InternalMsgChannelDropped)?
    }

    /// Hands the record to the K custodians nearest `id`. Fire and forget:
    /// delivery is confirmed only through later lookups.
    pub async fn store(
        &self,
        id: NodeId,
        key: Bytes,
        value: Bytes,
        ttl: Duration,
    ) -> Result<()> {
        let ttl_secs = ttl.as_secs().min(u64::from(u16::MAX)) as u16;
        check_record_size(&id, &key, &value, ttl_secs)?;
        self.send_cmd(NetworkCmd::Store {
            id,
            key,
            value,
            ttl_secs,
        })
        .await
    }

    /// Bootstraps the routing table by asking `addr` for the nodes nearest
    /// our own id.
    pub async fn bootstrap(&self, addr: SocketAddr) -> Result<Vec<Contact>> {
        let (sender, receiver) = oneshot::channel();
        self.send_cmd(NetworkCmd::Bootstrap {
            addr,
            sender: Some(sender),
        })
        .await?;
        receiver
            .await
            .map_err(|_| Error::InternalMsgChannelDropped)?
    }

    /// Liveness probe; a reply refreshes the peer's cache entry.
    pub async fn ping(&self, dst: Contact) -> Result<()> {
        self.send_cmd(NetworkCmd::Ping { dst }).await
    }

    /// Client side: pick a proxy server through dtun and register with it.
    pub async fn proxy_register(&self) -> Result<()> {
        self.send_cmd(NetworkCmd::ProxyRegister).await
    }

    /// Client side: store through the registered proxy server.
    pub async fn proxy_store(
        &self,
        id: NodeId,
        key: Bytes,
        value: Bytes,
        ttl: Duration,
    ) -> Result<()> {
        let ttl_secs = ttl.as_secs().min(u64::from(u16::MAX)) as u16;
        check_record_size(&id, &key, &value, ttl_secs)?;
        self.send_cmd(NetworkCmd::ProxyStore {
            id,
            key,
            value,
            ttl_secs,
        })
        .await
    }

    /// Client side: fetch through the registered proxy server. Resolves to
    /// `None` on a miss or when the 10-second timeout lapses.
    pub async fn proxy_get(&self, id: NodeId, key: Bytes) -> Result<Option<Bytes>> {
        check_lookup_key_size(&id, &key)?;
        let (sender, receiver) = oneshot::channel();
        self.send_cmd(NetworkCmd::ProxyGet { id, key, sender }).await?;
        receiver
            .await
            .map_err(|_| Error::InternalMsgChannelDropped)?
    }

    /// Every contact currently in the routing table.
    pub async fn known_peers(&self) -> Result<Vec<Contact>> {
        let (sender, receiver) = oneshot::channel();
        self.send_cmd(NetworkCmd::GetKnownPeers { sender }).await?;
        receiver.await.map_err(|_| Error::InternalMsgChannelDropped)
    }

    pub async fn local_state(&self) -> Result<LocalState> {
        let (sender, receiver) = oneshot::channel();
        self.send_cmd(NetworkCmd::GetLocalState { sender }).await?;
        receiver.await.map_err(|_| Error::InternalMsgChannelDropped)
    }

    async fn send_cmd(&self, cmd: NetworkCmd) -> Result<()> {
        self.cmd_sender
            .send(cmd)
            .await
            .map_err(|_| Error::InternalMsgChannelDropped)
    }
}

/// A store that cannot fit one datagram is refused at the API boundary.
fn check_record_size(id: &NodeId, key: &Bytes, value: &Bytes, ttl_secs: u16) -> Result<()> {
    let payload = StorePayload {
        id: *id,
        key: key.clone(),
        value: value.clone(),
        ttl_secs,
    };
    let _ = wire::encode(id, id, &hn_protocol::Message::Store(payload))?;
    Ok(())
}

/// A lookup key that cannot fit one probe datagram is refused at the API
/// boundary. The `find_value` trailer is the larger of the two lookup
/// encodings, so it bounds the proxy `get` as well.
fn check_lookup_key_size(id: &NodeId, key: &Bytes) -> Result<()> {
    let probe = hn_protocol::Message::FindValue {
        nonce: 0,
        family: AddressFamily::Inet,
        target: *id,
        key: key.clone(),
    };
    let _ = wire::encode(id, id, &probe)?;
    Ok(())
}

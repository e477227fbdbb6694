// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Typed messages of the overlay protocol.

use crate::{Error, NodeId, Result};
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;

/// Address family tag carried by node-list messages. The wire values match
/// the protocol: `4` for IPv4 and `6` for IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            AddressFamily::Inet => 4,
            AddressFamily::Inet6 => 6,
        }
    }

    pub fn from_u16(raw: u16) -> Result<Self> {
        match raw {
            4 => Ok(AddressFamily::Inet),
            6 => Ok(AddressFamily::Inet6),
            other => Err(Error::UnknownFamily(other)),
        }
    }
}

/// A peer as carried on the wire: its id plus one address of a single
/// family.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Contact {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl Contact {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.addr)
    }
}

impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.id, self.addr)
    }
}

/// Trailer shared by `store` and `proxy_store`.
#[derive(Clone, PartialEq, Eq)]
pub struct StorePayload {
    /// Id the record lives under; its custodians are the K nodes nearest it.
    pub id: NodeId,
    pub key: Bytes,
    pub value: Bytes,
    pub ttl_secs: u16,
}

impl fmt::Debug for StorePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // elide the value bytes, they can be large
        write!(
            f,
            "StorePayload {{ id: {:?}, keylen: {}, valuelen: {}, ttl: {}s }}",
            self.id,
            self.key.len(),
            self.value.len(),
            self.ttl_secs
        )
    }
}

/// Body of a `find_value_reply`, discriminated by the wire `flag` byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueReply {
    /// `flag == 1`: the responder holds the record.
    Found { key: Bytes, value: Bytes },
    /// `flag == 0`: the responder does not; here is who might.
    Nodes {
        family: AddressFamily,
        contacts: Vec<Contact>,
    },
}

/// Every message of the overlay protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping {
        nonce: u32,
    },
    PingReply {
        nonce: u32,
    },
    FindNode {
        nonce: u32,
        family: AddressFamily,
        target: NodeId,
    },
    FindNodeReply {
        nonce: u32,
        family: AddressFamily,
        target: NodeId,
        contacts: Vec<Contact>,
    },
    FindValue {
        nonce: u32,
        family: AddressFamily,
        target: NodeId,
        key: Bytes,
    },
    FindValueReply {
        nonce: u32,
        target: NodeId,
        reply: ValueReply,
    },
    Store(StorePayload),
    ProxyRegister {
        session: u32,
        nonce: u32,
    },
    ProxyRegisterReply {
        nonce: u32,
    },
    ProxyStore(StorePayload),
    ProxyGet {
        nonce: u32,
        id: NodeId,
        key: Bytes,
    },
    ProxyGetReply {
        nonce: u32,
        id: NodeId,
        /// `Some` iff the wire `flag` byte is 1.
        value: Option<Bytes>,
    },
}

impl Message {
    /// The wire type byte of this message.
    pub fn kind(&self) -> u8 {
        match self {
            Message::Ping { .. } => kind::PING,
            Message::PingReply { .. } => kind::PING_REPLY,
            Message::FindNode { .. } => kind::FIND_NODE,
            Message::FindNodeReply { .. } => kind::FIND_NODE_REPLY,
            Message::FindValue { .. } => kind::FIND_VALUE,
            Message::FindValueReply { .. } => kind::FIND_VALUE_REPLY,
            Message::Store(_) => kind::STORE,
            Message::ProxyRegister { .. } => kind::PROXY_REGISTER,
            Message::ProxyRegisterReply { .. } => kind::PROXY_REGISTER_REPLY,
            Message::ProxyStore(_) => kind::PROXY_STORE,
            Message::ProxyGet { .. } => kind::PROXY_GET,
            Message::ProxyGetReply { .. } => kind::PROXY_GET_REPLY,
        }
    }
}

/// Wire values of the header type byte.
pub mod kind {
    pub const PING: u8 = 0x10;
    pub const PING_REPLY: u8 = 0x11;
    pub const FIND_NODE: u8 = 0x12;
    pub const FIND_NODE_REPLY: u8 = 0x13;
    pub const FIND_VALUE: u8 = 0x14;
    pub const FIND_VALUE_REPLY: u8 = 0x15;
    pub const STORE: u8 = 0x16;
    pub const PROXY_REGISTER: u8 = 0x20;
    pub const PROXY_REGISTER_REPLY: u8 = 0x21;
    pub const PROXY_STORE: u8 = 0x22;
    pub const PROXY_GET: u8 = 0x23;
    pub const PROXY_GET_REPLY: u8 = 0x24;
}

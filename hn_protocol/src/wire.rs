// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Binary codec for the overlay datagrams.
//!
//! Header layout, big-endian: `magic: u16`, `version: u8`, `type: u8`,
//! `length: u16` (whole datagram, header included), `dst: [u8; 20]`,
//! `src: [u8; 20]`. A contact record is `id: [u8; 20]`, `ip: [u8; 4]` or
//! `[u8; 16]` per the message's address family, `port: u16`.

use crate::messages::{kind, AddressFamily, Contact, Message, StorePayload, ValueReply};
use crate::{Error, NodeId, Result, NODE_ID_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

pub const MAGIC: u16 = 0xBABE;
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 46;

/// Hard cap on an encoded datagram. Store and find_value payloads are
/// refused above this at the API boundary.
pub const MAX_DATAGRAM: usize = 4096;

/// A decoded datagram: validated header ids plus the typed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub dst: NodeId,
    pub src: NodeId,
    pub msg: Message,
}

/// Encodes `msg` into a ready-to-send datagram.
pub fn encode(dst: &NodeId, src: &NodeId, msg: &Message) -> Result<Bytes> {
    let mut body = BytesMut::new();
    encode_body(msg, &mut body)?;

    let total = HEADER_LEN + body.len();
    if total > MAX_DATAGRAM {
        return Err(Error::Oversize);
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u16(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(msg.kind());
    buf.put_u16(total as u16);
    buf.put_slice(dst.as_bytes());
    buf.put_slice(src.as_bytes());
    buf.put_slice(&body);

    Ok(buf.freeze())
}

/// Decodes and validates a datagram addressed to `local`.
///
/// Rejects wrong magic, wrong version, unknown type, a length field that
/// disagrees with the observed datagram, unknown address families, and a
/// destination id that is neither `local` nor the zero sentinel. Callers are
/// expected to drop rejected datagrams without replying.
pub fn decode(datagram: &[u8], local: &NodeId) -> Result<Envelope> {
    if datagram.len() < HEADER_LEN {
        return Err(Error::Truncated);
    }

    let mut buf = datagram;
    let magic = buf.get_u16();
    if magic != MAGIC {
        return Err(Error::BadMagic(magic));
    }
    let version = buf.get_u8();
    if version != VERSION {
        return Err(Error::BadVersion(version));
    }
    let msg_kind = buf.get_u8();
    let declared = buf.get_u16() as usize;
    if declared != datagram.len() {
        return Err(Error::LengthMismatch {
            declared,
            actual: datagram.len(),
        });
    }

    let dst = take_id(&mut buf)?;
    let src = take_id(&mut buf)?;
    if dst != *local && !dst.is_zero() {
        return Err(Error::WrongDestination);
    }

    let msg = decode_body(msg_kind, &mut buf)?;
    if !buf.is_empty() {
        // body parsers consume exactly; leftovers mean a lying length field
        return Err(Error::LengthMismatch {
            declared,
            actual: declared - buf.len(),
        });
    }

    Ok(Envelope { dst, src, msg })
}

fn encode_body(msg: &Message, buf: &mut BytesMut) -> Result<()> {
    match msg {
        Message::Ping { nonce } | Message::PingReply { nonce } => {
            buf.put_u32(*nonce);
        }
        Message::FindNode {
            nonce,
            family,
            target,
        } => {
            buf.put_u32(*nonce);
            buf.put_u16(family.as_u16());
            buf.put_slice(target.as_bytes());
        }
        Message::FindNodeReply {
            nonce,
            family,
            target,
            contacts,
        } => {
            if contacts.len() > u8::MAX as usize {
                return Err(Error::Oversize);
            }
            buf.put_u32(*nonce);
            buf.put_u16(family.as_u16());
            buf.put_u8(contacts.len() as u8);
            buf.put_slice(target.as_bytes());
            for contact in contacts {
                put_contact(buf, *family, contact)?;
            }
        }
        Message::FindValue {
            nonce,
            family,
            target,
            key,
        } => {
            buf.put_u32(*nonce);
            buf.put_u16(family.as_u16());
            buf.put_u16(key.len() as u16);
            buf.put_slice(target.as_bytes());
            buf.put_slice(key);
        }
        Message::FindValueReply {
            nonce,
            target,
            reply,
        } => {
            buf.put_u32(*nonce);
            match reply {
                ValueReply::Found { key, value } => {
                    buf.put_u8(1);
                    buf.put_slice(target.as_bytes());
                    buf.put_u16(key.len() as u16);
                    buf.put_u16(value.len() as u16);
                    buf.put_slice(key);
                    buf.put_slice(value);
                }
                ValueReply::Nodes { family, contacts } => {
                    if contacts.len() > u8::MAX as usize {
                        return Err(Error::Oversize);
                    }
                    buf.put_u8(0);
                    buf.put_slice(target.as_bytes());
                    buf.put_u8(contacts.len() as u8);
                    buf.put_u16(family.as_u16());
                    for contact in contacts {
                        put_contact(buf, *family, contact)?;
                    }
                }
            }
        }
        Message::Store(payload) | Message::ProxyStore(payload) => {
            put_store_payload(buf, payload);
        }
        Message::ProxyRegister { session, nonce } => {
            buf.put_u32(*session);
            buf.put_u32(*nonce);
        }
        Message::ProxyRegisterReply { nonce } => {
            buf.put_u32(*nonce);
        }
        Message::ProxyGet { nonce, id, key } => {
            buf.put_u32(*nonce);
            buf.put_u16(key.len() as u16);
            buf.put_slice(id.as_bytes());
            buf.put_slice(key);
        }
        Message::ProxyGetReply { nonce, id, value } => {
            buf.put_u32(*nonce);
            buf.put_u8(u8::from(value.is_some()));
            buf.put_slice(id.as_bytes());
            if let Some(value) = value {
                buf.put_slice(value);
            }
        }
    }
    Ok(())
}

fn decode_body(msg_kind: u8, buf: &mut &[u8]) -> Result<Message> {
    let msg = match msg_kind {
        kind::PING => Message::Ping {
            nonce: take_u32(buf)?,
        },
        kind::PING_REPLY => Message::PingReply {
            nonce: take_u32(buf)?,
        },
        kind::FIND_NODE => {
            let nonce = take_u32(buf)?;
            let family = AddressFamily::from_u16(take_u16(buf)?)?;
            let target = take_id(buf)?;
            Message::FindNode {
                nonce,
                family,
                target,
            }
        }
        kind::FIND_NODE_REPLY => {
            let nonce = take_u32(buf)?;
            let family = AddressFamily::from_u16(take_u16(buf)?)?;
            let num = take_u8(buf)?;
            let target = take_id(buf)?;
            let contacts = take_contacts(buf, family, num)?;
            Message::FindNodeReply {
                nonce,
                family,
                target,
                contacts,
            }
        }
        kind::FIND_VALUE => {
            let nonce = take_u32(buf)?;
            let family = AddressFamily::from_u16(take_u16(buf)?)?;
            let keylen = take_u16(buf)? as usize;
            let target = take_id(buf)?;
            let key = take_bytes(buf, keylen)?;
            Message::FindValue {
                nonce,
                family,
                target,
                key,
            }
        }
        kind::FIND_VALUE_REPLY => {
            let nonce = take_u32(buf)?;
            let flag = take_u8(buf)?;
            let target = take_id(buf)?;
            let reply = match flag {
                1 => {
                    let keylen = take_u16(buf)? as usize;
                    let valuelen = take_u16(buf)? as usize;
                    let key = take_bytes(buf, keylen)?;
                    let value = take_bytes(buf, valuelen)?;
                    ValueReply::Found { key, value }
                }
                0 => {
                    let num = take_u8(buf)?;
                    let family = AddressFamily::from_u16(take_u16(buf)?)?;
                    let contacts = take_contacts(buf, family, num)?;
                    ValueReply::Nodes { family, contacts }
                }
                other => return Err(Error::UnknownType(other)),
            };
            Message::FindValueReply {
                nonce,
                target,
                reply,
            }
        }
        kind::STORE => Message::Store(take_store_payload(buf)?),
        kind::PROXY_STORE => Message::ProxyStore(take_store_payload(buf)?),
        kind::PROXY_REGISTER => {
            let session = take_u32(buf)?;
            let nonce = take_u32(buf)?;
            Message::ProxyRegister { session, nonce }
        }
        kind::PROXY_REGISTER_REPLY => Message::ProxyRegisterReply {
            nonce: take_u32(buf)?,
        },
        kind::PROXY_GET => {
            let nonce = take_u32(buf)?;
            let keylen = take_u16(buf)? as usize;
            let id = take_id(buf)?;
            let key = take_bytes(buf, keylen)?;
            Message::ProxyGet { nonce, id, key }
        }
        kind::PROXY_GET_REPLY => {
            let nonce = take_u32(buf)?;
            let flag = take_u8(buf)?;
            let id = take_id(buf)?;
            let value = if flag > 0 {
                Some(take_bytes(buf, buf.len())?)
            } else {
                None
            };
            Message::ProxyGetReply { nonce, id, value }
        }
        other => return Err(Error::UnknownType(other)),
    };

    Ok(msg)
}

fn put_store_payload(buf: &mut BytesMut, payload: &StorePayload) {
    buf.put_u16(payload.key.len() as u16);
    buf.put_u16(payload.value.len() as u16);
    buf.put_u16(payload.ttl_secs);
    buf.put_slice(payload.id.as_bytes());
    buf.put_slice(&payload.key);
    buf.put_slice(&payload.value);
}

fn take_store_payload(buf: &mut &[u8]) -> Result<StorePayload> {
    let keylen = take_u16(buf)? as usize;
    let valuelen = take_u16(buf)? as usize;
    let ttl_secs = take_u16(buf)?;
    let id = take_id(buf)?;
    let key = take_bytes(buf, keylen)?;
    let value = take_bytes(buf, valuelen)?;
    Ok(StorePayload {
        id,
        key,
        value,
        ttl_secs,
    })
}

fn put_contact(buf: &mut BytesMut, family: AddressFamily, contact: &Contact) -> Result<()> {
    if contact.family() != family {
        return Err(Error::FamilyMismatch);
    }
    buf.put_slice(contact.id.as_bytes());
    match contact.addr {
        SocketAddr::V4(v4) => {
            buf.put_slice(&v4.ip().octets());
            buf.put_u16(v4.port());
        }
        SocketAddr::V6(v6) => {
            buf.put_slice(&v6.ip().octets());
            buf.put_u16(v6.port());
        }
    }
    Ok(())
}

fn take_contacts(buf: &mut &[u8], family: AddressFamily, num: u8) -> Result<Vec<Contact>> {
    let mut contacts = Vec::with_capacity(num as usize);
    for _ in 0..num {
        contacts.push(take_contact(buf, family)?);
    }
    Ok(contacts)
}

fn take_contact(buf: &mut &[u8], family: AddressFamily) -> Result<Contact> {
    let id = take_id(buf)?;
    let addr = match family {
        AddressFamily::Inet => {
            let mut octets = [0u8; 4];
            take_exact(buf, &mut octets)?;
            let port = take_u16(buf)?;
            SocketAddr::from((octets, port))
        }
        AddressFamily::Inet6 => {
            let mut octets = [0u8; 16];
            take_exact(buf, &mut octets)?;
            let port = take_u16(buf)?;
            SocketAddr::from((octets, port))
        }
    };
    Ok(Contact { id, addr })
}

fn take_id(buf: &mut &[u8]) -> Result<NodeId> {
    let mut bytes = [0u8; NODE_ID_LEN];
    take_exact(buf, &mut bytes)?;
    Ok(NodeId::new(bytes))
}

fn take_exact(buf: &mut &[u8], out: &mut [u8]) -> Result<()> {
    if buf.len() < out.len() {
        return Err(Error::Truncated);
    }
    buf.copy_to_slice(out);
    Ok(())
}

fn take_bytes(buf: &mut &[u8], len: usize) -> Result<Bytes> {
    if buf.len() < len {
        return Err(Error::Truncated);
    }
    Ok(buf.copy_to_bytes(len))
}

fn take_u8(buf: &mut &[u8]) -> Result<u8> {
    if buf.is_empty() {
        return Err(Error::Truncated);
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8]) -> Result<u16> {
    if buf.len() < 2 {
        return Err(Error::Truncated);
    }
    Ok(buf.get_u16())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.len() < 4 {
        return Err(Error::Truncated);
    }
    Ok(buf.get_u32())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{quickcheck, Arbitrary, Gen};

    #[derive(Clone, Debug)]
    struct ArbitraryNodeId(NodeId);

    impl Arbitrary for ArbitraryNodeId {
        fn arbitrary(g: &mut Gen) -> Self {
            let bytes: [u8; NODE_ID_LEN] = core::array::from_fn(|_| u8::arbitrary(g));
            ArbitraryNodeId(NodeId::new(bytes))
        }
    }

    #[derive(Clone, Debug)]
    struct ArbitraryContactV4(Contact);

    impl Arbitrary for ArbitraryContactV4 {
        fn arbitrary(g: &mut Gen) -> Self {
            let octets: [u8; 4] = core::array::from_fn(|_| u8::arbitrary(g));
            let addr = SocketAddr::from((octets, u16::arbitrary(g)));
            ArbitraryContactV4(Contact::new(ArbitraryNodeId::arbitrary(g).0, addr))
        }
    }

    #[derive(Clone, Debug)]
    struct ArbitraryContactV6(Contact);

    impl Arbitrary for ArbitraryContactV6 {
        fn arbitrary(g: &mut Gen) -> Self {
            let octets: [u8; 16] = core::array::from_fn(|_| u8::arbitrary(g));
            let addr = SocketAddr::from((octets, u16::arbitrary(g)));
            ArbitraryContactV6(Contact::new(ArbitraryNodeId::arbitrary(g).0, addr))
        }
    }

    fn small_bytes(g: &mut Gen) -> Bytes {
        let len = usize::arbitrary(g) % 64;
        let data: Vec<u8> = (0..len).map(|_| u8::arbitrary(g)).collect();
        Bytes::from(data)
    }

    fn roundtrip(dst: NodeId, src: NodeId, msg: Message) -> Envelope {
        let datagram = encode(&dst, &src, &msg).expect("encode");
        decode(&datagram, &dst).expect("decode")
    }

    quickcheck! {
        fn prop_ping_roundtrips(dst: ArbitraryNodeId, src: ArbitraryNodeId, nonce: u32) -> bool {
            let msg = Message::Ping { nonce };
            roundtrip(dst.0, src.0, msg.clone()) == Envelope { dst: dst.0, src: src.0, msg }
        }

        fn prop_find_node_reply_roundtrips(
            dst: ArbitraryNodeId,
            src: ArbitraryNodeId,
            target: ArbitraryNodeId,
            nonce: u32,
            contacts: Vec<ArbitraryContactV4>
        ) -> bool {
            let contacts: Vec<Contact> = contacts.into_iter().take(16).map(|c| c.0).collect();
            let msg = Message::FindNodeReply {
                nonce,
                family: AddressFamily::Inet,
                target: target.0,
                contacts: contacts.clone(),
            };
            let env = roundtrip(dst.0, src.0, msg);
            match env.msg {
                Message::FindNodeReply { contacts: decoded, .. } => decoded == contacts,
                _ => false,
            }
        }

        fn prop_find_node_reply_v6_roundtrips(
            dst: ArbitraryNodeId,
            src: ArbitraryNodeId,
            target: ArbitraryNodeId,
            nonce: u32,
            contacts: Vec<ArbitraryContactV6>
        ) -> bool {
            let contacts: Vec<Contact> = contacts.into_iter().take(16).map(|c| c.0).collect();
            let msg = Message::FindNodeReply {
                nonce,
                family: AddressFamily::Inet6,
                target: target.0,
                contacts: contacts.clone(),
            };
            let env = roundtrip(dst.0, src.0, msg);
            match env.msg {
                Message::FindNodeReply { contacts: decoded, .. } => decoded == contacts,
                _ => false,
            }
        }

        fn prop_store_roundtrips(dst: ArbitraryNodeId, src: ArbitraryNodeId, id: ArbitraryNodeId, ttl: u16) -> bool {
            let mut g = Gen::new(64);
            let payload = StorePayload {
                id: id.0,
                key: small_bytes(&mut g),
                value: small_bytes(&mut g),
                ttl_secs: ttl,
            };
            let msg = Message::Store(payload);
            roundtrip(dst.0, src.0, msg.clone()).msg == msg
        }
    }

    #[test]
    fn value_reply_found_roundtrips() {
        let dst = NodeId::new([1u8; NODE_ID_LEN]);
        let src = NodeId::new([2u8; NODE_ID_LEN]);
        let msg = Message::FindValueReply {
            nonce: 7,
            target: NodeId::new([3u8; NODE_ID_LEN]),
            reply: ValueReply::Found {
                key: Bytes::from_static(b"k"),
                value: Bytes::from_static(b"v"),
            },
        };
        assert_eq!(roundtrip(dst, src, msg.clone()).msg, msg);
    }

    #[test]
    fn proxy_messages_roundtrip() {
        let dst = NodeId::new([1u8; NODE_ID_LEN]);
        let src = NodeId::new([2u8; NODE_ID_LEN]);
        for msg in [
            Message::ProxyRegister {
                session: 9,
                nonce: 10,
            },
            Message::ProxyRegisterReply { nonce: 10 },
            Message::ProxyGet {
                nonce: 11,
                id: NodeId::new([4u8; NODE_ID_LEN]),
                key: Bytes::from_static(b"key"),
            },
            Message::ProxyGetReply {
                nonce: 11,
                id: NodeId::new([4u8; NODE_ID_LEN]),
                value: Some(Bytes::from_static(b"value")),
            },
            Message::ProxyGetReply {
                nonce: 12,
                id: NodeId::new([4u8; NODE_ID_LEN]),
                value: None,
            },
        ] {
            assert_eq!(roundtrip(dst, src, msg.clone()).msg, msg);
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let dst = NodeId::new([1u8; NODE_ID_LEN]);
        let mut datagram = encode(&dst, &NodeId::ZERO, &Message::Ping { nonce: 1 })
            .expect("encode")
            .to_vec();
        datagram[0] = 0xde;
        datagram[1] = 0xad;
        assert_eq!(decode(&datagram, &dst), Err(Error::BadMagic(0xdead)));
    }

    #[test]
    fn rejects_length_mismatch() {
        let dst = NodeId::new([1u8; NODE_ID_LEN]);
        let mut datagram = encode(&dst, &NodeId::ZERO, &Message::Ping { nonce: 1 })
            .expect("encode")
            .to_vec();
        datagram.push(0);
        assert!(matches!(
            decode(&datagram, &dst),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_foreign_destination() {
        let dst = NodeId::new([1u8; NODE_ID_LEN]);
        let local = NodeId::new([2u8; NODE_ID_LEN]);
        let datagram =
            encode(&dst, &NodeId::ZERO, &Message::Ping { nonce: 1 }).expect("encode");
        assert_eq!(decode(&datagram, &local), Err(Error::WrongDestination));
    }

    #[test]
    fn accepts_zero_destination() {
        let local = NodeId::new([2u8; NODE_ID_LEN]);
        let datagram =
            encode(&NodeId::ZERO, &local, &Message::Ping { nonce: 1 }).expect("encode");
        assert!(decode(&datagram, &local).is_ok());
    }

    #[test]
    fn rejects_unknown_family() {
        let dst = NodeId::new([1u8; NODE_ID_LEN]);
        let mut datagram = encode(
            &dst,
            &NodeId::ZERO,
            &Message::FindNode {
                nonce: 1,
                family: AddressFamily::Inet,
                target: NodeId::ZERO,
            },
        )
        .expect("encode")
        .to_vec();
        // the family field sits right after the nonce in the trailer
        datagram[HEADER_LEN + 4] = 0;
        datagram[HEADER_LEN + 5] = 9;
        assert_eq!(decode(&datagram, &dst), Err(Error::UnknownFamily(9)));
    }

    #[test]
    fn oversize_store_is_refused() {
        let dst = NodeId::new([1u8; NODE_ID_LEN]);
        let msg = Message::Store(StorePayload {
            id: NodeId::ZERO,
            key: Bytes::from(vec![0u8; 16]),
            value: Bytes::from(vec![0u8; MAX_DATAGRAM]),
            ttl_secs: 60,
        });
        assert_eq!(encode(&dst, &NodeId::ZERO, &msg), Err(Error::Oversize));
    }
}

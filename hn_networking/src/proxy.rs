// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Proxy layer: NAT-bound nodes participate by relaying through a registered
//! peer.
//!
//! The server side keeps a session-keyed registration per client and
//! forwards their `store`/`get` calls into the native DHT. The client side
//! registers against a server picked via dtun and speaks the proxy messages
//! with local timeouts.

use crate::driver::{Driver, DtunEvent, TimerEvent};
use crate::error::{Error, Result};
use crate::query::{QueryKind, ValueSink};
use bytes::Bytes;
use hn_protocol::{Contact, Message, NodeId, StorePayload};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// A registration with no refresh for this long is dropped.
pub(crate) const REGISTRATION_TTL: Duration = Duration::from_secs(720);

/// Server-side view of one NAT-bound client.
pub(crate) struct Registration {
    pub(crate) session: u32,
    pub(crate) contact: Contact,
    pub(crate) first_seen: Instant,
    pub(crate) last_seen: Instant,
}

pub(crate) enum RegisterOutcome {
    New,
    Refreshed,
    /// Session mismatch; the sender is stale or an impersonator.
    StaleSession,
}

/// The proxy server: registered clients keyed by their node id.
#[derive(Default)]
pub(crate) struct ProxyServer {
    registered: HashMap<NodeId, Registration>,
}

impl ProxyServer {
    pub(crate) fn len(&self) -> usize {
        self.registered.len()
    }

    pub(crate) fn is_registered(&self, id: &NodeId) -> bool {
        self.registered.contains_key(id)
    }

    /// The client's current contact; registrations refresh it, so replies
    /// always go to the address most recently heard from.
    pub(crate) fn contact_of(&self, id: &NodeId) -> Option<Contact> {
        self.registered.get(id).map(|reg| reg.contact)
    }

    pub(crate) fn handle_register(
        &mut self,
        contact: Contact,
        session: u32,
        now: Instant,
    ) -> RegisterOutcome {
        match self.registered.get_mut(&contact.id) {
            None => {
                let _ = self.registered.insert(
                    contact.id,
                    Registration {
                        session,
                        contact,
                        first_seen: now,
                        last_seen: now,
                    },
                );
                RegisterOutcome::New
            }
            Some(registration) if registration.session == session => {
                registration.contact = contact;
                registration.last_seen = now;
                RegisterOutcome::Refreshed
            }
            Some(_) => RegisterOutcome::StaleSession,
        }
    }

    pub(crate) fn expire(&mut self, now: Instant, ttl: Duration) {
        self.registered.retain(|id, registration| {
            let keep = now.duration_since(registration.last_seen) <= ttl;
            if !keep {
                debug!(
                    "expiring proxy registration of {id:?} after {:?}",
                    now.duration_since(registration.first_seen)
                );
            }
            keep
        });
    }
}

/// A client-side `get` awaiting its reply or the 10-second timeout.
pub(crate) struct PendingGet {
    pub(crate) key: Bytes,
    pub(crate) sender: oneshot::Sender<Result<Option<Bytes>>>,
}

/// The proxy client: registration state plus pending `get`s keyed by nonce.
pub(crate) struct ProxyClient {
    pub(crate) session: u32,
    pub(crate) registered: bool,
    pub(crate) registering: bool,
    /// Monotonic registration attempt counter; a register-timeout event for
    /// an earlier attempt is stale and ignored.
    pub(crate) register_attempt: u64,
    pub(crate) register_nonce: u32,
    pub(crate) server: Option<Contact>,
    pub(crate) pending_gets: HashMap<u32, PendingGet>,
}

impl ProxyClient {
    pub(crate) fn new(session: u32) -> Self {
        Self {
            session,
            registered: false,
            registering: false,
            register_attempt: 0,
            register_nonce: 0,
            server: None,
            pending_gets: HashMap::new(),
        }
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.registered
    }
}

impl Driver {
    // --------------------------------------------
    // ---------- Client side ---------------------
    // --------------------------------------------

    /// Picks a proxy server near our id through dtun and registers with it.
    pub(crate) fn start_proxy_register(&mut self) {
        if self.proxy_client.registering {
            return;
        }
        self.proxy_client.registering = true;

        let (tx, rx) = oneshot::channel();
        self.dtun.find_node(self.local_id, tx);
        self.dtun_events.push(Box::pin(async move {
            DtunEvent::Candidates {
                contacts: rx.await.unwrap_or_default(),
            }
        }));
    }

    pub(crate) fn handle_register_candidates(&mut self, contacts: Vec<Contact>) {
        if !self.proxy_client.registering {
            return;
        }
        let local_id = self.local_id;
        let Some(server) = contacts.into_iter().find(|c| c.id != local_id) else {
            debug!("no proxy server candidate, registration abandoned");
            self.proxy_client.registering = false;
            return;
        };

        let nonce = self.rng.gen();
        self.proxy_client.register_nonce = nonce;
        self.proxy_client.register_attempt += 1;
        let attempt = self.proxy_client.register_attempt;
        self.arm_timer(
            self.config.register_timeout,
            TimerEvent::ProxyRegisterTimeout { attempt },
        );

        let session = self.proxy_client.session;
        self.send_message(
            &server.id,
            &Message::ProxyRegister { session, nonce },
            server.addr,
        );
    }

    pub(crate) fn handle_proxy_register_timeout(&mut self, attempt: u64) {
        if self.proxy_client.registering && self.proxy_client.register_attempt == attempt {
            debug!("proxy registration timed out");
            self.proxy_client.registering = false;
        }
    }

    pub(crate) fn handle_proxy_register_reply(
        &mut self,
        dst: NodeId,
        src: NodeId,
        from: SocketAddr,
        nonce: u32,
    ) {
        if !self.proxy_client.registering {
            return;
        }
        if dst != self.local_id || nonce != self.proxy_client.register_nonce {
            return;
        }
        info!("registered with proxy server {src:?}");
        self.proxy_client.server = Some(Contact::new(src, from));
        self.proxy_client.registered = true;
        self.proxy_client.registering = false;
    }

    pub(crate) fn client_proxy_store(&mut self, payload: StorePayload) {
        if !self.proxy_client.registered {
            return;
        }
        let Some(server) = self.proxy_client.server else {
            return;
        };
        self.send_message(&server.id, &Message::ProxyStore(payload), server.addr);
    }

    pub(crate) fn client_proxy_get(
        &mut self,
        id: NodeId,
        key: Bytes,
        sender: oneshot::Sender<Result<Option<Bytes>>>,
    ) {
        if !self.proxy_client.registered {
            let _ = sender.send(Err(Error::NotRegistered));
            return;
        }
        let Some(server) = self.proxy_client.server else {
            let _ = sender.send(Err(Error::NotRegistered));
            return;
        };

        let nonce = loop {
            let nonce = self.rng.gen();
            if !self.proxy_client.pending_gets.contains_key(&nonce) {
                break nonce;
            }
        };
        let _ = self.proxy_client.pending_gets.insert(
            nonce,
            PendingGet {
                key: key.clone(),
                sender,
            },
        );
        self.arm_timer(self.config.get_timeout, TimerEvent::ProxyGetTimeout { nonce });
        self.send_message(&server.id, &Message::ProxyGet { nonce, id, key }, server.addr);
    }

    pub(crate) fn handle_proxy_get_timeout(&mut self, nonce: u32) {
        if let Some(pending) = self.proxy_client.pending_gets.remove(&nonce) {
            trace!(
                "proxy get for a {}-byte key timed out",
                pending.key.len()
            );
            let _ = pending.sender.send(Ok(None));
        }
    }

    pub(crate) fn handle_proxy_get_reply(
        &mut self,
        dst: NodeId,
        nonce: u32,
        value: Option<Bytes>,
    ) {
        if dst != self.local_id {
            return;
        }
        let Some(pending) = self.proxy_client.pending_gets.remove(&nonce) else {
            return;
        };
        let _ = pending.sender.send(Ok(value));
    }

    // --------------------------------------------
    // ---------- Server side ---------------------
    // --------------------------------------------

    pub(crate) fn handle_proxy_register(
        &mut self,
        dst: NodeId,
        src: NodeId,
        from: SocketAddr,
        session: u32,
        nonce: u32,
    ) {
        if dst != self.local_id || src.is_zero() {
            return;
        }
        let contact = Contact::new(src, from);
        match self
            .proxy_server
            .handle_register(contact, session, Instant::now())
        {
            RegisterOutcome::New => {
                // make the client findable through us
                self.dtun.register_node(src, session);
            }
            RegisterOutcome::Refreshed => {}
            RegisterOutcome::StaleSession => return,
        }
        self.send_message(&src, &Message::ProxyRegisterReply { nonce }, from);
    }

    pub(crate) fn handle_proxy_store(&mut self, dst: NodeId, src: NodeId, payload: StorePayload) {
        if dst != self.local_id {
            return;
        }
        if !self.proxy_server.is_registered(&src) {
            return;
        }
        self.store_record(payload);
    }

    pub(crate) fn handle_proxy_get(
        &mut self,
        dst: NodeId,
        src: NodeId,
        nonce: u32,
        id: NodeId,
        key: Bytes,
    ) {
        if dst != self.local_id {
            return;
        }
        if !self.proxy_server.is_registered(&src) {
            return;
        }
        if !self.nat.state().direct_dht_allowed() {
            // the client's own get timeout reports the failure
            return;
        }
        self.start_query(
            id,
            QueryKind::FindValue {
                key,
                sink: ValueSink::ProxyClient { src, nonce },
            },
        );
    }

    /// Completion of a forwarded `get`: reply to the client's most recent
    /// registered address.
    pub(crate) fn send_proxy_get_reply(
        &mut self,
        src: NodeId,
        nonce: u32,
        id: NodeId,
        value: Option<Bytes>,
    ) {
        let Some(contact) = self.proxy_server.contact_of(&src) else {
            return;
        };
        self.send_message(
            &contact.id,
            &Message::ProxyGetReply { nonce, id, value },
            contact.addr,
        );
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

    fn contact(byte: u8, port: u16) -> Contact {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("addr");
        Contact::new(id(byte), addr)
    }

    #[tokio::test(start_paused = true)]
    async fn register_then_refresh_updates_contact() {
        let mut server = ProxyServer::default();
        assert!(matches!(
            server.handle_register(contact(1, 1000), 42, Instant::now()),
            RegisterOutcome::New
        ));
        assert!(matches!(
            server.handle_register(contact(1, 2000), 42, Instant::now()),
            RegisterOutcome::Refreshed
        ));
        assert_eq!(
            server.contact_of(&id(1)).map(|c| c.addr.port()),
            Some(2000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn session_mismatch_is_rejected() {
        let mut server = ProxyServer::default();
        let _ = server.handle_register(contact(1, 1000), 42, Instant::now());
        assert!(matches!(
            server.handle_register(contact(1, 2000), 43, Instant::now()),
            RegisterOutcome::StaleSession
        ));
        // the stale sender must not steal the registered address
        assert_eq!(
            server.contact_of(&id(1)).map(|c| c.addr.port()),
            Some(1000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_registrations_expire() {
        let mut server = ProxyServer::default();
        let _ = server.handle_register(contact(1, 1000), 42, Instant::now());

        tokio::time::advance(REGISTRATION_TTL / 2).await;
        let _ = server.handle_register(contact(2, 2000), 7, Instant::now());

        tokio::time::advance(REGISTRATION_TTL / 2 + Duration::from_secs(1)).await;
        server.expire(Instant::now(), REGISTRATION_TTL);

        assert!(!server.is_registered(&id(1)));
        assert!(server.is_registered(&id(2)));
    }
}

// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::{
    bootstrap::JOIN_INTERVAL_EMPTY,
    cmd::NetworkCmd,
    dtun::{DtunService, NoDtun},
    error::{Error, Result},
    nat::{NatState, NatWatch},
    peers::PeerCache,
    proxy::{ProxyClient, ProxyServer, REGISTRATION_TTL},
    query::{NodeSink, Query, QueryKind},
    record_store::RecordStore,
    routing_table::RoutingTable,
    transport::{DatagramSender, UdpTransport},
    Network, GET_TIMEOUT, K, MAX_QUERY, QUERY_TIMEOUT, REGISTER_TIMEOUT, RESTORE_INTERVAL,
    TIMER_INTERVAL,
};
use bytes::Bytes;
use futures::{future::BoxFuture, stream::FuturesUnordered, StreamExt};
use hn_protocol::{wire, AddressFamily, Contact, Message, NodeId, StorePayload};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

/// Queue depth of the command channel between `Network` handles and the
/// driver.
const CMD_CHANNEL_SIZE: usize = 1024;

/// Default bucket capacity of the routing table. Distinct from [`K`], which
/// is the fan-out and replication width.
const BUCKET_CAPACITY: usize = 20;

/// Default capacity of the recently-seen peer cache.
const PEER_CACHE_CAPACITY: usize = 1024;

/// Tunables of the overlay core. The defaults are the protocol constants;
/// tests shrink the time-based ones.
#[derive(Debug, Clone)]
pub struct Config {
    pub k: usize,
    pub max_query: usize,
    pub query_timeout: Duration,
    pub restore_interval: Duration,
    pub timer_interval: Duration,
    pub register_timeout: Duration,
    pub get_timeout: Duration,
    pub bucket_capacity: usize,
    pub peer_cache_capacity: usize,
    pub registration_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            k: K,
            max_query: MAX_QUERY,
            query_timeout: QUERY_TIMEOUT,
            restore_interval: RESTORE_INTERVAL,
            timer_interval: TIMER_INTERVAL,
            register_timeout: REGISTER_TIMEOUT,
            get_timeout: GET_TIMEOUT,
            bucket_capacity: BUCKET_CAPACITY,
            peer_cache_capacity: PEER_CACHE_CAPACITY,
            registration_ttl: REGISTRATION_TTL,
        }
    }
}

/// Deadline events owned by the driver. Armed timers are never cancelled;
/// a fired event that finds its nonce or id gone simply does nothing.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TimerEvent {
    ProbeTimeout { nonce: u32, id: NodeId },
    PingTimeout { nonce: u32 },
    ProxyGetTimeout { nonce: u32 },
    ProxyRegisterTimeout { attempt: u64 },
}

/// What to do once a dtun continuation resolves.
pub(crate) enum DtunFollowUp {
    /// Emit the prepared lookup probe; `key` is present for `find_value`.
    Probe {
        nonce: u32,
        target: NodeId,
        key: Option<Bytes>,
    },
    Ping {
        nonce: u32,
    },
}

pub(crate) enum DtunEvent {
    Resolved {
        follow_up: DtunFollowUp,
        contact: Option<Contact>,
    },
    /// Proxy-server candidates for the client-side registration.
    Candidates { contacts: Vec<Contact> },
}

/// Builds the `Network` handle plus the `Driver` event loop.
pub struct NetworkBuilder {
    local_id: NodeId,
    listen_addr: Option<SocketAddr>,
    nat: NatWatch,
    dtun: Arc<dyn DtunService>,
    use_dtun: bool,
    config: Config,
}

impl NetworkBuilder {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            listen_addr: None,
            nat: NatWatch::fixed(NatState::Undefined),
            dtun: Arc::new(NoDtun),
            use_dtun: false,
            config: Config::default(),
        }
    }

    pub fn listen_addr(&mut self, listen_addr: SocketAddr) {
        self.listen_addr = Some(listen_addr);
    }

    pub fn nat(&mut self, nat: NatWatch) {
        self.nat = nat;
    }

    /// Attach a dtun resolver. Probes to peers with no cached address will
    /// fall back through it.
    pub fn dtun(&mut self, dtun: Arc<dyn DtunService>) {
        self.dtun = dtun;
        self.use_dtun = true;
    }

    pub fn config(&mut self, config: Config) {
        self.config = config;
    }

    /// Binds the UDP transport and assembles the driver.
    pub async fn build(self) -> Result<(Network, Driver)> {
        let listen_addr = self.listen_addr.ok_or(Error::ListenAddressNotProvided)?;
        let (transport, datagram_rx, family) = UdpTransport::bind(listen_addr).await?;
        let bound = transport.local_addr()?;
        info!("node {:?} listening on {bound}", self.local_id);
        let (mut network, driver) = self.assemble(transport, family, datagram_rx);
        network.listen_addr = Some(bound);
        Ok((network, driver))
    }

    /// Assembles the driver over a caller-provided transport. This is how
    /// embedders (and the test suites) swap the UDP socket out.
    pub fn build_with_transport(
        self,
        transport: Arc<dyn DatagramSender>,
        family: AddressFamily,
        datagram_rx: mpsc::Receiver<(Bytes, SocketAddr)>,
    ) -> (Network, Driver) {
        self.assemble(transport, family, datagram_rx)
    }

    fn assemble(
        self,
        transport: Arc<dyn DatagramSender>,
        family: AddressFamily,
        datagram_rx: mpsc::Receiver<(Bytes, SocketAddr)>,
    ) -> (Network, Driver) {
        let (cmd_sender, cmd_receiver) = mpsc::channel(CMD_CHANNEL_SIZE);
        let mut rng = SmallRng::from_entropy();
        let session = rng.gen();

        let driver = Driver {
            local_id: self.local_id,
            family,
            use_dtun: self.use_dtun,
            transport,
            dtun: self.dtun,
            nat: self.nat,
            routing_table: RoutingTable::new(self.local_id, self.config.bucket_capacity),
            peers: PeerCache::new(self.config.peer_cache_capacity),
            record_store: RecordStore::new(),
            queries: HashMap::new(),
            pending_pings: HashMap::new(),
            proxy_server: ProxyServer::default(),
            proxy_client: ProxyClient::new(session),
            last_restore: None,
            rng,
            config: self.config,
            cmd_receiver,
            datagram_rx,
            timers: FuturesUnordered::new(),
            dtun_events: FuturesUnordered::new(),
        };

        let network = Network {
            cmd_sender,
            local_id: self.local_id,
            listen_addr: None,
        };
        (network, driver)
    }
}

/// The single event loop owning every piece of overlay state.
///
/// Inbound datagrams, commands, timer deadlines and dtun resolutions are all
/// funnelled through [`Driver::run`]'s `select!`, so handlers mutate the
/// routing table, peers cache, record store and query registry without any
/// locking.
pub struct Driver {
    pub(crate) local_id: NodeId,
    pub(crate) family: AddressFamily,
    pub(crate) config: Config,
    pub(crate) use_dtun: bool,

    pub(crate) transport: Arc<dyn DatagramSender>,
    pub(crate) dtun: Arc<dyn DtunService>,
    pub(crate) nat: NatWatch,
    pub(crate) rng: SmallRng,

    pub(crate) routing_table: RoutingTable,
    pub(crate) peers: PeerCache,
    pub(crate) record_store: RecordStore,
    /// Live lookups keyed by nonce.
    pub(crate) queries: HashMap<u32, Query>,
    /// Outstanding ping nonces and who they went to.
    pub(crate) pending_pings: HashMap<u32, NodeId>,
    pub(crate) proxy_server: ProxyServer,
    pub(crate) proxy_client: ProxyClient,
    pub(crate) last_restore: Option<Instant>,

    cmd_receiver: mpsc::Receiver<NetworkCmd>,
    datagram_rx: mpsc::Receiver<(Bytes, SocketAddr)>,
    pub(crate) timers: FuturesUnordered<BoxFuture<'static, TimerEvent>>,
    pub(crate) dtun_events: FuturesUnordered<BoxFuture<'static, DtunEvent>>,
}

impl Driver {
    /// Drives the event loop until every `Network` handle is gone and the
    /// transport has shut down.
    pub async fn run(mut self) {
        let mut join_interval = tokio::time::interval(JOIN_INTERVAL_EMPTY);
        let mut sweep_interval = tokio::time::interval(self.config.timer_interval);

        loop {
            tokio::select! {
                some_datagram = self.datagram_rx.recv() => match some_datagram {
                    Some((datagram, from)) => self.handle_datagram(&datagram, from),
                    None => break,
                },
                some_cmd = self.cmd_receiver.recv() => match some_cmd {
                    Some(cmd) => self.handle_cmd(cmd),
                    None => break,
                },
                Some(event) = self.timers.next() => self.handle_timer(event),
                Some(event) = self.dtun_events.next() => self.handle_dtun_event(event),
                _ = join_interval.tick() => {
                    if let Some(new_interval) =
                        self.run_join_continuously(join_interval.period()).await
                    {
                        join_interval = new_interval;
                    }
                }
                _ = sweep_interval.tick() => self.run_maintenance(),
            }
        }
        debug!("driver for {:?} shutting down", self.local_id);
    }

    // --------------------------------------------
    // ---------- Crate helpers -------------------
    // --------------------------------------------

    /// Encodes and sends one message. Best effort; the timeout machinery
    /// covers losses.
    pub(crate) fn send_message(&self, dst: &NodeId, msg: &Message, to: SocketAddr) {
        match wire::encode(dst, &self.local_id, msg) {
            Ok(datagram) => self.transport.try_send_to(&datagram, to),
            Err(err) => warn!("failed to encode {msg:?} for {dst:?}: {err}"),
        }
    }

    pub(crate) fn arm_timer(&mut self, after: Duration, event: TimerEvent) {
        self.timers.push(Box::pin(async move {
            tokio::time::sleep(after).await;
            event
        }));
    }

    /// Fires a dtun resolution whose outcome re-enters the event loop as a
    /// [`DtunEvent`].
    pub(crate) fn request_via_dtun(&mut self, id: NodeId, follow_up: DtunFollowUp) {
        let (tx, rx) = oneshot::channel();
        self.dtun.request(id, tx);
        self.dtun_events.push(Box::pin(async move {
            let contact = rx.await.ok().flatten();
            DtunEvent::Resolved { follow_up, contact }
        }));
    }

    /// Records a peer we heard from in both the routing table and the peers
    /// cache.
    pub(crate) fn register_peer(&mut self, contact: Contact) {
        if contact.id == self.local_id || contact.id.is_zero() {
            return;
        }
        self.peers.add_node(contact, Instant::now());
        self.routing_table.add(contact);
    }

    pub(crate) fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::ProbeTimeout { nonce, id } => self.handle_probe_timeout(nonce, id),
            TimerEvent::PingTimeout { nonce } => {
                if let Some(id) = self.pending_pings.remove(&nonce) {
                    self.peers.add_timeout(&id);
                }
            }
            TimerEvent::ProxyGetTimeout { nonce } => self.handle_proxy_get_timeout(nonce),
            TimerEvent::ProxyRegisterTimeout { attempt } => {
                self.handle_proxy_register_timeout(attempt)
            }
        }
    }

    pub(crate) fn handle_dtun_event(&mut self, event: DtunEvent) {
        match event {
            DtunEvent::Resolved {
                follow_up,
                contact: Some(contact),
            } => match follow_up {
                DtunFollowUp::Probe { nonce, target, key } => {
                    if !self.queries.contains_key(&nonce) {
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
                DtunFollowUp::Ping { nonce } => {
                    if self.pending_pings.contains_key(&nonce) {
                        self.send_message(&contact.id, &Message::Ping { nonce }, contact.addr);
                    }
                }
            },
            DtunEvent::Resolved { contact: None, .. } => {
                // unresolved; the armed timer reclaims the probe slot
            }
            DtunEvent::Candidates { contacts } => self.handle_register_candidates(contacts),
        }
    }

    // --------------------------------------------
    // ---------- Ping subsystem ------------------
    // --------------------------------------------

    pub(crate) fn start_ping(&mut self, dst: Contact) {
        let nonce = loop {
            let nonce = self.rng.gen();
            if !self.pending_pings.contains_key(&nonce) {
                break nonce;
            }
        };
        let _ = self.pending_pings.insert(nonce, dst.id);
        self.arm_timer(self.config.query_timeout, TimerEvent::PingTimeout { nonce });

        if self.use_dtun && self.peers.get_addr(&dst.id).is_none() {
            self.request_via_dtun(dst.id, DtunFollowUp::Ping { nonce });
            return;
        }
        self.send_message(&dst.id, &Message::Ping { nonce }, dst.addr);
    }

    // --------------------------------------------
    // ---------- Record maintenance --------------
    // --------------------------------------------

    /// Runs on every `timer_interval` tick: expiry sweep, registration
    /// expiry, and the rate-limited republication sweep.
    pub(crate) fn run_maintenance(&mut self) {
        let now = Instant::now();
        self.record_store.refresh(now);
        self.proxy_server.expire(now, self.config.registration_ttl);
        self.try_restore(now);
    }

    fn try_restore(&mut self, now: Instant) {
        if !self.nat.state().direct_dht_allowed() {
            return;
        }
        if let Some(last) = self.last_restore {
            if now.duration_since(last) < self.config.restore_interval {
                return;
            }
        }
        self.last_restore = Some(now);
        let local_id = self.local_id;
        self.start_query(local_id, QueryKind::FindNode(NodeSink::Restore));
    }

    /// Sends every live record towards its current custodians, skipping
    /// peers that already confirmed a copy. A record whose custodian set no
    /// longer includes us has migrated away and is dropped locally.
    pub(crate) fn republish_records(&mut self) {
        let now = Instant::now();
        let k = self.config.k;
        let mut outgoing: Vec<(Contact, StorePayload)> = Vec::new();
        let mut migrated: Vec<(NodeId, Bytes)> = Vec::new();

        for record in self.record_store.iter() {
            let custodians = self.routing_table.closest(&record.id, k);
            if custodians.is_empty() {
                continue;
            }
            let elapsed = now.duration_since(record.stored_at);
            if elapsed >= record.ttl {
                continue;
            }
            let remaining = (record.ttl - elapsed).as_secs().min(u64::from(u16::MAX)) as u16;

            let mut local_is_custodian = false;
            for contact in &custodians {
                if contact.id == self.local_id {
                    local_is_custodian = true;
                    continue;
                }
                if record.confirmers.contains(&contact.id) {
                    continue;
                }
                outgoing.push((
                    *contact,
                    StorePayload {
                        id: record.id,
                        key: record.key.clone(),
                        value: record.value.clone(),
                        ttl_secs: remaining,
                    },
                ));
            }
            if !local_is_custodian {
                migrated.push((record.id, record.key.clone()));
            }
        }

        for (contact, payload) in outgoing {
            self.send_message(&contact.id, &Message::Store(payload), contact.addr);
        }
        for (id, key) in migrated {
            trace!("record under {id:?} migrated to its custodians, dropping local copy");
            self.record_store.remove(&id, &key);
        }
    }

    /// Native store entry: locate the custodians of `payload.id`, then fan
    /// the record out to them.
    pub(crate) fn store_record(&mut self, payload: StorePayload) {
        if !self.nat.state().direct_dht_allowed() {
            return;
        }
        let target = payload.id;
        self.start_query(target, QueryKind::FindNode(NodeSink::Store(payload)));
    }
}

// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use tokio::sync::watch;

/// Reachability classification of the local node, as reported by an external
/// NAT detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NatState {
    /// Publicly routable address.
    Global,
    /// Behind a cone NAT; inbound traffic reaches us once we have sent
    /// outbound traffic to anyone.
    Cone,
    /// Behind a symmetric NAT.
    Symmetric,
    /// Behind some other NAT.
    Nat,
    /// Detection has not completed.
    #[default]
    Undefined,
}

impl NatState {
    /// Whether direct DHT operations are allowed from this node. NAT-bound
    /// nodes go through the proxy path instead.
    pub fn direct_dht_allowed(self) -> bool {
        matches!(self, NatState::Global | NatState::Cone)
    }
}

/// Read side of the NAT detector. Detection itself lives outside this crate;
/// the driver only ever samples the latest classification.
#[derive(Debug, Clone)]
pub struct NatWatch {
    rx: watch::Receiver<NatState>,
}

impl NatWatch {
    /// A watch that never changes. Convenient for nodes with a known
    /// deployment (and for tests). The receiver keeps serving the last value
    /// after the sender is gone.
    pub fn fixed(state: NatState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self { rx }
    }

    /// Pair a writer handle (for the detector) with the watch.
    pub fn channel(initial: NatState) -> (watch::Sender<NatState>, Self) {
        let (tx, rx) = watch::channel(initial);
        (tx, Self { rx })
    }

    pub fn state(&self) -> NatState {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_dht_gate() {
        assert!(NatState::Global.direct_dht_allowed());
        assert!(NatState::Cone.direct_dht_allowed());
        assert!(!NatState::Symmetric.direct_dht_allowed());
        assert!(!NatState::Nat.direct_dht_allowed());
        assert!(!NatState::Undefined.direct_dht_allowed());
    }

    #[test]
    fn watch_tracks_detector_updates() {
        let (tx, watch) = NatWatch::channel(NatState::Undefined);
        assert_eq!(watch.state(), NatState::Undefined);
        tx.send(NatState::Cone).expect("receiver alive");
        assert_eq!(watch.state(), NatState::Cone);
    }
}

// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::driver::Driver;
use crate::query::NodeSink;
use std::time::Duration;
use tokio::time::Interval;

/// Retry cadence while the routing table is still empty.
pub(crate) const JOIN_INTERVAL_EMPTY: Duration = Duration::from_secs(3);

/// Cadence once the table is populated; the loop then only watches for the
/// table draining again.
pub(crate) const JOIN_INTERVAL_STEADY: Duration = Duration::from_secs(60);

impl Driver {
    /// One turn of the join loop. While the routing table is empty and our
    /// NAT state allows direct lookups, take the freshest peers-cache entry
    /// and bootstrap against it. Returns a replacement interval when the
    /// cadence should change.
    pub(crate) async fn run_join_continuously(&mut self, current: Duration) -> Option<Interval> {
        let empty = self.routing_table.is_empty();
        if empty && self.nat.state().direct_dht_allowed() {
            if let Some(seed) = self.peers.get_first() {
                debug!("routing table empty, bootstrapping against {seed:?}");
                self.start_bootstrap_query(seed.addr, NodeSink::Caller(None));
            }
        }

        let desired = if empty {
            JOIN_INTERVAL_EMPTY
        } else {
            JOIN_INTERVAL_STEADY
        };
        if desired != current {
            let mut interval = tokio::time::interval(desired);
            interval.tick().await; // the first tick completes immediately
            return Some(interval);
        }
        None
    }
}

// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use hn_protocol::{Contact, NodeId};
use tokio::sync::oneshot;

/// Secondary "find by id" resolution service.
///
/// The DHT falls back to it whenever it must reach a peer whose address the
/// peers cache does not know, and the proxy client uses it to pick a server.
/// Continuations are oneshot senders; a dropped sender counts as failure.
pub trait DtunService: Send + Sync {
    /// Resolve a single contact for `id`.
    fn request(&self, id: NodeId, reply: oneshot::Sender<Option<Contact>>);

    /// The dtun-side closest-nodes lookup, used by the proxy client to pick a
    /// server near its own id.
    fn find_node(&self, id: NodeId, reply: oneshot::Sender<Vec<Contact>>);

    /// Advertise that `id` is reachable through the local node under the
    /// given proxy session.
    fn register_node(&self, id: NodeId, session: u32);
}

/// Dtun-less deployment: every resolution fails immediately, so unreachable
/// probes fall through to the ordinary query timeout.
#[derive(Debug, Default)]
pub struct NoDtun;

impl DtunService for NoDtun {
    fn request(&self, _id: NodeId, reply: oneshot::Sender<Option<Contact>>) {
        let _ = reply.send(None);
    }

    fn find_node(&self, _id: NodeId, reply: oneshot::Sender<Vec<Contact>>) {
        let _ = reply.send(Vec::new());
    }

    fn register_node(&self, _id: NodeId, _session: u32) {}
}

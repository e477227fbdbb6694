// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Wire protocol of the hivenet overlay.
//!
//! Every datagram starts with a fixed 46-byte header carrying the magic
//! number, protocol version, message type, total length and the destination
//! and source node ids. Trailers are message specific and big-endian
//! throughout. See [`wire`] for the codec and [`messages`] for the typed
//! message set.

mod error;
mod node_id;

pub mod messages;
pub mod wire;

pub use self::{
    error::{Error, Result},
    messages::{AddressFamily, Contact, Message, StorePayload, ValueReply},
    node_id::{Distance, NodeId, NODE_ID_LEN},
};

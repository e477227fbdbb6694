// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use std::io;
use thiserror::Error;

pub(super) type Result<T, E = Error> = std::result::Result<T, E>;

/// Internal error.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("operation requires direct reachability, refused in the current NAT state")]
    WrongNatState,

    #[error("not registered with a proxy server")]
    NotRegistered,

    #[error("internal messaging channel was dropped")]
    InternalMsgChannelDropped,

    #[error("listen address was not provided during construction")]
    ListenAddressNotProvided,

    #[error("protocol error: {0}")]
    Protocol(#[from] hn_protocol::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reasons a datagram is rejected by the codec. Receivers drop rejected
/// datagrams silently; the variants exist so callers can trace what was
/// dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("datagram truncated")]
    Truncated,

    #[error("bad magic number: {0:#06x}")]
    BadMagic(u16),

    #[error("unsupported protocol version: {0}")]
    BadVersion(u8),

    #[error("unknown message type: {0:#04x}")]
    UnknownType(u8),

    #[error("declared length {declared} does not match datagram length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown address family: {0}")]
    UnknownFamily(u16),

    #[error("destination id is neither ours nor the zero sentinel")]
    WrongDestination,

    #[error("message exceeds the datagram size cap")]
    Oversize,

    #[error("contact address family does not match the message family")]
    FamilyMismatch,
}

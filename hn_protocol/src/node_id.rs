// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use rand::Rng;
use std::fmt;

/// Length of a node id in bytes.
pub const NODE_ID_LEN: usize = 20;

/// A 160-bit overlay node identifier.
///
/// Closeness between two ids is their bitwise XOR interpreted as a big-endian
/// integer; see [`NodeId::distance`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LEN]);

/// XOR distance between two [`NodeId`]s. Ordered as a 160-bit unsigned
/// integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Distance([u8; NODE_ID_LEN]);

impl NodeId {
    /// The all-zero sentinel id, used as the destination of bootstrap probes
    /// when the responder's id is not yet known.
    pub const ZERO: NodeId = NodeId([0u8; NODE_ID_LEN]);

    pub fn new(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds an id from a slice. Returns `None` unless the slice is exactly
    /// [`NODE_ID_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; NODE_ID_LEN] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; NODE_ID_LEN];
        rng.fill(&mut bytes);
        Self(bytes)
    }

    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut xored = [0u8; NODE_ID_LEN];
        for (i, byte) in xored.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(xored)
    }

    /// Index of the highest differing bit relative to `other`, i.e. the
    /// k-bucket this id falls into from `other`'s point of view. `None` when
    /// the ids are equal.
    pub fn bucket_index(&self, other: &NodeId) -> Option<usize> {
        for (i, byte) in self.distance(other).0.iter().enumerate() {
            if *byte != 0 {
                return Some(i * 8 + byte.leading_zeros() as usize);
            }
        }
        None
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // abbreviated form keeps per-message logs readable
        write!(f, "{}..", hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_orders_as_big_endian_integer() {
        let a = NodeId::new([0u8; NODE_ID_LEN]);
        let mut near = [0u8; NODE_ID_LEN];
        near[NODE_ID_LEN - 1] = 1;
        let mut far = [0u8; NODE_ID_LEN];
        far[0] = 1;

        let near = NodeId::new(near);
        let far = NodeId::new(far);

        assert!(a.distance(&near) < a.distance(&far));
        assert_eq!(a.distance(&a), a.distance(&a));
    }

    #[test]
    fn zero_sentinel() {
        assert!(NodeId::ZERO.is_zero());
        let mut rng = rand::thread_rng();
        assert!(!NodeId::random(&mut rng).is_zero());
    }

    #[test]
    fn bucket_index_tracks_highest_differing_bit() {
        let a = NodeId::new([0u8; NODE_ID_LEN]);
        let mut b = [0u8; NODE_ID_LEN];
        b[0] = 0x80;
        assert_eq!(NodeId::new(b).bucket_index(&a), Some(0));

        let mut c = [0u8; NODE_ID_LEN];
        c[19] = 0x01;
        assert_eq!(NodeId::new(c).bucket_index(&a), Some(159));

        assert_eq!(a.bucket_index(&a), None);
    }
}

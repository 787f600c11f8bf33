//! Consistent-hash ring for cache node placement.
//!
//! Each node is placed on the ring at `vnodes` points derived from
//! `sha256("{address}#{i}")`. A key maps to the first point at or after its
//! own hash, wrapping at the end. Adding or removing a node moves only the
//! keys adjacent to that node's points.

use sha2::{Digest, Sha256};

/// Virtual points per node.
pub const DEFAULT_VNODES: usize = 160;

#[derive(Debug, Clone)]
pub struct HashRing {
    /// (point, node index), sorted by point
    points: Vec<(u64, usize)>,
    nodes: usize,
}

impl HashRing {
    #[must_use]
    pub fn new<S: AsRef<str>>(addresses: &[S]) -> Self {
        Self::with_vnodes(addresses, DEFAULT_VNODES)
    }

    #[must_use]
    pub fn with_vnodes<S: AsRef<str>>(addresses: &[S], vnodes: usize) -> Self {
        let vnodes = vnodes.max(1);
        let mut points = Vec::with_capacity(addresses.len() * vnodes);
        for (idx, address) in addresses.iter().enumerate() {
            for v in 0..vnodes {
                let point = hash64(format!("{}#{}", address.as_ref(), v).as_bytes());
                points.push((point, idx));
            }
        }
        points.sort_unstable();
        Self {
            points,
            nodes: addresses.len(),
        }
    }

    /// Node index owning `key`, or `None` for an empty ring.
    #[must_use]
    pub fn node_for(&self, key: &str) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        if self.nodes == 1 {
            return Some(0);
        }
        let h = hash64(key.as_bytes());
        let pos = self.points.partition_point(|(point, _)| *point < h);
        let (_, idx) = self.points[pos % self.points.len()];
        Some(idx)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes
    }
}

fn hash64(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

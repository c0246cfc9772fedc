//! Hash-code utility for the master's weak-index reference pattern.
//!
//! The Reference Manager stores every long-lived Operation by a 64-bit
//! `hash_code`; every other part of the system that needs to refer to an
//! operation (a parent's persisted `subop_hash`, a dependency label) holds a
//! copy of this hash-code rather than a pointer. `hash_code` must be stable
//! across process restarts for a given operation identity, so it is derived
//! from the operation's MML id plus its type tag rather than from any
//! in-process address.

use std::hash::{Hash, Hasher};

/// FNV-1a 64-bit hash, used to derive an operation's `hash_code` from its
/// MML id and type tag. Stable across processes and restarts.
#[must_use]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Derives the stable hash-code for an operation from its MML id and type
/// tag, matching the Reference Manager's keying scheme.
#[must_use]
pub fn operation_hash_code(op_id: u64, type_tag: &str) -> u64 {
    let mut buf = Vec::with_capacity(8 + type_tag.len());
    buf.extend_from_slice(&op_id.to_le_bytes());
    buf.extend_from_slice(type_tag.as_bytes());
    fnv1a_64(&buf)
}

/// A newtype wrapper so reference-manager keys can't be confused with plain
/// `u64` operation ids at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HashCode(pub u64);

impl Hash for HashCode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl From<u64> for HashCode {
    fn from(v: u64) -> Self {
        HashCode(v)
    }
}

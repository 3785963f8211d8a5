//! Small BLAKE2 helpers shared by `keydesc.rs`, `envelope.rs` and
//! `chain.rs`: the source reaches for `blake2b`/`blake2s` with whatever
//! digest size a given step needs, rather than one fixed hash.

use blake2::digest::{Update, VariableOutput};
use blake2::{Blake2bVar, Blake2sVar};

pub fn blake2b(data: &[u8], digest_size: usize) -> Vec<u8> {
    let mut hasher = Blake2bVar::new(digest_size).expect("digest size <= 64");
    hasher.update(data);
    let mut out = vec![0u8; digest_size];
    hasher.finalize_variable(&mut out).expect("output buffer sized to digest_size");
    out
}

/// BLAKE-2b with the algorithm's default (512-bit) output.
pub fn blake2b_default(data: &[u8]) -> Vec<u8> {
    blake2b(data, 64)
}

pub fn blake2s(data: &[u8], digest_size: usize) -> Vec<u8> {
    let mut hasher = Blake2sVar::new(digest_size).expect("digest size <= 32");
    hasher.update(data);
    let mut out = vec![0u8; digest_size];
    hasher.finalize_variable(&mut out).expect("output buffer sized to digest_size");
    out
}

/// Stable path identifier: lowercase hex BLAKE-2s digest (spec §4.3 blob-id
/// derivation, §6 "hex BLAKE-2s blob ids").
pub fn blake2s_hex(data: &[u8]) -> String {
    hex::encode(blake2s(data, 32))
}

//! Packet/bundle wire format (spec §4.1 Packing, §6 "Packet wire format").
//!
//! Each block of plaintext becomes one `Packet`; a bundle is the serialized
//! list of packets. We use `serde`+`bincode` for a stable, self-describing
//! encoding rather than hand-rolling a length-prefixed format.

use serde::{Deserialize, Serialize};

use crate::dope::error::DopeError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub block: u64,
    /// `"DOPE" ‖ nonce_or_iv` (4 + 16 bytes).
    pub header: Vec<u8>,
    pub pad_len: u32,
    pub data: Vec<u8>,
    /// Present iff the envelope's cipher mode is AEAD.
    pub tag: Option<[u8; 16]>,
    pub ecc: Vec<u8>,
}

pub fn encode_bundle(packets: &[Packet]) -> Result<Vec<u8>, DopeError> {
    bincode::serialize(packets).map_err(|e| DopeError::MalformedBundle(e.to_string()))
}

pub fn decode_bundle(bytes: &[u8]) -> Result<Vec<Packet>, DopeError> {
    bincode::deserialize(bytes).map_err(|e| DopeError::MalformedBundle(e.to_string()))
}

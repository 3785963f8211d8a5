//! The DOPE envelope (spec §4.1): the stateful object that owns the
//! password-derived ratchet, BCH code and cipher mode, and exposes
//! `encode`/`decode` over fixed-size blocks.

use zeroize::Zeroizing;

use crate::dope::bch::BchCode;
use crate::dope::chain::Chain;
use crate::dope::cipher::{aead_decrypt, aead_encrypt, nonaead_decrypt, nonaead_encrypt, random_iv, IV_LEN};
use crate::dope::config::CipherMode;
use crate::dope::error::DopeError;
use crate::dope::hash::{blake2b_default, blake2s};
use crate::dope::keydesc::{self, KeyDescriptorParams};
use crate::dope::packet::{decode_bundle, encode_bundle, Packet};

const DOPE_HEADER: &[u8; 4] = b"DOPE";

pub struct Envelope {
    password: Zeroizing<Vec<u8>>,
    nonce: Vec<u8>,
    pub block_size: u32,
    pub bch_poly: u32,
    pub ecc_t: u32,
    pub cipher_mode: CipherMode,
    bch: BchCode,
    chain: Option<Chain>,
    fixated: bool,
}

impl Envelope {
    /// Construct a fresh envelope (spec §4.1 Construction). Nonce handling:
    /// empty -> 32 random bytes, <32 -> BLAKE-2s(32), ==32 -> verbatim,
    /// anything else is `UnsupportedConfig`.
    pub fn new(
        password: &[u8],
        bch_poly: u32,
        ecc_t: u32,
        cipher_mode: CipherMode,
        nonce: &[u8],
        block_size: u32,
    ) -> Result<Self, DopeError> {
        if block_size < 128 {
            return Err(DopeError::UnsupportedConfig(format!(
                "block size {block_size} below minimum of 128"
            )));
        }
        let nonce = match nonce.len() {
            0 => random_iv32().to_vec(),
            n if n < 32 => blake2s(nonce, 32),
            32 => nonce.to_vec(),
            n => return Err(DopeError::UnsupportedConfig(format!("unsupported nonce length {n}"))),
        };
        let bch = BchCode::new(bch_poly, ecc_t)?;
        Ok(Envelope {
            password: Zeroizing::new(password.to_vec()),
            nonce,
            block_size,
            bch_poly,
            ecc_t,
            cipher_mode,
            bch,
            chain: None,
            fixated: false,
        })
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// Serialize the key descriptor (spec §4.1 Serialization).
    pub fn serialize(&self) -> Result<String, DopeError> {
        keydesc::serialize(
            &self.password,
            &KeyDescriptorParams {
                block_size: self.block_size,
                bch_poly: self.bch_poly,
                ecc_t: self.ecc_t,
                nonce: self.nonce.clone(),
                cipher_mode: self.cipher_mode,
            },
        )
    }

    /// Recover a fresh envelope from a serialized descriptor and password
    /// (spec §4.1 Marshalling).
    pub fn marshall(descriptor: &str, password: &[u8]) -> Result<Self, DopeError> {
        let params = keydesc::marshall(descriptor, password)?;
        Envelope::new(
            password,
            params.bch_poly,
            params.ecc_t,
            params.cipher_mode,
            &params.nonce,
            params.block_size,
        )
    }

    /// Seed the ratchet from password and nonce (spec §4.1 Fixation).
    pub fn fixate(&mut self) {
        let hash_pass = blake2b_default(&self.password);
        let hash_nonce = blake2b_default(&self.nonce);
        let seed: Vec<u8> = hash_pass.iter().zip(&hash_nonce).map(|(a, b)| a ^ b).collect();
        let digest_size = if self.cipher_mode == CipherMode::Siv { 64 } else { 32 };
        self.chain = Some(Chain::new(&seed, digest_size));
        self.fixated = true;
    }

    fn ensure_fixated(&mut self) {
        if !self.fixated {
            self.fixate();
        }
    }

    fn chain_mut(&mut self) -> &mut Chain {
        self.chain.as_mut().expect("fixate() called before chain use")
    }

    /// Current block key without advancing the ratchet.
    pub fn key(&mut self) -> Result<Vec<u8>, DopeError> {
        self.ensure_fixated();
        self.chain.as_ref().expect("fixated above").key()
    }

    /// Advance the ratchet past one block's ecc bytes.
    pub fn ratchet(&mut self, ecc: &[u8]) -> Result<(), DopeError> {
        self.ensure_fixated();
        self.chain_mut().ratchet(ecc)
    }

    /// Split `data` into `(block_size - 4)`-byte chunks, padding the last
    /// chunk with random bytes and recording the pad length (spec §4.1
    /// Packing).
    fn pack(&self, data: &[u8]) -> Vec<(u32, Vec<u8>)> {
        let payload_len = (self.block_size - 4) as usize;
        if data.is_empty() {
            return vec![(0, Vec::new())];
        }
        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + payload_len).min(data.len());
            let mut chunk = data[offset..end].to_vec();
            let pad_len = payload_len - chunk.len();
            if pad_len > 0 {
                let mut pad = vec![0u8; pad_len];
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut pad);
                chunk.extend_from_slice(&pad);
            }
            chunks.push((pad_len as u32, chunk));
            offset = end;
        }
        chunks
    }

    /// Encode `plaintext` into a serialized packet bundle (spec §4.1
    /// Per-block encode). Clears the fixation flag when done.
    pub fn encode(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, DopeError> {
        self.ensure_fixated();
        let chunks = self.pack(plaintext);
        let mut packets = Vec::with_capacity(chunks.len());
        for (i, (pad_len, chunk)) in chunks.into_iter().enumerate() {
            let key = self.key()?;
            let (header_tail, data, tag) = if self.cipher_mode.is_aead() {
                let nonce: [u8; IV_LEN] = random_iv();
                let (ct, tag) = aead_encrypt(self.cipher_mode, &key, &nonce, DOPE_HEADER, &chunk)?;
                (nonce.to_vec(), ct, Some(tag))
            } else {
                let (iv, ct) = nonaead_encrypt(self.cipher_mode, &key, &chunk)?;
                (iv.to_vec(), ct, None)
            };
            let mut header = DOPE_HEADER.to_vec();
            header.extend_from_slice(&header_tail);
            let ecc = self.bch.encode(&data);
            self.ratchet(&ecc)?;
            packets.push(Packet { block: i as u64, header, pad_len, data, tag, ecc });
        }
        self.fixated = false;
        encode_bundle(&packets)
    }

    /// Decode blocks `[start, end)` of `bundle` (spec §4.1 Per-block decode
    /// with range). `end == start == 0` means "decode the whole bundle".
    ///
    /// BCH correction runs on the wire ciphertext (`packet.data`) before
    /// decryption, not on the recovered plaintext: the ecc was computed
    /// over the ciphertext at encode time (spec §4.1 per-block encode), and
    /// AEAD authentication would reject a bit-flipped ciphertext before any
    /// post-decrypt correction could run, which would make BCH tolerance
    /// (spec §8 property 4) impossible to satisfy for AEAD modes. This is
    /// the sibling of the defects already named in spec §9 "Observed
    /// ambiguities" — `original_source/sqlitefs/litefs.py`'s `read`/`write`
    /// path inherits the same ordering, but this rewrite corrects it.
    pub fn decode(&mut self, bundle: &[u8], start: u64, end: u64) -> Result<Vec<u8>, DopeError> {
        self.ensure_fixated();
        let packets = decode_bundle(bundle)?;
        let end = if start == 0 && end == 0 { packets.len() as u64 } else { end };
        if end < start {
            return Err(DopeError::MalformedBundle("end precedes start".into()));
        }
        for packet in packets.iter().take(start as usize) {
            self.ratchet(&packet.ecc)?;
        }
        let mut out = Vec::new();
        for packet in packets.iter().take(end as usize).skip(start as usize) {
            let key = self.key()?;
            let mut data = packet.data.clone();
            self.bch.decode(&mut data, &packet.ecc)?;
            let nonce_or_iv = packet
                .header
                .get(4..20)
                .ok_or_else(|| DopeError::MalformedBundle("packet header too short".into()))?;
            let plaintext = if self.cipher_mode.is_aead() {
                let tag = packet
                    .tag
                    .ok_or_else(|| DopeError::MalformedBundle("aead packet missing tag".into()))?;
                aead_decrypt(self.cipher_mode, &key, nonce_or_iv, DOPE_HEADER, &data, &tag)?
            } else {
                nonaead_decrypt(self.cipher_mode, &key, nonce_or_iv, &data)?
            };
            let trimmed = if packet.pad_len > 0 {
                let cut = plaintext.len().saturating_sub(packet.pad_len as usize);
                &plaintext[..cut]
            } else {
                &plaintext[..]
            };
            out.extend_from_slice(trimmed);
            self.ratchet(&packet.ecc)?;
        }
        self.fixated = false;
        Ok(out)
    }
}

fn random_iv32() -> [u8; 32] {
    let mut buf = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(mode: CipherMode, block_size: u32) -> Envelope {
        Envelope::new(b"correct horse battery staple", 8219, 8, mode, b"", block_size).unwrap()
    }

    #[test]
    fn round_trips_across_modes() {
        for mode in [CipherMode::Gcm, CipherMode::Siv, CipherMode::Cbc, CipherMode::Ofb] {
            let mut env = envelope(mode, 256);
            let plaintext = b"the quick brown fox jumps over the lazy dog, many times over".repeat(5);
            let bundle = env.encode(&plaintext).unwrap();
            let mut env2 = Envelope::new(b"correct horse battery staple", 8219, 8, mode, env.nonce(), 256).unwrap();
            let recovered = env2.decode(&bundle, 0, 0).unwrap();
            assert_eq!(recovered, plaintext, "mode {mode:?} round trip failed");
        }
    }

    #[test]
    fn key_descriptor_round_trip_recovers_same_params() {
        let env = envelope(CipherMode::Gcm, 1024);
        let descriptor = env.serialize().unwrap();
        let recovered = Envelope::marshall(&descriptor, b"correct horse battery staple").unwrap();
        assert_eq!(recovered.block_size, 1024);
        assert_eq!(recovered.bch_poly, 8219);
        assert_eq!(recovered.ecc_t, 8);
        assert_eq!(recovered.nonce(), env.nonce());
    }

    #[test]
    fn wrong_password_fails_marshall() {
        let env = envelope(CipherMode::Gcm, 1024);
        let descriptor = env.serialize().unwrap();
        assert!(Envelope::marshall(&descriptor, b"wrong password").is_err());
    }

    /// Per-block AEAD nonces are random, so ciphertext bytes differ between
    /// runs; determinism (spec §8 property 3) is about the ratchet's key
    /// schedule, which two identically-constructed envelopes must share.
    #[test]
    fn ratchet_determinism() {
        let mut a = envelope(CipherMode::Gcm, 256);
        let mut b = Envelope::new(b"correct horse battery staple", 8219, 8, CipherMode::Gcm, a.nonce(), 256).unwrap();
        for ecc in [b"ecc-a".as_slice(), b"ecc-b".as_slice(), b"ecc-c".as_slice()] {
            assert_eq!(a.key().unwrap(), b.key().unwrap());
            a.ratchet(ecc).unwrap();
            b.ratchet(ecc).unwrap();
        }
    }

    #[test]
    fn bch_tolerates_bit_flip_within_capacity() {
        let mut env = envelope(CipherMode::Gcm, 256);
        let plaintext = b"tolerate a flipped bit or two in transit".to_vec();
        let bundle = env.encode(&plaintext).unwrap();
        let mut packets = decode_bundle(&bundle).unwrap();
        packets[0].data[0] ^= 0x01;
        let corrupted = encode_bundle(&packets).unwrap();
        let mut env2 = Envelope::new(b"correct horse battery staple", 8219, 8, CipherMode::Gcm, env.nonce(), 256).unwrap();
        let recovered = env2.decode(&corrupted, 0, 0).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn range_decode_matches_concatenation() {
        let mut env = envelope(CipherMode::Gcm, 128);
        let plaintext = (0u8..=255).collect::<Vec<u8>>().repeat(2);
        let bundle = env.encode(&plaintext).unwrap();
        let total_blocks = decode_bundle(&bundle).unwrap().len() as u64;

        let mut whole = Envelope::new(b"correct horse battery staple", 8219, 8, CipherMode::Gcm, env.nonce(), 128).unwrap();
        let full = whole.decode(&bundle, 0, 0).unwrap();

        let mut ranged = Envelope::new(b"correct horse battery staple", 8219, 8, CipherMode::Gcm, env.nonce(), 128).unwrap();
        let mut reassembled = Vec::new();
        let mut start = 0u64;
        let step = (total_blocks / 2).max(1);
        while start < total_blocks {
            let end = (start + step).min(total_blocks);
            reassembled.extend(ranged.decode(&bundle, start, end).unwrap());
            start = end;
        }
        assert_eq!(reassembled, full);
    }

    #[test]
    fn pack_layout_matches_pad_len_contract() {
        let mut env = envelope(CipherMode::Gcm, 128);
        let plaintext_len = 3 * (128 - 4) + 7;
        let plaintext = vec![0xAB; plaintext_len];
        let bundle = env.encode(&plaintext).unwrap();
        let packets = decode_bundle(&bundle).unwrap();
        assert_eq!(packets.len(), 4);
        assert_eq!(packets[3].pad_len, (128 - 4 - 7) as u32);
        let mut env2 = Envelope::new(b"correct horse battery staple", 8219, 8, CipherMode::Gcm, env.nonce(), 128).unwrap();
        let recovered = env2.decode(&bundle, 0, 0).unwrap();
        assert_eq!(recovered, plaintext);
    }
}

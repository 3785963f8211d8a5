//! The ratchet hash chain (spec §4.1 Fixation, Ratchet step, Block key).
//!
//! Mirrors `dope.py`'s use of an incremental `hashlib.blake2b` object: the
//! chain is seeded once, `key()` peeks at the digest of everything absorbed
//! so far without disturbing the running state, and `ratchet()` absorbs the
//! current key plus the block's ecc bytes. We get the "peek without
//! finalizing" behavior by cloning the hasher before finalizing the clone.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;

use crate::dope::error::DopeError;

/// Ratchet counter ceiling from spec §3/§4.1 ("must not exceed 2^128").
/// `u128` can't represent 2^128 itself, so the ceiling is its max value.
const MAX_RATCHET_COUNT: u128 = u128::MAX;

pub struct Chain {
    state: Blake2bVar,
    digest_size: usize,
    count: u128,
}

impl Chain {
    /// Seed the chain from `S` (spec: `BLAKE-2b(password) XOR BLAKE-2b(nonce)`).
    /// `digest_size` is 64 for SIV, 32 otherwise (spec §4.1 Fixation).
    pub fn new(seed: &[u8], digest_size: usize) -> Self {
        let mut state = Blake2bVar::new(digest_size).expect("digest size <= 64");
        state.update(seed);
        Chain { state, digest_size, count: 0 }
    }

    /// Current block key without advancing the chain.
    pub fn key(&self) -> Result<Vec<u8>, DopeError> {
        if self.count == MAX_RATCHET_COUNT {
            return Err(DopeError::KeysExhausted);
        }
        let mut out = vec![0u8; self.digest_size];
        self.state
            .clone()
            .finalize_variable(&mut out)
            .expect("output buffer sized to digest_size");
        Ok(out)
    }

    /// Advance the chain, absorbing the current key and `ecc`.
    pub fn ratchet(&mut self, ecc: &[u8]) -> Result<(), DopeError> {
        self.count = self.count.checked_add(1).ok_or(DopeError::KeysExhausted)?;
        let k = {
            let mut out = vec![0u8; self.digest_size];
            self.state
                .clone()
                .finalize_variable(&mut out)
                .expect("output buffer sized to digest_size");
            out
        };
        self.state.update(&k);
        self.state.update(ecc);
        Ok(())
    }

    #[cfg(test)]
    pub fn force_count(&mut self, count: u128) {
        self.count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_seeds_produce_identical_keys() {
        let mut a = Chain::new(b"seed material", 32);
        let mut b = Chain::new(b"seed material", 32);
        assert_eq!(a.key().unwrap(), b.key().unwrap());
        a.ratchet(b"ecc-1").unwrap();
        b.ratchet(b"ecc-1").unwrap();
        assert_eq!(a.key().unwrap(), b.key().unwrap());
    }

    #[test]
    fn ratchet_advances_key() {
        let mut c = Chain::new(b"seed", 32);
        let k0 = c.key().unwrap();
        c.ratchet(b"ecc").unwrap();
        let k1 = c.key().unwrap();
        assert_ne!(k0, k1);
    }

    #[test]
    fn exhaustion_is_detected() {
        let mut c = Chain::new(b"seed", 32);
        c.force_count(MAX_RATCHET_COUNT);
        assert!(matches!(c.key(), Err(DopeError::KeysExhausted)));
        assert!(matches!(c.ratchet(b"x"), Err(DopeError::KeysExhausted)));
    }
}

//! Armored key descriptor serialize/marshall (spec §4.1 Serialization,
//! Marshalling; §6 "Key descriptor wire format").
//!
//! Wire layout before armoring:
//! `cipher_mode_tag(3 ASCII) ‖ nonce_iv(16) ‖ ct ‖ MAC-tag(16, AEAD only) ‖ kvac(64)`
//! where the encrypted plaintext is
//! `block_size(16 BE) ‖ bch_poly(16 BE) ‖ ecc_t(16 BE) ‖ nonce(32)`.
//! The whole body is base64-url encoded and wrapped at 80 columns between
//! literal `-----BEGIN DOPE 2 KEY-----` / `-----END DOPE 2 KEY-----` markers.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;

use crate::dope::cipher::{aead_decrypt, aead_encrypt, nonaead_decrypt, nonaead_encrypt, IV_LEN, TAG_LEN};
use crate::dope::config::CipherMode;
use crate::dope::error::DopeError;
use crate::dope::hash::{blake2b, blake2b_default};

const BEGIN_MARKER: &str = "-----BEGIN DOPE 2 KEY-----\n";
const END_MARKER: &str = "-----END DOPE 2 KEY-----";
const WRAP_COLUMN: usize = 80;
const KVAC_LEN: usize = 64;

#[derive(Debug)]
pub struct KeyDescriptorParams {
    pub block_size: u32,
    pub bch_poly: u32,
    pub ecc_t: u32,
    pub nonce: Vec<u8>,
    pub cipher_mode: CipherMode,
}

fn envelope_key(password: &[u8]) -> Vec<u8> {
    blake2b(password, 32)
}

fn u128_be16(v: u32) -> [u8; 16] {
    (v as u128).to_be_bytes()
}

fn u32_from_be16(bytes: &[u8]) -> Result<u32, DopeError> {
    let arr: [u8; 16] = bytes
        .try_into()
        .map_err(|_| DopeError::MalformedKeyDescriptor("truncated integer field".into()))?;
    u128::from_be_bytes(arr)
        .try_into()
        .map_err(|_| DopeError::MalformedKeyDescriptor("integer field out of range".into()))
}

/// Serialize `params` under `password` into an armored key descriptor.
pub fn serialize(password: &[u8], params: &KeyDescriptorParams) -> Result<String, DopeError> {
    let khac = envelope_key(password);
    let nhac = blake2b(&params.nonce, 32);
    let mut kvac_input = khac.clone();
    kvac_input.extend_from_slice(&nhac);
    let kvac = blake2b_default(&kvac_input);

    let mut plaintext = Vec::with_capacity(48 + params.nonce.len());
    plaintext.extend_from_slice(&u128_be16(params.block_size));
    plaintext.extend_from_slice(&u128_be16(params.bch_poly));
    plaintext.extend_from_slice(&u128_be16(params.ecc_t));
    plaintext.extend_from_slice(&params.nonce);

    let mut body = Vec::new();
    body.extend_from_slice(params.cipher_mode.wire_str().as_bytes());
    if params.cipher_mode.is_aead() {
        let nonce_iv: [u8; IV_LEN] = crate::dope::cipher::random_iv();
        let (ct, tag) = aead_encrypt(params.cipher_mode, &khac, &nonce_iv, &nonce_iv, &plaintext)?;
        body.extend_from_slice(&nonce_iv);
        body.extend_from_slice(&ct);
        body.extend_from_slice(&tag);
    } else {
        let (iv, ct) = nonaead_encrypt(params.cipher_mode, &khac, &plaintext)?;
        body.extend_from_slice(&iv);
        body.extend_from_slice(&ct);
    }
    body.extend_from_slice(&kvac);

    let encoded = URL_SAFE.encode(&body);
    let mut armored = String::from(BEGIN_MARKER);
    for chunk in encoded.as_bytes().chunks(WRAP_COLUMN) {
        armored.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
        armored.push('\n');
    }
    armored.push_str(END_MARKER);
    Ok(armored)
}

/// Recover the envelope construction parameters from an armored descriptor.
pub fn marshall(descriptor: &str, password: &[u8]) -> Result<KeyDescriptorParams, DopeError> {
    let inner: String = descriptor
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect();
    let raw = URL_SAFE
        .decode(inner.as_bytes())
        .map_err(|e| DopeError::MalformedKeyDescriptor(format!("base64: {e}")))?;

    if raw.len() < 3 + IV_LEN + KVAC_LEN {
        return Err(DopeError::MalformedKeyDescriptor("descriptor too short".into()));
    }
    let cipher_tag = std::str::from_utf8(&raw[0..3])
        .map_err(|_| DopeError::MalformedKeyDescriptor("cipher tag not ascii".into()))?;
    let cipher_mode = CipherMode::from_wire_str(cipher_tag)?;
    let kvac = &raw[raw.len() - KVAC_LEN..];
    let body = &raw[3..raw.len() - KVAC_LEN];

    let khac = envelope_key(password);
    let plaintext = if cipher_mode.is_aead() {
        if body.len() < IV_LEN + TAG_LEN {
            return Err(DopeError::MalformedKeyDescriptor("aead body too short".into()));
        }
        let nonce_iv = &body[..IV_LEN];
        let ct = &body[IV_LEN..body.len() - TAG_LEN];
        let tag_bytes: [u8; TAG_LEN] = body[body.len() - TAG_LEN..]
            .try_into()
            .expect("sliced to TAG_LEN");
        aead_decrypt(cipher_mode, &khac, nonce_iv, nonce_iv, ct, &tag_bytes)?
    } else {
        let iv = &body[..IV_LEN];
        let ct = &body[IV_LEN..];
        nonaead_decrypt(cipher_mode, &khac, iv, ct)?
    };

    if plaintext.len() < 48 {
        return Err(DopeError::MalformedKeyDescriptor("plaintext too short".into()));
    }
    let block_size = u32_from_be16(&plaintext[0..16])?;
    let bch_poly = u32_from_be16(&plaintext[16..32])?;
    let ecc_t = u32_from_be16(&plaintext[32..48])?;
    let nonce = plaintext[48..].to_vec();

    let nhac = blake2b(&nonce, 32);
    let mut vkac_input = khac;
    vkac_input.extend_from_slice(&nhac);
    let vkac = blake2b_default(&vkac_input);
    if vkac != kvac {
        return Err(DopeError::KeyVerification);
    }

    Ok(KeyDescriptorParams { block_size, bch_poly, ecc_t, nonce, cipher_mode })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> KeyDescriptorParams {
        KeyDescriptorParams {
            block_size: 512,
            bch_poly: 8219,
            ecc_t: 32,
            nonce: vec![7u8; 32],
            cipher_mode: CipherMode::Gcm,
        }
    }

    #[test]
    fn round_trips_with_correct_password() {
        let armored = serialize(b"hunter2", &params()).unwrap();
        assert!(armored.starts_with(BEGIN_MARKER));
        let recovered = marshall(&armored, b"hunter2").unwrap();
        assert_eq!(recovered.block_size, 512);
        assert_eq!(recovered.bch_poly, 8219);
        assert_eq!(recovered.ecc_t, 32);
        assert_eq!(recovered.nonce, vec![7u8; 32]);
    }

    #[test]
    fn wrong_password_fails_verification() {
        let armored = serialize(b"hunter2", &params()).unwrap();
        let err = marshall(&armored, b"wrong").unwrap_err();
        assert!(matches!(err, DopeError::KeyVerification) || matches!(err, DopeError::AuthFailed));
    }

    #[test]
    fn non_aead_mode_round_trips() {
        let mut p = params();
        p.cipher_mode = CipherMode::Cbc;
        let armored = serialize(b"pw", &p).unwrap();
        let recovered = marshall(&armored, b"pw").unwrap();
        assert_eq!(recovered.cipher_mode, CipherMode::Cbc);
    }

    #[test]
    fn flipped_byte_fails() {
        let armored = serialize(b"pw", &params()).unwrap();
        let mut bytes: Vec<u8> = armored.bytes().collect();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        let corrupted = String::from_utf8(bytes).unwrap();
        assert!(marshall(&corrupted, b"pw").is_err());
    }
}

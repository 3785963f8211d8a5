//! Cipher-mode dispatch for the DOPE envelope (spec §4.1): AES-256-GCM,
//! AES-SIV (128 or 256 effective key halves depending on key length),
//! AES-256-CBC (PKCS7) and AES-256-OFB, behind one small set of functions
//! so `envelope.rs` and `keydesc.rs` don't each re-derive the RustCrypto
//! plumbing.

use aes_gcm::aead::{consts::U16, AeadInPlace, KeyInit};
use aes_gcm::AesGcm;
use aes_siv::{Aes128SivAead, Aes256SivAead};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use rand::RngCore;

use crate::dope::config::CipherMode;
use crate::dope::error::DopeError;

pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

type Aes256Gcm16 = AesGcm<aes::Aes256, U16>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256Ofb = ofb::Ofb<aes::Aes256>;

pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// AEAD-encrypt `plaintext` under `mode` (GCM or SIV) with a 16-byte nonce,
/// returning the ciphertext and a detached 16-byte tag.
pub fn aead_encrypt(
    mode: CipherMode,
    key: &[u8],
    nonce: &[u8; IV_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN]), DopeError> {
    let mut buf = plaintext.to_vec();
    let tag = match mode {
        CipherMode::Gcm => {
            let cipher = Aes256Gcm16::new_from_slice(key)
                .map_err(|_| DopeError::UnsupportedConfig("bad gcm key length".into()))?;
            cipher
                .encrypt_in_place_detached(nonce.into(), aad, &mut buf)
                .map_err(|_| DopeError::AuthFailed)?
        }
        CipherMode::Siv if key.len() == 32 => {
            let cipher = Aes128SivAead::new_from_slice(key)
                .map_err(|_| DopeError::UnsupportedConfig("bad siv key length".into()))?;
            cipher
                .encrypt_in_place_detached(nonce.into(), aad, &mut buf)
                .map_err(|_| DopeError::AuthFailed)?
        }
        CipherMode::Siv => {
            let cipher = Aes256SivAead::new_from_slice(key)
                .map_err(|_| DopeError::UnsupportedConfig("bad siv key length".into()))?;
            cipher
                .encrypt_in_place_detached(nonce.into(), aad, &mut buf)
                .map_err(|_| DopeError::AuthFailed)?
        }
        CipherMode::Cbc | CipherMode::Ofb => {
            return Err(DopeError::UnsupportedConfig(
                "aead_encrypt called with a non-AEAD cipher mode".into(),
            ))
        }
    };
    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);
    Ok((buf, tag_bytes))
}

pub fn aead_decrypt(
    mode: CipherMode,
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>, DopeError> {
    let nonce: &[u8; IV_LEN] = nonce
        .try_into()
        .map_err(|_| DopeError::MalformedBundle("packet nonce is not 16 bytes".into()))?;
    let mut buf = ciphertext.to_vec();
    match mode {
        CipherMode::Gcm => {
            let cipher = Aes256Gcm16::new_from_slice(key)
                .map_err(|_| DopeError::UnsupportedConfig("bad gcm key length".into()))?;
            cipher
                .decrypt_in_place_detached(nonce.into(), aad, &mut buf, tag.into())
                .map_err(|_| DopeError::AuthFailed)?;
        }
        CipherMode::Siv if key.len() == 32 => {
            let cipher = Aes128SivAead::new_from_slice(key)
                .map_err(|_| DopeError::UnsupportedConfig("bad siv key length".into()))?;
            cipher
                .decrypt_in_place_detached(nonce.into(), aad, &mut buf, tag.into())
                .map_err(|_| DopeError::AuthFailed)?;
        }
        CipherMode::Siv => {
            let cipher = Aes256SivAead::new_from_slice(key)
                .map_err(|_| DopeError::UnsupportedConfig("bad siv key length".into()))?;
            cipher
                .decrypt_in_place_detached(nonce.into(), aad, &mut buf, tag.into())
                .map_err(|_| DopeError::AuthFailed)?;
        }
        CipherMode::Cbc | CipherMode::Ofb => {
            return Err(DopeError::UnsupportedConfig(
                "aead_decrypt called with a non-AEAD cipher mode".into(),
            ))
        }
    }
    Ok(buf)
}

/// Non-AEAD encrypt (CBC with PKCS7 padding, or OFB) with a fresh random IV.
pub fn nonaead_encrypt(
    mode: CipherMode,
    key: &[u8],
    plaintext: &[u8],
) -> Result<([u8; IV_LEN], Vec<u8>), DopeError> {
    let iv = random_iv();
    let ct = match mode {
        CipherMode::Cbc => {
            let enc = Aes256CbcEnc::new_from_slices(key, &iv)
                .map_err(|_| DopeError::UnsupportedConfig("bad cbc key/iv length".into()))?;
            enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
        }
        CipherMode::Ofb => {
            let mut cipher = Aes256Ofb::new_from_slices(key, &iv)
                .map_err(|_| DopeError::UnsupportedConfig("bad ofb key/iv length".into()))?;
            let mut buf = plaintext.to_vec();
            cipher.apply_keystream(&mut buf);
            buf
        }
        CipherMode::Gcm | CipherMode::Siv => {
            return Err(DopeError::UnsupportedConfig(
                "nonaead_encrypt called with an AEAD cipher mode".into(),
            ))
        }
    };
    Ok((iv, ct))
}

pub fn nonaead_decrypt(mode: CipherMode, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DopeError> {
    match mode {
        CipherMode::Cbc => {
            let dec = Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|_| DopeError::UnsupportedConfig("bad cbc key/iv length".into()))?;
            dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| DopeError::AuthFailed)
        }
        CipherMode::Ofb => {
            let mut cipher = Aes256Ofb::new_from_slices(key, iv)
                .map_err(|_| DopeError::UnsupportedConfig("bad ofb key/iv length".into()))?;
            let mut buf = ciphertext.to_vec();
            cipher.apply_keystream(&mut buf);
            Ok(buf)
        }
        CipherMode::Gcm | CipherMode::Siv => Err(DopeError::UnsupportedConfig(
            "nonaead_decrypt called with an AEAD cipher mode".into(),
        )),
    }
}

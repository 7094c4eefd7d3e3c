//! Cryptographic primitives for the bridge's secure channel.
//!
//! The bridge protocol layers a symmetric AES-256-CBC session on top of a
//! one-shot RSA key exchange:
//!
//! 1. The client generates fresh [`SessionKeys`] for every connection attempt.
//! 2. `hex(key):::hex(iv)` is wrapped with the bridge's RSA public key
//!    (PKCS#1 v1.5) and sent in the clear.
//! 3. Every later frame is `base64(AES-256-CBC(zero-padded JSON))` followed by
//!    an EOT terminator.
//!
//! Zero padding is always applied: a block-aligned payload still gets a full
//! block of NUL bytes appended. The bridge expects exactly this layout.

use std::fmt;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Frame terminator appended to every encrypted frame.
pub const FRAME_TERMINATOR: char = '\u{4}';

const BLOCK_SIZE: usize = 16;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

// ── SessionKeys ─────────────────────────────────────────────────────

/// Symmetric key material for one secure-channel session.
///
/// Generated fresh per connection attempt and discarded on disconnect;
/// never reused across sessions.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl SessionKeys {
    /// Generate a new random key + IV pair from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Build a context from known key material (the peer side of the exchange).
    pub fn from_parts(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Parse the `hex(key):::hex(iv)` secret format produced by [`wrap_session_keys`].
    pub fn from_secret(secret: &str) -> Result<Self, Error> {
        let (key_hex, iv_hex) = secret
            .split_once(":::")
            .ok_or_else(|| Error::Crypto("secret is missing the ':::' separator".into()))?;

        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        hex::decode_to_slice(key_hex, &mut key).map_err(|e| Error::Crypto(e.to_string()))?;
        hex::decode_to_slice(iv_hex, &mut iv).map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(Self { key, iv })
    }

    /// The plaintext secret string that gets RSA-wrapped.
    fn secret_string(&self) -> String {
        format!("{}:::{}", hex::encode(self.key), hex::encode(self.iv))
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

// ── Key exchange ────────────────────────────────────────────────────

/// RSA-wrap the session key material for the bridge.
///
/// Encrypts the ASCII string `hex(key):::hex(iv)` with PKCS#1 v1.5 padding
/// against the bridge's public key. Both SPKI (`BEGIN PUBLIC KEY`) and
/// PKCS#1 (`BEGIN RSA PUBLIC KEY`) encodings are accepted.
pub fn wrap_session_keys(keys: &SessionKeys, public_key_pem: &str) -> Result<Vec<u8>, Error> {
    let public_key = parse_public_key(public_key_pem)?;
    public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, keys.secret_string().as_bytes())
        .map_err(|e| Error::Crypto(format!("RSA key wrap failed: {e}")))
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, Error> {
    let pem = pem.trim();
    if !pem.starts_with("-----BEGIN") {
        return Err(Error::InvalidPublicKey("missing PEM header".into()));
    }

    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| Error::InvalidPublicKey(e.to_string()))
}

// ── Frame encryption ────────────────────────────────────────────────

/// Encrypt a JSON payload into a terminated wire frame.
pub fn encrypt_frame(payload: &str, keys: &SessionKeys) -> Result<String, Error> {
    let mut buf = payload.as_bytes().to_vec();
    let padding = BLOCK_SIZE - buf.len() % BLOCK_SIZE;
    buf.resize(buf.len() + padding, 0);

    let cipher = Aes256CbcEnc::new_from_slices(&keys.key, &keys.iv)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&buf);

    let mut frame = BASE64.encode(ciphertext);
    frame.push(FRAME_TERMINATOR);
    Ok(frame)
}

/// Decrypt a wire frame back into its JSON payload.
///
/// Any trailing terminator is ignored; trailing NUL padding is stripped
/// from the plaintext.
pub fn decrypt_frame(frame: &str, keys: &SessionKeys) -> Result<String, Error> {
    let encoded =
        frame.trim_end_matches(|c: char| c == FRAME_TERMINATOR || c == '\0' || c.is_whitespace());
    let ciphertext = BASE64
        .decode(encoded)
        .map_err(|e| Error::Crypto(format!("invalid base64 frame: {e}")))?;

    let cipher = Aes256CbcDec::new_from_slices(&keys.key, &keys.iv)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    let mut plaintext = cipher
        .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
        .map_err(|_| Error::Crypto("ciphertext is not a whole number of blocks".into()))?;

    while plaintext.last() == Some(&0) {
        plaintext.pop();
    }

    String::from_utf8(plaintext).map_err(|e| Error::Crypto(format!("plaintext is not UTF-8: {e}")))
}

// ── Authentication ──────────────────────────────────────────────────

/// Salted login hash: `sha256(salt + sha256(bridge_device_id + auth_key))`.
///
/// Both digests are lowercase hex strings.
pub fn auth_hash(bridge_device_id: &str, auth_key: &str, salt: &str) -> String {
    let inner = sha256_hex(&format!("{bridge_device_id}{auth_key}"));
    sha256_hex(&format!("{salt}{inner}"))
}

/// Cryptographically random alphanumeric salt.
pub fn random_salt(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

// ── Tests ───────────────────────────────────────────────────────────

// Wire encryption: PBKDF2-stretched shared secret + XChaCha20-Poly1305
//
// Seal:
// 1. Random 16-byte salt
// 2. PBKDF2-HMAC-SHA256(secret, salt, 10 000 rounds) → 32-byte key
// 3. Random 24-byte IV
// 4. XChaCha20-Poly1305(key, iv, plaintext) → ciphertext ‖ tag
// 5. Wire form: base64(iv),base64(salt),base64(ciphertext ‖ tag)
//
// Open reverses the steps. The secret is either an ECDH shared secret
// between two identities or an account password.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// PBKDF2 rounds used to stretch the secret.
/// Changing this breaks compatibility with every sealed string.
pub const PBKDF2_ROUNDS: u32 = 10_000;

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 24;
const KEY_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Malformed wire string: {0}")]
    MalformedWire(String),
    #[error("Decryption failed: wrong key or tampered ciphertext")]
    Authentication,
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Cipher failure: {0}")]
    Cipher(String),
}

/// ECDH shared secret between two identities. Wiped on drop.
#[derive(Clone)]
pub struct SharedSecret(Zeroizing<[u8; 32]>);

impl SharedSecret {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

fn stretch(secret: &[u8], salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt, PBKDF2_ROUNDS, key.as_mut_slice());
    key
}

/// Encrypt `plaintext` under `secret` into the comma-separated wire form.
pub fn seal(secret: &[u8], plaintext: &[u8]) -> Result<String, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let key = stretch(secret, &salt);
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_slice())
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;

    Ok(format!(
        "{},{},{}",
        STANDARD.encode(iv),
        STANDARD.encode(salt),
        STANDARD.encode(ciphertext)
    ))
}

/// Decrypt a wire string produced by [`seal`].
///
/// A wrong secret or any modified byte fails with
/// [`CryptoError::Authentication`]; it never yields wrong plaintext.
pub fn open(secret: &[u8], wire: &str) -> Result<Vec<u8>, CryptoError> {
    let parts: Vec<&str> = wire.split(',').collect();
    let [iv, salt, ciphertext] = parts.as_slice() else {
        return Err(CryptoError::MalformedWire(format!(
            "expected 3 comma-separated parts, got {}",
            parts.len()
        )));
    };

    let iv = decode_part("iv", iv)?;
    let salt = decode_part("salt", salt)?;
    let ciphertext = decode_part("ciphertext", ciphertext)?;

    if iv.len() != IV_LEN {
        return Err(CryptoError::MalformedWire(format!(
            "iv is {} bytes, expected {}",
            iv.len(),
            IV_LEN
        )));
    }
    if salt.is_empty() {
        return Err(CryptoError::MalformedWire("empty salt".into()));
    }

    let key = stretch(secret, &salt);
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_slice())
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;

    cipher
        .decrypt(XNonce::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| CryptoError::Authentication)
}

/// Seal a UTF-8 string
pub fn seal_str(secret: &[u8], plaintext: &str) -> Result<String, CryptoError> {
    seal(secret, plaintext.as_bytes())
}

/// Open a wire string whose plaintext is UTF-8
pub fn open_str(secret: &[u8], wire: &str) -> Result<String, CryptoError> {
    String::from_utf8(open(secret, wire)?).map_err(|e| {
        e.into_bytes().zeroize();
        CryptoError::MalformedWire("plaintext is not UTF-8".into())
    })
}

fn decode_part(name: &str, part: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(part.trim())
        .map_err(|e| CryptoError::MalformedWire(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let secret = [7u8; 32];
        let wire = seal(&secret, b"Hello, mesh!").unwrap();
        assert_eq!(open(&secret, &wire).unwrap(), b"Hello, mesh!");
    }

    #[test]
    fn test_wire_shape() {
        let wire = seal(b"password", b"x").unwrap();
        let parts: Vec<&str> = wire.split(',').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(STANDARD.decode(parts[0]).unwrap().len(), IV_LEN);
        assert_eq!(STANDARD.decode(parts[1]).unwrap().len(), SALT_LEN);
        // 1 byte plaintext + 16 byte tag
        assert_eq!(STANDARD.decode(parts[2]).unwrap().len(), 17);
    }

    #[test]
    fn test_same_plaintext_different_wire() {
        let secret = [1u8; 32];
        assert_ne!(seal(&secret, b"same").unwrap(), seal(&secret, b"same").unwrap());
    }

    #[test]
    fn test_wrong_secret_fails() {
        let wire = seal(&[1u8; 32], b"secret message").unwrap();
        assert_eq!(open(&[2u8; 32], &wire), Err(CryptoError::Authentication));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let secret = [3u8; 32];
        let wire = seal(&secret, b"secret message").unwrap();
        let parts: Vec<&str> = wire.split(',').collect();
        let mut ciphertext = STANDARD.decode(parts[2]).unwrap();
        ciphertext[0] ^= 0xFF;
        let tampered = format!("{},{},{}", parts[0], parts[1], STANDARD.encode(ciphertext));

        assert_eq!(open(&secret, &tampered), Err(CryptoError::Authentication));
    }

    #[test]
    fn test_malformed_wire() {
        let secret = [0u8; 32];
        assert!(matches!(open(&secret, "abc"), Err(CryptoError::MalformedWire(_))));
        assert!(matches!(open(&secret, "a,b,c,d"), Err(CryptoError::MalformedWire(_))));
        assert!(matches!(open(&secret, "!!,!!,!!"), Err(CryptoError::MalformedWire(_))));

        let short_iv = format!("{},{},{}", STANDARD.encode([0u8; 12]), STANDARD.encode([0u8; 16]), STANDARD.encode([0u8; 20]));
        assert!(matches!(open(&secret, &short_iv), Err(CryptoError::MalformedWire(_))));
    }

    #[test]
    fn test_str_helpers() {
        let wire = seal_str(b"pw", "héllo").unwrap();
        assert_eq!(open_str(b"pw", &wire).unwrap(), "héllo");
    }
}

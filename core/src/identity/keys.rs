// Cryptographic key management — secp256k1 identities

use super::IdentityError;
use crate::crypto::SharedSecret;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use zeroize::{Zeroize, Zeroizing};

/// Length of a compressed SEC1 public key
pub const PUBLIC_KEY_LEN: usize = 33;

/// Decode a base58 public key into a curve point
pub fn decode_public_key(public_key_b58: &str) -> Result<PublicKey, IdentityError> {
    let bytes = bs58::decode(public_key_b58)
        .into_vec()
        .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
    PublicKey::from_sec1_bytes(&bytes).map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))
}

/// Whether `public_key_b58` is a valid secp256k1 public key
pub fn is_valid_public_key(public_key_b58: &str) -> bool {
    decode_public_key(public_key_b58).is_ok()
}

/// A client's key pair
#[derive(Clone)]
pub struct IdentityKeys {
    secret: SecretKey,
}

impl IdentityKeys {
    /// Generate new identity keys
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Restore keys from a base58 private key
    pub fn from_private_base58(private_key_b58: &str) -> Result<Self, IdentityError> {
        let mut bytes = bs58::decode(private_key_b58)
            .into_vec()
            .map_err(|e| IdentityError::InvalidPrivateKey(e.to_string()))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| IdentityError::InvalidPrivateKey(e.to_string()));
        bytes.zeroize();
        Ok(Self { secret: secret? })
    }

    /// Compressed public key, base58. This is the identity on the wire.
    pub fn public_key_base58(&self) -> String {
        let point = self.secret.public_key().to_encoded_point(true);
        bs58::encode(point.as_bytes()).into_string()
    }

    /// 32-byte scalar, base58. Wiped on drop.
    pub fn private_key_base58(&self) -> Zeroizing<String> {
        let mut bytes = self.secret.to_bytes();
        let encoded = Zeroizing::new(bs58::encode(bytes.as_slice()).into_string());
        bytes.as_mut_slice().zeroize();
        encoded
    }

    /// ECDH with a remote public key: the x-coordinate of the shared point.
    ///
    /// Both sides of a conversation derive the same secret.
    pub fn shared_secret(&self, remote_public_key_b58: &str) -> Result<SharedSecret, IdentityError> {
        let remote = decode_public_key(remote_public_key_b58)?;
        let shared = k256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), remote.as_affine());

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());
        let secret = SharedSecret::new(bytes);
        bytes.zeroize();
        Ok(secret)
    }
}

impl std::fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeys")
            .field("public_key", &self.public_key_base58())
            .finish_non_exhaustive()
    }
}

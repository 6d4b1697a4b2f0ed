// Sealing payloads under a shared secret or password

pub mod encrypt;

pub use encrypt::{open, open_str, seal, seal_str, CryptoError, SharedSecret};

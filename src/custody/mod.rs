//! Key custody: encryption of private key material and wallet provisioning
//!
//! Decrypted key bytes exist only inside the stack frame of a single call
//! into this module. They are never cached, persisted, or logged.

mod encryption;
mod wallet;

pub use encryption::{EncryptedKey, KeyEncryptionService, ENCRYPTION_ALGORITHM};
pub use wallet::WalletCustodyManager;

//! Custodial wallet provisioning and keypair reconstruction

use std::sync::Arc;

use chrono::Utc;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ledger::{InsertOutcome, WalletRecord, WalletStore};

use super::encryption::KeyEncryptionService;

/// Creates and loads custodial wallets.
///
/// The decrypted private key is reconstructed for immediate, single-use
/// consumption by the caller and is never cached across requests.
pub struct WalletCustodyManager {
    store: Arc<dyn WalletStore>,
    cipher: Arc<KeyEncryptionService>,
}

impl WalletCustodyManager {
    pub fn new(store: Arc<dyn WalletStore>, cipher: Arc<KeyEncryptionService>) -> Self {
        Self { store, cipher }
    }

    /// Return the user's wallet, provisioning one on first use.
    ///
    /// Safe under concurrent first calls: the store enforces uniqueness on
    /// `user_id`, and a losing writer re-reads and returns the winner's
    /// record instead of erroring.
    pub async fn get_or_create_user_wallet(&self, user_id: &str) -> Result<WalletRecord> {
        if user_id.trim().is_empty() {
            return Err(Error::Validation("user id must not be empty".into()));
        }

        if let Some(existing) = self.store.find_by_user(user_id).await? {
            return Ok(existing);
        }

        let keypair = Keypair::new();
        let public_address = keypair.pubkey().to_string();
        let encrypted_private_key = self
            .cipher
            .encrypt_private_key(&keypair.to_bytes(), user_id)?;

        let record = WalletRecord {
            user_id: user_id.to_string(),
            public_address: public_address.clone(),
            encrypted_private_key,
            created_at: Utc::now(),
        };

        match self.store.insert(record.clone()).await? {
            InsertOutcome::Inserted => {
                info!(user_id, address = %public_address, "provisioned custodial wallet");
                Ok(record)
            }
            InsertOutcome::Duplicate => {
                // Lost the provisioning race; the winner's record is canonical
                debug!(user_id, "concurrent wallet creation, returning winner");
                self.store.find_by_user(user_id).await?.ok_or_else(|| {
                    Error::Internal(format!("wallet for {} vanished after duplicate insert", user_id))
                })
            }
        }
    }

    /// Reconstruct the user's signing keypair for one operation.
    pub async fn get_user_keypair(&self, user_id: &str) -> Result<Keypair> {
        let record = self
            .store
            .find_by_user(user_id)
            .await?
            .ok_or_else(|| Error::WalletNotFound(user_id.to_string()))?;

        let raw = self
            .cipher
            .decrypt_private_key(&record.encrypted_private_key, user_id)?;

        let keypair = Keypair::from_bytes(&raw)
            .map_err(|e| Error::InvalidKeypair(format!("stored key for {}: {}", user_id, e)))?;

        // publicAddress is fully determined by the key material
        if keypair.pubkey().to_string() != record.public_address {
            return Err(Error::Internal(format!(
                "derived address does not match wallet record for {}",
                user_id
            )));
        }

        Ok(keypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryWalletStore;

    fn manager() -> Arc<WalletCustodyManager> {
        let store = Arc::new(MemoryWalletStore::new());
        let cipher = Arc::new(KeyEncryptionService::new([9u8; 32]));
        Arc::new(WalletCustodyManager::new(store, cipher))
    }

    #[tokio::test]
    async fn creates_then_returns_same_wallet() {
        let manager = manager();

        let first = manager.get_or_create_user_wallet("alice").await.unwrap();
        let second = manager.get_or_create_user_wallet("alice").await.unwrap();

        assert_eq!(first.public_address, second.public_address);
    }

    #[tokio::test]
    async fn concurrent_first_use_yields_one_wallet() {
        let manager = manager();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&manager);
            handles.push(tokio::spawn(
                async move { m.get_or_create_user_wallet("bob").await },
            ));
        }

        let mut addresses = Vec::new();
        for handle in handles {
            addresses.push(handle.await.unwrap().unwrap().public_address);
        }

        // Every caller observed the same persisted address
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn keypair_matches_recorded_address() {
        let manager = manager();

        let record = manager.get_or_create_user_wallet("carol").await.unwrap();
        let keypair = manager.get_user_keypair("carol").await.unwrap();

        assert_eq!(keypair.pubkey().to_string(), record.public_address);
    }

    #[tokio::test]
    async fn missing_wallet_is_not_found() {
        let manager = manager();

        let result = manager.get_user_keypair("nobody").await;
        assert!(matches!(result, Err(Error::WalletNotFound(_))));
    }

    #[tokio::test]
    async fn empty_user_id_rejected() {
        let manager = manager();

        let result = manager.get_or_create_user_wallet("  ").await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}

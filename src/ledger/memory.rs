//! In-memory store implementations backed by DashMap
//!
//! Used by the simulation mode and by tests. The uniqueness constraints are
//! enforced atomically through the map entry API, which is what makes
//! concurrent first-use wallet creation safe without application locking.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::pool::PoolState;

use super::{
    InsertOutcome, OnchainTxRecord, PoolStore, TxLedger, TxStatus, WalletRecord, WalletStore,
};

/// Wallet store keyed by user id
#[derive(Default)]
pub struct MemoryWalletStore {
    wallets: DashMap<String, WalletRecord>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn insert(&self, record: WalletRecord) -> Result<InsertOutcome> {
        match self.wallets.entry(record.user_id.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
            Entry::Vacant(slot) => {
                debug!(user_id = %record.user_id, "persisting new wallet record");
                slot.insert(record);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Option<WalletRecord>> {
        Ok(self.wallets.get(user_id).map(|r| r.clone()))
    }

    async fn all(&self) -> Result<Vec<WalletRecord>> {
        Ok(self.wallets.iter().map(|r| r.clone()).collect())
    }
}

/// Transaction ledger keyed by signature, with a secondary id index
#[derive(Default)]
pub struct MemoryTxLedger {
    by_signature: DashMap<String, OnchainTxRecord>,
    signature_by_id: DashMap<Uuid, String>,
}

impl MemoryTxLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TxLedger for MemoryTxLedger {
    async fn insert(&self, record: OnchainTxRecord) -> Result<InsertOutcome> {
        match self.by_signature.entry(record.signature.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
            Entry::Vacant(slot) => {
                self.signature_by_id
                    .insert(record.id, record.signature.clone());
                slot.insert(record);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn find_by_signature(&self, signature: &str) -> Result<Option<OnchainTxRecord>> {
        Ok(self.by_signature.get(signature).map(|r| r.clone()))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TxStatus,
        slot: Option<u64>,
        block_time: Option<i64>,
    ) -> Result<()> {
        let signature = self
            .signature_by_id
            .get(&id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::LedgerState(format!("unknown record id {}", id)))?;

        let mut record = self
            .by_signature
            .get_mut(&signature)
            .ok_or_else(|| Error::LedgerState(format!("missing record for {}", signature)))?;

        if record.status.is_terminal() && record.status != status {
            return Err(Error::LedgerState(format!(
                "record {} is already {:?}, cannot become {:?}",
                id, record.status, status
            )));
        }

        record.status = status;
        if slot.is_some() {
            record.slot = slot;
        }
        if block_time.is_some() {
            record.block_time = block_time;
        }
        if status == TxStatus::Confirmed && record.confirmed_at.is_none() {
            record.confirmed_at = Some(Utc::now());
        }

        Ok(())
    }

    async fn for_user(&self, user_id: &str) -> Result<Vec<OnchainTxRecord>> {
        let mut records: Vec<OnchainTxRecord> = self
            .by_signature
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn pending(&self) -> Result<Vec<OnchainTxRecord>> {
        Ok(self
            .by_signature
            .iter()
            .filter(|r| r.status == TxStatus::Pending)
            .map(|r| r.clone())
            .collect())
    }
}

/// Pool snapshots keyed by pool address
#[derive(Default)]
pub struct MemoryPoolStore {
    pools: DashMap<String, PoolState>,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PoolStore for MemoryPoolStore {
    async fn upsert(&self, pool: PoolState) -> Result<()> {
        self.pools.insert(pool.address.clone(), pool);
        Ok(())
    }

    async fn find(&self, address: &str) -> Result<Option<PoolState>> {
        Ok(self.pools.get(address).map(|p| p.clone()))
    }
}

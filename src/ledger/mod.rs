//! Persisted records and persistence seams
//!
//! The engine talks to storage through the traits in this module. The only
//! concurrency guarantees it relies on are the two uniqueness constraints:
//! one wallet per `user_id`, one transaction record per `signature`.

mod memory;

pub use memory::{MemoryPoolStore, MemoryTxLedger, MemoryWalletStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::custody::EncryptedKey;
use crate::error::Result;
use crate::pool::PoolState;

/// A user's custodial wallet. Exactly one per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub user_id: String,
    /// Base58 pubkey, fully determined by the generated key material
    pub public_address: String,
    /// Never exposed outside the custody module
    pub encrypted_private_key: EncryptedKey,
    pub created_at: DateTime<Utc>,
}

/// Why a transaction was submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPurpose {
    Deposit,
    Stake,
    Unstake,
    DexSwap,
    AddLiquidity,
    RemoveLiquidity,
    FlashLoan,
    RepayFlashLoan,
    InsurancePremium,
    InsuranceClaim,
    DaoVote,
}

/// Lifecycle of an on-chain transaction record.
///
/// Transitions are monotonic: Pending may become Confirmed or Failed,
/// terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed)
    }
}

/// One submitted or observed on-chain transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnchainTxRecord {
    pub id: Uuid,
    pub user_id: String,
    pub purpose: TxPurpose,
    pub asset_mint: String,
    /// Integer amount in the asset's smallest unit
    pub amount: u64,
    pub status: TxStatus,
    /// Unique; the deduplication key across reconciliation passes
    pub signature: String,
    pub slot: Option<u64>,
    pub block_time: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl OnchainTxRecord {
    pub fn new(
        user_id: impl Into<String>,
        purpose: TxPurpose,
        asset_mint: impl Into<String>,
        amount: u64,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            purpose,
            asset_mint: asset_mint.into(),
            amount,
            status: TxStatus::Pending,
            signature: signature.into(),
            slot: None,
            block_time: None,
            created_at: Utc::now(),
            confirmed_at: None,
        }
    }
}

/// Outcome of an insert under a uniqueness constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same unique key already exists
    Duplicate,
}

/// Wallet persistence. Unique on `user_id`.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Insert a new wallet. Returns `Duplicate` (without modifying the
    /// stored record) when a wallet already exists for the user.
    async fn insert(&self, record: WalletRecord) -> Result<InsertOutcome>;

    async fn find_by_user(&self, user_id: &str) -> Result<Option<WalletRecord>>;

    /// Every stored wallet, for reconciliation scans
    async fn all(&self) -> Result<Vec<WalletRecord>>;
}

/// Transaction log persistence. Unique on `signature`.
#[async_trait]
pub trait TxLedger: Send + Sync {
    /// Insert a new record. Returns `Duplicate` when the signature is
    /// already present.
    async fn insert(&self, record: OnchainTxRecord) -> Result<InsertOutcome>;

    async fn find_by_signature(&self, signature: &str) -> Result<Option<OnchainTxRecord>>;

    /// Move a record to a new status. Rejects transitions out of a
    /// terminal state with `Error::LedgerState`.
    async fn update_status(
        &self,
        id: Uuid,
        status: TxStatus,
        slot: Option<u64>,
        block_time: Option<i64>,
    ) -> Result<()>;

    async fn for_user(&self, user_id: &str) -> Result<Vec<OnchainTxRecord>>;

    async fn pending(&self) -> Result<Vec<OnchainTxRecord>>;
}

/// Pool snapshot persistence, keyed by pool address.
#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn upsert(&self, pool: PoolState) -> Result<()>;

    async fn find(&self, address: &str) -> Result<Option<PoolState>>;
}

//! Per-protocol transaction orchestration
//!
//! Every operation follows the same skeleton: validate inputs, reconstruct
//! the user's keypair, build protocol instructions, submit one atomic
//! transaction, record it as Pending, then confirm and move the record to a
//! terminal state. Protocol modules only differ in validation and
//! instruction building.

pub mod program;

mod governance;
mod insurance;
mod lending;
mod liquidity;
mod staking;

use std::sync::Arc;

use serde::Serialize;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::custody::{KeyEncryptionService, WalletCustodyManager};
use crate::error::{Error, ErrorKind, Result};
use crate::ledger::{
    InsertOutcome, MemoryPoolStore, MemoryTxLedger, MemoryWalletStore, OnchainTxRecord, PoolStore,
    TxLedger, TxPurpose, TxStatus, WalletStore,
};
use crate::network::{
    ConfirmationOutcome, NetworkClient, RpcNetworkClient, SimulatedNetwork,
};
use crate::pool::PoolState;

/// Caller-facing outcome of one engine operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub message: String,
}

impl OperationResult {
    pub fn ok(signature: &str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            signature: Some(signature.to_string()),
            error_kind: None,
            message: message.into(),
        }
    }

    pub fn err(error: &Error) -> Self {
        Self {
            success: false,
            signature: None,
            error_kind: Some(error.kind()),
            message: error.to_string(),
        }
    }

    fn failed_onchain(signature: &str, reason: String) -> Self {
        Self {
            success: false,
            signature: Some(signature.to_string()),
            error_kind: Some(ErrorKind::Fatal),
            message: reason,
        }
    }

    fn unconfirmed(signature: &str, timeout_ms: u64) -> Self {
        Self {
            success: false,
            signature: Some(signature.to_string()),
            error_kind: Some(ErrorKind::Unconfirmed),
            message: format!(
                "transaction not confirmed within {}ms, left pending",
                timeout_ms
            ),
        }
    }
}

/// Shared engine state wired together once at startup
pub struct EngineContext {
    pub config: Config,
    pub network: Arc<dyn NetworkClient>,
    pub custody: Arc<WalletCustodyManager>,
    pub wallets: Arc<dyn WalletStore>,
    pub ledger: Arc<dyn TxLedger>,
    pub pools: Arc<dyn PoolStore>,
}

impl EngineContext {
    /// Build the engine from configuration.
    ///
    /// The execution mode is decided here, exactly once: a configured
    /// sponsor keypair selects the real RPC path, otherwise everything runs
    /// against the in-process simulation.
    pub fn initialize(config: Config) -> Result<Arc<Self>> {
        let network: Arc<dyn NetworkClient> = match &config.custody.sponsor_keypair_path {
            Some(path) => {
                let sponsor = RpcNetworkClient::load_sponsor(path)?;
                info!("execution mode: real (sponsor configured)");
                Arc::new(RpcNetworkClient::new(&config.rpc, sponsor))
            }
            None => {
                info!("execution mode: simulated (no sponsor keypair)");
                Arc::new(SimulatedNetwork::new())
            }
        };

        Self::with_network(config, network)
    }

    /// Wire the engine around an explicit network client
    pub fn with_network(config: Config, network: Arc<dyn NetworkClient>) -> Result<Arc<Self>> {
        let wallets: Arc<dyn WalletStore> = Arc::new(MemoryWalletStore::new());
        let ledger: Arc<dyn TxLedger> = Arc::new(MemoryTxLedger::new());
        let pools: Arc<dyn PoolStore> = Arc::new(MemoryPoolStore::new());

        let cipher = Arc::new(KeyEncryptionService::new(config.master_key()?));
        let custody = Arc::new(WalletCustodyManager::new(Arc::clone(&wallets), cipher));

        Ok(Arc::new(Self {
            config,
            network,
            custody,
            wallets,
            ledger,
            pools,
        }))
    }

    /// Pool snapshot used for quoting: prefer the network's view, fall back
    /// to the last persisted snapshot.
    pub(crate) async fn pool_snapshot(&self, address: &str) -> Result<PoolState> {
        if let Some(pool) = self.network.fetch_pool(address).await? {
            self.pools.upsert(pool.clone()).await?;
            return Ok(pool);
        }
        self.pools
            .find(address)
            .await?
            .ok_or_else(|| Error::Validation(format!("unknown pool {}", address)))
    }

    pub(crate) fn parse_pool_address(address: &str) -> Result<Pubkey> {
        Pubkey::from_str(address)
            .map_err(|e| Error::Validation(format!("invalid pool address {}: {}", address, e)))
    }

    /// Standard account list: user signer first, then the pool account
    pub(crate) fn protocol_accounts(user: &Keypair, pool: Option<&Pubkey>) -> Vec<AccountMeta> {
        let mut accounts = vec![AccountMeta::new(user.pubkey(), true)];
        if let Some(pool) = pool {
            accounts.push(AccountMeta::new(*pool, false));
        }
        accounts
    }

    /// Submit, record, confirm. The single execution path every protocol
    /// operation funnels through.
    pub(crate) async fn execute(
        &self,
        user_id: &str,
        purpose: TxPurpose,
        asset_mint: &str,
        amount: u64,
        instructions: Vec<Instruction>,
    ) -> Result<OperationResult> {
        let keypair = self.custody.get_user_keypair(user_id).await?;

        let signature = self.network.submit(&instructions, &keypair).await?;
        let signature_str = signature.to_string();

        let record = OnchainTxRecord::new(user_id, purpose, asset_mint, amount, &signature_str);
        let record_id = record.id;
        if self.ledger.insert(record).await? == InsertOutcome::Duplicate {
            // Signature uniqueness makes a resubmission visible here
            warn!(signature = %signature_str, "signature already recorded, not inserting twice");
            return Err(Error::DuplicateSignature(signature_str));
        }

        info!(user_id, ?purpose, amount, signature = %signature_str, "transaction submitted");

        let outcome = self
            .network
            .confirm(
                &signature,
                self.config.orchestrator.confirm_timeout_ms,
                self.config.orchestrator.confirm_poll_interval_ms,
            )
            .await;

        match outcome {
            Ok(ConfirmationOutcome::Confirmed { slot, block_time }) => {
                self.ledger
                    .update_status(record_id, TxStatus::Confirmed, Some(slot), block_time)
                    .await?;
                info!(signature = %signature_str, slot, "transaction confirmed");
                Ok(OperationResult::ok(&signature_str, format!("{:?} confirmed", purpose)))
            }
            Ok(ConfirmationOutcome::Failed(reason)) => {
                self.ledger
                    .update_status(record_id, TxStatus::Failed, None, None)
                    .await?;
                error!(signature = %signature_str, %reason, "transaction failed on-chain");
                Ok(OperationResult::failed_onchain(&signature_str, reason))
            }
            Err(Error::Unconfirmed { timeout_ms, .. }) => {
                // Neither success nor failure is known; the record stays
                // Pending and can be reconciled later by signature
                warn!(signature = %signature_str, timeout_ms, "confirmation timed out");
                Ok(OperationResult::unconfirmed(&signature_str, timeout_ms))
            }
            Err(e) => {
                warn!(signature = %signature_str, error = %e, "confirmation poll failed");
                Ok(OperationResult::unconfirmed(
                    &signature_str,
                    self.config.orchestrator.confirm_timeout_ms,
                ))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use base64::Engine;

    /// Engine wired to a fresh simulated network, returning both
    pub fn simulated_engine() -> (Arc<EngineContext>, Arc<SimulatedNetwork>) {
        let mut config = Config::default();
        config.custody.master_secret =
            base64::engine::general_purpose::STANDARD.encode([3u8; 32]);

        let network = Arc::new(SimulatedNetwork::new());
        let engine =
            EngineContext::with_network(config, Arc::clone(&network) as Arc<dyn NetworkClient>)
                .unwrap();
        (engine, network)
    }

    pub fn seeded_pool(network: &SimulatedNetwork) -> PoolState {
        let pool = PoolState {
            address: Pubkey::new_unique().to_string(),
            token_a_mint: Pubkey::new_unique().to_string(),
            token_b_mint: Pubkey::new_unique().to_string(),
            reserve_a: 1_000_000_000_000,
            reserve_b: 250_000_000_000,
            lp_supply: 500_000_000_000,
            fee_bps: 30,
        };
        network.seed_pool(pool.clone());
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::simulated_engine;
    use super::*;
    use crate::network::ExecutionMode;

    #[tokio::test]
    async fn initialize_selects_simulated_without_sponsor() {
        let (engine, _) = simulated_engine();
        assert_eq!(engine.network.mode(), ExecutionMode::Simulated);
    }

    #[tokio::test]
    async fn execute_requires_existing_wallet() {
        let (engine, _) = simulated_engine();
        let result = engine
            .execute("ghost", TxPurpose::Stake, "native", 1, Vec::new())
            .await;
        assert!(matches!(result, Err(Error::WalletNotFound(_))));
    }
}

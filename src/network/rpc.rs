//! Real submission path: sponsor-signed transactions over JSON RPC

use std::str::FromStr;
use std::time::Duration;

use solana_client::rpc_client::{GetConfirmedSignaturesForAddress2Config, RpcClient};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::UiTransactionEncoding;
use tracing::{debug, info, warn};

use async_trait::async_trait;

use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::orchestrator::program::ACCOUNT_DISCRIMINATORS;
use crate::pool::PoolState;

use super::{ConfirmationOutcome, ExecutionMode, InboundTransfer, NetworkClient};

/// Network client backed by a Solana RPC endpoint.
///
/// The sponsor keypair is the fee payer and first signer on every
/// submission; the per-user keypair co-signs.
pub struct RpcNetworkClient {
    rpc: RpcClient,
    sponsor: Keypair,
    max_read_retries: u32,
}

impl RpcNetworkClient {
    pub fn new(config: &RpcConfig, sponsor: Keypair) -> Self {
        let rpc = RpcClient::new_with_timeout_and_commitment(
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
            CommitmentConfig::confirmed(),
        );
        info!(endpoint = %config.endpoint, sponsor = %sponsor.pubkey(), "RPC network client ready");
        Self {
            rpc,
            sponsor,
            max_read_retries: config.max_retries,
        }
    }

    /// Load the sponsor keypair from the configured file path
    pub fn load_sponsor(path: &str) -> Result<Keypair> {
        solana_sdk::signature::read_keypair_file(path)
            .map_err(|e| Error::InvalidKeypair(format!("sponsor keypair {}: {}", path, e)))
    }

    fn parse_pubkey(address: &str) -> Result<Pubkey> {
        Pubkey::from_str(address)
            .map_err(|e| Error::Validation(format!("invalid address {}: {}", address, e)))
    }
}

/// Decode a pool account from raw account data
fn decode_pool_account(address: &str, data: &[u8]) -> Result<PoolState> {
    const LEN: usize = 8 + 32 + 32 + 8 + 8 + 8 + 2;
    if data.len() < LEN {
        return Err(Error::Rpc(format!(
            "pool account {} too short: {} bytes",
            address,
            data.len()
        )));
    }
    if data[..8] != ACCOUNT_DISCRIMINATORS::LIQUIDITY_POOL {
        return Err(Error::Rpc(format!(
            "account {} is not a liquidity pool",
            address
        )));
    }

    let token_a_mint = Pubkey::try_from(&data[8..40]).expect("checked length");
    let token_b_mint = Pubkey::try_from(&data[40..72]).expect("checked length");
    let reserve_a = u64::from_le_bytes(data[72..80].try_into().expect("checked length"));
    let reserve_b = u64::from_le_bytes(data[80..88].try_into().expect("checked length"));
    let lp_supply = u64::from_le_bytes(data[88..96].try_into().expect("checked length"));
    let fee_bps = u16::from_le_bytes(data[96..98].try_into().expect("checked length"));

    Ok(PoolState {
        address: address.to_string(),
        token_a_mint: token_a_mint.to_string(),
        token_b_mint: token_b_mint.to_string(),
        reserve_a,
        reserve_b,
        lp_supply,
        fee_bps,
    })
}

#[async_trait]
impl NetworkClient for RpcNetworkClient {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Real
    }

    async fn submit(&self, instructions: &[Instruction], user: &Keypair) -> Result<Signature> {
        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .map_err(|e| Error::TransactionBuild(format!("failed to get blockhash: {}", e)))?;

        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&self.sponsor.pubkey()),
            &[&self.sponsor, user],
            blockhash,
        );

        let signature = self
            .rpc
            .send_transaction(&transaction)
            .map_err(|e| Error::TransactionSend(e.to_string()))?;

        debug!(%signature, instruction_count = instructions.len(), "submitted transaction");
        Ok(signature)
    }

    async fn confirm(
        &self,
        signature: &Signature,
        timeout_ms: u64,
        poll_interval_ms: u64,
    ) -> Result<ConfirmationOutcome> {
        let wait = async {
            loop {
                let statuses = self
                    .rpc
                    .get_signature_statuses(&[*signature])
                    .map_err(Error::from)?;

                if let Some(Some(status)) = statuses.value.into_iter().next() {
                    if let Some(err) = status.err {
                        return Ok(ConfirmationOutcome::Failed(err.to_string()));
                    }
                    if status.satisfies_commitment(CommitmentConfig::confirmed()) {
                        let block_time = self.rpc.get_block_time(status.slot).ok();
                        return Ok(ConfirmationOutcome::Confirmed {
                            slot: status.slot,
                            block_time,
                        });
                    }
                }

                tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
            }
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), wait).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Unconfirmed {
                signature: signature.to_string(),
                timeout_ms,
            }),
        }
    }

    async fn fetch_pool(&self, address: &str) -> Result<Option<PoolState>> {
        let pubkey = Self::parse_pubkey(address)?;

        // Read-only query: transient faults are retried transparently
        let backoff_policy = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_millis(
                500 * (self.max_read_retries as u64 + 1),
            )),
            ..Default::default()
        };

        let account = backoff::future::retry(backoff_policy, || async {
            self.rpc
                .get_account_with_commitment(&pubkey, CommitmentConfig::confirmed())
                .map(|response| response.value)
                .map_err(|e| {
                    let err = Error::from(e);
                    if err.is_retryable() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
        })
        .await?;

        match account {
            Some(account) => Ok(Some(decode_pool_account(address, &account.data)?)),
            None => Ok(None),
        }
    }

    async fn current_slot(&self) -> Result<u64> {
        self.rpc.get_slot().map_err(Error::from)
    }

    async fn transfers_to_address(
        &self,
        address: &str,
        until_signature: Option<&str>,
        limit: usize,
    ) -> Result<Vec<InboundTransfer>> {
        let pubkey = Self::parse_pubkey(address)?;

        let until = until_signature
            .map(Signature::from_str)
            .transpose()
            .map_err(|e| Error::Validation(format!("invalid cursor signature: {}", e)))?;

        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until,
            limit: Some(limit),
            commitment: Some(CommitmentConfig::confirmed()),
        };

        let summaries = self
            .rpc
            .get_signatures_for_address_with_config(&pubkey, config)
            .map_err(Error::from)?;

        // RPC returns newest first; the monitor wants oldest first so the
        // cursor can advance past each processed item
        let mut transfers = Vec::new();
        for summary in summaries.iter().rev() {
            if summary.err.is_some() {
                continue;
            }

            let signature = Signature::from_str(&summary.signature)
                .map_err(|e| Error::Rpc(format!("bad signature from RPC: {}", e)))?;

            let tx = match self
                .rpc
                .get_transaction(&signature, UiTransactionEncoding::Base64)
            {
                Ok(tx) => tx,
                Err(e) => {
                    // Stop here; the cursor stays behind this item and the
                    // next scan resumes from it
                    warn!(%signature, error = %e, "transfer detail fetch failed, pausing scan");
                    break;
                }
            };

            let Some(meta) = tx.transaction.meta.as_ref() else {
                continue;
            };
            let Some(decoded) = tx.transaction.transaction.decode() else {
                continue;
            };

            let keys = decoded.message.static_account_keys();
            let Some(index) = keys.iter().position(|k| *k == pubkey) else {
                continue;
            };

            let pre = meta.pre_balances.get(index).copied().unwrap_or(0);
            let post = meta.post_balances.get(index).copied().unwrap_or(0);
            let received = post.saturating_sub(pre);
            if received == 0 {
                continue;
            }

            transfers.push(InboundTransfer {
                signature: summary.signature.clone(),
                amount: received,
                slot: tx.slot,
                block_time: tx.block_time,
            });
        }

        Ok(transfers)
    }
}

//! Deterministic in-process execution mode
//!
//! Selected at startup when no sponsor signer is configured. Produces
//! synthetic signatures and applies instruction effects to in-memory pool
//! and balance state, so downstream ledger and UI code behaves uniformly
//! with the real path. A transaction's effects are applied all-or-nothing:
//! a failing instruction (including an unrepaid flash loan) discards every
//! effect of the transaction.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use tracing::debug;

use crate::error::{Error, Result};
use crate::orchestrator::program::{self, InstructionData};
use crate::pool::{self, PoolState, SwapDirection};

use super::{ConfirmationOutcome, ExecutionMode, InboundTransfer, NetworkClient};

struct SimulatedTx {
    slot: u64,
    block_time: i64,
    err: Option<String>,
}

/// In-process stand-in for the cluster
#[derive(Default)]
pub struct SimulatedNetwork {
    slot: AtomicU64,
    nonce: AtomicU64,
    pools: DashMap<String, PoolState>,
    lamports: DashMap<Pubkey, u64>,
    transactions: DashMap<String, SimulatedTx>,
    deposits: DashMap<String, Vec<InboundTransfer>>,
    fail_next_scan: AtomicBool,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register pool state for the simulated chain
    pub fn seed_pool(&self, pool: PoolState) {
        self.pools.insert(pool.address.clone(), pool);
    }

    /// Credit an account balance directly (test/bootstrap helper)
    pub fn credit(&self, owner: &Pubkey, amount: u64) {
        *self.lamports.entry(*owner).or_insert(0) += amount;
    }

    pub fn balance(&self, owner: &Pubkey) -> u64 {
        self.lamports.get(owner).map(|b| *b).unwrap_or(0)
    }

    /// Record an externally-originated deposit for the monitor to discover
    pub fn simulate_external_deposit(&self, address: &str, amount: u64) -> String {
        let slot = self.slot.fetch_add(1, Ordering::SeqCst) + 1;
        let signature = self
            .next_signature(format!("deposit:{}:{}:{}", address, amount, slot).as_bytes())
            .to_string();

        if let Ok(owner) = Pubkey::from_str(address) {
            self.credit(&owner, amount);
        }
        self.deposits
            .entry(address.to_string())
            .or_default()
            .push(InboundTransfer {
                signature: signature.clone(),
                amount,
                slot,
                block_time: Some(Utc::now().timestamp()),
            });
        signature
    }

    /// Make the next address scan fail with a transient fault
    pub fn inject_scan_fault(&self) {
        self.fail_next_scan.store(true, Ordering::SeqCst);
    }

    fn next_signature(&self, payload: &[u8]) -> Signature {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut first = Sha256::new();
        first.update(payload);
        first.update(nonce.to_le_bytes());
        let front: [u8; 32] = first.finalize().into();
        let back: [u8; 32] = Sha256::digest(front).into();

        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&front);
        bytes[32..].copy_from_slice(&back);
        Signature::from(bytes)
    }

    fn pool_account(instruction: &Instruction) -> Result<String> {
        instruction
            .accounts
            .get(1)
            .map(|meta| meta.pubkey.to_string())
            .ok_or_else(|| Error::TransactionFailed("instruction missing pool account".into()))
    }

    /// Pool as the in-flight transaction sees it: scratch first, then the
    /// committed state
    fn scratch_pool(
        &self,
        pools: &HashMap<String, PoolState>,
        address: &str,
    ) -> std::result::Result<PoolState, String> {
        if let Some(pool) = pools.get(address) {
            return Ok(pool.clone());
        }
        self.pools
            .get(address)
            .map(|p| p.clone())
            .ok_or_else(|| format!("unknown pool account {}", address))
    }

    fn scratch_balance(&self, balances: &HashMap<Pubkey, u64>, owner: &Pubkey) -> u64 {
        balances
            .get(owner)
            .copied()
            .unwrap_or_else(|| self.balance(owner))
    }

    /// Apply one transaction's instructions to scratch state.
    ///
    /// Returns the error message for a failed transaction; state is only
    /// committed by the caller when this returns Ok.
    fn execute(
        &self,
        instructions: &[Instruction],
        user: &Pubkey,
        pools: &mut HashMap<String, PoolState>,
        balances: &mut HashMap<Pubkey, u64>,
    ) -> std::result::Result<(), String> {
        let mut flash_debt: u64 = 0;
        let mut flash_repaid: u64 = 0;

        for instruction in instructions {
            let known_program = instruction.program_id == *program::STAKING_PROGRAM_ID
                || instruction.program_id == *program::DEX_PROGRAM_ID
                || instruction.program_id == *program::LENDING_PROGRAM_ID
                || instruction.program_id == *program::INSURANCE_PROGRAM_ID
                || instruction.program_id == *program::GOVERNANCE_PROGRAM_ID;
            if !known_program {
                // Caller-supplied usage instructions are carried but have no
                // balance effect in simulation
                debug!(program = %instruction.program_id, "skipping foreign instruction");
                continue;
            }

            let data = InstructionData::decode(&instruction.data).map_err(|e| e.to_string())?;

            match data {
                InstructionData::Stake { amount, .. } => {
                    let owner = *user;
                    let available = self.scratch_balance(balances, &owner);
                    if available < amount {
                        return Err("insufficient balance for stake".into());
                    }
                    balances.insert(owner, available - amount);
                }
                InstructionData::Unstake
                | InstructionData::PurchasePolicy { .. }
                | InstructionData::FileClaim { .. }
                | InstructionData::CastVote { .. } => {
                    // Account-level bookkeeping only; nothing to move here
                }
                InstructionData::Swap {
                    amount_in,
                    min_amount_out,
                    direction,
                } => {
                    let address = Self::pool_account(instruction).map_err(|e| e.to_string())?;
                    let mut state = self.scratch_pool(pools, &address)?;
                    let quote = pool::calculate_swap(amount_in, direction, &state)
                        .map_err(|e| e.to_string())?;
                    if quote.amount_out < min_amount_out {
                        return Err("slippage tolerance exceeded".into());
                    }
                    match direction {
                        SwapDirection::AToB => {
                            state.reserve_a += amount_in;
                            state.reserve_b -= quote.amount_out;
                        }
                        SwapDirection::BToA => {
                            state.reserve_b += amount_in;
                            state.reserve_a -= quote.amount_out;
                        }
                    }
                    pools.insert(address, state);
                }
                InstructionData::AddLiquidity {
                    amount_a,
                    amount_b,
                    min_lp,
                } => {
                    let address = Self::pool_account(instruction).map_err(|e| e.to_string())?;
                    let mut state = self.scratch_pool(pools, &address)?;
                    let quote =
                        pool::calculate_liquidity_operation(amount_a, amount_b, &state, u32::MAX)
                            .map_err(|e| e.to_string())?;
                    if quote.lp_minted < min_lp {
                        return Err("liquidity below minimum".into());
                    }
                    state.reserve_a += amount_a;
                    state.reserve_b += amount_b;
                    state.lp_supply += quote.lp_minted;
                    pools.insert(address, state);
                }
                InstructionData::RemoveLiquidity { lp_amount } => {
                    let address = Self::pool_account(instruction).map_err(|e| e.to_string())?;
                    let mut state = self.scratch_pool(pools, &address)?;
                    if lp_amount == 0 || lp_amount > state.lp_supply {
                        return Err("invalid LP amount".into());
                    }
                    let out_a =
                        (lp_amount as u128 * state.reserve_a as u128 / state.lp_supply as u128) as u64;
                    let out_b =
                        (lp_amount as u128 * state.reserve_b as u128 / state.lp_supply as u128) as u64;
                    state.reserve_a -= out_a;
                    state.reserve_b -= out_b;
                    state.lp_supply -= lp_amount;
                    pools.insert(address, state);
                }
                InstructionData::FlashBorrow { amount } => {
                    let address = Self::pool_account(instruction).map_err(|e| e.to_string())?;
                    let mut state = self.scratch_pool(pools, &address)?;
                    if amount == 0 || amount > state.reserve_a {
                        return Err("insufficient pool liquidity for flash loan".into());
                    }
                    state.reserve_a -= amount;
                    let owner = *user;
                    let available = self.scratch_balance(balances, &owner);
                    balances.insert(owner, available + amount);
                    flash_debt += amount + pool::flash_loan_fee(amount, state.fee_bps);
                    pools.insert(address, state);
                }
                InstructionData::FlashRepay { amount } => {
                    let address = Self::pool_account(instruction).map_err(|e| e.to_string())?;
                    let mut state = self.scratch_pool(pools, &address)?;
                    let owner = *user;
                    let available = self.scratch_balance(balances, &owner);
                    if available < amount {
                        return Err("insufficient balance to repay flash loan".into());
                    }
                    balances.insert(owner, available - amount);
                    state.reserve_a += amount;
                    flash_repaid += amount;
                    pools.insert(address, state);
                }
            }
        }

        // A borrow without full repayment in the same transaction aborts
        // the whole transaction
        if flash_repaid < flash_debt {
            return Err(format!(
                "flash loan not repaid: owed {}, repaid {}",
                flash_debt, flash_repaid
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl NetworkClient for SimulatedNetwork {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Simulated
    }

    async fn submit(&self, instructions: &[Instruction], user: &Keypair) -> Result<Signature> {
        let payload = bincode::serialize(instructions)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let signature = self.next_signature(&payload);
        let slot = self.slot.fetch_add(1, Ordering::SeqCst) + 1;

        let mut pool_scratch = HashMap::new();
        let mut balance_scratch = HashMap::new();
        let result = self.execute(
            instructions,
            &user.pubkey(),
            &mut pool_scratch,
            &mut balance_scratch,
        );

        match result {
            Ok(()) => {
                // Commit all-or-nothing
                for (address, state) in pool_scratch {
                    self.pools.insert(address, state);
                }
                for (owner, balance) in balance_scratch {
                    self.lamports.insert(owner, balance);
                }
                self.transactions.insert(
                    signature.to_string(),
                    SimulatedTx {
                        slot,
                        block_time: Utc::now().timestamp(),
                        err: None,
                    },
                );
            }
            Err(reason) => {
                debug!(%signature, %reason, "simulated transaction failed, no effects applied");
                self.transactions.insert(
                    signature.to_string(),
                    SimulatedTx {
                        slot,
                        block_time: Utc::now().timestamp(),
                        err: Some(reason),
                    },
                );
            }
        }

        Ok(signature)
    }

    async fn confirm(
        &self,
        signature: &Signature,
        _timeout_ms: u64,
        _poll_interval_ms: u64,
    ) -> Result<ConfirmationOutcome> {
        match self.transactions.get(&signature.to_string()) {
            Some(tx) => match &tx.err {
                Some(reason) => Ok(ConfirmationOutcome::Failed(reason.clone())),
                None => Ok(ConfirmationOutcome::Confirmed {
                    slot: tx.slot,
                    block_time: Some(tx.block_time),
                }),
            },
            None => Err(Error::Rpc(format!("unknown signature {}", signature))),
        }
    }

    async fn fetch_pool(&self, address: &str) -> Result<Option<PoolState>> {
        Ok(self.pools.get(address).map(|p| p.clone()))
    }

    async fn current_slot(&self) -> Result<u64> {
        Ok(self.slot.load(Ordering::SeqCst))
    }

    async fn transfers_to_address(
        &self,
        address: &str,
        until_signature: Option<&str>,
        limit: usize,
    ) -> Result<Vec<InboundTransfer>> {
        if self.fail_next_scan.swap(false, Ordering::SeqCst) {
            return Err(Error::Rpc("simulated network fault".into()));
        }

        let Some(entries) = self.deposits.get(address) else {
            return Ok(Vec::new());
        };

        let start = match until_signature {
            Some(cursor) => entries
                .iter()
                .position(|t| t.signature == cursor)
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };

        Ok(entries[start..].iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::program::{
        DEX_PROGRAM_ID, LENDING_PROGRAM_ID,
    };
    use solana_sdk::instruction::AccountMeta;

    fn test_pool(address: &Pubkey) -> PoolState {
        PoolState {
            address: address.to_string(),
            token_a_mint: Pubkey::new_unique().to_string(),
            token_b_mint: Pubkey::new_unique().to_string(),
            reserve_a: 1_000_000_000,
            reserve_b: 1_000_000_000,
            lp_supply: 1_000_000_000,
            fee_bps: 9,
        }
    }

    fn lending_ix(pool: &Pubkey, user: &Pubkey, data: InstructionData) -> Instruction {
        Instruction {
            program_id: *LENDING_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(*user, true),
                AccountMeta::new(*pool, false),
            ],
            data: data.encode(),
        }
    }

    #[tokio::test]
    async fn flash_loan_without_repay_aborts_atomically() {
        let network = SimulatedNetwork::new();
        let pool_address = Pubkey::new_unique();
        network.seed_pool(test_pool(&pool_address));

        let user = Keypair::new();
        let borrow = lending_ix(
            &pool_address,
            &user.pubkey(),
            InstructionData::FlashBorrow { amount: 500_000 },
        );

        let signature = network.submit(&[borrow], &user).await.unwrap();
        let outcome = network.confirm(&signature, 1_000, 10).await.unwrap();

        assert!(matches!(outcome, ConfirmationOutcome::Failed(_)));

        // Zero effect on reserves or balances
        let pool = network
            .fetch_pool(&pool_address.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.reserve_a, 1_000_000_000);
        assert_eq!(network.balance(&user.pubkey()), 0);
    }

    #[tokio::test]
    async fn flash_loan_with_repay_commits() {
        let network = SimulatedNetwork::new();
        let pool_address = Pubkey::new_unique();
        network.seed_pool(test_pool(&pool_address));

        let user = Keypair::new();
        // Fee covers the 9bps charge on the principal
        network.credit(&user.pubkey(), 1_000);

        let principal = 1_000_000_000u64.min(500_000);
        let fee = pool::flash_loan_fee(principal, 9);
        let instructions = [
            lending_ix(
                &pool_address,
                &user.pubkey(),
                InstructionData::FlashBorrow { amount: principal },
            ),
            lending_ix(
                &pool_address,
                &user.pubkey(),
                InstructionData::FlashRepay {
                    amount: principal + fee,
                },
            ),
        ];

        let signature = network.submit(&instructions, &user).await.unwrap();
        let outcome = network.confirm(&signature, 1_000, 10).await.unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Confirmed { .. }));

        // Pool keeps the fee
        let pool = network
            .fetch_pool(&pool_address.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.reserve_a, 1_000_000_000 + fee);
    }

    #[tokio::test]
    async fn swap_moves_reserves() {
        let network = SimulatedNetwork::new();
        let pool_address = Pubkey::new_unique();
        network.seed_pool(test_pool(&pool_address));

        let user = Keypair::new();
        let swap = Instruction {
            program_id: *DEX_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(user.pubkey(), true),
                AccountMeta::new(pool_address, false),
            ],
            data: InstructionData::Swap {
                amount_in: 10_000,
                min_amount_out: 1,
                direction: SwapDirection::AToB,
            }
            .encode(),
        };

        let signature = network.submit(&[swap], &user).await.unwrap();
        let outcome = network.confirm(&signature, 1_000, 10).await.unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Confirmed { .. }));

        let pool = network
            .fetch_pool(&pool_address.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.reserve_a, 1_000_000_000 + 10_000);
        assert!(pool.reserve_b < 1_000_000_000);
    }

    #[tokio::test]
    async fn deposit_scan_respects_cursor() {
        let network = SimulatedNetwork::new();
        let address = Pubkey::new_unique().to_string();

        let first = network.simulate_external_deposit(&address, 100);
        let second = network.simulate_external_deposit(&address, 200);

        let all = network.transfers_to_address(&address, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let after_first = network
            .transfers_to_address(&address, Some(&first), 10)
            .await
            .unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].signature, second);

        let after_second = network
            .transfers_to_address(&address, Some(&second), 10)
            .await
            .unwrap();
        assert!(after_second.is_empty());
    }
}

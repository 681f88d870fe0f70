//! Flash-loan lending operations
//!
//! A flash loan is one atomic transaction: borrow, the caller's usage
//! instructions, then repayment of principal plus fee. Either every step
//! lands or none does, so the pool can never be left short.

use solana_sdk::instruction::Instruction;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ledger::TxPurpose;
use crate::pool;

use super::program::{InstructionData, LENDING_PROGRAM_ID};
use super::{EngineContext, OperationResult};

impl EngineContext {
    /// Borrow `amount` from a pool and repay it with the fee inside the
    /// same transaction, sandwiching the caller's `usage_instructions`.
    pub async fn execute_flash_loan(
        &self,
        user_id: &str,
        pool_address: &str,
        amount: u64,
        usage_instructions: Vec<Instruction>,
    ) -> Result<OperationResult> {
        if amount == 0 {
            return Err(Error::Validation("flash loan amount must be positive".into()));
        }

        let pool = self.pool_snapshot(pool_address).await?;
        if amount > pool.reserve_a {
            return Err(Error::Validation(format!(
                "flash loan of {} exceeds pool liquidity {}",
                amount, pool.reserve_a
            )));
        }

        let fee = pool::flash_loan_fee(amount, pool.fee_bps);
        let repayment = amount
            .checked_add(fee)
            .ok_or(Error::MathOverflow)?;
        debug!(user_id, amount, fee, repayment, "flash loan composed");

        let keypair = self.custody.get_user_keypair(user_id).await?;
        let pool_pubkey = Self::parse_pool_address(pool_address)?;

        let mut instructions = Vec::with_capacity(usage_instructions.len() + 2);
        instructions.push(Instruction {
            program_id: *LENDING_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, Some(&pool_pubkey)),
            data: InstructionData::FlashBorrow { amount }.encode(),
        });
        instructions.extend(usage_instructions);
        instructions.push(Instruction {
            program_id: *LENDING_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, Some(&pool_pubkey)),
            data: InstructionData::FlashRepay { amount: repayment }.encode(),
        });

        self.execute(
            user_id,
            TxPurpose::FlashLoan,
            &pool.token_a_mint,
            amount,
            instructions,
        )
        .await
    }

    /// Standalone repayment toward a lending position.
    pub async fn repay_flash_loan(
        &self,
        user_id: &str,
        pool_address: &str,
        amount: u64,
    ) -> Result<OperationResult> {
        if amount == 0 {
            return Err(Error::Validation("repayment amount must be positive".into()));
        }

        let pool = self.pool_snapshot(pool_address).await?;
        let keypair = self.custody.get_user_keypair(user_id).await?;
        let pool_pubkey = Self::parse_pool_address(pool_address)?;

        let instruction = Instruction {
            program_id: *LENDING_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, Some(&pool_pubkey)),
            data: InstructionData::FlashRepay { amount }.encode(),
        };

        self.execute(
            user_id,
            TxPurpose::RepayFlashLoan,
            &pool.token_a_mint,
            amount,
            vec![instruction],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::ledger::{TxLedger, TxStatus};
    use crate::network::NetworkClient;
    use crate::orchestrator::test_support::{seeded_pool, simulated_engine};
    use crate::pool;

    #[tokio::test]
    async fn flash_loan_repays_with_fee() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        let wallet = engine.custody.get_or_create_user_wallet("alice").await.unwrap();

        // The fee comes out of the borrower's own balance
        let amount = 10_000_000u64;
        let fee = pool::flash_loan_fee(amount, pool.fee_bps);
        network.simulate_external_deposit(&wallet.public_address, fee);

        let result = engine
            .execute_flash_loan("alice", &pool.address, amount, Vec::new())
            .await
            .unwrap();
        assert!(result.success);

        // Pool balance grew by exactly the fee
        let after = network.fetch_pool(&pool.address).await.unwrap().unwrap();
        assert_eq!(after.reserve_a, pool.reserve_a + fee);
    }

    #[tokio::test]
    async fn flash_loan_without_fee_funds_fails_atomically() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        engine.custody.get_or_create_user_wallet("bob").await.unwrap();

        // Borrower has nothing; repayment of principal + fee cannot land
        let result = engine
            .execute_flash_loan("bob", &pool.address, 10_000_000, Vec::new())
            .await
            .unwrap();
        assert!(!result.success);

        // The failure left zero effect on pool state
        let after = network.fetch_pool(&pool.address).await.unwrap().unwrap();
        assert_eq!(after.reserve_a, pool.reserve_a);
        assert_eq!(after.reserve_b, pool.reserve_b);

        // And the ledger records the failed attempt
        let records = engine.ledger.for_user("bob").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TxStatus::Failed);
    }

    #[tokio::test]
    async fn flash_loan_beyond_pool_depth_rejected() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        engine.custody.get_or_create_user_wallet("carol").await.unwrap();

        let result = engine
            .execute_flash_loan("carol", &pool.address, pool.reserve_a + 1, Vec::new())
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(engine.ledger.for_user("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn standalone_repayment_credits_pool() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        let wallet = engine.custody.get_or_create_user_wallet("dave").await.unwrap();
        network.simulate_external_deposit(&wallet.public_address, 5_000_000);

        let result = engine
            .repay_flash_loan("dave", &pool.address, 5_000_000)
            .await
            .unwrap();
        assert!(result.success);

        let after = network.fetch_pool(&pool.address).await.unwrap().unwrap();
        assert_eq!(after.reserve_a, pool.reserve_a + 5_000_000);
    }
}

//! DEX operations: swaps and liquidity provision
//!
//! Slippage is enforced twice: locally against a fresh pool snapshot before
//! anything is submitted, and again by the on-chain program via the
//! min-amount fields in the instruction data.

use solana_sdk::instruction::Instruction;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ledger::TxPurpose;
use crate::pool::{self, SwapDirection};

use super::program::{InstructionData, DEX_PROGRAM_ID};
use super::{EngineContext, OperationResult};

impl EngineContext {
    fn check_slippage_bound(&self, slippage_bps: u32) -> Result<()> {
        if slippage_bps > self.config.orchestrator.max_slippage_bps {
            return Err(Error::Validation(format!(
                "slippage bound {}bps exceeds the configured ceiling of {}bps",
                slippage_bps, self.config.orchestrator.max_slippage_bps
            )));
        }
        Ok(())
    }

    /// Swap against a pool in either direction, bounded by `slippage_bps`.
    pub async fn swap(
        &self,
        user_id: &str,
        pool_address: &str,
        direction: SwapDirection,
        amount_in: u64,
        slippage_bps: u32,
    ) -> Result<OperationResult> {
        if amount_in == 0 {
            return Err(Error::Validation("swap amount must be positive".into()));
        }
        self.check_slippage_bound(slippage_bps)?;

        let pool = self.pool_snapshot(pool_address).await?;
        let quote = pool::calculate_swap(amount_in, direction, &pool)?;

        // Quote-time rejection: a trade whose price impact already exceeds
        // the caller's bound cannot possibly execute inside it
        if quote.price_impact_bps > slippage_bps {
            return Err(Error::SlippageExceeded {
                requested_bps: slippage_bps,
                required_bps: quote.price_impact_bps,
            });
        }

        let min_amount_out = pool::min_amount_out_with_slippage(quote.amount_out, slippage_bps);
        debug!(
            user_id,
            amount_in,
            expected_out = quote.amount_out,
            min_amount_out,
            impact_bps = quote.price_impact_bps,
            "swap quoted"
        );

        let keypair = self.custody.get_user_keypair(user_id).await?;
        let pool_pubkey = Self::parse_pool_address(pool_address)?;

        let instruction = Instruction {
            program_id: *DEX_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, Some(&pool_pubkey)),
            data: InstructionData::Swap {
                amount_in,
                min_amount_out,
                direction,
            }
            .encode(),
        };

        // The recorded asset is the one the user paid in
        let asset_mint = match direction {
            SwapDirection::AToB => &pool.token_a_mint,
            SwapDirection::BToA => &pool.token_b_mint,
        };

        self.execute(
            user_id,
            TxPurpose::DexSwap,
            asset_mint,
            amount_in,
            vec![instruction],
        )
        .await
    }

    /// Add liquidity to a pool.
    ///
    /// `amount_b == 0` lets the engine pick the ratio-preserving
    /// counter-amount; an explicit amount_b is validated against the
    /// slippage bound instead.
    pub async fn add_liquidity(
        &self,
        user_id: &str,
        pool_address: &str,
        amount_a: u64,
        amount_b: u64,
        slippage_bps: u32,
    ) -> Result<OperationResult> {
        self.check_slippage_bound(slippage_bps)?;

        let pool = self.pool_snapshot(pool_address).await?;
        let quote = pool::calculate_liquidity_operation(amount_a, amount_b, &pool, slippage_bps)?;

        if !quote.slippage_ok {
            let required = pool::optimal_slippage_bps(&pool, amount_a, amount_b)?;
            return Err(Error::SlippageExceeded {
                requested_bps: slippage_bps,
                required_bps: required,
            });
        }

        let used_b = if amount_b == 0 {
            quote.optimal_amount_b
        } else {
            amount_b
        };
        let min_lp = pool::min_amount_out_with_slippage(quote.lp_minted, slippage_bps);
        debug!(
            user_id,
            amount_a,
            used_b,
            lp_expected = quote.lp_minted,
            min_lp,
            "liquidity contribution quoted"
        );

        let keypair = self.custody.get_user_keypair(user_id).await?;
        let pool_pubkey = Self::parse_pool_address(pool_address)?;

        let instruction = Instruction {
            program_id: *DEX_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, Some(&pool_pubkey)),
            data: InstructionData::AddLiquidity {
                amount_a,
                amount_b: used_b,
                min_lp,
            }
            .encode(),
        };

        self.execute(
            user_id,
            TxPurpose::AddLiquidity,
            &pool.token_a_mint,
            amount_a,
            vec![instruction],
        )
        .await
    }

    /// Burn LP tokens and withdraw the proportional reserves.
    pub async fn remove_liquidity(
        &self,
        user_id: &str,
        pool_address: &str,
        lp_amount: u64,
    ) -> Result<OperationResult> {
        if lp_amount == 0 {
            return Err(Error::Validation("LP amount must be positive".into()));
        }

        let pool = self.pool_snapshot(pool_address).await?;
        if lp_amount > pool.lp_supply {
            return Err(Error::Validation(format!(
                "LP amount {} exceeds pool supply {}",
                lp_amount, pool.lp_supply
            )));
        }

        let keypair = self.custody.get_user_keypair(user_id).await?;
        let pool_pubkey = Self::parse_pool_address(pool_address)?;

        let instruction = Instruction {
            program_id: *DEX_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, Some(&pool_pubkey)),
            data: InstructionData::RemoveLiquidity { lp_amount }.encode(),
        };

        self.execute(
            user_id,
            TxPurpose::RemoveLiquidity,
            &pool.token_a_mint,
            lp_amount,
            vec![instruction],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::ledger::TxLedger;
    use crate::network::NetworkClient;
    use crate::orchestrator::test_support::{seeded_pool, simulated_engine};
    use crate::pool::SwapDirection;

    #[tokio::test]
    async fn swap_executes_and_moves_reserves() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        engine.custody.get_or_create_user_wallet("alice").await.unwrap();

        let result = engine
            .swap("alice", &pool.address, SwapDirection::AToB, 1_000_000, 100)
            .await
            .unwrap();
        assert!(result.success);

        let after = network.fetch_pool(&pool.address).await.unwrap().unwrap();
        assert_eq!(after.reserve_a, pool.reserve_a + 1_000_000);
        assert!(after.reserve_b < pool.reserve_b);
    }

    #[tokio::test]
    async fn reverse_swap_moves_reserves_the_other_way() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        engine.custody.get_or_create_user_wallet("hana").await.unwrap();

        let result = engine
            .swap("hana", &pool.address, SwapDirection::BToA, 1_000_000, 100)
            .await
            .unwrap();
        assert!(result.success);

        let after = network.fetch_pool(&pool.address).await.unwrap().unwrap();
        assert_eq!(after.reserve_b, pool.reserve_b + 1_000_000);
        assert!(after.reserve_a < pool.reserve_a);

        // The ledger records the paid-in asset, token B
        let records = engine.ledger.for_user("hana").await.unwrap();
        assert_eq!(records[0].asset_mint, pool.token_b_mint);
    }

    #[tokio::test]
    async fn oversized_swap_rejected_before_submission() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        engine.custody.get_or_create_user_wallet("bob").await.unwrap();

        // Half the pool depth cannot execute inside a 10bps bound
        let result = engine
            .swap("bob", &pool.address, SwapDirection::AToB, pool.reserve_a / 2, 10)
            .await;
        assert!(matches!(result, Err(Error::SlippageExceeded { .. })));

        // Nothing was submitted or recorded
        assert!(engine.ledger.for_user("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slippage_above_ceiling_rejected() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        engine.custody.get_or_create_user_wallet("carol").await.unwrap();

        let ceiling = engine.config.orchestrator.max_slippage_bps;
        let result = engine
            .swap("carol", &pool.address, SwapDirection::AToB, 1_000, ceiling + 1)
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn add_liquidity_with_engine_chosen_counter_amount() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        engine.custody.get_or_create_user_wallet("dave").await.unwrap();

        let result = engine
            .add_liquidity("dave", &pool.address, 1_000_000, 0, 100)
            .await
            .unwrap();
        assert!(result.success);

        let after = network.fetch_pool(&pool.address).await.unwrap().unwrap();
        assert_eq!(after.reserve_a, pool.reserve_a + 1_000_000);
        assert!(after.lp_supply > pool.lp_supply);
    }

    #[tokio::test]
    async fn add_liquidity_off_ratio_rejected() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        engine.custody.get_or_create_user_wallet("erin").await.unwrap();

        // 4:1 pool; offering B at double the required ratio breaks a 1% bound
        let result = engine
            .add_liquidity("erin", &pool.address, 1_000_000, 500_000, 100)
            .await;
        assert!(matches!(result, Err(Error::SlippageExceeded { .. })));
    }

    #[tokio::test]
    async fn remove_liquidity_withdraws_proportionally() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        engine.custody.get_or_create_user_wallet("frank").await.unwrap();

        let burn = pool.lp_supply / 10;
        let result = engine
            .remove_liquidity("frank", &pool.address, burn)
            .await
            .unwrap();
        assert!(result.success);

        let after = network.fetch_pool(&pool.address).await.unwrap().unwrap();
        assert_eq!(after.lp_supply, pool.lp_supply - burn);
        assert_eq!(after.reserve_a, pool.reserve_a - pool.reserve_a / 10);
    }

    #[tokio::test]
    async fn remove_more_than_supply_rejected() {
        let (engine, network) = simulated_engine();
        let pool = seeded_pool(&network);
        engine.custody.get_or_create_user_wallet("grace").await.unwrap();

        let result = engine
            .remove_liquidity("grace", &pool.address, pool.lp_supply + 1)
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}

//! AMM pool state and constant-product math

mod math;

pub use math::{
    calculate_liquidity_operation, calculate_price_impact, calculate_swap, flash_loan_fee,
    min_amount_out_with_slippage, optimal_slippage_bps, spot_prices, LiquidityQuote, SwapQuote,
    BPS_DENOMINATOR, PRICE_SCALE,
};

use serde::{Deserialize, Serialize};

/// Snapshot of a constant-product pool.
///
/// Reserves are integers in each asset's smallest unit and mutate only as a
/// result of confirmed on-chain operations; math reads them as an immutable
/// snapshot per computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolState {
    pub address: String,
    pub token_a_mint: String,
    pub token_b_mint: String,
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub lp_supply: u64,
    pub fee_bps: u16,
}

/// Which side of the pool a trade enters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    AToB,
    BToA,
}

impl PoolState {
    /// Reserves seen from the trade's perspective: (reserve_in, reserve_out)
    pub fn oriented_reserves(&self, direction: SwapDirection) -> (u64, u64) {
        match direction {
            SwapDirection::AToB => (self.reserve_a, self.reserve_b),
            SwapDirection::BToA => (self.reserve_b, self.reserve_a),
        }
    }
}

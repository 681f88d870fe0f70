//! Pure constant-product math over a reserve snapshot
//!
//! All monetary quantities are integers in the asset's smallest unit, with
//! u128 intermediates. Decimal conversion happens at the presentation
//! boundary, never here. The quote formulas mirror the on-chain program's
//! fee-adjusted `reserve_a * reserve_b = k` relation so client math and
//! contract math cannot diverge.

use crate::error::{Error, Result};

use super::{PoolState, SwapDirection};

/// Basis point denominator (100 bps = 1%)
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Fixed-point scale for spot prices
pub const PRICE_SCALE: u128 = 1_000_000_000;

/// Base slippage recommendation for trades that are tiny relative to depth
const BASE_SLIPPAGE_BPS: u32 = 50;

/// Ceiling for recommended slippage
const MAX_RECOMMENDED_SLIPPAGE_BPS: u32 = 2_500;

/// Quote for an add-liquidity operation
#[derive(Debug, Clone)]
pub struct LiquidityQuote {
    /// Counter-amount of token B that preserves the pool ratio for the
    /// requested amount of token A
    pub optimal_amount_b: u64,
    /// LP tokens minted for the contribution
    pub lp_minted: u64,
    /// Price of A in B, scaled by PRICE_SCALE
    pub spot_price_a_in_b: u128,
    /// Price of B in A, scaled by PRICE_SCALE
    pub spot_price_b_in_a: u128,
    /// Whether the caller's requested slippage bound is satisfiable
    pub slippage_ok: bool,
}

/// Quote for a swap
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub amount_out: u64,
    /// Deviation of the effective execution price from the pre-trade spot
    /// price, in basis points
    pub price_impact_bps: u32,
    /// Spot price of the input token in the output token, scaled
    pub spot_price: u128,
}

fn ensure_reserves(pool: &PoolState) -> Result<()> {
    if pool.reserve_a == 0 || pool.reserve_b == 0 {
        return Err(Error::PoolEmpty(pool.address.clone()));
    }
    Ok(())
}

fn to_u64(value: u128) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::MathOverflow)
}

/// Spot prices in both directions, scaled by PRICE_SCALE
pub fn spot_prices(pool: &PoolState) -> Result<(u128, u128)> {
    ensure_reserves(pool)?;
    let a_in_b = (pool.reserve_b as u128)
        .checked_mul(PRICE_SCALE)
        .ok_or(Error::MathOverflow)?
        / pool.reserve_a as u128;
    let b_in_a = (pool.reserve_a as u128)
        .checked_mul(PRICE_SCALE)
        .ok_or(Error::MathOverflow)?
        / pool.reserve_b as u128;
    Ok((a_in_b, b_in_a))
}

/// Quote a liquidity contribution against the current ratio.
///
/// `amount_b == 0` means "take whatever counter-amount the ratio requires";
/// otherwise the caller's amount_b is checked against the requested
/// slippage bound.
pub fn calculate_liquidity_operation(
    amount_a: u64,
    amount_b: u64,
    pool: &PoolState,
    slippage_bps: u32,
) -> Result<LiquidityQuote> {
    ensure_reserves(pool)?;
    if amount_a == 0 {
        return Err(Error::Validation("liquidity amount must be positive".into()));
    }

    let optimal_b_wide = (amount_a as u128)
        .checked_mul(pool.reserve_b as u128)
        .ok_or(Error::MathOverflow)?
        / pool.reserve_a as u128;
    let optimal_amount_b = to_u64(optimal_b_wide)?;

    let slippage_ok = if amount_b == 0 {
        true
    } else {
        let deviation = (amount_b as u128).abs_diff(optimal_b_wide);
        deviation.checked_mul(BPS_DENOMINATOR).ok_or(Error::MathOverflow)?
            <= optimal_b_wide.saturating_mul(slippage_bps as u128)
    };

    let used_b = if amount_b == 0 { optimal_amount_b } else { amount_b };

    let lp_minted = if pool.lp_supply == 0 {
        // Bootstrapping share for a pool that has reserves but no LP tokens
        let product = (amount_a as u128)
            .checked_mul(used_b as u128)
            .ok_or(Error::MathOverflow)?;
        to_u64(product.isqrt())?
    } else {
        let from_a = (amount_a as u128)
            .checked_mul(pool.lp_supply as u128)
            .ok_or(Error::MathOverflow)?
            / pool.reserve_a as u128;
        let from_b = (used_b as u128)
            .checked_mul(pool.lp_supply as u128)
            .ok_or(Error::MathOverflow)?
            / pool.reserve_b as u128;
        to_u64(from_a.min(from_b))?
    };

    let (spot_price_a_in_b, spot_price_b_in_a) = spot_prices(pool)?;

    Ok(LiquidityQuote {
        optimal_amount_b,
        lp_minted,
        spot_price_a_in_b,
        spot_price_b_in_a,
        slippage_ok,
    })
}

/// Fee-adjusted constant-product swap quote.
///
/// `out = reserve_out * in_after_fee / (reserve_in + in_after_fee)` with the
/// fee kept in the pool, so the constant product never decreases.
pub fn calculate_swap(
    amount_in: u64,
    direction: SwapDirection,
    pool: &PoolState,
) -> Result<SwapQuote> {
    ensure_reserves(pool)?;
    if amount_in == 0 {
        return Err(Error::Validation("swap amount must be positive".into()));
    }

    let (reserve_in, reserve_out) = pool.oriented_reserves(direction);

    let in_after_fee = (amount_in as u128)
        .checked_mul(BPS_DENOMINATOR - pool.fee_bps as u128)
        .ok_or(Error::MathOverflow)?;
    let numerator = (reserve_out as u128)
        .checked_mul(in_after_fee)
        .ok_or(Error::MathOverflow)?;
    let denominator = (reserve_in as u128)
        .checked_mul(BPS_DENOMINATOR)
        .ok_or(Error::MathOverflow)?
        + in_after_fee;
    let amount_out = to_u64(numerator / denominator)?;

    let spot_price = (reserve_out as u128)
        .checked_mul(PRICE_SCALE)
        .ok_or(Error::MathOverflow)?
        / reserve_in as u128;
    let effective_price = (amount_out as u128)
        .checked_mul(PRICE_SCALE)
        .ok_or(Error::MathOverflow)?
        / amount_in as u128;

    let price_impact_bps = if spot_price == 0 {
        0
    } else {
        (spot_price.saturating_sub(effective_price) * BPS_DENOMINATOR / spot_price) as u32
    };

    Ok(SwapQuote {
        amount_out,
        price_impact_bps,
        spot_price,
    })
}

/// Price impact in basis points for a trade of `amount_in`
pub fn calculate_price_impact(
    amount_in: u64,
    direction: SwapDirection,
    pool: &PoolState,
) -> Result<u32> {
    Ok(calculate_swap(amount_in, direction, pool)?.price_impact_bps)
}

/// Recommended slippage bound for a trade.
///
/// Scales upward as trade size grows relative to pool depth, protecting
/// large trades against adverse price movement.
pub fn optimal_slippage_bps(pool: &PoolState, amount_a: u64, amount_b: u64) -> Result<u32> {
    ensure_reserves(pool)?;

    let depth_a = (amount_a as u128)
        .checked_mul(BPS_DENOMINATOR)
        .ok_or(Error::MathOverflow)?
        / pool.reserve_a as u128;
    let depth_b = (amount_b as u128)
        .checked_mul(BPS_DENOMINATOR)
        .ok_or(Error::MathOverflow)?
        / pool.reserve_b as u128;

    let scaled = depth_a.max(depth_b).min(MAX_RECOMMENDED_SLIPPAGE_BPS as u128) as u32;
    Ok((BASE_SLIPPAGE_BPS + scaled).min(MAX_RECOMMENDED_SLIPPAGE_BPS))
}

/// Minimum acceptable output after applying a slippage bound
pub fn min_amount_out_with_slippage(expected_out: u64, slippage_bps: u32) -> u64 {
    let factor = BPS_DENOMINATOR - slippage_bps.min(10_000) as u128;
    ((expected_out as u128 * factor) / BPS_DENOMINATOR) as u64
}

/// Flash loan fee: `amount * fee_bps / 10000`, truncated integer arithmetic
pub fn flash_loan_fee(amount: u64, fee_bps: u16) -> u64 {
    ((amount as u128 * fee_bps as u128) / BPS_DENOMINATOR) as u64
}

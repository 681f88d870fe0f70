//! On-chain program constants and instruction encoding
//!
//! # How discriminators are calculated
//! Anchor uses the first 8 bytes of SHA-256("global:<instruction_name>")
//! as the instruction discriminator. The encoder and the simulation-mode
//! decoder share these constants, so the two can never drift apart.

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

use crate::error::{Error, Result};
use crate::pool::SwapDirection;

fn derived_program_id(name: &str) -> Pubkey {
    let digest: [u8; 32] = Sha256::digest(name.as_bytes()).into();
    Pubkey::new_from_array(digest)
}

lazy_static::lazy_static! {
    /// Staking protocol program ID
    pub static ref STAKING_PROGRAM_ID: Pubkey = derived_program_id("custody-engine:staking");

    /// DEX / liquidity pool program ID
    pub static ref DEX_PROGRAM_ID: Pubkey = derived_program_id("custody-engine:dex");

    /// Flash-loan lending program ID
    pub static ref LENDING_PROGRAM_ID: Pubkey = derived_program_id("custody-engine:lending");

    /// Insurance protocol program ID
    pub static ref INSURANCE_PROGRAM_ID: Pubkey = derived_program_id("custody-engine:insurance");

    /// Governance protocol program ID
    pub static ref GOVERNANCE_PROGRAM_ID: Pubkey = derived_program_id("custody-engine:governance");
}

/// Instruction discriminators (first 8 bytes of instruction data)
/// Calculated as: SHA-256("global:<instruction_name>")[0..8]
#[allow(non_snake_case)]
pub mod DISCRIMINATORS {
    pub const STAKE: [u8; 8] = [206, 176, 202, 18, 200, 209, 179, 108];
    pub const UNSTAKE: [u8; 8] = [90, 95, 107, 42, 205, 124, 50, 225];
    pub const SWAP: [u8; 8] = [248, 198, 158, 145, 225, 117, 135, 200];
    pub const ADD_LIQUIDITY: [u8; 8] = [181, 157, 89, 67, 143, 182, 52, 72];
    pub const REMOVE_LIQUIDITY: [u8; 8] = [80, 85, 209, 72, 24, 206, 177, 108];
    pub const FLASH_BORROW: [u8; 8] = [166, 221, 220, 25, 61, 73, 127, 240];
    pub const FLASH_REPAY: [u8; 8] = [182, 143, 19, 23, 39, 221, 184, 78];
    pub const PURCHASE_POLICY: [u8; 8] = [246, 226, 82, 107, 131, 219, 247, 45];
    pub const FILE_CLAIM: [u8; 8] = [187, 254, 40, 13, 146, 223, 230, 97];
    pub const CAST_VOTE: [u8; 8] = [20, 212, 15, 189, 69, 180, 69, 151];
}

/// Account discriminators (first 8 bytes of account data)
/// Used to identify account types when parsing
#[allow(non_snake_case)]
pub mod ACCOUNT_DISCRIMINATORS {
    /// LiquidityPool account discriminator
    /// SHA-256("account:LiquidityPool")[0..8]
    pub const LIQUIDITY_POOL: [u8; 8] = [66, 38, 17, 64, 188, 80, 68, 129];
}

/// Decoded engine instruction payload.
///
/// Fields are little-endian encoded after the 8-byte discriminator,
/// matching the on-chain programs' account layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionData {
    Stake { amount: u64, duration_days: u32 },
    Unstake,
    Swap { amount_in: u64, min_amount_out: u64, direction: SwapDirection },
    AddLiquidity { amount_a: u64, amount_b: u64, min_lp: u64 },
    RemoveLiquidity { lp_amount: u64 },
    FlashBorrow { amount: u64 },
    FlashRepay { amount: u64 },
    PurchasePolicy { policy_id: u64, premium: u64, duration_days: u32 },
    FileClaim { policy_id: u64, amount: u64 },
    CastVote { proposal_id: u64, in_favor: bool },
}

impl InstructionData {
    /// Serialize to instruction data bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(32);
        match *self {
            InstructionData::Stake {
                amount,
                duration_days,
            } => {
                data.extend_from_slice(&DISCRIMINATORS::STAKE);
                data.extend_from_slice(&amount.to_le_bytes());
                data.extend_from_slice(&duration_days.to_le_bytes());
            }
            InstructionData::Unstake => {
                data.extend_from_slice(&DISCRIMINATORS::UNSTAKE);
            }
            InstructionData::Swap {
                amount_in,
                min_amount_out,
                direction,
            } => {
                data.extend_from_slice(&DISCRIMINATORS::SWAP);
                data.extend_from_slice(&amount_in.to_le_bytes());
                data.extend_from_slice(&min_amount_out.to_le_bytes());
                data.push(match direction {
                    SwapDirection::AToB => 0,
                    SwapDirection::BToA => 1,
                });
            }
            InstructionData::AddLiquidity {
                amount_a,
                amount_b,
                min_lp,
            } => {
                data.extend_from_slice(&DISCRIMINATORS::ADD_LIQUIDITY);
                data.extend_from_slice(&amount_a.to_le_bytes());
                data.extend_from_slice(&amount_b.to_le_bytes());
                data.extend_from_slice(&min_lp.to_le_bytes());
            }
            InstructionData::RemoveLiquidity { lp_amount } => {
                data.extend_from_slice(&DISCRIMINATORS::REMOVE_LIQUIDITY);
                data.extend_from_slice(&lp_amount.to_le_bytes());
            }
            InstructionData::FlashBorrow { amount } => {
                data.extend_from_slice(&DISCRIMINATORS::FLASH_BORROW);
                data.extend_from_slice(&amount.to_le_bytes());
            }
            InstructionData::FlashRepay { amount } => {
                data.extend_from_slice(&DISCRIMINATORS::FLASH_REPAY);
                data.extend_from_slice(&amount.to_le_bytes());
            }
            InstructionData::PurchasePolicy {
                policy_id,
                premium,
                duration_days,
            } => {
                data.extend_from_slice(&DISCRIMINATORS::PURCHASE_POLICY);
                data.extend_from_slice(&policy_id.to_le_bytes());
                data.extend_from_slice(&premium.to_le_bytes());
                data.extend_from_slice(&duration_days.to_le_bytes());
            }
            InstructionData::FileClaim { policy_id, amount } => {
                data.extend_from_slice(&DISCRIMINATORS::FILE_CLAIM);
                data.extend_from_slice(&policy_id.to_le_bytes());
                data.extend_from_slice(&amount.to_le_bytes());
            }
            InstructionData::CastVote {
                proposal_id,
                in_favor,
            } => {
                data.extend_from_slice(&DISCRIMINATORS::CAST_VOTE);
                data.extend_from_slice(&proposal_id.to_le_bytes());
                data.push(in_favor as u8);
            }
        }
        data
    }

    /// Parse instruction data bytes back into a payload
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::TransactionBuild(
                "instruction data too short".to_string(),
            ));
        }
        let disc: [u8; 8] = data[..8].try_into().expect("checked length");
        let rest = &data[8..];

        match disc {
            DISCRIMINATORS::STAKE => Ok(InstructionData::Stake {
                amount: read_u64(rest, 0)?,
                duration_days: read_u32(rest, 8)?,
            }),
            DISCRIMINATORS::UNSTAKE => Ok(InstructionData::Unstake),
            DISCRIMINATORS::SWAP => Ok(InstructionData::Swap {
                amount_in: read_u64(rest, 0)?,
                min_amount_out: read_u64(rest, 8)?,
                direction: match rest.get(16).copied() {
                    Some(0) => SwapDirection::AToB,
                    Some(1) => SwapDirection::BToA,
                    _ => {
                        return Err(Error::TransactionBuild(
                            "invalid swap direction byte".to_string(),
                        ))
                    }
                },
            }),
            DISCRIMINATORS::ADD_LIQUIDITY => Ok(InstructionData::AddLiquidity {
                amount_a: read_u64(rest, 0)?,
                amount_b: read_u64(rest, 8)?,
                min_lp: read_u64(rest, 16)?,
            }),
            DISCRIMINATORS::REMOVE_LIQUIDITY => Ok(InstructionData::RemoveLiquidity {
                lp_amount: read_u64(rest, 0)?,
            }),
            DISCRIMINATORS::FLASH_BORROW => Ok(InstructionData::FlashBorrow {
                amount: read_u64(rest, 0)?,
            }),
            DISCRIMINATORS::FLASH_REPAY => Ok(InstructionData::FlashRepay {
                amount: read_u64(rest, 0)?,
            }),
            DISCRIMINATORS::PURCHASE_POLICY => Ok(InstructionData::PurchasePolicy {
                policy_id: read_u64(rest, 0)?,
                premium: read_u64(rest, 8)?,
                duration_days: read_u32(rest, 16)?,
            }),
            DISCRIMINATORS::FILE_CLAIM => Ok(InstructionData::FileClaim {
                policy_id: read_u64(rest, 0)?,
                amount: read_u64(rest, 8)?,
            }),
            DISCRIMINATORS::CAST_VOTE => Ok(InstructionData::CastVote {
                proposal_id: read_u64(rest, 0)?,
                in_favor: rest.get(8).copied().unwrap_or(0) != 0,
            }),
            other => Err(Error::TransactionBuild(format!(
                "unknown instruction discriminator: {:?}",
                other
            ))),
        }
    }
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .and_then(|s| s.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| Error::TransactionBuild("truncated instruction data".to_string()))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| Error::TransactionBuild("truncated instruction data".to_string()))
}

//! Staking protocol operations

use solana_sdk::instruction::Instruction;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ledger::TxPurpose;

use super::program::{InstructionData, STAKING_PROGRAM_ID};
use super::{EngineContext, OperationResult};

impl EngineContext {
    /// Lock `amount` of the native asset for `duration_days`.
    pub async fn stake(
        &self,
        user_id: &str,
        amount: u64,
        duration_days: u32,
    ) -> Result<OperationResult> {
        if amount == 0 {
            return Err(Error::Validation("stake amount must be positive".into()));
        }
        if duration_days == 0 || duration_days > self.config.orchestrator.max_duration_days {
            return Err(Error::Validation(format!(
                "stake duration must be between 1 and {} days",
                self.config.orchestrator.max_duration_days
            )));
        }

        let keypair = self.custody.get_user_keypair(user_id).await?;
        debug!(user_id, amount, duration_days, "building stake instruction");

        let instruction = Instruction {
            program_id: *STAKING_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, None),
            data: InstructionData::Stake {
                amount,
                duration_days,
            }
            .encode(),
        };

        self.execute(user_id, TxPurpose::Stake, "native", amount, vec![instruction])
            .await
    }

    /// Release the user's staked position.
    pub async fn unstake(&self, user_id: &str) -> Result<OperationResult> {
        let keypair = self.custody.get_user_keypair(user_id).await?;

        let instruction = Instruction {
            program_id: *STAKING_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, None),
            data: InstructionData::Unstake.encode(),
        };

        self.execute(user_id, TxPurpose::Unstake, "native", 0, vec![instruction])
            .await
    }
}

//! Insurance protocol operations

use solana_sdk::instruction::Instruction;

use crate::error::{Error, Result};
use crate::ledger::TxPurpose;

use super::program::{InstructionData, INSURANCE_PROGRAM_ID};
use super::{EngineContext, OperationResult};

impl EngineContext {
    /// Buy a coverage policy, paying `premium` up front.
    pub async fn purchase_policy(
        &self,
        user_id: &str,
        policy_id: u64,
        premium: u64,
        duration_days: u32,
    ) -> Result<OperationResult> {
        if premium == 0 {
            return Err(Error::Validation("premium must be positive".into()));
        }
        if duration_days == 0 || duration_days > self.config.orchestrator.max_duration_days {
            return Err(Error::Validation(format!(
                "policy duration must be between 1 and {} days",
                self.config.orchestrator.max_duration_days
            )));
        }

        let keypair = self.custody.get_user_keypair(user_id).await?;

        let instruction = Instruction {
            program_id: *INSURANCE_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, None),
            data: InstructionData::PurchasePolicy {
                policy_id,
                premium,
                duration_days,
            }
            .encode(),
        };

        self.execute(
            user_id,
            TxPurpose::InsurancePremium,
            "native",
            premium,
            vec![instruction],
        )
        .await
    }

    /// File a claim against an existing policy.
    pub async fn file_claim(
        &self,
        user_id: &str,
        policy_id: u64,
        amount: u64,
    ) -> Result<OperationResult> {
        if amount == 0 {
            return Err(Error::Validation("claim amount must be positive".into()));
        }

        let keypair = self.custody.get_user_keypair(user_id).await?;

        let instruction = Instruction {
            program_id: *INSURANCE_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, None),
            data: InstructionData::FileClaim { policy_id, amount }.encode(),
        };

        self.execute(
            user_id,
            TxPurpose::InsuranceClaim,
            "native",
            amount,
            vec![instruction],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::ledger::{TxLedger, TxPurpose, TxStatus};
    use crate::orchestrator::test_support::simulated_engine;

    #[tokio::test]
    async fn policy_then_claim_are_both_recorded() {
        let (engine, _) = simulated_engine();
        engine.custody.get_or_create_user_wallet("alice").await.unwrap();

        let purchase = engine.purchase_policy("alice", 42, 1_000_000, 365).await.unwrap();
        assert!(purchase.success);

        let claim = engine.file_claim("alice", 42, 500_000).await.unwrap();
        assert!(claim.success);

        let records = engine.ledger.for_user("alice").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == TxStatus::Confirmed));
        assert!(records.iter().any(|r| r.purpose == TxPurpose::InsurancePremium));
        assert!(records.iter().any(|r| r.purpose == TxPurpose::InsuranceClaim));
    }

    #[tokio::test]
    async fn zero_premium_rejected() {
        let (engine, _) = simulated_engine();
        engine.custody.get_or_create_user_wallet("bob").await.unwrap();

        let result = engine.purchase_policy("bob", 1, 0, 30).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn policy_duration_bounded() {
        let (engine, _) = simulated_engine();
        engine.custody.get_or_create_user_wallet("carol").await.unwrap();

        let max = engine.config.orchestrator.max_duration_days;
        let result = engine.purchase_policy("carol", 1, 1_000, max + 1).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}

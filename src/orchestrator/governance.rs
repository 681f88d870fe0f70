//! Governance voting

use solana_sdk::instruction::Instruction;

use crate::error::Result;
use crate::ledger::TxPurpose;

use super::program::{InstructionData, GOVERNANCE_PROGRAM_ID};
use super::{EngineContext, OperationResult};

impl EngineContext {
    /// Cast the user's vote on a proposal.
    pub async fn cast_vote(
        &self,
        user_id: &str,
        proposal_id: u64,
        in_favor: bool,
    ) -> Result<OperationResult> {
        let keypair = self.custody.get_user_keypair(user_id).await?;

        let instruction = Instruction {
            program_id: *GOVERNANCE_PROGRAM_ID,
            accounts: Self::protocol_accounts(&keypair, None),
            data: InstructionData::CastVote {
                proposal_id,
                in_favor,
            }
            .encode(),
        };

        self.execute(
            user_id,
            TxPurpose::DaoVote,
            "native",
            0,
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
    async fn vote_confirms_and_records() {
        let (engine, _) = simulated_engine();
        engine.custody.get_or_create_user_wallet("alice").await.unwrap();

        let result = engine.cast_vote("alice", 7, true).await.unwrap();
        assert!(result.success);

        let records = engine.ledger.for_user("alice").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].purpose, TxPurpose::DaoVote);
        assert_eq!(records[0].status, TxStatus::Confirmed);
    }

    #[tokio::test]
    async fn vote_without_wallet_fails() {
        let (engine, _) = simulated_engine();
        let result = engine.cast_vote("nobody", 7, false).await;
        assert!(matches!(result, Err(Error::WalletNotFound(_))));
    }
}

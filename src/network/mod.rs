//! Network submission and queries behind a single seam
//!
//! One interface, two implementations: a real RPC path with a sponsor fee
//! payer, and a deterministic simulation with the identical return contract.
//! The mode is selected once at startup from configuration - nothing
//! downstream branches on it per call.

mod rpc;
mod simulated;

pub use rpc::RpcNetworkClient;
pub use simulated::SimulatedNetwork;

use async_trait::async_trait;
use solana_sdk::instruction::Instruction;
use solana_sdk::signature::{Keypair, Signature};

use crate::error::Result;
use crate::pool::PoolState;

/// Which submission path the engine runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Sponsor keypair signs and pays fees; transactions hit a real cluster
    Real,
    /// Deterministic in-process execution with synthetic signatures
    Simulated,
}

/// Result of waiting for a transaction to land
#[derive(Debug, Clone)]
pub enum ConfirmationOutcome {
    Confirmed {
        slot: u64,
        block_time: Option<i64>,
    },
    /// The transaction landed and failed; the reason comes from the cluster
    Failed(String),
}

/// An inbound transfer discovered while scanning a custodial address
#[derive(Debug, Clone)]
pub struct InboundTransfer {
    pub signature: String,
    pub amount: u64,
    pub slot: u64,
    pub block_time: Option<i64>,
}

/// Network seam used by the orchestrators and the deposit monitor.
///
/// Submission is never implicitly retried; `fetch_pool` is an idempotent
/// read and may be retried transparently by the implementation.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Sign and submit one atomic transaction containing `instructions`.
    ///
    /// The user keypair co-signs; in real mode the sponsor pays fees.
    async fn submit(&self, instructions: &[Instruction], user: &Keypair) -> Result<Signature>;

    /// Wait for the signature to reach a commitment, bounded by
    /// `timeout_ms`. A timeout surfaces as `Error::Unconfirmed`.
    async fn confirm(
        &self,
        signature: &Signature,
        timeout_ms: u64,
        poll_interval_ms: u64,
    ) -> Result<ConfirmationOutcome>;

    /// Fetch and decode a pool account. Idempotent; retried on transient
    /// faults.
    async fn fetch_pool(&self, address: &str) -> Result<Option<PoolState>>;

    /// Latest slot, used to measure confirmation depth of landed
    /// transactions.
    async fn current_slot(&self) -> Result<u64>;

    /// Signatures of inbound transfers to `address`, oldest first, newer
    /// than `until_signature` when given.
    async fn transfers_to_address(
        &self,
        address: &str,
        until_signature: Option<&str>,
        limit: usize,
    ) -> Result<Vec<InboundTransfer>>;
}

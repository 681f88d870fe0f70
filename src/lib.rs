//! Custodial DeFi Engine Library
//!
//! Custody of per-user wallets with encrypted key material, constant-product
//! pool math, per-protocol transaction orchestration, and deposit
//! reconciliation against custodial addresses.

pub mod config;
pub mod custody;
pub mod error;
pub mod ledger;
pub mod monitor;
pub mod network;
pub mod orchestrator;
pub mod pool;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use orchestrator::{EngineContext, OperationResult};

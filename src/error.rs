//! Error types for the custody engine

use serde::Serialize;
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the custody engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    // Caller errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Custody errors
    #[error("Wallet not found for user: {0}")]
    WalletNotFound(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Malformed encrypted key: {0}")]
    MalformedKey(String),

    // Pool math errors
    #[error("Pool {0} has empty reserves")]
    PoolEmpty(String),

    #[error("Pool math overflow")]
    MathOverflow,

    #[error("Slippage exceeded: requested {requested_bps}bps, trade requires {required_bps}bps")]
    SlippageExceeded {
        requested_bps: u32,
        required_bps: u32,
    },

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    // Transaction errors
    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    #[error("Transaction failed on-chain: {0}")]
    TransactionFailed(String),

    #[error("Transaction {signature} unconfirmed after {timeout_ms}ms")]
    Unconfirmed { signature: String, timeout_ms: u64 },

    // Ledger errors
    #[error("Duplicate signature in ledger: {0}")]
    DuplicateSignature(String),

    #[error("Invalid status transition: {0}")]
    LedgerState(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Client-facing failure taxonomy.
///
/// Every orchestrator operation maps its error into one of these kinds so
/// callers can decide whether to retry, resubmit with new bounds, or poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input or business-constraint violation. Never retried.
    Validation,
    /// No custodial wallet exists for the user.
    WalletNotFound,
    /// Key material could not be decrypted. Fatal for the call.
    Decryption,
    /// Stored encrypted-key envelope is structurally invalid.
    MalformedKey,
    /// Pool has zero reserves; no quote is defined.
    PoolEmpty,
    /// Requested slippage bound is not achievable; resubmit with new bounds.
    SlippageExceeded,
    /// Transient RPC/network fault. Caller may retry the whole step.
    Retryable,
    /// Non-transient failure (signing, build, on-chain abort).
    Fatal,
    /// Timed out waiting for confirmation. Status unknown - poll, do not assume.
    Unconfirmed,
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Rpc(_) | Error::TransactionSend(_))
    }

    /// Map this error into the client-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::WalletNotFound(_) => ErrorKind::WalletNotFound,
            Error::Decryption(_) => ErrorKind::Decryption,
            Error::MalformedKey(_) => ErrorKind::MalformedKey,
            Error::PoolEmpty(_) => ErrorKind::PoolEmpty,
            Error::SlippageExceeded { .. } => ErrorKind::SlippageExceeded,
            Error::Unconfirmed { .. } => ErrorKind::Unconfirmed,
            e if e.is_retryable() => ErrorKind::Retryable,
            _ => ErrorKind::Fatal,
        }
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Rpc("connection reset".into()).is_retryable());
        assert!(Error::TransactionSend("socket closed".into()).is_retryable());
        assert!(!Error::Validation("negative amount".into()).is_retryable());
        assert!(!Error::Decryption("tag mismatch".into()).is_retryable());
    }

    #[test]
    fn kind_mapping() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::Rpc("x".into()).kind(), ErrorKind::Retryable);
        assert_eq!(
            Error::Unconfirmed {
                signature: "abc".into(),
                timeout_ms: 30000
            }
            .kind(),
            ErrorKind::Unconfirmed
        );
        assert_eq!(
            Error::TransactionFailed("aborted".into()).kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SlippageExceeded).unwrap();
        assert_eq!(json, r#""slippage_exceeded""#);
    }
}

//! Error taxonomy for the ticket buyer
//!
//! Every I/O-facing component returns [`TicketBuyerError`]; only the purchase
//! controller turns an error's [`ErrorClass`] into a retry, skip, or stop.

use crate::address::AddressError;
use crate::types::{Amount, TxHash};
use thiserror::Error;

/// JSON-RPC code a backend returns while it is still starting up
pub const RPC_IN_WARMUP: i64 = -28;

pub type TicketBuyerResult<T> = Result<T, TicketBuyerError>;

#[derive(Error, Debug, Clone)]
pub enum TicketBuyerError {
    /// Network level failure reaching a backend
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// The backend answered with a JSON-RPC error object
    #[error("RPC error {code} from {method}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    /// Response could not be decoded into the expected shape
    #[error("Malformed {method} response: {reason}")]
    MalformedResponse { method: String, reason: String },

    #[error("Invalid ticket price {0} reported by node")]
    InvalidTicketPrice(Amount),

    #[error("Mempool ticket {hash} is malformed: {reason}")]
    MalformedTicket { hash: TxHash, reason: String },

    #[error("Mempool ticket {hash} pays to undecodable address: {source}")]
    TicketAddress {
        hash: TxHash,
        #[source]
        source: AddressError,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Shutdown requested")]
    ShutdownRequested,
}

/// How the controller reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry later in the same tick, with backoff
    Transient,
    /// Bad data from a backend; skip the round, do not retry
    DataIntegrity,
    /// A backend refused the request; skip the round, do not retry
    Rejected,
    /// Purchaser cannot run
    Fatal,
    Shutdown,
}

impl TicketBuyerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => ErrorClass::Transient,
            Self::Rpc { code, .. } if *code == RPC_IN_WARMUP => ErrorClass::Transient,
            Self::Rpc { .. } => ErrorClass::Rejected,
            Self::MalformedResponse { .. }
            | Self::InvalidTicketPrice(_)
            | Self::MalformedTicket { .. }
            | Self::TicketAddress { .. } => ErrorClass::DataIntegrity,
            Self::Configuration(_) => ErrorClass::Fatal,
            Self::ShutdownRequested => ErrorClass::Shutdown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let timeout = TicketBuyerError::Timeout {
            endpoint: "node".into(),
            timeout_ms: 5000,
        };
        assert!(timeout.is_retryable());

        let warmup = TicketBuyerError::Rpc {
            method: "getstakeinfo".into(),
            code: RPC_IN_WARMUP,
            message: "loading block index".into(),
        };
        assert!(warmup.is_retryable());

        let refused = TicketBuyerError::Rpc {
            method: "purchaseticket".into(),
            code: -4,
            message: "insufficient funds".into(),
        };
        assert_eq!(refused.class(), ErrorClass::Rejected);

        assert_eq!(
            TicketBuyerError::InvalidTicketPrice(Amount::ZERO).class(),
            ErrorClass::DataIntegrity
        );
        assert_eq!(
            TicketBuyerError::Configuration("bad".into()).class(),
            ErrorClass::Fatal
        );
    }
}

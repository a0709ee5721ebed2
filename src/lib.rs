//! Ticketbuyer - automated stake ticket purchasing
//!
//! The purchasing engine lives in [`ticket_buyer`]; [`rpc`] adapts it to a
//! JSON-RPC full node and wallet backend.

pub mod address;
pub mod config;
pub mod endpoints;
pub mod errors;
pub mod metrics;
pub mod notifier;
pub mod observability;
pub mod rpc;
pub mod shutdown;
pub mod structured_logging;
pub mod test_utils;
pub mod ticket_buyer;
pub mod types;

// Re-export commonly used types
pub use errors::{ErrorClass, TicketBuyerError, TicketBuyerResult};
pub use ticket_buyer::{PurchaseConfig, PurchaseController};
pub use types::{Amount, BlockStamp, TxHash};

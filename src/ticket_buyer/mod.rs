//! Automated ticket purchasing
//!
//! One [`PurchaseController`] per purchaser instance runs a sequential round on
//! every new block:
//!
//! 1. **Resolve**: read ticket price, spendable balance, and how many of our
//!    own tickets are still unconfirmed ([`MempoolOwnershipResolver`]).
//! 2. **Decide**: the pure [`decide`] function turns those reads plus session
//!    counters into a [`PurchaseDecision`].
//! 3. **Purchase**: [`PurchaseExecutor`] buys tickets one by one and reports
//!    partial success precisely.
//!
//! Transient RPC failures put the controller in a bounded `Backoff` state
//! driven by the same event loop as block ticks, so retries stay cancellable.

pub mod controller;
pub mod executor;
pub mod limiter;
pub mod ownership;

pub use controller::{
    ControllerSettings, ControllerState, ControllerStatus, PurchaseController, RoundOutcome,
    RoundState, SessionState, SkipReason,
};
pub use executor::{ExecutionReport, PurchaseExecutor};
pub use limiter::{decide, Constraint, DecisionInputs, PriceWindow, PurchaseDecision};
pub use ownership::{MempoolOwnershipResolver, OwnershipStrategy, StakeInfoRetry};

use crate::address::Address;
use crate::errors::{TicketBuyerError, TicketBuyerResult};
use crate::types::Amount;

/// Operator-controlled purchasing limits.
/// Set at startup; only explicit operator commands change it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseConfig {
    /// Third-party address that receives voting rights. When set, ownership
    /// of mempool tickets is established by scanning the mempool.
    pub voting_address: Option<Address>,
    /// Upper bound on our unconfirmed tickets per block; `0` disables buying
    pub max_per_block: u32,
    /// Maximum fee per ticket; also the tolerance above the average price
    pub max_fee: Amount,
    /// Cumulative spend ceiling for this session
    pub spend_limit: Amount,
    /// Balance that is never spent
    pub min_balance: Amount,
    /// Number of blocks in the ticket price average; `0` disables the price bound
    pub price_average_window: usize,
}

impl PurchaseConfig {
    pub fn validate(&self) -> TicketBuyerResult<()> {
        if self.spend_limit < Amount::ZERO {
            return Err(TicketBuyerError::Configuration(format!(
                "spend limit must not be negative (got {})",
                self.spend_limit
            )));
        }
        if self.max_fee < Amount::ZERO {
            return Err(TicketBuyerError::Configuration(format!(
                "max fee must not be negative (got {})",
                self.max_fee
            )));
        }
        if self.min_balance < Amount::ZERO {
            return Err(TicketBuyerError::Configuration(format!(
                "min balance must not be negative (got {})",
                self.min_balance
            )));
        }
        Ok(())
    }

    pub fn ownership_strategy(&self) -> OwnershipStrategy {
        match &self.voting_address {
            Some(addr) => OwnershipStrategy::AddressScan(addr.clone()),
            None => OwnershipStrategy::WalletNative,
        }
    }
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            voting_address: None,
            max_per_block: 5,
            max_fee: Amount::from_atoms(10_000_000), // 0.1 coin
            spend_limit: Amount::ZERO,
            min_balance: Amount::ZERO,
            price_average_window: 0,
        }
    }
}

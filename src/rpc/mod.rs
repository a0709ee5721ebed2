//! RPC collaborators
//!
//! The purchase engine only sees the two facades below. Concrete JSON-RPC
//! implementations live in [`node`] and [`wallet`]; [`simulated`] wraps a real
//! wallet for dry runs.

use async_trait::async_trait;

use crate::errors::TicketBuyerResult;
use crate::types::{Amount, BlockStamp, StakeInfo, TicketFeeInfo, TxHash, VerboseTransaction};

// Submodules
pub mod client;
pub mod node;
pub mod simulated;
pub mod wallet;

// Re-exports for convenience
pub use client::{JsonRpcClient, RpcEndpoint};
pub use node::NodeRpc;
pub use simulated::SimulatedWallet;
pub use wallet::WalletRpc;

/// Read-only view of the full node. Must tolerate concurrent calls.
#[async_trait]
pub trait ChainQuery: Send + Sync + std::fmt::Debug {
    /// Hashes of all ticket purchases currently in the mempool
    async fn list_mempool_ticket_hashes(&self) -> TicketBuyerResult<Vec<TxHash>>;

    async fn get_raw_transaction_verbose(
        &self,
        hash: &TxHash,
    ) -> TicketBuyerResult<VerboseTransaction>;

    async fn get_ticket_fee_info_mempool(&self) -> TicketBuyerResult<TicketFeeInfo>;

    async fn get_best_block(&self) -> TicketBuyerResult<BlockStamp>;

    /// Current network ticket price
    async fn get_stake_difficulty(&self) -> TicketBuyerResult<Amount>;
}

/// View of the wallet backend. The backend serializes mutating calls.
#[async_trait]
pub trait WalletQuery: Send + Sync + std::fmt::Debug {
    /// Stake counters; may be stale for a short while after a new block
    async fn get_stake_info(&self) -> TicketBuyerResult<StakeInfo>;

    async fn get_spendable_balance(&self) -> TicketBuyerResult<Amount>;

    /// Construct, sign, and broadcast a single ticket purchase paying at most
    /// `price_ceiling` for the ticket and `fee_limit` in fees
    async fn purchase_ticket(
        &self,
        price_ceiling: Amount,
        fee_limit: Amount,
    ) -> TicketBuyerResult<TxHash>;
}

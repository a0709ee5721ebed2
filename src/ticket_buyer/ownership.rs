//! Counting our own unconfirmed tickets

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, instrument, trace};

use crate::address::Address;
use crate::errors::{TicketBuyerError, TicketBuyerResult};
use crate::rpc::{ChainQuery, WalletQuery};
use crate::shutdown;

/// How mempool tickets are attributed to us. Chosen once, from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipStrategy {
    /// Tickets pay voting rights to a possibly foreign address (stake pool).
    /// Every mempool ticket is fetched and its payout script hash compared.
    AddressScan(Address),
    /// Tickets are wallet-native; trust the wallet's own mempool counter.
    WalletNative,
}

impl fmt::Display for OwnershipStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressScan(addr) => write!(f, "address-scan({})", addr),
            Self::WalletNative => f.write_str("wallet-native"),
        }
    }
}

/// Retry policy for the wallet-native counter, which lags briefly after a
/// new block while the wallet reindexes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeInfoRetry {
    /// Total attempts, first one included
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for StakeInfoRetry {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub struct MempoolOwnershipResolver {
    strategy: OwnershipStrategy,
    retry: StakeInfoRetry,
    shutdown: Option<watch::Receiver<bool>>,
}

impl MempoolOwnershipResolver {
    pub fn new(strategy: OwnershipStrategy, retry: StakeInfoRetry) -> Self {
        Self {
            strategy,
            retry,
            shutdown: None,
        }
    }

    /// Make the wallet-native retry wait interruptible by shutdown
    pub fn set_shutdown(&mut self, rx: watch::Receiver<bool>) {
        self.shutdown = Some(rx);
    }

    pub fn strategy(&self) -> &OwnershipStrategy {
        &self.strategy
    }

    /// Number of our tickets currently in the mempool. Never a partial count:
    /// any failed lookup fails the whole call.
    #[instrument(skip_all, fields(strategy = %self.strategy))]
    pub async fn owned_ticket_count(
        &self,
        chain: &dyn ChainQuery,
        wallet: &dyn WalletQuery,
    ) -> TicketBuyerResult<u32> {
        match &self.strategy {
            OwnershipStrategy::AddressScan(voting) => self.scan_mempool(voting, chain).await,
            OwnershipStrategy::WalletNative => self.wallet_native(wallet).await,
        }
    }

    /// Tickets in the mempool regardless of owner
    pub async fn all_tickets_in_mempool(&self, chain: &dyn ChainQuery) -> TicketBuyerResult<u32> {
        Ok(chain.get_ticket_fee_info_mempool().await?.number)
    }

    async fn scan_mempool(&self, voting: &Address, chain: &dyn ChainQuery) -> TicketBuyerResult<u32> {
        let hashes = chain.list_mempool_ticket_hashes().await?;
        let mut owned = 0u32;

        for hash in &hashes {
            let tx = chain.get_raw_transaction_verbose(hash).await?;
            let ticket = tx.ticket_ref().ok_or_else(|| TicketBuyerError::MalformedTicket {
                hash: *hash,
                reason: "voting output has no payout address".to_string(),
            })?;
            let payout = Address::decode(&ticket.address).map_err(|source| {
                TicketBuyerError::TicketAddress {
                    hash: *hash,
                    source,
                }
            })?;
            if payout.script_address() == voting.script_address() {
                owned += 1;
            }
        }

        debug!(scanned = hashes.len(), owned, "Mempool scan complete");
        Ok(owned)
    }

    async fn wallet_native(&self, wallet: &dyn WalletQuery) -> TicketBuyerResult<u32> {
        let attempt = AtomicU32::new(0);
        let retries = FixedInterval::new(self.retry.delay)
            .take(self.retry.attempts.saturating_sub(1) as usize);

        let fetch = Retry::spawn(retries, || {
            let n = attempt.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                wallet.get_stake_info().await.inspect_err(|e| {
                    trace!(attempt = n, error = %e, "Stake info not available yet");
                })
            }
        });

        let info = match &self.shutdown {
            Some(rx) => {
                let mut rx = rx.clone();
                tokio::select! {
                    res = fetch => res?,
                    _ = shutdown::requested(&mut rx) => {
                        return Err(TicketBuyerError::ShutdownRequested);
                    }
                }
            }
            None => fetch.await?,
        };

        debug!(
            attempts = attempt.load(Ordering::Relaxed),
            owned = info.own_mempool_tickets,
            "Stake info fetched"
        );
        Ok(info.own_mempool_tickets)
    }
}

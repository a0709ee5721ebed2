//! Dry-run wallet: real reads, fabricated purchases

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use super::WalletQuery;
use crate::errors::TicketBuyerResult;
use crate::types::{Amount, StakeInfo, TxHash};

/// Wraps a real wallet. Balance and stake reads go to the backend, with the
/// simulated spend deducted from the balance; purchases are never broadcast.
#[derive(Debug)]
pub struct SimulatedWallet {
    inner: Arc<dyn WalletQuery>,
    simulated_spend: AtomicI64,
    simulated_tickets: AtomicU64,
}

impl SimulatedWallet {
    pub fn new(inner: Arc<dyn WalletQuery>) -> Self {
        Self {
            inner,
            simulated_spend: AtomicI64::new(0),
            simulated_tickets: AtomicU64::new(0),
        }
    }

    pub fn simulated_tickets(&self) -> u64 {
        self.simulated_tickets.load(Ordering::Relaxed)
    }

    pub fn simulated_spend(&self) -> Amount {
        Amount(self.simulated_spend.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl WalletQuery for SimulatedWallet {
    async fn get_stake_info(&self) -> TicketBuyerResult<StakeInfo> {
        self.inner.get_stake_info().await
    }

    async fn get_spendable_balance(&self) -> TicketBuyerResult<Amount> {
        let balance = self.inner.get_spendable_balance().await?;
        Ok(balance - self.simulated_spend())
    }

    async fn purchase_ticket(
        &self,
        price_ceiling: Amount,
        fee_limit: Amount,
    ) -> TicketBuyerResult<TxHash> {
        let digest = Sha256::digest(Uuid::new_v4().as_bytes());
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        let hash = TxHash(hash);

        self.simulated_spend
            .fetch_add(price_ceiling.atoms(), Ordering::Relaxed);
        let n = self.simulated_tickets.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            %hash,
            price = %price_ceiling,
            fee_limit = %fee_limit,
            simulated_total = n,
            "Simulated ticket purchase (not broadcast)"
        );
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockWallet;

    #[tokio::test]
    async fn test_simulated_purchase_deducts_balance_without_broadcast() {
        let backend = Arc::new(MockWallet::new(Amount(10_000)));
        let sim = SimulatedWallet::new(backend.clone());

        let a = sim.purchase_ticket(Amount(100), Amount(1)).await.unwrap();
        let b = sim.purchase_ticket(Amount(100), Amount(1)).await.unwrap();
        assert_ne!(a, b);

        assert_eq!(sim.get_spendable_balance().await.unwrap(), Amount(9_800));
        assert_eq!(sim.simulated_tickets(), 2);
        assert_eq!(backend.purchase_calls(), 0);
    }
}

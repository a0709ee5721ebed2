//! Ticket purchase execution

use tracing::{debug, instrument, warn};

use super::PurchaseDecision;
use crate::errors::TicketBuyerError;
use crate::metrics::{metrics, Timer};
use crate::rpc::WalletQuery;
use crate::types::{Amount, TxHash};

/// What actually happened when a decision was executed.
///
/// Each ticket is an independent transaction, so a failure part-way through
/// leaves the earlier purchases in place; they are reported, never rolled back.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub requested: u32,
    pub purchased: u32,
    pub tx_hashes: Vec<TxHash>,
    /// First failure; purchasing stops there
    pub error: Option<TicketBuyerError>,
}

impl ExecutionReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.purchased == self.requested
    }

    pub fn is_partial(&self) -> bool {
        self.purchased > 0 && self.purchased < self.requested
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseExecutor {
    fee_limit: Amount,
}

impl PurchaseExecutor {
    pub fn new(fee_limit: Amount) -> Self {
        Self { fee_limit }
    }

    /// Buy `decision.count` tickets one at a time at or below the decision's
    /// price ceiling. Stops at the first failure.
    #[instrument(skip_all, fields(count = decision.count, price_ceiling = %decision.price_ceiling))]
    pub async fn execute(
        &self,
        decision: &PurchaseDecision,
        wallet: &dyn WalletQuery,
    ) -> ExecutionReport {
        let mut report = ExecutionReport {
            requested: decision.count,
            tx_hashes: Vec::with_capacity(decision.count as usize),
            ..Default::default()
        };

        for n in 1..=decision.count {
            let timer = Timer::with_name("purchase_latency_seconds");
            match wallet
                .purchase_ticket(decision.price_ceiling, self.fee_limit)
                .await
            {
                Ok(hash) => {
                    timer.finish();
                    metrics().tickets_purchased.inc();
                    debug!(ticket = n, %hash, "Ticket purchased");
                    report.purchased += 1;
                    report.tx_hashes.push(hash);
                }
                Err(e) => {
                    timer.finish();
                    metrics().purchase_failures.inc();
                    warn!(
                        ticket = n,
                        of = decision.count,
                        purchased = report.purchased,
                        error = %e,
                        "Ticket purchase failed; stopping batch"
                    );
                    report.error = Some(e);
                    break;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{timeout_error, MockWallet};
    use crate::ticket_buyer::Constraint;

    fn decision(count: u32) -> PurchaseDecision {
        PurchaseDecision {
            count,
            price_ceiling: Amount(100),
            constraint: Constraint::PerBlockCap,
        }
    }

    #[tokio::test]
    async fn test_full_batch() {
        let wallet = MockWallet::new(Amount(10_000));
        let report = PurchaseExecutor::new(Amount(7))
            .execute(&decision(3), &wallet)
            .await;

        assert!(report.is_complete());
        assert_eq!(report.purchased, 3);
        assert_eq!(report.tx_hashes.len(), 3);
        assert_eq!(wallet.purchases(), vec![(Amount(100), Amount(7)); 3]);
    }

    #[tokio::test]
    async fn test_partial_batch_reports_successes_and_first_error() {
        let wallet = MockWallet::new(Amount(10_000));
        wallet.fail_purchase_at(4, timeout_error());

        let report = PurchaseExecutor::new(Amount(7))
            .execute(&decision(5), &wallet)
            .await;

        assert_eq!(report.requested, 5);
        assert_eq!(report.purchased, 3);
        assert_eq!(report.tx_hashes.len(), 3);
        assert!(report.error.is_some());
        assert!(report.is_partial());
        assert!(!report.is_complete());
        // ticket 5 is never attempted
        assert_eq!(wallet.purchase_calls(), 4);
    }

    #[tokio::test]
    async fn test_zero_count_makes_no_calls() {
        let wallet = MockWallet::new(Amount(10_000));
        let report = PurchaseExecutor::new(Amount(7))
            .execute(&decision(0), &wallet)
            .await;
        assert_eq!(report.purchased, 0);
        assert!(report.error.is_none());
        assert_eq!(wallet.purchase_calls(), 0);
    }
}

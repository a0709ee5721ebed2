//! Per-block purchase control loop

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument};

use super::{
    decide, Constraint, DecisionInputs, ExecutionReport, MempoolOwnershipResolver,
    PriceWindow, PurchaseConfig, PurchaseDecision, PurchaseExecutor, StakeInfoRetry,
};
use crate::errors::{ErrorClass, TicketBuyerError, TicketBuyerResult};
use crate::metrics::{metrics, Timer};
use crate::observability::CorrelationId;
use crate::rpc::{ChainQuery, WalletQuery};
use crate::shutdown;
use crate::structured_logging::RoundLogger;
use crate::types::{Amount, BlockStamp, TxHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Resolving,
    Deciding,
    Purchasing,
    /// Waiting to retry the current round after a transient failure
    Backoff {
        /// Attempts already made this round
        attempt: u32,
        next_attempt_at: Instant,
    },
}

impl ControllerState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Deciding => "deciding",
            Self::Purchasing => "purchasing",
            Self::Backoff { .. } => "backoff",
        }
    }
}

/// Retry policy around a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Attempts per block, first one included
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub stake_info_retry: StakeInfoRetry,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            stake_info_retry: StakeInfoRetry::default(),
        }
    }
}

/// Counters accumulated over the controller's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub tickets_purchased: u64,
    pub amount_spent: Amount,
    pub rounds: u64,
    pub rounds_skipped: u64,
}

/// Transient state of the round for one block. Survives retries of that
/// block and is dropped when the round finishes.
#[derive(Debug, Clone)]
pub struct RoundState {
    pub id: CorrelationId,
    pub block: BlockStamp,
    pub owned_in_mempool: u32,
    pub all_in_mempool: Option<u32>,
    pub tickets_purchased_this_round: u32,
    pub tx_hashes: Vec<TxHash>,
    pub attempts: u32,
    pub last_error: Option<TicketBuyerError>,
    pub errors: Vec<String>,
    logger: RoundLogger,
}

impl RoundState {
    fn new(block: BlockStamp) -> Self {
        let id = CorrelationId::new();
        Self {
            logger: RoundLogger::new(id.clone()),
            id,
            block,
            owned_in_mempool: 0,
            all_in_mempool: None,
            tickets_purchased_this_round: 0,
            tx_hashes: Vec::new(),
            attempts: 0,
            last_error: None,
            errors: Vec::new(),
        }
    }
}

/// Why a round ended without (further) purchases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Decision(Constraint),
    DataIntegrity,
    Rejected,
    RetriesExhausted,
    /// A newer block arrived while the round was waiting to retry
    Superseded,
    Shutdown,
    Fatal,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decision(c) => write!(f, "decision: {:?}", c),
            Self::DataIntegrity => f.write_str("data integrity anomaly"),
            Self::Rejected => f.write_str("request rejected"),
            Self::RetriesExhausted => f.write_str("retries exhausted"),
            Self::Superseded => f.write_str("superseded by newer block"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::Fatal => f.write_str("fatal error"),
        }
    }
}

/// Summary of a finished round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundOutcome {
    pub id: CorrelationId,
    pub block: BlockStamp,
    pub purchased: u32,
    pub tx_hashes: Vec<TxHash>,
    pub owned_in_mempool: u32,
    /// Network-wide mempool ticket count, when it could be read
    pub all_in_mempool: Option<u32>,
    pub skipped: bool,
    pub reason: Option<SkipReason>,
    pub errors: Vec<String>,
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

/// Snapshot published after every state-relevant change
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerStatus {
    pub state: &'static str,
    pub session: SessionState,
    pub last_round: Option<RoundOutcome>,
}

pub struct PurchaseController {
    config: PurchaseConfig,
    settings: ControllerSettings,
    chain: Arc<dyn ChainQuery>,
    wallet: Arc<dyn WalletQuery>,
    resolver: MempoolOwnershipResolver,
    executor: PurchaseExecutor,
    prices: PriceWindow,
    state: ControllerState,
    session: SessionState,
    round: Option<RoundState>,
    last_block: Option<BlockStamp>,
    status: watch::Sender<ControllerStatus>,
}

impl PurchaseController {
    /// Fails with a configuration error if the limits are invalid; such a
    /// controller never starts.
    pub fn new(
        config: PurchaseConfig,
        settings: ControllerSettings,
        chain: Arc<dyn ChainQuery>,
        wallet: Arc<dyn WalletQuery>,
    ) -> TicketBuyerResult<Self> {
        config.validate()?;
        if settings.max_attempts == 0 {
            return Err(TicketBuyerError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if settings.stake_info_retry.attempts == 0 {
            return Err(TicketBuyerError::Configuration(
                "stake_info_attempts must be at least 1".to_string(),
            ));
        }

        let (status, _) = watch::channel(ControllerStatus {
            state: ControllerState::Idle.name(),
            ..Default::default()
        });

        Ok(Self {
            resolver: MempoolOwnershipResolver::new(
                config.ownership_strategy(),
                settings.stake_info_retry,
            ),
            executor: PurchaseExecutor::new(config.max_fee),
            prices: PriceWindow::new(config.price_average_window),
            config,
            settings,
            chain,
            wallet,
            state: ControllerState::Idle,
            session: SessionState::default(),
            round: None,
            last_block: None,
            status,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn config(&self) -> &PurchaseConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status.subscribe()
    }

    /// Drive rounds from block notifications until shutdown, or until the
    /// block stream closes and no retry is pending. Returns the session totals.
    pub async fn run(
        mut self,
        mut blocks: mpsc::Receiver<BlockStamp>,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionState {
        self.resolver.set_shutdown(shutdown.clone());
        info!(
            strategy = %self.resolver.strategy(),
            max_per_block = self.config.max_per_block,
            spend_limit = %self.config.spend_limit,
            min_balance = %self.config.min_balance,
            max_attempts = self.settings.max_attempts,
            "Ticket buyer started"
        );

        let mut blocks_open = true;
        loop {
            let retry_at = self.retry_at();
            if !blocks_open && retry_at.is_none() {
                info!("Block notifications ended");
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown::requested(&mut shutdown) => {
                    if let Some(round) = self.round.take() {
                        self.finish(round, Some(SkipReason::Shutdown));
                    }
                    info!("Shutdown requested, ticket buyer stopping");
                    break;
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.on_retry_timer().await;
                }
                block = blocks.recv(), if blocks_open => match block {
                    Some(block) => {
                        self.on_block(block).await;
                    }
                    None => blocks_open = false,
                },
            }
        }

        info!(
            tickets_purchased = self.session.tickets_purchased,
            amount_spent = %self.session.amount_spent,
            rounds = self.session.rounds,
            "Ticket buyer stopped"
        );
        self.session
    }

    /// Start a round for `block`. A round still waiting to retry an older
    /// block is abandoned first. Returns the outcome if the round finished
    /// without entering backoff.
    #[instrument(skip(self), fields(height = block.height))]
    pub async fn on_block(&mut self, block: BlockStamp) -> Option<RoundOutcome> {
        if self.last_block.map(|b| b.hash) == Some(block.hash) {
            debug!(block = %block, "Block already handled");
            return None;
        }
        if let Some(round) = self.round.take() {
            self.finish(round, Some(SkipReason::Superseded));
        }

        self.last_block = Some(block);
        self.round = Some(RoundState::new(block));
        self.attempt().await
    }

    /// Retry the pending round. No-op unless in backoff.
    pub async fn on_retry_timer(&mut self) -> Option<RoundOutcome> {
        if !matches!(self.state, ControllerState::Backoff { .. }) {
            return None;
        }
        metrics().backoff_retries.inc();
        self.attempt().await
    }

    fn retry_at(&self) -> Option<Instant> {
        match self.state {
            ControllerState::Backoff {
                next_attempt_at, ..
            } => Some(next_attempt_at),
            _ => None,
        }
    }

    async fn attempt(&mut self) -> Option<RoundOutcome> {
        let mut round = self.round.take()?;
        round.attempts += 1;
        round.logger.log_round_start(&round.block, round.attempts);

        let timer = Timer::with_name("round_latency_seconds");
        let result = self.run_pipeline(&mut round).await;
        timer.finish();

        match result {
            Ok(reason) => Some(self.finish(round, reason)),
            Err(err) => self.handle_failure(round, err),
        }
    }

    /// Resolve, decide, purchase. `Ok(Some(_))` means the decision was to
    /// buy nothing.
    async fn run_pipeline(&mut self, round: &mut RoundState) -> TicketBuyerResult<Option<SkipReason>> {
        self.state = ControllerState::Resolving;
        let inputs = self.resolve(round).await?;

        self.state = ControllerState::Deciding;
        let decision = decide(&self.config, &inputs);
        round.logger.log_decision(&decision);
        if !decision.is_purchase() {
            if decision.constraint == Constraint::InvalidTicketPrice {
                return Err(TicketBuyerError::InvalidTicketPrice(inputs.ticket_price));
            }
            return Ok(Some(SkipReason::Decision(decision.constraint)));
        }

        self.state = ControllerState::Purchasing;
        let report = self.executor.execute(&decision, self.wallet.as_ref()).await;
        round.logger.log_purchase(&report);
        self.record_purchases(round, &decision, &report);

        match report.error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    async fn resolve(&mut self, round: &mut RoundState) -> TicketBuyerResult<DecisionInputs> {
        let ticket_price = self.chain.get_stake_difficulty().await?;
        self.prices.record(round.block.height, ticket_price);
        let average_price = self.prices.average_before(round.block.height);

        let balance = self.wallet.get_spendable_balance().await?;
        let owned = self
            .resolver
            .owned_ticket_count(self.chain.as_ref(), self.wallet.as_ref())
            .await?;

        // Context only; the decision does not depend on it
        round.all_in_mempool = match self.resolver.all_tickets_in_mempool(self.chain.as_ref()).await {
            Ok(n) => Some(n),
            Err(e) => {
                debug!(error = %e, "Could not read mempool ticket count");
                None
            }
        };
        round.owned_in_mempool = owned;
        metrics().owned_in_mempool.set(i64::from(owned));

        let inputs = DecisionInputs {
            balance,
            ticket_price,
            average_price,
            owned_in_mempool: owned,
            bought_this_round: round.tickets_purchased_this_round,
            spent_this_session: self.session.amount_spent,
        };
        round.logger.log_resolved(&inputs, round.all_in_mempool);
        Ok(inputs)
    }

    fn record_purchases(
        &mut self,
        round: &mut RoundState,
        decision: &PurchaseDecision,
        report: &ExecutionReport,
    ) {
        round.tickets_purchased_this_round += report.purchased;
        round.tx_hashes.extend_from_slice(&report.tx_hashes);

        self.session.tickets_purchased += u64::from(report.purchased);
        self.session.amount_spent += decision.price_ceiling.saturating_mul(report.purchased);
        metrics()
            .session_spent_atoms
            .set(self.session.amount_spent.atoms());
    }

    fn handle_failure(&mut self, mut round: RoundState, err: TicketBuyerError) -> Option<RoundOutcome> {
        round.errors.push(err.to_string());
        round.last_error = Some(err.clone());

        let reason = match err.class() {
            ErrorClass::Transient if round.attempts < self.settings.max_attempts => {
                let delay = self.settings.retry_delay;
                round.logger.log_backoff(
                    round.attempts,
                    self.settings.max_attempts,
                    delay.as_millis() as u64,
                    &err,
                );
                self.state = ControllerState::Backoff {
                    attempt: round.attempts,
                    next_attempt_at: Instant::now() + delay,
                };
                self.round = Some(round);
                self.publish(None);
                return None;
            }
            ErrorClass::Transient => SkipReason::RetriesExhausted,
            ErrorClass::DataIntegrity => SkipReason::DataIntegrity,
            ErrorClass::Rejected => SkipReason::Rejected,
            ErrorClass::Shutdown => SkipReason::Shutdown,
            ErrorClass::Fatal => {
                round.logger.error(&err.to_string());
                SkipReason::Fatal
            }
        };
        Some(self.finish(round, Some(reason)))
    }

    fn finish(&mut self, round: RoundState, reason: Option<SkipReason>) -> RoundOutcome {
        self.state = ControllerState::Idle;

        let skipped = round.tickets_purchased_this_round == 0;
        self.session.rounds += 1;
        metrics().rounds_total.inc();
        if skipped {
            self.session.rounds_skipped += 1;
            metrics().rounds_skipped.inc();
        }

        let outcome = RoundOutcome {
            id: round.id,
            block: round.block,
            purchased: round.tickets_purchased_this_round,
            tx_hashes: round.tx_hashes,
            owned_in_mempool: round.owned_in_mempool,
            all_in_mempool: round.all_in_mempool,
            skipped,
            reason,
            errors: round.errors,
            attempts: round.attempts,
            finished_at: Utc::now(),
        };
        round.logger.log_outcome(&outcome);
        self.publish(Some(outcome.clone()));
        outcome
    }

    fn publish(&self, last_round: Option<RoundOutcome>) {
        let state = self.state.name();
        let session = self.session.clone();
        self.status.send_modify(|status| {
            status.state = state;
            status.session = session;
            if last_round.is_some() {
                status.last_round = last_round;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{block, hash_from, timeout_error, MockChain, MockWallet};

    fn rejected() -> TicketBuyerError {
        TicketBuyerError::Rpc {
            method: "purchaseticket".to_string(),
            code: -4,
            message: "insufficient funds".to_string(),
        }
    }

    fn settings(max_attempts: u32) -> ControllerSettings {
        ControllerSettings {
            max_attempts,
            retry_delay: Duration::from_secs(1),
            stake_info_retry: StakeInfoRetry {
                attempts: 1,
                delay: Duration::from_millis(10),
            },
        }
    }

    fn limits(max_per_block: u32, spend_limit: i64, min_balance: i64) -> PurchaseConfig {
        PurchaseConfig {
            max_per_block,
            spend_limit: Amount(spend_limit),
            min_balance: Amount(min_balance),
            max_fee: Amount(10),
            ..Default::default()
        }
    }

    fn controller(
        cfg: PurchaseConfig,
        settings: ControllerSettings,
        chain: &Arc<MockChain>,
        wallet: &Arc<MockWallet>,
    ) -> PurchaseController {
        PurchaseController::new(cfg, settings, chain.clone(), wallet.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_backoff_bound_then_idle_without_purchase() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));
        chain.fail_all(Some(timeout_error()));
        let mut ctl = controller(limits(5, 1_000_000, 0), settings(3), &chain, &wallet);

        assert!(ctl.on_block(block(1)).await.is_none());
        assert!(matches!(ctl.state(), ControllerState::Backoff { attempt: 1, .. }));
        assert!(ctl.on_retry_timer().await.is_none());
        assert!(matches!(ctl.state(), ControllerState::Backoff { attempt: 2, .. }));

        let outcome = ctl.on_retry_timer().await.unwrap();
        assert_eq!(outcome.reason, Some(SkipReason::RetriesExhausted));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.errors.len(), 3);
        assert!(outcome.skipped);

        assert_eq!(ctl.state(), ControllerState::Idle);
        assert_eq!(chain.price_calls(), 3);
        assert_eq!(wallet.purchase_calls(), 0);
        assert_eq!(ctl.session().rounds_skipped, 1);

        // Idle again: a stray timer does nothing
        assert!(ctl.on_retry_timer().await.is_none());
        assert_eq!(chain.price_calls(), 3);
    }

    #[tokio::test]
    async fn test_spend_limit_scenario_across_blocks() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));
        let mut ctl = controller(limits(10, 500, 1_000), settings(3), &chain, &wallet);

        let first = ctl.on_block(block(1)).await.unwrap();
        assert_eq!(first.purchased, 5);
        assert_eq!(first.tx_hashes.len(), 5);
        assert!(!first.skipped);
        assert_eq!(ctl.session().amount_spent, Amount(500));

        let second = ctl.on_block(block(2)).await.unwrap();
        assert_eq!(second.purchased, 0);
        assert!(second.skipped);
        assert_eq!(
            second.reason,
            Some(SkipReason::Decision(Constraint::SpendLimit))
        );
        assert_eq!(ctl.session().tickets_purchased, 5);
        assert_eq!(wallet.purchase_calls(), 5);
    }

    #[tokio::test]
    async fn test_partial_batch_accounts_exactly_what_succeeded() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));
        wallet.fail_purchase_at(4, rejected());
        let mut ctl = controller(limits(5, 1_000_000, 0), settings(3), &chain, &wallet);

        let outcome = ctl.on_block(block(1)).await.unwrap();
        assert_eq!(outcome.purchased, 3);
        assert_eq!(outcome.tx_hashes.len(), 3);
        assert!(!outcome.skipped);
        assert_eq!(outcome.reason, Some(SkipReason::Rejected));
        assert_eq!(outcome.errors.len(), 1);

        assert_eq!(ctl.session().tickets_purchased, 3);
        assert_eq!(ctl.session().amount_spent, Amount(300));
    }

    #[tokio::test]
    async fn test_retry_after_partial_batch_counts_bought_tickets_once() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));
        wallet.fail_purchase_at(4, timeout_error());
        let mut ctl = controller(limits(5, 1_000_000, 0), settings(3), &chain, &wallet);

        assert!(ctl.on_block(block(1)).await.is_none());
        assert_eq!(ctl.session().tickets_purchased, 3);

        // Retry sees 3 in the mempool and 3 bought this round: tops up by 2
        let outcome = ctl.on_retry_timer().await.unwrap();
        assert_eq!(outcome.purchased, 5);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.reason, None);
        assert_eq!(ctl.session().tickets_purchased, 5);
        assert_eq!(wallet.purchases().len(), 5);
    }

    #[tokio::test]
    async fn test_non_positive_price_skips_without_retry() {
        let chain = Arc::new(MockChain::new(Amount(0)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));
        let mut ctl = controller(limits(5, 1_000_000, 0), settings(3), &chain, &wallet);

        let outcome = ctl.on_block(block(1)).await.unwrap();
        assert_eq!(outcome.reason, Some(SkipReason::DataIntegrity));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(chain.price_calls(), 1);
        assert_eq!(wallet.purchase_calls(), 0);
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn test_price_spike_judged_against_earlier_blocks() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(100_000)));
        let cfg = PurchaseConfig {
            price_average_window: 1,
            ..limits(1, 1_000_000, 0)
        };
        let mut ctl = controller(cfg, settings(3), &chain, &wallet);

        // No earlier block, no bound
        let first = ctl.on_block(block(1)).await.unwrap();
        assert_eq!(first.purchased, 1);

        chain.set_ticket_price(Amount(500));
        let spike = ctl.on_block(block(2)).await.unwrap();
        assert_eq!(spike.purchased, 0);
        assert!(spike.skipped);
        assert_eq!(
            spike.reason,
            Some(SkipReason::Decision(Constraint::PriceAboveBound))
        );

        // The spike is now the reference; 505 is within max_fee of it
        wallet.set_own_mempool_tickets(0);
        chain.set_ticket_price(Amount(505));
        let third = ctl.on_block(block(3)).await.unwrap();
        assert_eq!(third.purchased, 1);
        assert_eq!(wallet.purchases().last(), Some(&(Amount(505), Amount(10))));
        assert_eq!(wallet.purchase_calls(), 2);
    }

    #[tokio::test]
    async fn test_price_bound_survives_retry_on_same_block() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(100_000)));
        let cfg = PurchaseConfig {
            price_average_window: 1,
            ..limits(1, 1_000_000, 0)
        };
        let mut ctl = controller(cfg, settings(3), &chain, &wallet);
        assert_eq!(ctl.on_block(block(1)).await.unwrap().purchased, 1);

        chain.set_ticket_price(Amount(500));
        wallet.fail_balance(Some(timeout_error()));
        assert!(ctl.on_block(block(2)).await.is_none());
        assert!(matches!(ctl.state(), ControllerState::Backoff { attempt: 1, .. }));

        wallet.fail_balance(None);
        let outcome = ctl.on_retry_timer().await.unwrap();
        assert_eq!(
            outcome.reason,
            Some(SkipReason::Decision(Constraint::PriceAboveBound))
        );
        assert_eq!(outcome.attempts, 2);
        assert_eq!(wallet.purchase_calls(), 1);
    }

    #[tokio::test]
    async fn test_mempool_ticket_count_is_context_only() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));
        chain.add_ticket(hash_from(1), "someone-else", Amount(100));
        chain.add_ticket(hash_from(2), "someone-else", Amount(100));
        wallet.set_own_mempool_tickets(1);
        let mut ctl = controller(limits(3, 1_000_000, 0), settings(3), &chain, &wallet);

        let first = ctl.on_block(block(1)).await.unwrap();
        assert_eq!(first.all_in_mempool, Some(2));
        assert_eq!(first.owned_in_mempool, 1);
        assert_eq!(first.purchased, 2);

        // Our two purchases were mined
        wallet.set_own_mempool_tickets(1);
        chain.fail_fee_info(Some(timeout_error()));
        let second = ctl.on_block(block(2)).await.unwrap();
        assert_eq!(second.all_in_mempool, None);
        assert_eq!(second.purchased, 2);
        assert_eq!(second.attempts, 1);
        assert!(second.errors.is_empty());
        assert_eq!(second.reason, None);
        assert_eq!(ctl.session().tickets_purchased, 4);
    }

    #[tokio::test]
    async fn test_new_block_supersedes_pending_backoff() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));
        chain.fail_all(Some(timeout_error()));
        let mut ctl = controller(limits(2, 1_000_000, 0), settings(5), &chain, &wallet);
        let status = ctl.subscribe();

        assert!(ctl.on_block(block(1)).await.is_none());
        assert_eq!(status.borrow().state, "backoff");

        chain.fail_all(None);
        let outcome = ctl.on_block(block(2)).await.unwrap();
        assert_eq!(outcome.block.height, 2);
        assert_eq!(outcome.purchased, 2);

        assert_eq!(ctl.session().rounds, 2);
        assert_eq!(ctl.session().rounds_skipped, 1);
        let status = status.borrow();
        assert_eq!(status.state, "idle");
        assert_eq!(status.last_round.as_ref().map(|r| r.block.height), Some(2));
    }

    #[tokio::test]
    async fn test_duplicate_block_ignored() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));
        let mut ctl = controller(limits(1, 1_000_000, 0), settings(3), &chain, &wallet);

        assert!(ctl.on_block(block(1)).await.is_some());
        assert!(ctl.on_block(block(1)).await.is_none());
        assert_eq!(ctl.session().rounds, 1);
        assert_eq!(chain.price_calls(), 1);
    }

    #[test]
    fn test_invalid_config_refuses_to_start() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));

        let err = PurchaseController::new(
            limits(5, -1, 0),
            settings(3),
            chain.clone(),
            wallet.clone(),
        )
        .err()
        .unwrap();
        assert_eq!(err.class(), ErrorClass::Fatal);

        assert!(PurchaseController::new(limits(5, 0, 0), settings(0), chain, wallet).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_on_timer_then_exits_when_blocks_end() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));
        chain.fail_all(Some(timeout_error()));
        let ctl = controller(limits(5, 1_000_000, 0), settings(4), &chain, &wallet);

        let (block_tx, block_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = shutdown::channel();
        block_tx.send(block(1)).await.unwrap();
        drop(block_tx);

        let session = ctl.run(block_rx, shutdown_rx).await;
        assert_eq!(session.rounds, 1);
        assert_eq!(session.rounds_skipped, 1);
        assert_eq!(chain.price_calls(), 4);
        assert_eq!(wallet.purchase_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff_wait() {
        let chain = Arc::new(MockChain::new(Amount(100)));
        let wallet = Arc::new(MockWallet::new(Amount(10_000)));
        chain.fail_all(Some(timeout_error()));
        let mut cfg = settings(10);
        cfg.retry_delay = Duration::from_secs(600);
        let ctl = controller(limits(5, 1_000_000, 0), cfg, &chain, &wallet);
        let mut status = ctl.subscribe();

        let (block_tx, block_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let handle = tokio::spawn(ctl.run(block_rx, shutdown_rx));

        block_tx.send(block(1)).await.unwrap();
        status.wait_for(|s| s.state == "backoff").await.unwrap();
        shutdown_tx.send(true).unwrap();

        let session = handle.await.unwrap();
        assert_eq!(session.rounds_skipped, 1);
        assert_eq!(chain.price_calls(), 1);
        assert_eq!(
            status.borrow().last_round.as_ref().and_then(|r| r.reason),
            Some(SkipReason::Shutdown)
        );
    }
}

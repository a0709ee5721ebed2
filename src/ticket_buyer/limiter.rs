//! Purchase limits: how many tickets to buy this round, and at what price
//!
//! [`decide`] is pure. Everything it needs, session counters included, comes
//! in through [`DecisionInputs`], so identical inputs always give identical
//! decisions.

use std::collections::VecDeque;

use serde::Serialize;

use super::PurchaseConfig;
use crate::types::Amount;

/// Which bound determined the decision's count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    /// Balance above the reserve
    Balance,
    /// Remaining session spend budget
    SpendLimit,
    /// Per-block cap minus tickets already in flight
    PerBlockCap,
    /// Live price is above the average-price bound
    PriceAboveBound,
    /// `max_per_block` is zero
    Disabled,
    /// The node reported a price that is zero or negative
    InvalidTicketPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurchaseDecision {
    pub count: u32,
    /// Highest price paid per ticket this round
    pub price_ceiling: Amount,
    pub constraint: Constraint,
}

impl PurchaseDecision {
    fn skip(price_ceiling: Amount, constraint: Constraint) -> Self {
        Self {
            count: 0,
            price_ceiling,
            constraint,
        }
    }

    pub fn is_purchase(&self) -> bool {
        self.count > 0
    }

    /// Upper bound on what executing this decision spends on tickets
    pub fn max_spend(&self) -> Amount {
        self.price_ceiling.saturating_mul(self.count)
    }
}

/// Snapshot of live state and session counters for one decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionInputs {
    pub balance: Amount,
    pub ticket_price: Amount,
    /// Mean price over the configured window, if one is configured and filled
    pub average_price: Option<Amount>,
    pub owned_in_mempool: u32,
    pub bought_this_round: u32,
    pub spent_this_session: Amount,
}

pub fn decide(cfg: &PurchaseConfig, inputs: &DecisionInputs) -> PurchaseDecision {
    let price = inputs.ticket_price;
    if !price.is_positive() {
        return PurchaseDecision::skip(Amount::ZERO, Constraint::InvalidTicketPrice);
    }
    if cfg.max_per_block == 0 {
        return PurchaseDecision::skip(price, Constraint::Disabled);
    }

    if let Some(average) = inputs.average_price {
        let bound = average + cfg.max_fee;
        if price > bound {
            return PurchaseDecision::skip(bound, Constraint::PriceAboveBound);
        }
    }

    let affordable = (inputs.balance - cfg.min_balance).whole_units_of(price);
    let affordable_by_spend = (cfg.spend_limit - inputs.spent_this_session).whole_units_of(price);

    // Tickets bought this round are already in the mempool; count them once
    let in_flight = inputs.owned_in_mempool.max(inputs.bought_this_round);
    let cap = u64::from(cfg.max_per_block.saturating_sub(in_flight));

    let (count, constraint) = [
        (affordable, Constraint::Balance),
        (affordable_by_spend, Constraint::SpendLimit),
        (cap, Constraint::PerBlockCap),
    ]
    .into_iter()
    .min_by_key(|(n, _)| *n)
    .unwrap_or((0, Constraint::PerBlockCap));

    PurchaseDecision {
        // cap <= max_per_block, so the minimum always fits
        count: u32::try_from(count).unwrap_or(cfg.max_per_block),
        price_ceiling: price,
        constraint,
    }
}

/// Rolling window of ticket prices, one sample per block
///
/// The price being judged is never part of its own average: the bound for a
/// block comes from the `capacity` blocks before it. One extra sample is kept
/// so a retry on the current block still sees a full window.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    capacity: usize,
    samples: VecDeque<(i64, Amount)>,
}

impl PriceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Record the price seen at `height`. A repeated height replaces the
    /// earlier sample; non-positive prices are ignored.
    pub fn record(&mut self, height: i64, price: Amount) {
        if self.capacity == 0 || !price.is_positive() {
            return;
        }
        if let Some(last) = self.samples.back_mut() {
            if last.0 == height {
                last.1 = price;
                return;
            }
        }
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((height, price));
    }

    /// Mean of the last `capacity` samples recorded below `height`
    pub fn average_before(&self, height: i64) -> Option<Amount> {
        let (total, n) = self
            .samples
            .iter()
            .rev()
            .filter(|(h, _)| *h < height)
            .take(self.capacity)
            .fold((0i128, 0i128), |(total, n), (_, p)| (total + i128::from(p.atoms()), n + 1));
        if n == 0 {
            return None;
        }
        Some(Amount((total / n) as i64))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

//! Structured logging for purchase rounds

use crate::errors::TicketBuyerError;
use crate::observability::CorrelationId;
use crate::ticket_buyer::{DecisionInputs, ExecutionReport, PurchaseDecision, RoundOutcome};
use crate::types::BlockStamp;

/// Structured logger for one round's events. Every record carries the round's
/// correlation id, so all attempts of a tick can be grepped together.
#[derive(Debug, Clone)]
pub struct RoundLogger {
    round_id: CorrelationId,
}

impl RoundLogger {
    pub fn new(round_id: CorrelationId) -> Self {
        Self { round_id }
    }

    pub fn log_round_start(&self, block: &BlockStamp, attempt: u32) {
        tracing::debug!(
            round_id = %self.round_id,
            height = block.height,
            block = %block.hash,
            attempt,
            "Round attempt started"
        );
    }

    pub fn log_resolved(&self, inputs: &DecisionInputs, all_in_mempool: Option<u32>) {
        tracing::debug!(
            round_id = %self.round_id,
            balance = %inputs.balance,
            ticket_price = %inputs.ticket_price,
            average_price = ?inputs.average_price.map(|a| a.to_string()),
            owned_in_mempool = inputs.owned_in_mempool,
            all_in_mempool = ?all_in_mempool,
            spent_this_session = %inputs.spent_this_session,
            "Round state resolved"
        );
    }

    pub fn log_decision(&self, decision: &PurchaseDecision) {
        tracing::info!(
            round_id = %self.round_id,
            count = decision.count,
            price_ceiling = %decision.price_ceiling,
            constraint = ?decision.constraint,
            "Purchase decision"
        );
    }

    pub fn log_purchase(&self, report: &ExecutionReport) {
        let hashes: Vec<String> = report.tx_hashes.iter().map(|h| h.to_string()).collect();
        if report.is_partial() {
            tracing::warn!(
                round_id = %self.round_id,
                requested = report.requested,
                purchased = report.purchased,
                tx_hashes = ?hashes,
                error = ?report.error.as_ref().map(|e| e.to_string()),
                "Partial ticket purchase"
            );
        } else {
            tracing::info!(
                round_id = %self.round_id,
                requested = report.requested,
                purchased = report.purchased,
                tx_hashes = ?hashes,
                "Tickets purchased"
            );
        }
    }

    pub fn log_backoff(&self, attempt: u32, max_attempts: u32, delay_ms: u64, error: &TicketBuyerError) {
        tracing::warn!(
            round_id = %self.round_id,
            attempt,
            max_attempts,
            delay_ms,
            error = %error,
            "Transient failure, retrying round"
        );
    }

    pub fn log_outcome(&self, outcome: &RoundOutcome) {
        match &outcome.reason {
            Some(reason) if outcome.skipped => tracing::info!(
                round_id = %self.round_id,
                height = outcome.block.height,
                reason = %reason,
                attempts = outcome.attempts,
                errors = ?outcome.errors,
                "Round skipped"
            ),
            _ => tracing::info!(
                round_id = %self.round_id,
                height = outcome.block.height,
                purchased = outcome.purchased,
                attempts = outcome.attempts,
                errors = ?outcome.errors,
                "Round complete"
            ),
        }
    }

    pub fn error(&self, message: &str) {
        tracing::error!(
            round_id = %self.round_id,
            message = %message,
            "Error"
        );
    }
}

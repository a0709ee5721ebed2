//! In-memory chain and wallet collaborators for tests
//!
//! Deterministic, no network. Failures are injected per method so tests can
//! drive the controller through its retry and skip paths.
//!
//! Only compiled for tests or with the `test_utils` feature.

#![cfg(any(test, feature = "test_utils"))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::errors::{TicketBuyerError, TicketBuyerResult};
use crate::rpc::{ChainQuery, WalletQuery};
use crate::types::{
    Amount, BlockStamp, StakeInfo, TicketFeeInfo, TxHash, TxOutput, VerboseTransaction,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hash whose first eight bytes carry `n`, for readable test fixtures
pub fn hash_from(n: u64) -> TxHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_be_bytes());
    TxHash(bytes)
}

pub fn block(height: i64) -> BlockStamp {
    BlockStamp {
        hash: hash_from(1_000_000 + height as u64),
        height,
    }
}

pub fn timeout_error() -> TicketBuyerError {
    TicketBuyerError::Timeout {
        endpoint: "mock".to_string(),
        timeout_ms: 1,
    }
}

#[derive(Debug, Default)]
struct ChainState {
    mempool: Vec<TxHash>,
    transactions: HashMap<TxHash, VerboseTransaction>,
    best_block: Option<BlockStamp>,
    ticket_price: Amount,
    fail_all: Option<TicketBuyerError>,
    fail_lookup: Option<(TxHash, TicketBuyerError)>,
    fail_fee_info: Option<TicketBuyerError>,
}

#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
    mempool_calls: AtomicU32,
    lookup_calls: AtomicU32,
    price_calls: AtomicU32,
    best_block_calls: AtomicU32,
}

impl MockChain {
    pub fn new(ticket_price: Amount) -> Self {
        let chain = Self::default();
        {
            let mut st = lock(&chain.state);
            st.ticket_price = ticket_price;
            st.best_block = Some(block(1));
        }
        chain
    }

    /// Add a mempool ticket whose voting output pays to `address`
    pub fn add_ticket(&self, hash: TxHash, address: &str, value: Amount) {
        self.add_transaction(VerboseTransaction {
            hash,
            outputs: vec![TxOutput {
                value,
                addresses: vec![address.to_string()],
            }],
        });
    }

    /// Add an arbitrary mempool transaction listed as a ticket
    pub fn add_transaction(&self, tx: VerboseTransaction) {
        let mut st = lock(&self.state);
        st.mempool.push(tx.hash);
        st.transactions.insert(tx.hash, tx);
    }

    pub fn set_ticket_price(&self, price: Amount) {
        lock(&self.state).ticket_price = price;
    }

    pub fn set_best_block(&self, stamp: BlockStamp) {
        lock(&self.state).best_block = Some(stamp);
    }

    /// Every call fails with `err` until cleared with `None`
    pub fn fail_all(&self, err: Option<TicketBuyerError>) {
        lock(&self.state).fail_all = err;
    }

    pub fn fail_lookup(&self, hash: TxHash, err: TicketBuyerError) {
        lock(&self.state).fail_lookup = Some((hash, err));
    }

    /// Only `get_ticket_fee_info_mempool` fails, until cleared with `None`
    pub fn fail_fee_info(&self, err: Option<TicketBuyerError>) {
        lock(&self.state).fail_fee_info = err;
    }

    pub fn price_calls(&self) -> u32 {
        self.price_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> u32 {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn mempool_calls(&self) -> u32 {
        self.mempool_calls.load(Ordering::SeqCst)
    }

    pub fn best_block_calls(&self) -> u32 {
        self.best_block_calls.load(Ordering::SeqCst)
    }

    fn check_fail(&self) -> TicketBuyerResult<()> {
        match &lock(&self.state).fail_all {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn list_mempool_ticket_hashes(&self) -> TicketBuyerResult<Vec<TxHash>> {
        self.mempool_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail()?;
        Ok(lock(&self.state).mempool.clone())
    }

    async fn get_raw_transaction_verbose(
        &self,
        hash: &TxHash,
    ) -> TicketBuyerResult<VerboseTransaction> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail()?;
        let st = lock(&self.state);
        if let Some((failing, err)) = &st.fail_lookup {
            if failing == hash {
                return Err(err.clone());
            }
        }
        st.transactions
            .get(hash)
            .cloned()
            .ok_or_else(|| TicketBuyerError::Rpc {
                method: "getrawtransaction".to_string(),
                code: -5,
                message: format!("no such transaction {}", hash),
            })
    }

    async fn get_ticket_fee_info_mempool(&self) -> TicketBuyerResult<TicketFeeInfo> {
        self.check_fail()?;
        let st = lock(&self.state);
        if let Some(err) = &st.fail_fee_info {
            return Err(err.clone());
        }
        Ok(TicketFeeInfo {
            number: st.mempool.len() as u32,
        })
    }

    async fn get_best_block(&self) -> TicketBuyerResult<BlockStamp> {
        self.best_block_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail()?;
        lock(&self.state)
            .best_block
            .ok_or_else(|| TicketBuyerError::MalformedResponse {
                method: "getbestblock".to_string(),
                reason: "no blocks".to_string(),
            })
    }

    async fn get_stake_difficulty(&self) -> TicketBuyerResult<Amount> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail()?;
        Ok(lock(&self.state).ticket_price)
    }
}

#[derive(Debug, Default)]
struct WalletState {
    balance: Amount,
    stake_info: StakeInfo,
    /// Remaining stake-info calls that fail before the view converges
    stale_stake_info_calls: u32,
    stake_info_error: Option<TicketBuyerError>,
    balance_error: Option<TicketBuyerError>,
    /// 1-based index of the purchase call that fails, and how
    fail_purchase_at: Option<(u32, TicketBuyerError)>,
    purchases: Vec<(Amount, Amount)>,
}

#[derive(Debug, Default)]
pub struct MockWallet {
    state: Mutex<WalletState>,
    stake_info_calls: AtomicU32,
    purchase_calls: AtomicU32,
}

impl MockWallet {
    pub fn new(balance: Amount) -> Self {
        let wallet = Self::default();
        lock(&wallet.state).balance = balance;
        wallet
    }

    pub fn set_balance(&self, balance: Amount) {
        lock(&self.state).balance = balance;
    }

    pub fn set_own_mempool_tickets(&self, n: u32) {
        lock(&self.state).stake_info.own_mempool_tickets = n;
    }

    /// The next `n` stake-info calls time out, then the view is current
    pub fn stale_stake_info_for(&self, n: u32) {
        lock(&self.state).stale_stake_info_calls = n;
    }

    pub fn fail_stake_info(&self, err: Option<TicketBuyerError>) {
        lock(&self.state).stake_info_error = err;
    }

    pub fn fail_balance(&self, err: Option<TicketBuyerError>) {
        lock(&self.state).balance_error = err;
    }

    /// Purchase number `n` (1-based, counted across the wallet's lifetime) fails with `err`
    pub fn fail_purchase_at(&self, n: u32, err: TicketBuyerError) {
        lock(&self.state).fail_purchase_at = Some((n, err));
    }

    pub fn stake_info_calls(&self) -> u32 {
        self.stake_info_calls.load(Ordering::SeqCst)
    }

    /// Purchase calls made, failed ones included
    pub fn purchase_calls(&self) -> u32 {
        self.purchase_calls.load(Ordering::SeqCst)
    }

    /// `(price_ceiling, fee_limit)` of every successful purchase
    pub fn purchases(&self) -> Vec<(Amount, Amount)> {
        lock(&self.state).purchases.clone()
    }
}

#[async_trait]
impl WalletQuery for MockWallet {
    async fn get_stake_info(&self) -> TicketBuyerResult<StakeInfo> {
        self.stake_info_calls.fetch_add(1, Ordering::SeqCst);
        let mut st = lock(&self.state);
        if let Some(err) = &st.stake_info_error {
            return Err(err.clone());
        }
        if st.stale_stake_info_calls > 0 {
            st.stale_stake_info_calls -= 1;
            return Err(timeout_error());
        }
        Ok(st.stake_info)
    }

    async fn get_spendable_balance(&self) -> TicketBuyerResult<Amount> {
        let st = lock(&self.state);
        match &st.balance_error {
            Some(err) => Err(err.clone()),
            None => Ok(st.balance),
        }
    }

    async fn purchase_ticket(
        &self,
        price_ceiling: Amount,
        fee_limit: Amount,
    ) -> TicketBuyerResult<TxHash> {
        let n = self.purchase_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut st = lock(&self.state);
        if let Some((at, err)) = &st.fail_purchase_at {
            if *at == n {
                return Err(err.clone());
            }
        }
        if st.balance < price_ceiling {
            return Err(TicketBuyerError::Rpc {
                method: "purchaseticket".to_string(),
                code: -4,
                message: "insufficient funds".to_string(),
            });
        }
        st.balance = st.balance - price_ceiling;
        st.stake_info.own_mempool_tickets += 1;
        st.purchases.push((price_ceiling, fee_limit));
        Ok(hash_from(n as u64))
    }
}

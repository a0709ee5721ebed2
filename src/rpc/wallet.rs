//! Wallet backend adapter

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::client::JsonRpcClient;
use super::node::coins;
use super::WalletQuery;
use crate::address::Address;
use crate::errors::{TicketBuyerError, TicketBuyerResult};
use crate::types::{Amount, StakeInfo, TxHash};

#[derive(Debug, Deserialize)]
struct StakeInfoResult {
    ownmempooltix: u32,
    #[serde(default)]
    allmempooltix: u32,
    #[serde(default)]
    immature: u32,
    #[serde(default)]
    live: u32,
    #[serde(default)]
    difficulty: f64,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    balances: Vec<AccountBalance>,
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    accountname: String,
    spendable: f64,
}

/// `purchaseticket` answers with one hash or a list, depending on backend version
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PurchaseResult {
    One(TxHash),
    Many(Vec<TxHash>),
}

/// [`WalletQuery`] over the wallet's JSON-RPC interface
#[derive(Debug)]
pub struct WalletRpc {
    client: JsonRpcClient,
    account: String,
    /// Where ticket voting rights go; `None` lets the wallet pick its own address
    ticket_address: Option<Address>,
}

impl WalletRpc {
    pub fn new(client: JsonRpcClient, account: String, ticket_address: Option<Address>) -> Self {
        Self {
            client,
            account,
            ticket_address,
        }
    }
}

#[async_trait]
impl WalletQuery for WalletRpc {
    async fn get_stake_info(&self) -> TicketBuyerResult<StakeInfo> {
        let info: StakeInfoResult = self.client.call("getstakeinfo", json!([])).await?;
        Ok(StakeInfo {
            own_mempool_tickets: info.ownmempooltix,
            all_mempool_tickets: info.allmempooltix,
            immature: info.immature,
            live: info.live,
            difficulty: coins("getstakeinfo", info.difficulty)?,
        })
    }

    async fn get_spendable_balance(&self) -> TicketBuyerResult<Amount> {
        let result: BalanceResult = self
            .client
            .call("getbalance", json!([self.account, 1]))
            .await?;
        let account = result
            .balances
            .into_iter()
            .find(|b| b.accountname == self.account)
            .ok_or_else(|| TicketBuyerError::MalformedResponse {
                method: "getbalance".to_string(),
                reason: format!("account {} missing from response", self.account),
            })?;
        coins("getbalance", account.spendable)
    }

    async fn purchase_ticket(
        &self,
        price_ceiling: Amount,
        fee_limit: Amount,
    ) -> TicketBuyerResult<TxHash> {
        let ticket_address = self
            .ticket_address
            .as_ref()
            .map(|a| a.encode())
            .unwrap_or_default();
        let params = json!([
            self.account,
            price_ceiling.to_coins(),
            1,
            ticket_address,
            1,
            "",
            0.0,
            0,
            "",
            fee_limit.to_coins(),
        ]);

        match self.client.call("purchaseticket", params).await? {
            PurchaseResult::One(hash) => Ok(hash),
            PurchaseResult::Many(hashes) => {
                hashes
                    .into_iter()
                    .next()
                    .ok_or_else(|| TicketBuyerError::MalformedResponse {
                        method: "purchaseticket".to_string(),
                        reason: "empty hash list".to_string(),
                    })
            }
        }
    }
}

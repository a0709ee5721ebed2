//! Full node adapter

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::client::JsonRpcClient;
use super::ChainQuery;
use crate::errors::{TicketBuyerError, TicketBuyerResult};
use crate::types::{
    Amount, BlockStamp, TicketFeeInfo, TxHash, TxOutput, VerboseTransaction,
};

#[derive(Debug, Deserialize)]
struct RawTxResult {
    txid: TxHash,
    #[serde(default)]
    vout: Vec<RawVout>,
}

#[derive(Debug, Deserialize)]
struct RawVout {
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: RawScriptPubKey,
}

#[derive(Debug, Deserialize)]
struct RawScriptPubKey {
    #[serde(default)]
    addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TicketFeeInfoResult {
    feeinfomempool: FeeInfoMempool,
}

#[derive(Debug, Deserialize)]
struct FeeInfoMempool {
    number: u32,
}

#[derive(Debug, Deserialize)]
struct BestBlockResult {
    hash: TxHash,
    height: i64,
}

#[derive(Debug, Deserialize)]
struct StakeDifficultyResult {
    current: f64,
}

/// [`ChainQuery`] over the node's JSON-RPC interface
#[derive(Debug)]
pub struct NodeRpc {
    client: JsonRpcClient,
}

impl NodeRpc {
    pub fn new(client: JsonRpcClient) -> Self {
        Self { client }
    }
}

pub(crate) fn coins(method: &str, value: f64) -> TicketBuyerResult<Amount> {
    Amount::from_coins(value).ok_or_else(|| TicketBuyerError::MalformedResponse {
        method: method.to_string(),
        reason: format!("amount {} out of range", value),
    })
}

#[async_trait]
impl ChainQuery for NodeRpc {
    async fn list_mempool_ticket_hashes(&self) -> TicketBuyerResult<Vec<TxHash>> {
        self.client
            .call("getrawmempool", json!([false, "tickets"]))
            .await
    }

    async fn get_raw_transaction_verbose(
        &self,
        hash: &TxHash,
    ) -> TicketBuyerResult<VerboseTransaction> {
        let raw: RawTxResult = self
            .client
            .call("getrawtransaction", json!([hash.to_string(), 1]))
            .await?;

        let outputs = raw
            .vout
            .into_iter()
            .map(|out| {
                Ok(TxOutput {
                    value: coins("getrawtransaction", out.value)?,
                    addresses: out.script_pub_key.addresses,
                })
            })
            .collect::<TicketBuyerResult<Vec<_>>>()?;

        Ok(VerboseTransaction {
            hash: raw.txid,
            outputs,
        })
    }

    async fn get_ticket_fee_info_mempool(&self) -> TicketBuyerResult<TicketFeeInfo> {
        let info: TicketFeeInfoResult = self.client.call("ticketfeeinfo", json!([0, 0])).await?;
        Ok(TicketFeeInfo {
            number: info.feeinfomempool.number,
        })
    }

    async fn get_best_block(&self) -> TicketBuyerResult<BlockStamp> {
        let best: BestBlockResult = self.client.call("getbestblock", json!([])).await?;
        Ok(BlockStamp {
            hash: best.hash,
            height: best.height,
        })
    }

    async fn get_stake_difficulty(&self) -> TicketBuyerResult<Amount> {
        let diff: StakeDifficultyResult =
            self.client.call("getstakedifficulty", json!([])).await?;
        coins("getstakedifficulty", diff.current)
    }
}

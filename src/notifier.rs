//! New-block notifications by polling the node's best block

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::rpc::ChainQuery;
use crate::shutdown;
use crate::types::BlockStamp;

pub struct BlockNotifier {
    chain: Arc<dyn ChainQuery>,
    interval: Duration,
}

impl BlockNotifier {
    pub fn new(chain: Arc<dyn ChainQuery>, interval: Duration) -> Self {
        Self { chain, interval }
    }

    /// Poll until shutdown or until the receiver is dropped, sending a
    /// [`BlockStamp`] every time the best block hash changes. The first
    /// successful poll is always sent.
    pub async fn run(self, blocks: mpsc::Sender<BlockStamp>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<BlockStamp> = None;
        let mut failing = false;

        loop {
            tokio::select! {
                biased;
                _ = shutdown::requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            let best = match self.chain.get_best_block().await {
                Ok(best) => best,
                Err(e) => {
                    // Only the first failure in a run is worth a warning
                    if !failing {
                        warn!(error = %e, "Best block poll failed");
                        failing = true;
                    } else {
                        debug!(error = %e, "Best block poll failed");
                    }
                    continue;
                }
            };
            if failing {
                info!("Best block poll recovered");
                failing = false;
            }

            if last.map(|b| b.hash) == Some(best.hash) {
                continue;
            }
            debug!(height = best.height, block = %best.hash, "New best block");
            last = Some(best);

            if blocks.send(best).await.is_err() {
                debug!("Block receiver dropped, notifier stopping");
                break;
            }
        }
    }
}

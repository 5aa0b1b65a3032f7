// Node runtime - drives housekeeping and mining against one engine

use crate::config::{MempoolConfig, MiningConfig, NodeConfig};
use crate::consensus::{unix_time, CancelToken, ConsensusEngine, Miner};
use crate::error::{ChainError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;

/// Long-running node around an explicitly constructed engine
pub struct Node {
    engine: Arc<ConsensusEngine>,
    config: NodeConfig,
}

impl Node {
    pub fn new(engine: Arc<ConsensusEngine>, config: NodeConfig) -> Self {
        Self { engine, config }
    }

    /// Run until ctrl-c, or until the mining loop fails. Mining starts only
    /// when `miner_address` is given.
    pub async fn run(&self, miner_address: Option<String>) -> Result<()> {
        let shutdown = CancelToken::new();

        let housekeeping = tokio::spawn(Self::housekeeping(
            self.engine.clone(),
            self.config.mempool.clone(),
        ));

        let mut miner = miner_address.map(|address| {
            let engine = self.engine.clone();
            let mining = self.config.mining.clone();
            let shutdown = shutdown.clone();
            log::info!("Mining to {} with {} threads", address, mining.threads);
            tokio::task::spawn_blocking(move || {
                mine_blocks(&engine, &address, &mining, &shutdown, None)
            })
        });

        log::info!("Node running; press ctrl-c to stop");
        let finished = match miner.as_mut() {
            Some(handle) => tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    Self::log_signal(signal);
                    None
                }
                joined = handle => Some(joined),
            },
            None => {
                Self::log_signal(tokio::signal::ctrl_c().await);
                None
            }
        };

        log::info!("Shutting down");
        shutdown.cancel();
        self.engine.cancel_outstanding_work();
        housekeeping.abort();

        match (finished, miner) {
            (Some(joined), _) => Self::finish_mining(joined),
            (None, Some(handle)) => Self::finish_mining(handle.await),
            (None, None) => Ok(()),
        }
    }

    /// Periodic mempool eviction. Takes only the mempool lock.
    async fn housekeeping(engine: Arc<ConsensusEngine>, config: MempoolConfig) {
        let period = Duration::from_secs(config.eviction_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = engine.evict_expired(config.max_age_secs);
            log::debug!(
                "Housekeeping: {} evicted, {} pending",
                evicted,
                engine.mempool_len()
            );
        }
    }

    fn log_signal(signal: std::io::Result<()>) {
        if let Err(e) = signal {
            log::error!("Failed to listen for ctrl-c: {}", e);
        }
    }

    fn finish_mining(joined: std::result::Result<Result<u64>, JoinError>) -> Result<()> {
        match joined {
            Ok(Ok(mined)) => {
                log::info!("Mining stopped after {} blocks", mined);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(e) => {
                log::error!("Mining task failed: {}", e);
                Ok(())
            }
        }
    }
}

/// Template, search, submit, repeat. Stops after `limit` accepted blocks or
/// when `shutdown` is cancelled. Returns the number of blocks accepted.
pub fn mine_blocks(
    engine: &ConsensusEngine,
    miner_address: &str,
    config: &MiningConfig,
    shutdown: &CancelToken,
    limit: Option<u64>,
) -> Result<u64> {
    let mut mined = 0u64;

    while limit.is_none_or(|limit| mined < limit) && !shutdown.is_cancelled() {
        // Registered before the template so a tip change in between cancels it
        let work = engine.work_token();
        let template = engine.create_template(miner_address)?;
        log::debug!(
            "Mining height {} at difficulty {} with {} transactions",
            template.height,
            template.difficulty,
            template.transactions.len()
        );

        let miner = Miner::new(template.difficulty);
        let result = miner.mine_parallel(&template.header(0), config.threads, &work);

        match result.nonce() {
            Ok(Some(nonce)) => {
                log::info!(
                    "Found nonce {} for height {} after {} attempts ({:.1} KH/s)",
                    nonce,
                    template.height,
                    result.attempts,
                    result.hash_rate() / 1000.0
                );
                if !pace(engine, config.min_block_interval_secs, &work, shutdown) {
                    log::debug!("Tip moved while holding block; discarding");
                    continue;
                }
                let block = template.into_block(nonce);
                let hash = block.hash();
                let outcome = engine.submit_block(block)?;
                if outcome.accepted {
                    mined += 1;
                } else {
                    log::warn!(
                        "Mined block {} was not accepted: {}",
                        hash,
                        outcome.reason.unwrap_or_default()
                    );
                }
            }
            Ok(None) => log::debug!("Work superseded; refreshing template"),
            Err(ChainError::OutOfNonceSpace) => {
                log::warn!(
                    "Nonce space exhausted at height {}; refreshing template",
                    template.height
                );
                // A later timestamp gives the next template fresh nonce space
                std::thread::sleep(Duration::from_secs(1));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(mined)
}

/// Hold a found block until `interval_secs` after the tip. Returns false if
/// the work was superseded or the node is stopping.
fn pace(
    engine: &ConsensusEngine,
    interval_secs: u64,
    work: &CancelToken,
    shutdown: &CancelToken,
) -> bool {
    if interval_secs == 0 {
        return true;
    }
    let ready_at = engine.tip_timestamp().unwrap_or(0).saturating_add(interval_secs);
    while unix_time() < ready_at {
        if work.is_cancelled() || shutdown.is_cancelled() {
            return false;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    !work.is_cancelled() && !shutdown.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;
    use crate::core::Secp256k1Verifier;
    use crate::storage::ChainStore;

    fn engine() -> Arc<ConsensusEngine> {
        let engine = ConsensusEngine::open(
            ChainParams::default(),
            Box::new(ChainStore::memory().unwrap()),
            Arc::new(Secp256k1Verifier),
            100,
        )
        .unwrap();
        Arc::new(engine)
    }

    fn mining_config() -> MiningConfig {
        MiningConfig { threads: 2, min_block_interval_secs: 0 }
    }

    #[test]
    fn test_mine_blocks_with_limit() {
        let engine = engine();
        let mined = mine_blocks(&engine, "A", &mining_config(), &CancelToken::new(), Some(2)).unwrap();

        assert_eq!(mined, 2);
        assert_eq!(engine.tip().unwrap().height, 2);
        assert_eq!(engine.balance_of("A"), 2 * 5_000_000_000);
    }

    #[test]
    fn test_mine_blocks_stops_on_shutdown() {
        let engine = engine();
        let shutdown = CancelToken::new();
        shutdown.cancel();

        let mined = mine_blocks(&engine, "A", &mining_config(), &shutdown, None).unwrap();
        assert_eq!(mined, 0);
        assert_eq!(engine.tip().unwrap().height, 0);
    }

    #[test]
    fn test_pace_gives_up_when_work_superseded() {
        let engine = engine();
        let work = CancelToken::new();
        work.cancel();
        // Genesis is far in the past, so only cancellation can fail the wait
        assert!(!pace(&engine, 60, &work, &CancelToken::new()));
        assert!(pace(&engine, 0, &CancelToken::new(), &CancelToken::new()));
        assert!(pace(&engine, 60, &CancelToken::new(), &CancelToken::new()));
    }

    #[tokio::test]
    async fn test_mining_runs_on_blocking_pool() {
        let engine = engine();
        let handle = {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || {
                mine_blocks(&engine, "B", &mining_config(), &CancelToken::new(), Some(1))
            })
        };
        assert_eq!(handle.await.unwrap().unwrap(), 1);
        assert_eq!(engine.balance_of("B"), 5_000_000_000);
    }
}

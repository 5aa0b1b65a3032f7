// Proof of Work implementation

use crate::core::{BlockHeader, Hash256};
use crate::error::ChainError;
use crossbeam_channel::{unbounded, Sender};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Nonces tried between cancellation checks
const CHECK_INTERVAL: u64 = 1024;

/// Nonces between progress reports
const REPORT_INTERVAL: u64 = 100_000;

/// Difficulty target: a hash meets difficulty `d` when, read as a big-endian
/// integer, it is below 2^(256 - d).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub difficulty: u32,
}

impl Target {
    pub fn from_difficulty(difficulty: u32) -> Self {
        Self { difficulty }
    }

    /// 2^(256 - difficulty) as a 32-byte big-endian number. `None` when the
    /// value does not fit (difficulty 0) or is below one (difficulty > 256).
    pub fn to_hash256(&self) -> Option<Hash256> {
        if self.difficulty == 0 || self.difficulty > 256 {
            return None;
        }
        let bit = 256 - self.difficulty as usize;
        let mut target = [0u8; 32];
        target[31 - bit / 8] = 1 << (bit % 8);
        Some(Hash256::new(target))
    }

    /// Check if a hash meets this target (hash < target)
    pub fn is_valid_hash(&self, hash: &Hash256) -> bool {
        match self.to_hash256() {
            Some(target) => hash < &target,
            None => self.difficulty == 0,
        }
    }
}

/// `hash < 2^(256 - difficulty)`
pub fn meets(hash: &Hash256, difficulty: u32) -> bool {
    Target::from_difficulty(difficulty).is_valid_hash(hash)
}

/// Shared cooperative cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// True while some clone other than this one is alive
    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }
}

/// How a search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningOutcome {
    Found { nonce: u32, hash: Hash256 },
    Cancelled,
    /// Every nonce in the range was tried
    Exhausted,
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    pub outcome: MiningOutcome,
    /// Number of hashes computed
    pub attempts: u64,
    /// Time taken
    pub duration: Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.attempts as f64 / secs
        }
    }

    /// Found nonce, or `OutOfNonceSpace` when the search ran dry
    pub fn nonce(&self) -> Result<Option<u32>, ChainError> {
        match self.outcome {
            MiningOutcome::Found { nonce, .. } => Ok(Some(nonce)),
            MiningOutcome::Cancelled => Ok(None),
            MiningOutcome::Exhausted => Err(ChainError::OutOfNonceSpace),
        }
    }
}

/// Immutable snapshot a worker sends to the aggregator
#[derive(Debug, Clone)]
pub enum WorkerReport {
    Progress { worker: usize, attempts: u64 },
    Done { worker: usize, attempts: u64, found: Option<(u32, Hash256)> },
}

/// Proof of Work miner
pub struct Miner {
    /// Required difficulty
    pub target: Target,
}

impl Miner {
    pub fn new(difficulty: u32) -> Self {
        Self {
            target: Target::from_difficulty(difficulty),
        }
    }

    /// Search the whole nonce space on the calling thread
    pub fn mine(&self, header: &mut BlockHeader, cancel: &CancelToken) -> MiningResult {
        let start_time = Instant::now();
        let (outcome, attempts) = self.mine_range(header, 0..=u32::MAX, cancel, None);
        if let MiningOutcome::Found { nonce, .. } = outcome {
            header.nonce = nonce;
        }
        MiningResult {
            outcome,
            attempts,
            duration: start_time.elapsed(),
        }
    }

    /// Try every nonce in `range`, checking `cancel` every few thousand tries.
    /// Leaves `header.nonce` at the last nonce tried.
    pub fn mine_range(
        &self,
        header: &mut BlockHeader,
        range: RangeInclusive<u32>,
        cancel: &CancelToken,
        reports: Option<(usize, &Sender<WorkerReport>)>,
    ) -> (MiningOutcome, u64) {
        self.search(header, range, || cancel.is_cancelled(), |attempts| {
            if let Some((worker, tx)) = reports {
                let _ = tx.send(WorkerReport::Progress { worker, attempts });
            }
        })
    }

    /// Split the nonce space across `workers` threads. Each worker owns a
    /// disjoint range and a private header copy, and talks to the aggregator
    /// only through `WorkerReport` messages. The first solution stops the rest.
    pub fn mine_parallel(
        &self,
        template: &BlockHeader,
        workers: usize,
        cancel: &CancelToken,
    ) -> MiningResult {
        let start_time = Instant::now();
        let workers = workers.clamp(1, 256);
        let solved = CancelToken::new();
        let (tx, rx) = unbounded::<WorkerReport>();

        let mut found: Option<(u32, Hash256)> = None;
        let mut total_attempts = 0u64;

        std::thread::scope(|scope| {
            for (worker, range) in split_nonce_space(workers).into_iter().enumerate() {
                let tx = tx.clone();
                let mut header = template.clone();
                let solved = &solved;
                scope.spawn(move || {
                    let (outcome, attempts) = self.search(
                        &mut header,
                        range,
                        || cancel.is_cancelled() || solved.is_cancelled(),
                        |attempts| {
                            let _ = tx.send(WorkerReport::Progress { worker, attempts });
                        },
                    );
                    let found = match outcome {
                        MiningOutcome::Found { nonce, hash } => Some((nonce, hash)),
                        _ => None,
                    };
                    let _ = tx.send(WorkerReport::Done { worker, attempts, found });
                });
            }
            drop(tx);

            let mut progress = vec![0u64; workers];
            for report in rx.iter() {
                match report {
                    WorkerReport::Progress { worker, attempts } => {
                        progress[worker] = attempts;
                        let total: u64 = progress.iter().sum();
                        let elapsed = start_time.elapsed().as_secs_f64();
                        if elapsed > 0.0 {
                            log::debug!(
                                "Mining attempts: {} ({:.1} KH/s)",
                                total,
                                total as f64 / elapsed / 1000.0
                            );
                        }
                    }
                    WorkerReport::Done { worker, attempts, found: hit } => {
                        progress[worker] = attempts;
                        total_attempts += attempts;
                        if let Some(hit) = hit {
                            found.get_or_insert(hit);
                            solved.cancel();
                        }
                    }
                }
            }
        });

        let outcome = match found {
            Some((nonce, hash)) => MiningOutcome::Found { nonce, hash },
            None if cancel.is_cancelled() => MiningOutcome::Cancelled,
            None => MiningOutcome::Exhausted,
        };

        MiningResult {
            outcome,
            attempts: total_attempts,
            duration: start_time.elapsed(),
        }
    }

    fn search(
        &self,
        header: &mut BlockHeader,
        range: RangeInclusive<u32>,
        stop: impl Fn() -> bool,
        progress: impl Fn(u64),
    ) -> (MiningOutcome, u64) {
        let mut attempts = 0u64;

        for nonce in range {
            if attempts % CHECK_INTERVAL == 0 && stop() {
                return (MiningOutcome::Cancelled, attempts);
            }

            header.nonce = nonce;
            let hash = header.hash();
            attempts += 1;

            if self.target.is_valid_hash(&hash) {
                return (MiningOutcome::Found { nonce, hash }, attempts);
            }

            if attempts % REPORT_INTERVAL == 0 {
                progress(attempts);
            }
        }

        (MiningOutcome::Exhausted, attempts)
    }
}

/// Disjoint inclusive ranges covering 0..=u32::MAX
fn split_nonce_space(workers: usize) -> Vec<RangeInclusive<u32>> {
    let space = u32::MAX as u64 + 1;
    let chunk = space / workers as u64;
    (0..workers as u64)
        .map(|i| {
            let start = i * chunk;
            let end = if i + 1 == workers as u64 { space - 1 } else { start + chunk - 1 };
            start as u32..=end as u32
        })
        .collect()
}

// Consensus and validation logic

pub mod difficulty;
pub mod engine;
pub mod pow;
pub mod validation;

pub use difficulty::DifficultyRetarget;
pub use engine::{unix_time, ChainPhase, ConsensusEngine, SubmitResult, WorkTemplate};
pub use pow::{meets, CancelToken, Miner, MiningOutcome, MiningResult, Target, WorkerReport};
pub use validation::{BlockValidator, RejectReason, TransactionValidator};

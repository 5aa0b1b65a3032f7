// Difficulty retargeting

use crate::config::ChainParams;

/// Moves difficulty one step at a time toward the target block interval.
///
/// The average spacing of the most recent `window` timestamps is compared
/// against the target: faster than half the target raises difficulty by one,
/// slower than twice the target lowers it by one. The result is clamped to
/// `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyRetarget {
    pub target_block_time_secs: u64,
    pub window: usize,
    pub min: u32,
    pub max: u32,
}

impl DifficultyRetarget {
    pub fn from_params(params: &ChainParams) -> Self {
        Self {
            target_block_time_secs: params.target_block_time_secs,
            window: params.retarget_window,
            min: params.min_difficulty,
            max: params.max_difficulty,
        }
    }

    /// Difficulty required of the next block. `timestamps` runs oldest to
    /// newest and ends with the block just accepted.
    pub fn next_difficulty(&self, current: u32, timestamps: &[u64]) -> u32 {
        let start = timestamps.len().saturating_sub(self.window.max(2));
        let recent = &timestamps[start..];
        if recent.len() < 2 {
            return current.clamp(self.min, self.max);
        }

        let (first, last) = (recent[0], recent[recent.len() - 1]);
        // Out-of-order timestamps count as zero elapsed time
        let span = last.saturating_sub(first) as u128;
        let intervals = (recent.len() - 1) as u128;
        let target = self.target_block_time_secs as u128;

        // avg < target / 2  <=>  2 * span < target * intervals
        let next = if 2 * span < target * intervals {
            current.saturating_add(1)
        } else if span > 2 * target * intervals {
            current.saturating_sub(1)
        } else {
            current
        };
        let next = next.clamp(self.min, self.max);

        if next != current {
            log::info!(
                "Difficulty retarget: {} -> {} (avg interval {}s, target {}s)",
                current,
                next,
                span / intervals,
                target
            );
        }
        next
    }
}

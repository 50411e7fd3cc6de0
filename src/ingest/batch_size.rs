use tracing::{info, warn};

/// Settings for adaptive block batch sizing.
///
/// When `adaptive` is off the scanner sticks to its configured batch size
/// and the streak counters are inert.
#[derive(Debug, Clone, Copy)]
pub struct BatchSizeConfig {
    pub adaptive: bool,
    pub min_size: u64,
    pub max_size: u64,
    /// Consecutive successful ticks required before the batch doubles.
    pub success_streak: u32,
    /// Divisor applied to the batch on every failed tick.
    pub failure_divisor: u64,
}

impl Default for BatchSizeConfig {
    fn default() -> Self {
        Self { adaptive: true, min_size: 1, max_size: 100, success_streak: 3, failure_divisor: 2 }
    }
}

/// Tracks success/failure streaks and grows or shrinks the block batch.
///
/// Exponential back-on: after `success_streak` consecutive successes the
/// size doubles (clamped to `max_size`). Exponential backoff: each failure
/// divides the size by `failure_divisor` (floored at `min_size`). Streak
/// counters reset whenever an adjustment lands.
#[derive(Debug)]
pub(crate) struct BatchSizer {
    config: BatchSizeConfig,
    current: u64,
    successes: u32,
    failures: u32,
}

impl BatchSizer {
    pub fn new(initial: u64, config: BatchSizeConfig) -> Self {
        let initial = if initial == 0 { 10 } else { initial };
        let current =
            if config.adaptive { initial.clamp(config.min_size, config.max_size) } else { initial };
        Self { config, current, successes: 0, failures: 0 }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn on_success(&mut self) {
        if !self.config.adaptive {
            return;
        }

        self.successes += 1;
        self.failures = 0;

        if self.successes >= self.config.success_streak {
            let next = self.current.saturating_mul(2).min(self.config.max_size);
            if next != self.current {
                info!(
                    from = self.current,
                    to = next,
                    streak = self.successes,
                    "increasing block batch size"
                );
                self.current = next;
                self.successes = 0;
            }
        }
    }

    pub fn on_failure(&mut self) {
        if !self.config.adaptive {
            return;
        }

        self.failures += 1;
        self.successes = 0;

        let next = (self.current / self.config.failure_divisor.max(1)).max(self.config.min_size);
        if next != self.current {
            warn!(
                from = self.current,
                to = next,
                failures = self.failures,
                "decreasing block batch size"
            );
            self.current = next;
            self.failures = 0;
        }
    }
}

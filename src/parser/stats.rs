use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::Recovery;
use super::strategies::Strategy;

/// Lock-free counters shared by every parse through one parser.
#[derive(Debug, Default)]
pub struct ParserStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retry_successes: AtomicU64,
    strategy_wins: [AtomicU64; Strategy::ALL.len()],
}

impl ParserStats {
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, recovery: Recovery) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        match recovery {
            Recovery::Chain(strategy) => {
                self.strategy_wins[strategy.index()].fetch_add(1, Ordering::Relaxed);
            }
            Recovery::Retry(_) => {
                self.retry_successes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> ParserStatsSnapshot {
        let strategy_wins = Strategy::ALL
            .iter()
            .map(|s| {
                (
                    s.name().to_string(),
                    self.strategy_wins[s.index()].load(Ordering::Relaxed),
                )
            })
            .filter(|(_, wins)| *wins > 0)
            .collect();

        ParserStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retry_successes: self.retry_successes.load(Ordering::Relaxed),
            strategy_wins,
        }
    }
}

/// Point-in-time copy of [`ParserStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParserStatsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub retry_successes: u64,
    pub strategy_wins: BTreeMap<String, u64>,
}

impl ParserStatsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.successes as f64 / self.attempts as f64
    }
}

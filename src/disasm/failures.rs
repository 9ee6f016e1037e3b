use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    consecutive: u32,
    last_failure: Instant,
}

/// Consecutive-failure counts per tool command, shared by every worker.
///
/// A tool that reaches `threshold` consecutive failures is skipped until
/// `cooldown` has passed since its last failure; the record is then dropped.
#[derive(Debug)]
pub struct FailureTracker {
    threshold: u32,
    cooldown: Duration,
    records: DashMap<String, FailureRecord>,
}

impl FailureTracker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            records: DashMap::new(),
        }
    }

    pub fn is_blacklisted(&self, tool: &str) -> bool {
        let Some(record) = self.records.get(tool).map(|r| *r) else {
            return false;
        };
        if record.consecutive < self.threshold {
            return false;
        }
        if record.last_failure.elapsed() < self.cooldown {
            return true;
        }

        let cooldown = self.cooldown;
        self.records
            .remove_if(tool, |_, r| r.last_failure.elapsed() >= cooldown);
        debug!(tool, "disassembler cool-down elapsed, eligible again");
        false
    }

    /// Returns the new consecutive failure count.
    pub fn record_failure(&self, tool: &str) -> u32 {
        let mut record = self
            .records
            .entry(tool.to_string())
            .or_insert(FailureRecord {
                consecutive: 0,
                last_failure: Instant::now(),
            });
        record.consecutive += 1;
        record.last_failure = Instant::now();

        let count = record.consecutive;
        if count == self.threshold {
            warn!(
                tool,
                failures = count,
                cooldown_secs = self.cooldown.as_secs(),
                "disassembler blacklisted after consecutive failures"
            );
        }
        count
    }

    pub fn record_success(&self, tool: &str) {
        self.records.remove(tool);
    }

    pub fn failure_count(&self, tool: &str) -> u32 {
        self.records.get(tool).map_or(0, |r| r.consecutive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklists_at_threshold() {
        let tracker = FailureTracker::new(2, Duration::from_secs(60));
        assert_eq!(tracker.record_failure("ildasm"), 1);
        assert!(!tracker.is_blacklisted("ildasm"));
        assert_eq!(tracker.record_failure("ildasm"), 2);
        assert!(tracker.is_blacklisted("ildasm"));
        assert!(!tracker.is_blacklisted("ilspycmd"));
    }

    #[test]
    fn success_resets_count() {
        let tracker = FailureTracker::new(3, Duration::from_secs(60));
        tracker.record_failure("ildasm");
        tracker.record_failure("ildasm");
        tracker.record_success("ildasm");
        assert_eq!(tracker.failure_count("ildasm"), 0);
        tracker.record_failure("ildasm");
        assert!(!tracker.is_blacklisted("ildasm"));
    }

    #[test]
    fn cooldown_clears_record() {
        let tracker = FailureTracker::new(1, Duration::from_millis(30));
        tracker.record_failure("ildasm");
        assert!(tracker.is_blacklisted("ildasm"));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!tracker.is_blacklisted("ildasm"));
        assert_eq!(tracker.failure_count("ildasm"), 0);
    }
}

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Remembers recently-skipped pairs so the queue does not immediately
/// re-match them. Entries are evicted lazily when read after expiry;
/// there is no background sweep.
#[derive(Debug, Default)]
pub struct PairCooldownLedger {
    entries: HashMap<String, Instant>,
}

impl PairCooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or overwrite the cooldown for a pair.
    pub fn block(&mut self, pair_key: String, duration: Duration) {
        self.entries.insert(pair_key, Instant::now() + duration);
    }

    pub fn is_blocked(&mut self, pair_key: &str) -> bool {
        match self.entries.get(pair_key) {
            Some(expires_at) if *expires_at > Instant::now() => true,
            Some(_) => {
                self.entries.remove(pair_key);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_until_expiry_then_evicted() {
        let mut ledger = PairCooldownLedger::new();
        ledger.block("a#b".into(), Duration::from_millis(40));
        assert!(ledger.is_blocked("a#b"));
        assert!(!ledger.is_blocked("a#c"));

        std::thread::sleep(Duration::from_millis(60));
        assert!(!ledger.is_blocked("a#b"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn reblocking_overwrites_expiry() {
        let mut ledger = PairCooldownLedger::new();
        ledger.block("a#b".into(), Duration::from_millis(1));
        ledger.block("a#b".into(), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ledger.is_blocked("a#b"));
    }
}

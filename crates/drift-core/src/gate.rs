use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-connection sliding-window message limiter plus the skip cooldown
/// timer. Content checks (length, word count) live in `drift_util` and
/// run before this gate; both are applied by the chat service in the
/// admission pipeline order.
#[derive(Debug)]
pub struct RateGate {
    message_window: Duration,
    message_limit: usize,
    skip_cooldown: Duration,
    timestamps: HashMap<String, Vec<Instant>>,
    last_skip: HashMap<String, Instant>,
}

impl RateGate {
    pub fn new(message_window: Duration, message_limit: usize, skip_cooldown: Duration) -> Self {
        Self {
            message_window,
            message_limit,
            skip_cooldown,
            timestamps: HashMap::new(),
            last_skip: HashMap::new(),
        }
    }

    /// Admit or reject a message at `now`. Admission records the
    /// timestamp; rejection leaves the window untouched.
    pub fn admit_message(&mut self, connection_id: &str, now: Instant) -> bool {
        let window = self.message_window;
        let timestamps = self.timestamps.entry(connection_id.to_string()).or_default();
        timestamps.retain(|ts| now.duration_since(*ts) < window);
        if timestamps.len() >= self.message_limit {
            return false;
        }
        timestamps.push(now);
        true
    }

    /// Admit a skip at `now`, recording it, or report the remaining
    /// cooldown.
    pub fn admit_skip(&mut self, connection_id: &str, now: Instant) -> Result<(), Duration> {
        if let Some(last) = self.last_skip.get(connection_id) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.skip_cooldown {
                return Err(self.skip_cooldown - elapsed);
            }
        }
        self.last_skip.insert(connection_id.to_string(), now);
        Ok(())
    }

    /// Drop all state for a disconnecting connection.
    pub fn clear(&mut self, connection_id: &str) {
        self.timestamps.remove(connection_id);
        self.last_skip.remove(connection_id);
    }
}

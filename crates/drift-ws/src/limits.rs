use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::OnceLock;
use tokio::time::Duration;

const WS_MAX_EVENTS_PER_MINUTE_DEFAULT: u32 = 240;

static EVENT_RATE_LIMITS: OnceLock<DefaultKeyedRateLimiter<String>> = OnceLock::new();

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

/// Per-connection gateway flood limit, shared by both namespaces. This is
/// transport-level abuse protection on every inbound frame; the chat
/// message gate applies its own, much tighter, domain limit afterwards.
pub fn event_rate_limits() -> &'static DefaultKeyedRateLimiter<String> {
    EVENT_RATE_LIMITS.get_or_init(|| {
        let limiter = RateLimiter::keyed(Quota::per_minute(
            NonZeroU32::new(env_u32(
                "DRIFT_WS_MAX_EVENTS_PER_MINUTE",
                WS_MAX_EVENTS_PER_MINUTE_DEFAULT,
            ))
            .unwrap_or(NonZeroU32::MIN),
        ));

        // Periodic cleanup of stale keys to prevent unbounded memory growth.
        tokio::spawn(async {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await; // skip immediate first tick
            loop {
                interval.tick().await;
                let limiter = event_rate_limits();
                limiter.retain_recent();
                limiter.shrink_to_fit();
            }
        });

        limiter
    })
}

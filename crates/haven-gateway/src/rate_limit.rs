//! Fixed-window rate limiter keyed by remote address.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    windows: DashMap<IpAddr, Window>,
    window: Duration,
    max: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max,
        }
    }

    pub fn from_config(cfg: &haven_core::config::RateLimitConfig) -> Self {
        Self::new(Duration::from_millis(cfg.window_ms), cfg.max)
    }

    /// Count one request. `Err(retry_after)` when the window is exhausted.
    pub fn check(&self, addr: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self.windows.entry(addr).or_insert_with(|| Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        entry.count += 1;
        if entry.count > self.max {
            let retry_after = self.window - now.duration_since(entry.started);
            warn!(addr = %addr, count = entry.count, "rate limit exceeded");
            Err(retry_after)
        } else {
            Ok(())
        }
    }

    /// Drop windows that lapsed; called from the background sweeper.
    pub fn sweep(&self) {
        let window = self.window;
        self.windows
            .retain(|_, w| w.started.elapsed() < window * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn allows_up_to_max_in_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
    }

    #[test]
    fn addresses_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(2)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
    }

    #[test]
    fn window_resets_after_elapse() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 1);
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check(ip(1)).is_ok());
    }

    #[test]
    fn retry_after_is_within_the_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        limiter.check(ip(1)).unwrap();
        let retry = limiter.check(ip(1)).unwrap_err();
        assert!(retry <= Duration::from_secs(60));
    }
}

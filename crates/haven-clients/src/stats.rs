use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

/// Per-upstream call counters, shared by every adapter.
///
/// Keys are service names ("openai", "tavily", "twilio", "nominatim");
/// `/health` serializes a snapshot.
#[derive(Default)]
pub struct ServiceStats {
    services: DashMap<&'static str, ServiceStat>,
}

#[derive(Default)]
struct ServiceStat {
    count: AtomicU64,
    success: AtomicU64,
    latency_ms_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatSnapshot {
    pub name: &'static str,
    pub count: u64,
    pub success: u64,
    pub avg_latency_ms: u64,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one upstream call. `started` is taken before the request is
    /// sent so timeouts are measured too.
    pub fn record(&self, service: &'static str, started: Instant, ok: bool) {
        let stat = self.services.entry(service).or_default();
        stat.count.fetch_add(1, Ordering::Relaxed);
        if ok {
            stat.success.fetch_add(1, Ordering::Relaxed);
        }
        stat.latency_ms_total
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    pub fn count(&self, service: &str) -> u64 {
        self.services
            .get(service)
            .map(|s| s.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn success(&self, service: &str) -> u64 {
        self.services
            .get(service)
            .map(|s| s.success.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<ServiceStatSnapshot> {
        let mut entries: Vec<ServiceStatSnapshot> = self
            .services
            .iter()
            .map(|entry| {
                let count = entry.count.load(Ordering::Relaxed);
                ServiceStatSnapshot {
                    name: entry.key(),
                    count,
                    success: entry.success.load(Ordering::Relaxed),
                    avg_latency_ms: if count == 0 {
                        0
                    } else {
                        entry.latency_ms_total.load(Ordering::Relaxed) / count
                    },
                }
            })
            .collect();
        entries.sort_by_key(|e| e.name);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_count_and_success_independently() {
        let stats = ServiceStats::new();
        let t = Instant::now();
        stats.record("tavily", t, true);
        stats.record("tavily", t, false);
        stats.record("tavily", t, false);

        assert_eq!(stats.count("tavily"), 3);
        assert_eq!(stats.success("tavily"), 1);
        assert_eq!(stats.count("openai"), 0);
    }

    #[test]
    fn snapshot_is_sorted_by_name() {
        let stats = ServiceStats::new();
        let t = Instant::now();
        stats.record("twilio", t, true);
        stats.record("openai", t, true);
        let snap = stats.snapshot();
        assert_eq!(snap[0].name, "openai");
        assert_eq!(snap[1].name, "twilio");
    }
}

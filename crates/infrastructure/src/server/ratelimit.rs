use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

/// When the table grows past this, stale buckets are swept on the next
/// insert so spoofed sources cannot balloon memory.
const SWEEP_THRESHOLD: usize = 16 * 1024;

#[derive(Debug)]
struct Bucket {
    /// Second index of the current window.
    window: u64,
    current: u32,
    previous: u32,
}

/// Per-source-IP limiter over a sliding one-second window.
///
/// The estimate blends the previous second's count weighted by the
/// remaining window fraction, which smooths bursts without keeping
/// per-query timestamps. Only UDP traffic is subject to it; excess
/// queries are dropped silently.
pub struct RateLimiter {
    qps: u32,
    epoch: Instant,
    buckets: DashMap<IpAddr, Mutex<Bucket>, FxBuildHasher>,
}

impl RateLimiter {
    /// `qps == 0` disables the limiter.
    pub fn new(qps: u32) -> Self {
        Self {
            qps,
            epoch: Instant::now(),
            buckets: DashMap::with_hasher(FxBuildHasher),
        }
    }

    pub fn allow(&self, ip: IpAddr) -> bool {
        if self.qps == 0 {
            return true;
        }

        let elapsed = self.epoch.elapsed();
        let now_sec = elapsed.as_secs();
        let frac = f64::from(elapsed.subsec_millis()) / 1000.0;

        if self.buckets.len() > SWEEP_THRESHOLD {
            self.buckets.retain(|_, bucket| {
                bucket
                    .lock()
                    .map(|b| now_sec.saturating_sub(b.window) <= 2)
                    .unwrap_or(false)
            });
        }

        let entry = self.buckets.entry(ip).or_insert_with(|| {
            Mutex::new(Bucket {
                window: now_sec,
                current: 0,
                previous: 0,
            })
        });
        let mut bucket = entry.lock().unwrap();

        if bucket.window != now_sec {
            bucket.previous = if bucket.window + 1 == now_sec {
                bucket.current
            } else {
                0
            };
            bucket.current = 0;
            bucket.window = now_sec;
        }

        let estimate = f64::from(bucket.current) + f64::from(bucket.previous) * (1.0 - frac);
        if estimate >= f64::from(self.qps) {
            return false;
        }
        bucket.current += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced_within_window() {
        let limiter = RateLimiter::new(20);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let allowed = (0..100).filter(|_| limiter.allow(ip)).count();
        assert!(allowed <= 20, "allowed {} > 20", allowed);
        assert!(allowed > 0);
    }

    #[test]
    fn test_sources_are_independent() {
        let limiter = RateLimiter::new(5);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        for _ in 0..5 {
            assert!(limiter.allow(a));
        }
        assert!(!limiter.allow(a));
        assert!(limiter.allow(b));
    }

    #[test]
    fn test_zero_disables() {
        let limiter = RateLimiter::new(0);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!((0..1000).all(|_| limiter.allow(ip)));
    }
}

use service_core::middleware::rate_limit::{
    create_keyed_rate_limiter, retry_after_secs, KeyedRateLimiter,
};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after_secs: u64 },
}

/// Token bucket per key (client address or identity id). A denied check
/// does not consume a token, and concurrent checks on one key are safe.
#[derive(Clone)]
pub struct RateLimiter {
    scope: &'static str,
    limiter: KeyedRateLimiter,
}

impl RateLimiter {
    pub fn new(scope: &'static str, per_minute: u32, burst: u32) -> Self {
        Self {
            scope,
            limiter: create_keyed_rate_limiter(per_minute, burst),
        }
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    pub fn check(&self, key: &str) -> Admission {
        match self.limiter.check_key(&key.to_string()) {
            Ok(_) => Admission::Allowed,
            Err(negative) => Admission::Denied {
                retry_after_secs: retry_after_secs(&negative),
            },
        }
    }

    pub fn admit(&self, key: &str) -> bool {
        self.check(key) == Admission::Allowed
    }

    /// Drop buckets that have refilled completely.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_burst_then_denied_with_retry_hint() {
        let limiter = RateLimiter::new("login", 5, 3);
        for _ in 0..3 {
            assert!(limiter.admit("198.51.100.1"));
        }
        match limiter.check("198.51.100.1") {
            Admission::Denied { retry_after_secs } => assert!(retry_after_secs >= 1),
            Admission::Allowed => panic!("fourth request should be denied"),
        }
        assert!(limiter.admit("198.51.100.2"));
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_burst() {
        let limiter = Arc::new(RateLimiter::new("transfer", 1, 10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..10).filter(|_| limiter.admit("identity")).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }
}

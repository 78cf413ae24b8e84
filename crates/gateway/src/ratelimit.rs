//! Token-bucket rate limiting per identity.
//!
//! One bucket per `(identity, window)`: an authenticated request is keyed by
//! the token's subject, an anonymous one by the peer IP. Buckets refill
//! continuously at the configured per-minute rate; an empty bucket rejects
//! with a retry-after hint.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use ag_domain::config::RateLimitConfig;

/// The rate-limit identity a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Subject(String),
    Ip(String),
}

impl Identity {
    pub fn key(&self) -> String {
        match self {
            Identity::Subject(s) => format!("token:{s}"),
            Identity::Ip(ip) => format!("ip:{ip}"),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBuckets {
    cfg: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBuckets {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            cfg,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn rate_per_minute(&self, identity: &Identity) -> f64 {
        match identity {
            Identity::Subject(_) => self.cfg.per_token_per_minute as f64,
            Identity::Ip(_) => self.cfg.per_ip_per_minute as f64,
        }
    }

    /// Take one token from the identity's bucket. On an empty bucket,
    /// returns the seconds until the next token as the retry-after hint.
    pub fn check(&self, identity: &Identity) -> Result<(), u64> {
        self.check_at(identity, Instant::now())
    }

    fn check_at(&self, identity: &Identity, now: Instant) -> Result<(), u64> {
        let rate = self.rate_per_minute(identity);
        if rate <= 0.0 {
            return Ok(()); // limit disabled
        }
        let capacity = (rate * self.cfg.burst_multiplier.max(1.0)).max(1.0);
        let per_sec = rate / 60.0;

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(identity.key()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * per_sec).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            Err((deficit / per_sec).ceil() as u64)
        }
    }

    /// Drop stale buckets (idle longer than one full refill window).
    pub fn sweep(&self) {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        buckets.retain(|_, b| now.duration_since(b.last_refill).as_secs() < 120);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(token_rpm: u32, ip_rpm: u32) -> TokenBuckets {
        TokenBuckets::new(RateLimitConfig {
            per_token_per_minute: token_rpm,
            per_ip_per_minute: ip_rpm,
            burst_multiplier: 1.0,
        })
    }

    #[test]
    fn sixty_first_request_in_a_minute_is_rejected_with_hint() {
        let buckets = limiter(60, 120);
        let id = Identity::Subject("alice".into());
        let now = Instant::now();

        for _ in 0..60 {
            assert!(buckets.check_at(&id, now).is_ok());
        }
        let retry_after = buckets.check_at(&id, now).unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn separate_identities_have_separate_buckets() {
        let buckets = limiter(1, 1);
        let now = Instant::now();
        assert!(buckets
            .check_at(&Identity::Subject("a".into()), now)
            .is_ok());
        assert!(buckets
            .check_at(&Identity::Subject("b".into()), now)
            .is_ok());
        assert!(buckets.check_at(&Identity::Ip("1.2.3.4".into()), now).is_ok());
        assert!(buckets
            .check_at(&Identity::Subject("a".into()), now)
            .is_err());
    }

    #[test]
    fn bucket_refills_over_time() {
        let buckets = limiter(60, 120);
        let id = Identity::Subject("carol".into());
        let start = Instant::now();

        for _ in 0..60 {
            assert!(buckets.check_at(&id, start).is_ok());
        }
        assert!(buckets.check_at(&id, start).is_err());

        // One second refills one token at 60 rpm.
        let later = start + Duration::from_secs(1);
        assert!(buckets.check_at(&id, later).is_ok());
        assert!(buckets.check_at(&id, later).is_err());
    }

    #[test]
    fn ip_rate_is_independent_of_token_rate() {
        let buckets = limiter(1, 3);
        let now = Instant::now();
        let ip = Identity::Ip("10.0.0.1".into());
        for _ in 0..3 {
            assert!(buckets.check_at(&ip, now).is_ok());
        }
        assert!(buckets.check_at(&ip, now).is_err());
    }

    #[test]
    fn burst_multiplier_raises_capacity() {
        let buckets = TokenBuckets::new(RateLimitConfig {
            per_token_per_minute: 10,
            per_ip_per_minute: 10,
            burst_multiplier: 2.0,
        });
        let id = Identity::Subject("burst".into());
        let now = Instant::now();
        for _ in 0..20 {
            assert!(buckets.check_at(&id, now).is_ok());
        }
        assert!(buckets.check_at(&id, now).is_err());
    }

    #[test]
    fn identity_keys_do_not_collide() {
        assert_ne!(
            Identity::Subject("x".into()).key(),
            Identity::Ip("x".into()).key()
        );
    }
}

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Mutable part of a bucket, guarded by the bucket mutex.
struct BucketState {
    rate: f64,
    burst: f64,
    /// Current balance. Negative means the bucket is in debt.
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        // Instants from other threads may lag behind the last refill
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
            self.last_refill = now;
        }
    }
}

/// Token bucket for a single rate type at a single scope.
///
/// Refill is computed lazily on each check. A request is admitted while the
/// balance is not in debt and is then charged its full weight, so one large
/// request can push the balance below zero; later requests are denied until
/// refill pays the debt back. A denied request charges nothing.
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket that starts full.
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                rate,
                burst,
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket with rate `+inf`; always admits.
    pub fn unlimited() -> Self {
        Self::new(f64::INFINITY, f64::INFINITY)
    }

    /// Bucket whose burst is derived from the rate.
    pub fn with_rate(rate: f64) -> Self {
        Self::new(rate, derive_burst(rate))
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Try to admit `n` units now.
    pub fn allow(&self, n: u64) -> bool {
        self.allow_at(n, Instant::now())
    }

    /// Try to admit `n` units at `now`.
    pub fn allow_at(&self, n: u64, now: Instant) -> bool {
        let mut state = self.lock();
        if state.rate == f64::INFINITY {
            return true;
        }
        if state.rate == 0.0 {
            return false;
        }

        state.refill(now);
        if state.tokens < 0.0 {
            return false;
        }
        state.tokens -= n as f64;
        true
    }

    /// Replace rate and burst.
    ///
    /// The balance is brought up to date under the old rate and kept as is,
    /// it is only clamped to the new burst on the next refill. A bucket that
    /// was unlimited starts full.
    pub fn set_rate(&self, rate: f64, burst: f64) {
        let mut state = self.lock();
        let now = Instant::now();
        if state.rate == f64::INFINITY {
            state.tokens = burst;
        } else if state.rate != 0.0 {
            state.refill(now);
        }
        state.rate = rate;
        state.burst = burst;
        state.last_refill = now;
    }

    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    pub fn burst(&self) -> f64 {
        self.lock().burst
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate() == f64::INFINITY
    }

    /// Current balance; only meaningful for limited buckets.
    pub fn tokens(&self) -> f64 {
        self.lock().tokens
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TokenBucket")
            .field("rate", &state.rate)
            .field("burst", &state.burst)
            .field("tokens", &state.tokens)
            .finish()
    }
}

/// Burst allowed for a configured rate: one second worth of traffic.
pub fn derive_burst(rate: f64) -> f64 {
    rate
}

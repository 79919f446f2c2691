use crate::ratelimit::{ErrorCode, QuotaState, RateType, ScopeId};
use std::fmt;

/// Why a request was not admitted.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionError {
    /// A token bucket denied the request; retry after backoff.
    RateLimitExceeded {
        scope: ScopeId,
        rate_type: RateType,
        rate: f64,
    },
    /// A control-plane declared state denies the request until it clears.
    QuotaExceeded {
        scope: ScopeId,
        state: QuotaState,
        code: ErrorCode,
    },
}

impl AdmissionError {
    /// Error code surfaced to clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            AdmissionError::RateLimitExceeded { .. } => ErrorCode::RateLimit,
            AdmissionError::QuotaExceeded { code, .. } => *code,
        }
    }

    pub fn wire_code(&self) -> i32 {
        self.code().wire_code()
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, AdmissionError::RateLimitExceeded { .. })
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, AdmissionError::QuotaExceeded { .. })
    }
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::RateLimitExceeded {
                scope,
                rate_type,
                rate,
            } => write!(
                f,
                "rate limit exceeded for {} at {}, rate={}",
                rate_type, scope, rate
            ),
            AdmissionError::QuotaExceeded { scope, state, code } => {
                write!(f, "quota exceeded at {} ({}): {}", scope, state, code)
            }
        }
    }
}

impl std::error::Error for AdmissionError {}

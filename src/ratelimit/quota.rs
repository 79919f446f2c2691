use super::rate_type::{AccessKind, RateType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Control-plane declared deny condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuotaState {
    DenyToWrite,
    DenyToRead,
    DenyToDdl,
}

impl QuotaState {
    /// Whether this state denies requests of `rate_type`.
    pub fn applies_to(self, rate_type: RateType) -> bool {
        match self {
            QuotaState::DenyToWrite => rate_type.access_kind() == AccessKind::Write,
            QuotaState::DenyToRead => rate_type.access_kind() == AccessKind::Read,
            QuotaState::DenyToDdl => rate_type.is_ddl(),
        }
    }
}

impl fmt::Display for QuotaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reason attached to a denial. The numeric values are part of the client
/// wire protocol and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorCode {
    ForceDeny,
    RateLimit,
    MemoryQuotaExhausted,
    DiskQuotaExhausted,
    TimeTickLongDelay,
}

impl ErrorCode {
    pub fn wire_code(self) -> i32 {
        match self {
            ErrorCode::ForceDeny => 48,
            ErrorCode::RateLimit => 49,
            ErrorCode::MemoryQuotaExhausted => 53,
            ErrorCode::DiskQuotaExhausted => 54,
            ErrorCode::TimeTickLongDelay => 55,
        }
    }

    /// Operator facing explanation.
    pub fn reason(self) -> &'static str {
        match self {
            ErrorCode::ForceDeny => "access has been deactivated by the administrator",
            ErrorCode::RateLimit => "request rate is over the configured limit",
            ErrorCode::MemoryQuotaExhausted => {
                "memory quota exceeded, please allocate more resources"
            }
            ErrorCode::DiskQuotaExhausted => "disk quota exceeded, please allocate more resources",
            ErrorCode::TimeTickLongDelay => "time tick long delay",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_applicability() {
        assert!(QuotaState::DenyToWrite.applies_to(RateType::DmlInsert));
        assert!(QuotaState::DenyToWrite.applies_to(RateType::DdlCollection));
        assert!(!QuotaState::DenyToWrite.applies_to(RateType::DqlSearch));

        assert!(QuotaState::DenyToRead.applies_to(RateType::DqlQuery));
        assert!(!QuotaState::DenyToRead.applies_to(RateType::DmlDelete));

        assert!(QuotaState::DenyToDdl.applies_to(RateType::DdlIndex));
        assert!(!QuotaState::DenyToDdl.applies_to(RateType::DmlInsert));
    }

    #[test]
    fn test_wire_codes_are_stable() {
        assert_eq!(ErrorCode::ForceDeny.wire_code(), 48);
        assert_eq!(ErrorCode::RateLimit.wire_code(), 49);
        assert_eq!(ErrorCode::DiskQuotaExhausted.wire_code(), 54);
    }
}

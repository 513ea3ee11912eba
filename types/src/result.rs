use crate::{address::Address, value::TypedValue};
use std::fmt;

/// First status code reserved for contract-defined reverts.
pub const REVERT_CODE_BASE: u16 = 32;

/// Largest contract-defined revert code.
pub const MAX_REVERT_CODE: u16 = 999 - REVERT_CODE_BASE;

/// Outcome class of a transaction or nested call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    /// Any failure not classified by another status.
    UnknownFailure,
    ContractNotFound,
    MethodNotFound,
    MethodNotPayable,
    IllegalFormat,
    InvalidParameter,
    AccessDenied,
    /// Step budget exhausted.
    OutOfStep,
    OutOfBalance,
    StackOverflow,
    /// Contract-requested revert with a user code.
    Reverted(u16),
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Self::Success => 0,
            Self::UnknownFailure => 1,
            Self::ContractNotFound => 2,
            Self::MethodNotFound => 3,
            Self::MethodNotPayable => 4,
            Self::IllegalFormat => 5,
            Self::InvalidParameter => 6,
            Self::AccessDenied => 9,
            Self::OutOfStep => 10,
            Self::OutOfBalance => 11,
            Self::StackOverflow => 13,
            Self::Reverted(code) => REVERT_CODE_BASE + (*code).min(MAX_REVERT_CODE),
        }
    }

    /// Map a numeric code back to its status. Unassigned codes map to
    /// [Status::UnknownFailure].
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Success,
            2 => Self::ContractNotFound,
            3 => Self::MethodNotFound,
            4 => Self::MethodNotPayable,
            5 => Self::IllegalFormat,
            6 => Self::InvalidParameter,
            9 => Self::AccessDenied,
            10 => Self::OutOfStep,
            11 => Self::OutOfBalance,
            13 => Self::StackOverflow,
            c if (REVERT_CODE_BASE..=REVERT_CODE_BASE + MAX_REVERT_CODE).contains(&c) => {
                Self::Reverted(c - REVERT_CODE_BASE)
            }
            _ => Self::UnknownFailure,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Self::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::UnknownFailure => write!(f, "UnknownFailure"),
            Self::ContractNotFound => write!(f, "ContractNotFound"),
            Self::MethodNotFound => write!(f, "MethodNotFound"),
            Self::MethodNotPayable => write!(f, "MethodNotPayable"),
            Self::IllegalFormat => write!(f, "IllegalFormat"),
            Self::InvalidParameter => write!(f, "InvalidParameter"),
            Self::AccessDenied => write!(f, "AccessDenied"),
            Self::OutOfStep => write!(f, "OutOfStep"),
            Self::OutOfBalance => write!(f, "OutOfBalance"),
            Self::StackOverflow => write!(f, "StackOverflow"),
            Self::Reverted(code) => write!(f, "Reverted({code})"),
        }
    }
}

/// Event emitted by a contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventLog {
    pub address: Address,
    pub indexed: Vec<TypedValue>,
    pub data: Vec<TypedValue>,
}

/// Outcome of running a [crate::Transaction].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxResult {
    pub status: Status,
    pub steps_used: u64,
    /// Value returned by the invoked method (or the created address).
    pub value: Option<TypedValue>,
    /// Human-readable failure detail.
    pub failure: Option<String>,
    /// Events emitted by the transaction; empty unless it succeeded.
    pub events: Vec<EventLog>,
    /// Debug log lines; only collected for debuggable contract images.
    pub logs: Vec<String>,
}

impl TxResult {
    pub fn success(value: Option<TypedValue>) -> Self {
        Self {
            status: Status::Success,
            steps_used: 0,
            value,
            failure: None,
            events: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn failure(status: Status, detail: impl Into<String>) -> Self {
        Self {
            status,
            steps_used: 0,
            value: None,
            failure: Some(detail.into()),
            events: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::UnknownFailure.code(), 1);
        assert_eq!(Status::InvalidParameter.code(), 6);
        assert_eq!(Status::OutOfStep.code(), 10);
        assert_eq!(Status::Reverted(0).code(), 32);
        assert_eq!(Status::Reverted(5).code(), 37);
    }

    #[test]
    fn from_code_inverts_code() {
        for status in [
            Status::Success,
            Status::ContractNotFound,
            Status::MethodNotFound,
            Status::MethodNotPayable,
            Status::IllegalFormat,
            Status::InvalidParameter,
            Status::AccessDenied,
            Status::OutOfStep,
            Status::OutOfBalance,
            Status::StackOverflow,
            Status::Reverted(12),
        ] {
            assert_eq!(Status::from_code(status.code()), status);
        }
    }

    #[test]
    fn unassigned_codes_are_unknown() {
        assert_eq!(Status::from_code(7), Status::UnknownFailure);
        assert_eq!(Status::from_code(2000), Status::UnknownFailure);
    }

    #[test]
    fn oversized_revert_codes_saturate() {
        assert_eq!(Status::Reverted(u16::MAX).code(), 999);
    }
}

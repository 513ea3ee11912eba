use crate::{loader::LoadError, state::CheckpointError};
use stratum_types::{Address, Status};
use thiserror::Error;

/// Infrastructure failure that aborts execution instead of producing a
/// [stratum_types::TxResult].
#[derive(Debug, Error)]
pub enum Fault {
    #[error("instrumentation is already bound to this thread")]
    AlreadyBound,
    #[error("instrumentation is not bound (executor not started)")]
    NotStarted,
    #[error("instrumentation is already attached to a transaction")]
    AlreadyAttached,
    #[error("instrumentation is not attached to a transaction")]
    NotAttached,
    #[error("failed to load contract {address}")]
    Load {
        address: Address,
        #[source]
        source: LoadError,
    },
    #[error("state access failed")]
    State(#[source] anyhow::Error),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("no transaction task is active")]
    NoTask,
    #[error("reentrancy stack has no frame {0}")]
    Frame(usize),
}

/// Failure raised while running contract code. Every variant except
/// [ContractError::Fatal] and [ContractError::Aborted] becomes a failed result
/// for the call that raised it.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("reverted ({code}): {message}")]
    Revert { code: u16, message: String },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("method not payable: {0}")]
    MethodNotPayable(String),
    #[error("illegal format: {0}")]
    IllegalFormat(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("out of balance: {0}")]
    OutOfBalance(String),
    #[error("out of step")]
    OutOfStep,
    #[error("call to {address} failed with {status}: {message}")]
    Call {
        address: Address,
        status: Status,
        message: String,
    },
    #[error(transparent)]
    Fatal(#[from] Fault),
    /// A fault was recorded for the transaction; it is reported to the
    /// top-level caller instead of a result.
    #[error("transaction aborted by an infrastructure fault")]
    Aborted,
    #[error("{0:#}")]
    Unknown(#[from] anyhow::Error),
}

impl ContractError {
    pub fn revert(code: u16, message: impl Into<String>) -> Self {
        Self::Revert {
            code,
            message: message.into(),
        }
    }

    /// Status reported for this failure. Uncategorized errors map to
    /// [Status::UnknownFailure].
    pub fn status(&self) -> Status {
        match self {
            Self::Revert { code, .. } => Status::Reverted(*code),
            Self::InvalidParameter(_) => Status::InvalidParameter,
            Self::MethodNotFound(_) => Status::MethodNotFound,
            Self::MethodNotPayable(_) => Status::MethodNotPayable,
            Self::IllegalFormat(_) => Status::IllegalFormat,
            Self::AccessDenied(_) => Status::AccessDenied,
            Self::OutOfBalance(_) => Status::OutOfBalance,
            Self::OutOfStep => Status::OutOfStep,
            Self::Call { status, .. } => *status,
            Self::Fatal(_) | Self::Aborted | Self::Unknown(_) => Status::UnknownFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn uncategorized_errors_are_unknown_failures() {
        let err: ContractError = anyhow!("division by zero").into();
        assert_eq!(err.status(), Status::UnknownFailure);
        assert_eq!(err.to_string(), "division by zero");
    }

    #[test]
    fn nested_failures_keep_their_status() {
        let err = ContractError::Call {
            address: Address::contract([3; 20]),
            status: Status::InvalidParameter,
            message: "missing name".to_string(),
        };
        assert_eq!(err.status(), Status::InvalidParameter);
    }

    #[test]
    fn reverts_carry_user_code() {
        assert_eq!(ContractError::revert(7, "no").status(), Status::Reverted(7));
    }
}

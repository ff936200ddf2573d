//! Registry error taxonomy
//!
//! Every failed operation aborts with one of these variants. No state change
//! and no event survives a failed call.

use std::fmt;

/// Error returned by registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Caller is not the owner / validator / author / administrator
    Authorization(String),
    /// Input rejected: out-of-range value, reserved key, duplicate hash
    Validation(String),
    /// Referenced state is missing or in the wrong phase
    State(String),
    /// Wallet-binding signature or its deadline was rejected
    Signature(String),
    /// The executor could not persist a transaction; it was rolled back
    Storage(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

impl RegistryError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        RegistryError::Authorization(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        RegistryError::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        RegistryError::State(msg.into())
    }

    pub fn signature(msg: impl Into<String>) -> Self {
        RegistryError::Signature(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        RegistryError::Storage(msg.into())
    }

    /// Stable lowercase label, used by the RPC layer to pick a status code
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::Authorization(_) => "authorization",
            RegistryError::Validation(_) => "validation",
            RegistryError::State(_) => "state",
            RegistryError::Signature(_) => "signature",
            RegistryError::Storage(_) => "storage",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RegistryError::Authorization(m)
            | RegistryError::Validation(m)
            | RegistryError::State(m)
            | RegistryError::Signature(m)
            | RegistryError::Storage(m) => m,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind(), self.message())
    }
}

impl std::error::Error for RegistryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_kind_and_message() {
        let err = RegistryError::signature("invalid wallet sig");
        assert_eq!(err.kind(), "signature");
        assert_eq!(err.to_string(), "signature error: invalid wallet sig");
    }

    #[test]
    fn test_message_accessor() {
        assert_eq!(RegistryError::state("index out of bounds").message(), "index out of bounds");
        assert_eq!(RegistryError::unauthorized("not authorized").kind(), "authorization");
    }
}

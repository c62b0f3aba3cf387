// src/error.rs
use thiserror::Error;

use crate::rpc::RpcError;

/// Errors surfaced to whoever invoked a printer operation.
///
/// Connectivity trouble inside the supervisor never shows up here; it is
/// absorbed by the retry loops and only visible as printer state.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Printer not found: {0}")]
    NotFound(String),
    #[error("Printer unreachable: {0}")]
    Unreachable(String),
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("RPC error: {0}")]
    Rpc(RpcError),
}

impl From<RpcError> for HubError {
    /// Link-level failures become `Unreachable`; anything the printer itself
    /// answered stays an RPC error.
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Closed | RpcError::Timeout | RpcError::Connect(_) => {
                HubError::Unreachable(e.to_string())
            }
            other => HubError::Rpc(other),
        }
    }
}

impl HubError {
    pub fn invalid(message: impl Into<String>) -> Self {
        HubError::InvalidArgument(message.into())
    }
}

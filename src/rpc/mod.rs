//! Bidirectional JSON-RPC link to a printer's Moonraker API.
//!
//! The supervisor only talks to the [`RpcTransport`] trait so the link can be
//! swapped for a scripted one in tests.

pub mod message;
pub mod websocket;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

pub use websocket::MoonrakerSocket;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcError {
    #[error("link is closed")]
    Closed,
    #[error("call timed out")]
    Timeout,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
}

/// Events a link reports after [`RpcTransport::open`] is called.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Open,
    Close,
    /// Server push keyed by method name with its positional payload.
    Notify { method: String, params: Vec<Value> },
}

#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Start the link. `Open`, `Close` and notifications are reported on
    /// `events` for as long as this link lives.
    async fn open(&self, events: UnboundedSender<LinkEvent>) -> Result<(), RpcError>;

    /// Tear the link down. Pending calls fail with [`RpcError::Closed`].
    async fn close(&self);

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError>;
}

// src/rpc/websocket.rs - Moonraker JSON-RPC over a websocket
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::message::{Incoming, RpcRequest};
use super::{LinkEvent, RpcError, RpcTransport};

type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>>;

/// One live socket: the outbound queue plus its reader/writer tasks.
struct Link {
    outgoing: mpsc::UnboundedSender<Message>,
    tasks: Vec<JoinHandle<()>>,
}

/// Websocket link to `<host>/websocket`.
///
/// Calls are correlated with responses through a table of pending ids. A call
/// whose reply never arrives fails with [`RpcError::Timeout`].
///
/// A `close` that lands while `open` is still handshaking wins: the late
/// stream is dropped and `open` fails with [`RpcError::Closed`].
pub struct MoonrakerSocket {
    url: String,
    call_timeout: Duration,
    link: Mutex<Option<Link>>,
    /// Bumped by every `close`, under the `link` lock.
    closes: AtomicU64,
    pending: PendingCalls,
    next_id: AtomicU64,
}

impl MoonrakerSocket {
    pub fn new(url: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            call_timeout,
            link: Mutex::new(None),
            closes: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

async fn fail_pending(pending: &PendingCalls) {
    let mut pending_guard = pending.lock().await;
    for (_, sender) in pending_guard.drain() {
        let _ = sender.send(Err(RpcError::Closed));
    }
}

async fn dispatch(pending: &PendingCalls, events: &mpsc::UnboundedSender<LinkEvent>, text: &str) {
    match Incoming::parse(text) {
        Ok(Incoming::Response { id, outcome }) => {
            let sender = pending.lock().await.remove(&id);
            match sender {
                Some(sender) => {
                    let _ = sender.send(outcome);
                }
                None => tracing::debug!("Response for unknown call id {}", id),
            }
        }
        Ok(Incoming::Notification { method, params }) => {
            tracing::trace!("Notification: {}", method);
            let _ = events.send(LinkEvent::Notify { method, params });
        }
        Err(e) => tracing::debug!("Dropping undecodable frame: {}", e),
    }
}

#[async_trait]
impl RpcTransport for MoonrakerSocket {
    async fn open(&self, events: mpsc::UnboundedSender<LinkEvent>) -> Result<(), RpcError> {
        self.close().await;
        let generation = self.closes.load(Ordering::Acquire);

        tracing::debug!("Connecting to {}", self.url);
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RpcError::Connect(e.to_string()))?;

        // Calls issued in reaction to `Open` must find the link in place.
        let mut link_guard = self.link.lock().await;
        if self.closes.load(Ordering::Acquire) != generation {
            tracing::debug!("Link to {} closed during handshake", self.url);
            return Err(RpcError::Closed);
        }
        let (mut sink, mut source) = stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::debug!("Websocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending = self.pending.clone();
        let url = self.url.clone();
        let reader_events = events.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => dispatch(&pending, &reader_events, text.as_str()).await,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Websocket {} read error: {}", url, e);
                        break;
                    }
                }
            }
            fail_pending(&pending).await;
            let _ = reader_events.send(LinkEvent::Close);
        });

        *link_guard = Some(Link { outgoing, tasks: vec![writer, reader] });
        drop(link_guard);
        let _ = events.send(LinkEvent::Open);
        Ok(())
    }

    async fn close(&self) {
        let link = {
            let mut link_guard = self.link.lock().await;
            self.closes.fetch_add(1, Ordering::AcqRel);
            link_guard.take()
        };
        if let Some(link) = link {
            for task in link.tasks {
                task.abort();
            }
            tracing::debug!("Closed link to {}", self.url);
        }
        fail_pending(&self.pending).await;
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let outgoing = {
            let link_guard = self.link.lock().await;
            link_guard.as_ref().map(|link| link.outgoing.clone())
        }
        .ok_or(RpcError::Closed)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_string(&RpcRequest::new(id, method, params))
            .map_err(|e| RpcError::Protocol(e.to_string()))?;

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, response_tx);

        if outgoing.send(Message::text(payload)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::Closed);
        }

        match tokio::time::timeout(self.call_timeout, response_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::debug!("Call '{}' timed out", method);
                Err(RpcError::Timeout)
            }
        }
    }
}

impl Drop for MoonrakerSocket {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            for task in link.tasks {
                task.abort();
            }
        }
    }
}

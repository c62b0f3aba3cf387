// src/printer/probe.rs
//! Heartbeat against the printer's HTTP control endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use super::supervisor::SupervisorEvent;

#[async_trait]
pub trait LivenessProbe: Send + Sync + 'static {
    /// `true` iff the endpoint answered successfully in time. Every failure
    /// mode folds into `false`.
    async fn probe(&self) -> bool;
}

/// `GET <host>/api/server`, bounded by a short timeout.
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(host: &str, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            url: format!("{}/api/server", host.trim_end_matches('/')),
            client,
            timeout,
        }
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).timeout(self.timeout).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::trace!("Probe {} failed: {}", self.url, e);
                false
            }
        }
    }
}

/// Remembers the last probe result and reports only edges.
#[derive(Debug, Clone, Copy)]
pub struct LivenessTracker {
    previous: bool,
}

impl LivenessTracker {
    pub fn new(initial: bool) -> Self {
        Self { previous: initial }
    }

    /// Returns the new value when it differs from the previous observation.
    pub fn observe(&mut self, online: bool) -> Option<bool> {
        if online == self.previous {
            return None;
        }
        self.previous = online;
        Some(online)
    }
}

/// Probe forever, one probe at a time, forwarding liveness edges to the
/// supervisor. The printer is presumed offline before the first probe.
///
/// Ends only when the supervisor has gone away.
pub async fn run_heartbeat(
    name: String,
    probe: Arc<dyn LivenessProbe>,
    interval: Duration,
    events: UnboundedSender<SupervisorEvent>,
) {
    let mut tracker = LivenessTracker::new(false);
    loop {
        let online = probe.probe().await;
        if let Some(online) = tracker.observe(online) {
            tracing::info!("[{}]: server online {}", name, online);
            if events.send(SupervisorEvent::Liveness(online)).is_err() {
                break;
            }
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[test]
    fn only_edges_are_reported() {
        let mut tracker = LivenessTracker::new(true);
        let notifications: Vec<bool> = [true, true, false, true]
            .into_iter()
            .filter_map(|online| tracker.observe(online))
            .collect();
        assert_eq!(notifications, vec![false, true]);
    }

    #[test]
    fn first_success_from_presumed_offline_is_an_edge() {
        let mut tracker = LivenessTracker::new(false);
        assert_eq!(tracker.observe(false), None);
        assert_eq!(tracker.observe(true), Some(true));
    }

    struct Scripted(Mutex<VecDeque<bool>>);

    #[async_trait]
    impl LivenessProbe for Scripted {
        async fn probe(&self) -> bool {
            self.0.lock().unwrap().pop_front().unwrap_or(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_forwards_edges_only() {
        let probe = Arc::new(Scripted(Mutex::new(VecDeque::from(vec![
            false, true, true, false, true,
        ]))));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_heartbeat(
            "test".into(),
            probe,
            Duration::from_millis(1500),
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(1500 * 6)).await;
        task.abort();

        let mut seen = Vec::new();
        while let Ok(SupervisorEvent::Liveness(online)) = rx.try_recv() {
            seen.push(online);
        }
        assert_eq!(seen, vec![true, false, true]);
    }
}

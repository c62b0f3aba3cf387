// src/printer/mod.rs - Per-printer actor: supervisor, heartbeat and published view
pub mod commands;
pub mod estimator;
pub mod job;
pub mod probe;
pub mod status;
pub mod supervisor;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::{PrinterConfig, TimingConfig};
use crate::hass::HomeAutomation;
use crate::rpc::RpcTransport;
use estimator::JobEstimate;
use job::JobContext;
use probe::LivenessProbe;
use status::StatusSnapshot;
use supervisor::Supervisor;

pub use commands::HeaterId;

/// State of the RPC link to the printer's control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Offline,
    LinkOpening,
    LinkOpen,
}

/// Readiness of the Klipper firmware behind the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareState {
    Disconnected,
    Ready,
    Shutdown,
}

impl FirmwareState {
    /// Map the `state` reported by `printer.info`.
    pub fn from_info_state(state: &str) -> Self {
        match state {
            "ready" => FirmwareState::Ready,
            "shutdown" | "error" => FirmwareState::Shutdown,
            _ => FirmwareState::Disconnected,
        }
    }
}

/// Read-only projection published after every state change.
#[derive(Debug, Clone, Serialize)]
pub struct PrinterView {
    pub config: PrinterConfig,
    pub connection: ConnectionState,
    pub firmware: FirmwareState,
    #[serde(flatten)]
    pub status: StatusSnapshot,
    pub job: Option<JobEstimate>,
    #[serde(skip)]
    pub job_context: Option<JobContext>,
}

impl PrinterView {
    pub fn offline(config: PrinterConfig) -> Self {
        Self {
            config,
            connection: ConnectionState::Offline,
            firmware: FirmwareState::Disconnected,
            status: StatusSnapshot::default(),
            job: None,
            job_context: None,
        }
    }

    /// Fresh estimate against the current wall clock, `None` when no file is loaded.
    pub fn job_estimate(&self) -> Option<JobEstimate> {
        self.status.filename()?;
        Some(estimator::estimate(
            &self.config.key,
            &self.status,
            self.job_context.as_ref(),
            Utc::now(),
        ))
    }
}

/// Change notification relayed to subscribers.
#[derive(Debug, Clone)]
pub struct PrinterUpdate {
    pub key: String,
    pub view: Arc<PrinterView>,
}

/// Collaborators one printer actor needs.
pub struct PrinterServices {
    pub transport: Arc<dyn RpcTransport>,
    pub probe: Arc<dyn LivenessProbe>,
    pub hass: Arc<dyn HomeAutomation>,
    pub http: reqwest::Client,
}

/// Cheap, cloneable handle onto one printer actor.
#[derive(Clone)]
pub struct PrinterHandle {
    config: Arc<PrinterConfig>,
    transport: Arc<dyn RpcTransport>,
    hass: Arc<dyn HomeAutomation>,
    http: reqwest::Client,
    view: watch::Receiver<Arc<PrinterView>>,
}

impl PrinterHandle {
    pub fn key(&self) -> &str {
        &self.config.key
    }

    pub fn config(&self) -> &PrinterConfig {
        &self.config
    }

    /// Current aggregated view; never a half-applied transition.
    pub fn snapshot(&self) -> Arc<PrinterView> {
        self.view.borrow().clone()
    }

    pub fn job_estimate(&self) -> Option<JobEstimate> {
        self.snapshot().job_estimate()
    }

    /// Watch channel that changes with every published view.
    pub fn watch(&self) -> watch::Receiver<Arc<PrinterView>> {
        self.view.clone()
    }
}

/// Start the supervisor and heartbeat tasks for one printer.
pub fn spawn_printer(
    config: PrinterConfig,
    services: PrinterServices,
    timing: &TimingConfig,
    updates: broadcast::Sender<PrinterUpdate>,
) -> PrinterHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(Arc::new(PrinterView::offline(config.clone())));

    let supervisor = Supervisor::new(
        config.clone(),
        services.transport.clone(),
        timing.retry_interval(),
        events_tx.clone(),
        view_tx,
        updates,
    );
    tokio::spawn(supervisor.run(events_rx));
    tokio::spawn(probe::run_heartbeat(
        config.name.clone(),
        services.probe,
        timing.heartbeat_interval(),
        events_tx,
    ));

    tracing::info!("[{}]: supervising {}", config.name, config.host);

    PrinterHandle {
        config: Arc::new(config),
        transport: services.transport,
        hass: services.hass,
        http: services.http,
        view: view_rx,
    }
}

// src/printer/supervisor.rs - Connection supervisor for one printer
//! Single-task state machine owning the link, firmware state and snapshot of
//! one printer.
//!
//! Every input (heartbeat edge, link event, RPC completion, retry timer)
//! arrives as one [`SupervisorEvent`]. An event is handled to completion and
//! the resulting view is published at most once, so sub-steps of a transition
//! coalesce into a single notification.
//!
//! Asynchronous work is tagged: link events with the link epoch they belong
//! to, RPC completions and retry timers with the session they were started
//! in. A session ends whenever the link goes down or the firmware leaves
//! `Ready`; its outstanding tasks are aborted and any late message carrying
//! its tag is dropped.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::job::{self, JobContext};
use super::status::{self, StatusSnapshot};
use super::{ConnectionState, FirmwareState, PrinterUpdate, PrinterView};
use crate::config::PrinterConfig;
use crate::rpc::{LinkEvent, RpcError, RpcTransport};

#[derive(Debug)]
pub enum SupervisorEvent {
    Liveness(bool),
    Link { epoch: u64, event: LinkEvent },
    FirmwareInfo { session: u64, outcome: Result<Value, RpcError> },
    Subscribed { session: u64, outcome: Result<Value, RpcError> },
    RetryFirmwareInfo { session: u64 },
    RetrySubscribe { session: u64 },
    JobContext { session: u64, generation: u64, context: JobContext },
    RefreshJobContext { session: u64, generation: u64 },
}

pub struct Supervisor {
    config: PrinterConfig,
    transport: Arc<dyn RpcTransport>,
    retry_interval: Duration,
    events_tx: UnboundedSender<SupervisorEvent>,
    view_tx: watch::Sender<Arc<PrinterView>>,
    updates: broadcast::Sender<PrinterUpdate>,

    connection: ConnectionState,
    firmware: FirmwareState,
    status: StatusSnapshot,
    job_context: Option<JobContext>,
    /// (filename, print state) the job context was last requested for.
    job_key: Option<(String, Option<String>)>,
    /// Bumped whenever `job_key` moves; older fetches and refreshes are dropped.
    job_generation: u64,

    link_epoch: u64,
    session: u64,
    link_task: Option<JoinHandle<()>>,
    session_tasks: Vec<JoinHandle<()>>,
    dirty: bool,
}

impl Supervisor {
    pub fn new(
        config: PrinterConfig,
        transport: Arc<dyn RpcTransport>,
        retry_interval: Duration,
        events_tx: UnboundedSender<SupervisorEvent>,
        view_tx: watch::Sender<Arc<PrinterView>>,
        updates: broadcast::Sender<PrinterUpdate>,
    ) -> Self {
        Self {
            config,
            transport,
            retry_interval,
            events_tx,
            view_tx,
            updates,
            connection: ConnectionState::Offline,
            firmware: FirmwareState::Disconnected,
            status: StatusSnapshot::default(),
            job_context: None,
            job_key: None,
            job_generation: 0,
            link_epoch: 0,
            session: 0,
            link_task: None,
            session_tasks: Vec::new(),
            dirty: false,
        }
    }

    pub async fn run(mut self, mut events: UnboundedReceiver<SupervisorEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            self.flush();
        }
        self.end_session();
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
    }

    pub async fn handle(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Liveness(true) => self.open_link(),
            SupervisorEvent::Liveness(false) => self.go_offline("server unreachable").await,
            SupervisorEvent::Link { epoch, event } => {
                if epoch != self.link_epoch {
                    tracing::trace!("[{}]: dropping event from stale link {}", self.config.name, epoch);
                    return;
                }
                self.handle_link_event(event).await;
            }
            SupervisorEvent::FirmwareInfo { session, outcome } => {
                if !self.is_current(session) {
                    return;
                }
                match outcome {
                    Ok(info) => {
                        let state = info.get("state").and_then(Value::as_str).unwrap_or_default();
                        self.set_firmware(FirmwareState::from_info_state(state));
                    }
                    Err(e) => {
                        tracing::debug!("[{}]: printer.info failed: {}", self.config.name, e);
                        self.schedule(SupervisorEvent::RetryFirmwareInfo { session });
                    }
                }
            }
            SupervisorEvent::RetryFirmwareInfo { session } => {
                if self.is_current(session) {
                    self.request_firmware_info();
                }
            }
            SupervisorEvent::Subscribed { session, outcome } => {
                if !self.is_current(session) || self.firmware != FirmwareState::Ready {
                    return;
                }
                match outcome {
                    Ok(result) => {
                        let initial = result.get("status").cloned().unwrap_or(Value::Null);
                        self.apply_fragment(&initial);
                    }
                    Err(e) => {
                        tracing::debug!("[{}]: subscribe failed: {}", self.config.name, e);
                        self.schedule(SupervisorEvent::RetrySubscribe { session });
                    }
                }
            }
            SupervisorEvent::RetrySubscribe { session } => {
                if self.is_current(session) && self.firmware == FirmwareState::Ready {
                    self.subscribe();
                }
            }
            SupervisorEvent::JobContext { session, generation, context } => {
                if !self.is_current(session)
                    || generation != self.job_generation
                    || self.status.filename() != Some(context.filename.as_str())
                {
                    return;
                }
                if context.needs_refresh(self.status.print_state()) {
                    if context.is_incomplete() {
                        tracing::debug!("[{}]: job data for {} incomplete", self.config.name, context.filename);
                    }
                    self.schedule(SupervisorEvent::RefreshJobContext { session, generation });
                }
                if self.job_context.as_ref() != Some(&context) {
                    self.job_context = Some(context);
                    self.dirty = true;
                }
            }
            SupervisorEvent::RefreshJobContext { session, generation } => {
                if self.is_current(session) && generation == self.job_generation {
                    self.fetch_job_context();
                }
            }
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Open => {
                if self.connection != ConnectionState::LinkOpening {
                    return;
                }
                tracing::info!("[{}]: connected", self.config.name);
                self.connection = ConnectionState::LinkOpen;
                self.firmware = FirmwareState::Disconnected;
                self.end_session();
                self.dirty = true;
                self.request_firmware_info();
            }
            LinkEvent::Close => self.go_offline("link closed").await,
            LinkEvent::Notify { method, params } => {
                if self.connection != ConnectionState::LinkOpen {
                    return;
                }
                match method.as_str() {
                    "notify_klippy_ready" => self.set_firmware(FirmwareState::Ready),
                    "notify_klippy_shutdown" => self.set_firmware(FirmwareState::Shutdown),
                    "notify_klippy_disconnected" => self.set_firmware(FirmwareState::Disconnected),
                    "notify_status_update" => {
                        if self.firmware != FirmwareState::Ready {
                            return;
                        }
                        if let Some(fragment) = params.first() {
                            self.apply_fragment(fragment);
                        }
                    }
                    other => tracing::trace!("[{}]: ignoring {}", self.config.name, other),
                }
            }
        }
    }

    fn is_current(&self, session: u64) -> bool {
        session == self.session && self.connection == ConnectionState::LinkOpen
    }

    fn open_link(&mut self) {
        if self.connection != ConnectionState::Offline {
            return;
        }
        self.link_epoch += 1;
        self.end_session();
        self.connection = ConnectionState::LinkOpening;
        self.dirty = true;

        let epoch = self.link_epoch;
        let transport = self.transport.clone();
        let events = self.events_tx.clone();
        let name = self.config.name.clone();
        self.link_task = Some(tokio::spawn(async move {
            let (link_tx, mut link_rx) = mpsc::unbounded_channel();
            if let Err(e) = transport.open(link_tx).await {
                tracing::warn!("[{}]: link open failed: {}", name, e);
                let _ = events.send(SupervisorEvent::Link { epoch, event: LinkEvent::Close });
                return;
            }
            while let Some(event) = link_rx.recv().await {
                if events.send(SupervisorEvent::Link { epoch, event }).is_err() {
                    break;
                }
            }
        }));
    }

    async fn go_offline(&mut self, reason: &str) {
        if self.connection == ConnectionState::Offline {
            return;
        }
        tracing::info!("[{}]: disconnected ({})", self.config.name, reason);
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        self.link_epoch += 1;
        self.transport.close().await;
        self.connection = ConnectionState::Offline;
        self.firmware = FirmwareState::Disconnected;
        self.clear_status();
        self.end_session();
        self.dirty = true;
    }

    fn set_firmware(&mut self, next: FirmwareState) {
        if next == self.firmware {
            return;
        }
        let previous = self.firmware;
        self.firmware = next;
        self.dirty = true;
        tracing::info!("[{}]: klippy {:?} -> {:?}", self.config.name, previous, next);

        if next == FirmwareState::Ready {
            self.subscribe();
        } else if previous == FirmwareState::Ready {
            self.clear_status();
            self.end_session();
        }
    }

    fn clear_status(&mut self) {
        if !self.status.is_empty() || self.job_context.is_some() {
            self.dirty = true;
        }
        self.status = StatusSnapshot::default();
        self.job_context = None;
        self.job_key = None;
        self.job_generation += 1;
    }

    /// Invalidate everything started under the current session.
    fn end_session(&mut self) {
        self.session += 1;
        for task in self.session_tasks.drain(..) {
            task.abort();
        }
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.session_tasks.retain(|task| !task.is_finished());
        self.session_tasks.push(task);
    }

    fn schedule(&mut self, event: SupervisorEvent) {
        let events = self.events_tx.clone();
        let delay = self.retry_interval;
        self.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        }));
    }

    fn request_firmware_info(&mut self) {
        let session = self.session;
        let transport = self.transport.clone();
        let events = self.events_tx.clone();
        self.track(tokio::spawn(async move {
            let outcome = transport.call("printer.info", None).await;
            let _ = events.send(SupervisorEvent::FirmwareInfo { session, outcome });
        }));
    }

    fn subscribe(&mut self) {
        let session = self.session;
        let transport = self.transport.clone();
        let events = self.events_tx.clone();
        self.track(tokio::spawn(async move {
            let outcome = transport
                .call("printer.objects.subscribe", Some(status::subscription_objects()))
                .await;
            let _ = events.send(SupervisorEvent::Subscribed { session, outcome });
        }));
    }

    fn apply_fragment(&mut self, fragment: &Value) {
        let next = self.status.merged(StatusSnapshot::from_fragment(fragment));
        if next != self.status {
            self.status = next;
            self.dirty = true;
        }
        self.refresh_job_context();
    }

    /// Refetch history and metadata when the active file or print state moves.
    fn refresh_job_context(&mut self) {
        let Some(filename) = self.status.filename().map(str::to_string) else {
            if self.job_context.take().is_some() {
                self.dirty = true;
            }
            self.job_key = None;
            self.job_generation += 1;
            return;
        };
        let key = (filename.clone(), self.status.print_state().map(str::to_string));
        if self.job_key.as_ref() == Some(&key) {
            return;
        }
        self.job_key = Some(key);
        self.job_generation += 1;

        if self.job_context.as_ref().map(|ctx| ctx.filename.as_str()) != Some(filename.as_str()) {
            self.job_context = Some(JobContext::pending(&filename));
            self.dirty = true;
        }
        self.fetch_job_context();
    }

    /// Fetch for the loaded file under the current session and generation.
    fn fetch_job_context(&mut self) {
        let Some(filename) = self.status.filename().map(str::to_string) else {
            return;
        };
        let previous = self.job_context.clone();
        let session = self.session;
        let generation = self.job_generation;
        let transport = self.transport.clone();
        let events = self.events_tx.clone();
        self.track(tokio::spawn(async move {
            let context = job::fetch_job_context(transport.as_ref(), &filename, previous.as_ref()).await;
            let _ = events.send(SupervisorEvent::JobContext { session, generation, context });
        }));
    }

    fn build_view(&self) -> PrinterView {
        let mut view = PrinterView {
            config: self.config.clone(),
            connection: self.connection,
            firmware: self.firmware,
            status: self.status.clone(),
            job: None,
            job_context: self.job_context.clone(),
        };
        view.job = view.job_estimate();
        view
    }

    /// Publish once if anything visible changed while handling the last event.
    fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        let view = Arc::new(self.build_view());
        self.view_tx.send_replace(view.clone());
        let _ = self.updates.send(PrinterUpdate { key: self.config.key.clone(), view });
    }
}

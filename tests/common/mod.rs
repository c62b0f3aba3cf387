//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use printdeck::config::{PrinterConfig, TimingConfig};
use printdeck::error::HubError;
use printdeck::hass::HomeAutomation;
use printdeck::printer::PrinterServices;
use printdeck::printer::probe::LivenessProbe;
use printdeck::rpc::{LinkEvent, RpcError, RpcTransport};
use printdeck::{PrinterHandle, PrinterRegistry};
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;

/// Transport that records calls and answers from per-method scripts.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<(String, Option<Value>)>>,
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, RpcError>>>>,
    events: Mutex<Option<UnboundedSender<LinkEvent>>>,
    closes: Mutex<usize>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a reply for the next call of `method`. Unscripted calls return `{}`.
    pub fn reply(&self, method: &str, outcome: Result<Value, RpcError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls().iter().filter(|(m, _)| m == method).count()
    }

    pub fn closes(&self) -> usize {
        *self.closes.lock().unwrap()
    }

    /// Push a link event as if the server had sent it.
    pub fn emit(&self, event: LinkEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }

    pub fn notify(&self, method: &str, params: Vec<Value>) {
        self.emit(LinkEvent::Notify { method: method.to_string(), params });
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn open(&self, events: UnboundedSender<LinkEvent>) -> Result<(), RpcError> {
        let _ = events.send(LinkEvent::Open);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn close(&self) {
        *self.closes.lock().unwrap() += 1;
        self.events.lock().unwrap().take();
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.calls.lock().unwrap().push((method.to_string(), params));
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(json!({})))
    }
}

/// Probe whose answer is flipped by the test.
pub struct SwitchProbe(AtomicBool);

impl SwitchProbe {
    pub fn new(online: bool) -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(online)))
    }

    pub fn set(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl LivenessProbe for SwitchProbe {
    async fn probe(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records service calls; fails when `fail` is set.
#[derive(Default)]
pub struct RecordingHass {
    pub calls: Mutex<Vec<(String, Value)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl HomeAutomation for RecordingHass {
    async fn service(&self, domain_service: &str, data: Value) -> Result<(), HubError> {
        self.calls.lock().unwrap().push((domain_service.to_string(), data));
        if self.fail.load(Ordering::SeqCst) {
            return Err(HubError::Upstream("hub offline".to_string()));
        }
        Ok(())
    }
}

pub fn printer_config(key: &str) -> PrinterConfig {
    PrinterConfig {
        key: key.to_string(),
        name: format!("Printer {}", key),
        host: "http://127.0.0.1:1".to_string(),
        entity_id: format!("switch.{}", key),
        macros: vec![("PURGE".to_string(), "Purge".to_string())],
    }
}

pub struct Rig {
    pub registry: PrinterRegistry,
    pub handle: PrinterHandle,
    pub transport: Arc<MockTransport>,
    pub probe: Arc<SwitchProbe>,
    pub hass: Arc<RecordingHass>,
}

/// One printer keyed `voron` behind scripted collaborators.
pub fn rig(online: bool) -> Rig {
    let transport = MockTransport::new();
    let probe = SwitchProbe::new(online);
    let hass = Arc::new(RecordingHass::default());
    let mut registry = PrinterRegistry::new();
    let handle = registry.spawn(
        printer_config("voron"),
        PrinterServices {
            transport: transport.clone(),
            probe: probe.clone(),
            hass: hass.clone(),
            http: reqwest::Client::new(),
        },
        &TimingConfig::default(),
    );
    Rig { registry, handle, transport, probe, hass }
}

/// Let spawned tasks run without advancing the paused clock much.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// src/registry.rs - Read-only map from printer key to actor handle
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::{Config, ConfigError, PrinterConfig, TimingConfig};
use crate::error::HubError;
use crate::hass::HomeAutomation;
use crate::printer::estimator::JobEstimate;
use crate::printer::probe::HttpProbe;
use crate::printer::{self, PrinterHandle, PrinterServices, PrinterUpdate, PrinterView};
use crate::rpc::MoonrakerSocket;

const UPDATE_BUFFER: usize = 256;

/// Every supervised printer, fixed after startup.
pub struct PrinterRegistry {
    printers: BTreeMap<String, PrinterHandle>,
    updates: broadcast::Sender<PrinterUpdate>,
}

impl Default for PrinterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PrinterRegistry {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self { printers: BTreeMap::new(), updates }
    }

    /// Spawn one supervisor per configured printer.
    pub fn start(config: &Config, hass: Arc<dyn HomeAutomation>) -> Result<Self, ConfigError> {
        let http = reqwest::Client::new();
        let mut registry = Self::new();
        for printer in config.printer_configs()? {
            let services = PrinterServices {
                transport: Arc::new(MoonrakerSocket::new(
                    printer.websocket_url(),
                    config.timing.rpc_timeout(),
                )),
                probe: Arc::new(HttpProbe::new(
                    &printer.host,
                    http.clone(),
                    config.timing.probe_timeout(),
                )),
                hass: hass.clone(),
                http: http.clone(),
            };
            registry.spawn(printer, services, &config.timing);
        }
        Ok(registry)
    }

    /// Start a printer with caller-supplied collaborators.
    pub fn spawn(
        &mut self,
        config: PrinterConfig,
        services: PrinterServices,
        timing: &TimingConfig,
    ) -> PrinterHandle {
        let handle = printer::spawn_printer(config, services, timing, self.updates.clone());
        self.printers.insert(handle.key().to_string(), handle.clone());
        handle
    }

    pub fn get(&self, key: &str) -> Result<&PrinterHandle, HubError> {
        self.printers
            .get(key)
            .ok_or_else(|| HubError::NotFound(key.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.printers.keys().map(String::as_str)
    }

    pub fn snapshot(&self, key: &str) -> Result<Arc<PrinterView>, HubError> {
        Ok(self.get(key)?.snapshot())
    }

    pub fn snapshots(&self) -> BTreeMap<String, Arc<PrinterView>> {
        self.printers
            .iter()
            .map(|(key, handle)| (key.clone(), handle.snapshot()))
            .collect()
    }

    /// `Ok(None)` when the printer has no file loaded.
    pub fn job_estimate(&self, key: &str) -> Result<Option<JobEstimate>, HubError> {
        Ok(self.get(key)?.job_estimate())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterUpdate> {
        self.updates.subscribe()
    }

    pub async fn pause(&self, key: &str) -> Result<Value, HubError> {
        self.get(key)?.pause().await
    }

    pub async fn resume(&self, key: &str) -> Result<Value, HubError> {
        self.get(key)?.resume().await
    }

    pub async fn cancel(&self, key: &str) -> Result<Value, HubError> {
        self.get(key)?.cancel().await
    }

    pub async fn emergency_stop(&self, key: &str) -> Result<Value, HubError> {
        self.get(key)?.emergency_stop().await
    }

    pub async fn firmware_restart(&self, key: &str) -> Result<Value, HubError> {
        self.get(key)?.firmware_restart().await
    }

    pub async fn klipper_restart(&self, key: &str) -> Result<Value, HubError> {
        self.get(key)?.klipper_restart().await
    }

    pub async fn set_temperature(&self, key: &str, heater: &str, value: f64) -> Result<Value, HubError> {
        self.get(key)?.set_temperature(heater, value).await
    }

    pub async fn run_macro(&self, key: &str, id: &str) -> Result<Value, HubError> {
        self.get(key)?.run_macro(id).await
    }

    pub async fn turn_on(&self, key: &str) -> Result<Value, HubError> {
        self.get(key)?.turn_on().await
    }

    pub async fn turn_off(&self, key: &str) -> Result<Value, HubError> {
        self.get(key)?.turn_off().await
    }

    pub async fn fetch_thumbnail(&self, key: &str, path: &str) -> Result<Vec<u8>, HubError> {
        self.get(key)?.fetch_thumbnail(path).await
    }
}

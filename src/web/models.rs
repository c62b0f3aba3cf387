//! Contains the data models for API requests and responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::HubError;
use crate::printer::PrinterView;

/// Body of `POST /api/v1/printers/{key}/temperature`.
///
/// Both fields are taken loosely so a bad body is reported as an invalid
/// argument rather than an extractor rejection.
#[derive(Debug, Deserialize)]
pub struct SetTemperatureRequest {
    #[serde(default)]
    pub heater: String,
    #[serde(default)]
    pub value: Value,
}

impl SetTemperatureRequest {
    pub fn target(&self) -> Result<f64, HubError> {
        self.value
            .as_f64()
            .ok_or_else(|| HubError::invalid(format!("temperature must be a number, got {}", self.value)))
    }
}

/// Body of `POST /api/v1/printers/{key}/macro`.
#[derive(Debug, Deserialize)]
pub struct RunMacroRequest {
    #[serde(rename = "macro")]
    pub macro_id: String,
}

/// Push frame sent to websocket subscribers.
#[derive(Debug, Serialize)]
pub struct PrinterUpdated {
    pub method: &'static str,
    pub params: BTreeMap<String, Arc<PrinterView>>,
}

impl PrinterUpdated {
    pub fn new(params: BTreeMap<String, Arc<PrinterView>>) -> Self {
        Self { method: "printer_updated", params }
    }
}

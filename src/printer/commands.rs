// src/printer/commands.rs - Operator actions against one printer
use std::fmt;
use std::str::FromStr;

use serde_json::{Value, json};

use super::PrinterHandle;
use crate::error::HubError;

/// Heaters a temperature target may be set on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterId {
    Extruder,
    HeaterBed,
}

impl HeaterId {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaterId::Extruder => "extruder",
            HeaterId::HeaterBed => "heater_bed",
        }
    }
}

impl fmt::Display for HeaterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaterId {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extruder" => Ok(HeaterId::Extruder),
            "heater_bed" => Ok(HeaterId::HeaterBed),
            other => Err(HubError::invalid(format!("unknown heater '{}'", other))),
        }
    }
}

impl PrinterHandle {
    async fn rpc(&self, method: &str, params: Option<Value>) -> Result<Value, HubError> {
        tracing::debug!("[{}]: {}", self.config.name, method);
        Ok(self.transport.call(method, params).await?)
    }

    async fn gcode(&self, script: String) -> Result<Value, HubError> {
        self.rpc("printer.gcode.script", Some(json!({ "script": script })))
            .await
    }

    pub async fn pause(&self) -> Result<Value, HubError> {
        self.rpc("printer.print.pause", None).await
    }

    pub async fn resume(&self) -> Result<Value, HubError> {
        self.rpc("printer.print.resume", None).await
    }

    pub async fn cancel(&self) -> Result<Value, HubError> {
        self.rpc("printer.print.cancel", None).await
    }

    pub async fn emergency_stop(&self) -> Result<Value, HubError> {
        self.rpc("printer.emergency_stop", None).await
    }

    pub async fn firmware_restart(&self) -> Result<Value, HubError> {
        self.rpc("printer.firmware_restart", None).await
    }

    /// Restart the Klipper host service through the machine API.
    pub async fn klipper_restart(&self) -> Result<Value, HubError> {
        self.rpc("machine.services.restart", Some(json!({ "service": "klipper" })))
            .await
    }

    /// Validated before anything goes on the wire.
    pub async fn set_temperature(&self, heater: &str, value: f64) -> Result<Value, HubError> {
        let heater: HeaterId = heater.parse()?;
        if !value.is_finite() {
            return Err(HubError::invalid(format!(
                "temperature for {} must be a finite number",
                heater
            )));
        }
        self.gcode(format!(
            "SET_HEATER_TEMPERATURE HEATER={} TARGET={}",
            heater, value
        ))
        .await
    }

    /// Run a configured macro. Identifiers outside the allow-list are rejected.
    pub async fn run_macro(&self, id: &str) -> Result<Value, HubError> {
        if !self.config.has_macro(id) {
            return Err(HubError::invalid(format!(
                "macro '{}' is not configured for {}",
                id, self.config.key
            )));
        }
        self.gcode(id.to_string()).await
    }

    pub async fn turn_on(&self) -> Result<Value, HubError> {
        self.switch_power("homeassistant.turn_on").await
    }

    pub async fn turn_off(&self) -> Result<Value, HubError> {
        self.switch_power("homeassistant.turn_off").await
    }

    async fn switch_power(&self, service: &str) -> Result<Value, HubError> {
        let data = json!({ "entity_id": self.config.entity_id });
        match self.hass.service(service, data).await {
            Ok(()) => Ok(json!({ "result": "ok" })),
            Err(e) => {
                tracing::error!("[{}]: {} failed: {}", self.config.name, service, e);
                Err(e)
            }
        }
    }

    /// Raw bytes of a thumbnail image stored next to the printer's gcode files.
    pub async fn fetch_thumbnail(&self, path: &str) -> Result<Vec<u8>, HubError> {
        if path.is_empty() || path.split('/').any(|part| part == "..") {
            return Err(HubError::invalid(format!("invalid thumbnail path '{}'", path)));
        }
        let url = format!(
            "{}/server/files/gcodes/.thumbs/{}",
            self.config.host.trim_end_matches('/'),
            path
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| HubError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(HubError::Upstream(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HubError::Upstream(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heater_names_parse() {
        assert_eq!("extruder".parse::<HeaterId>().unwrap(), HeaterId::Extruder);
        assert_eq!("heater_bed".parse::<HeaterId>().unwrap(), HeaterId::HeaterBed);
        assert!(matches!(
            "chamber".parse::<HeaterId>(),
            Err(HubError::InvalidArgument(_))
        ));
    }

    #[test]
    fn heater_display_matches_firmware_name() {
        assert_eq!(HeaterId::HeaterBed.to_string(), "heater_bed");
    }
}

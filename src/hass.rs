// src/hass.rs - Home Assistant service calls for printer power
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::HassConfig;
use crate::error::HubError;

/// Outbound home-automation service invocation, e.g. `homeassistant.turn_on`.
#[async_trait]
pub trait HomeAutomation: Send + Sync + 'static {
    async fn service(&self, domain_service: &str, data: Value) -> Result<(), HubError>;
}

/// REST client for a Home Assistant instance.
#[derive(Clone)]
pub struct HassClient {
    host: String,
    token: String,
    client: reqwest::Client,
}

impl HassClient {
    pub fn new(config: &HassConfig, client: reqwest::Client) -> Self {
        Self {
            host: config.host.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        }
    }

    /// `true` once `/api/config` reports the instance as RUNNING.
    pub async fn check_running(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/api/config", self.host))
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(5));
        let Ok(response) = request.send().await else {
            return false;
        };
        match response.json::<Value>().await {
            Ok(config) => config.get("state").and_then(Value::as_str) == Some("RUNNING"),
            Err(_) => false,
        }
    }

    /// Poll until the instance is up, once per second.
    pub async fn wait_until_running(&self) {
        loop {
            if self.check_running().await {
                tracing::info!("Home Assistant at {} is running", self.host);
                return;
            }
            tracing::debug!("Waiting for Home Assistant at {}", self.host);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

#[async_trait]
impl HomeAutomation for HassClient {
    async fn service(&self, domain_service: &str, data: Value) -> Result<(), HubError> {
        let (domain, service) = domain_service
            .split_once('.')
            .ok_or_else(|| HubError::invalid(format!("malformed service '{}'", domain_service)))?;
        let response = self
            .client
            .post(format!("{}/api/services/{}/{}", self.host, domain, service))
            .bearer_auth(&self.token)
            .json(&data)
            .send()
            .await
            .map_err(|e| HubError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(HubError::Upstream(format!(
                "{} answered {}",
                domain_service,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Stand-in when no `[hass]` table is configured.
pub struct DisabledHomeAutomation;

#[async_trait]
impl HomeAutomation for DisabledHomeAutomation {
    async fn service(&self, _domain_service: &str, _data: Value) -> Result<(), HubError> {
        Err(HubError::Upstream("home automation not configured".to_string()))
    }
}

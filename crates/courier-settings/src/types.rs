//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`
//! so a settings file only needs the values it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Listener and connection-liveness settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// WebSocket ping period.
    pub heartbeat_interval_ms: u64,
    /// Sessions silent for longer than this are disconnected.
    pub client_timeout_ms: u64,
    /// How often the idle reaper runs.
    pub reap_interval_ms: u64,
    /// Upper bound on flushing queued frames during shutdown.
    pub drain_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            heartbeat_interval_ms: 30_000,
            client_timeout_ms: 90_000,
            reap_interval_ms: 60_000,
            drain_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Per-session outbound queue bound; overflow drops the oldest frame.
    pub outbound_queue_capacity: usize,
    /// Send CONNECTED/ACK replies.
    pub acknowledge: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 1024,
            acknowledge: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl CourierSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.broker.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.outboundQueueCapacity must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.server.client_timeout_ms <= self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.clientTimeoutMs ({}) must exceed server.heartbeatIntervalMs ({})",
                self.server.client_timeout_ms, self.server.heartbeat_interval_ms
            )));
        }
        if self.server.reap_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.reapIntervalMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = CourierSettings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.broker.outbound_queue_capacity, 1024);
        assert!(settings.broker.acknowledge);
        assert_eq!(settings.logging.level, "info");
        settings.validate().unwrap();
    }

    #[test]
    fn camel_case_on_disk() {
        let json = serde_json::to_value(CourierSettings::default()).unwrap();
        assert!(json["server"].get("heartbeatIntervalMs").is_some());
        assert!(json["broker"].get("outboundQueueCapacity").is_some());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: CourierSettings =
            serde_json::from_str(r#"{"broker": {"acknowledge": false}}"#).unwrap();
        assert!(!settings.broker.acknowledge);
        assert_eq!(settings.broker.outbound_queue_capacity, 1024);
        assert_eq!(settings.server, ServerSettings::default());
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let mut settings = CourierSettings::default();
        settings.broker.outbound_queue_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn timeout_must_exceed_heartbeat() {
        let mut settings = CourierSettings::default();
        settings.server.client_timeout_ms = settings.server.heartbeat_interval_ms;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("clientTimeoutMs"));
    }
}

//! Shared telemetry bootstrap for labelhouse binaries.

use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use std::collections::BTreeMap;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_SERVICE_NAMESPACE: &str = "service.namespace";

/// Whether OTel instruments are backed by an SDK provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryMode {
    Disabled,
    Enabled,
}

impl TelemetryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryMode::Disabled => "disabled",
            TelemetryMode::Enabled => "enabled",
        }
    }
}

/// Parsed telemetry configuration from environment.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub mode: TelemetryMode,
    pub service_name: String,
    pub resource_attributes: Vec<KeyValue>,
}

impl TelemetryConfig {
    pub fn from_env(default_service_name: &str) -> Result<Self> {
        Self::from_lookup(default_service_name, |name| std::env::var(name).ok())
    }

    fn from_lookup<F>(default_service_name: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_name =
            lookup("OTEL_SERVICE_NAME").unwrap_or_else(|| default_service_name.to_string());
        let service_name = service_name.trim();
        if service_name.is_empty() {
            return Err(Error::Config(
                "OTEL_SERVICE_NAME cannot be empty".to_string(),
            ));
        }

        let mode = match parse_optional_bool(
            "LABELHOUSE_TELEMETRY_ENABLED",
            lookup("LABELHOUSE_TELEMETRY_ENABLED"),
        )? {
            Some(false) => TelemetryMode::Disabled,
            Some(true) | None => TelemetryMode::Enabled,
        };

        let mut attr_map: BTreeMap<String, String> = BTreeMap::new();
        if let Some(attr_str) = lookup("OTEL_RESOURCE_ATTRIBUTES") {
            for (key, value) in parse_resource_attributes(&attr_str)? {
                attr_map.insert(key, value);
            }
        }

        attr_map.insert(ATTR_SERVICE_NAME.to_string(), service_name.to_string());
        attr_map
            .entry(ATTR_SERVICE_NAMESPACE.to_string())
            .or_insert_with(|| "labelhouse".to_string());

        let attributes = attr_map
            .into_iter()
            .map(|(k, v)| KeyValue::new(k, v))
            .collect::<Vec<_>>();

        Ok(Self {
            mode,
            service_name: service_name.to_string(),
            resource_attributes: attributes,
        })
    }
}

/// Handle that keeps the meter provider alive for process lifetime.
pub struct Telemetry {
    config: TelemetryConfig,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    /// Initialize JSON logging and, unless disabled, the global meter provider.
    pub fn init_for_component(default_service_name: &str, log_level: &str) -> Result<Self> {
        let config = TelemetryConfig::from_env(default_service_name)?;
        let level = parse_log_level(log_level)?;

        FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .try_init()
            .map_err(|e| {
                Error::Config(format!("failed to initialize telemetry subscriber: {e}"))
            })?;

        let meter_provider = match config.mode {
            TelemetryMode::Enabled => {
                let resource =
                    Resource::default().merge(&Resource::new(config.resource_attributes.clone()));
                let provider = SdkMeterProvider::builder().with_resource(resource).build();
                global::set_meter_provider(provider.clone());
                Some(provider)
            }
            TelemetryMode::Disabled => None,
        };

        info!(
            service_name = %config.service_name,
            telemetry_mode = config.mode.as_str(),
            "Telemetry bootstrap initialized"
        );

        Ok(Self {
            config,
            meter_provider,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn mode(&self) -> TelemetryMode {
        self.config.mode
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = &self.meter_provider {
            let _ = provider.shutdown();
        }
    }
}

pub fn parse_log_level(raw: &str) -> Result<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}

fn parse_optional_bool(name: &str, raw: Option<String>) -> Result<Option<bool>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = raw.trim().to_ascii_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean (true/false/1/0), got '{raw}'"
        ))),
    }
}

fn parse_resource_attributes(raw: &str) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for pair in raw.split(',') {
        let trimmed = pair.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(Error::Config(format!(
                "OTEL_RESOURCE_ATTRIBUTES entry '{trimmed}' is invalid, expected key=value"
            )));
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config(
                "OTEL_RESOURCE_ATTRIBUTES contains an empty attribute key".to_string(),
            ));
        }

        attrs.push((key.to_string(), value.trim().to_string()));
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parse_resource_attributes_accepts_valid_input() {
        let attrs = parse_resource_attributes("service.instance.id=abc, ,foo=bar").unwrap();
        assert_eq!(
            attrs,
            vec![
                ("service.instance.id".to_string(), "abc".to_string()),
                ("foo".to_string(), "bar".to_string())
            ]
        );
    }

    #[test]
    fn parse_resource_attributes_rejects_invalid_pairs() {
        let err = parse_resource_attributes("broken").unwrap_err();
        assert!(format!("{err}").contains("key=value"));

        let err = parse_resource_attributes("=value").unwrap_err();
        assert!(format!("{err}").contains("empty attribute key"));
    }

    #[test]
    fn config_defaults_to_enabled_with_service_name() {
        let config = TelemetryConfig::from_lookup("labelhouse-writer", no_env).unwrap();
        assert_eq!(config.mode, TelemetryMode::Enabled);
        assert_eq!(config.service_name, "labelhouse-writer");

        let keys: Vec<String> = config
            .resource_attributes
            .iter()
            .map(|kv| kv.key.as_str().to_string())
            .collect();
        assert!(keys.contains(&ATTR_SERVICE_NAME.to_string()));
        assert!(keys.contains(&ATTR_SERVICE_NAMESPACE.to_string()));
    }

    #[test]
    fn config_can_be_disabled() {
        let config = TelemetryConfig::from_lookup("w", |name| {
            (name == "LABELHOUSE_TELEMETRY_ENABLED").then(|| "off".to_string())
        })
        .unwrap();
        assert_eq!(config.mode, TelemetryMode::Disabled);

        let err = TelemetryConfig::from_lookup("w", |name| {
            (name == "LABELHOUSE_TELEMETRY_ENABLED").then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn empty_service_name_is_rejected() {
        let err = TelemetryConfig::from_lookup("w", |name| {
            (name == "OTEL_SERVICE_NAME").then(|| "  ".to_string())
        })
        .unwrap_err();
        assert!(format!("{err}").contains("OTEL_SERVICE_NAME"));
    }

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert!(parse_log_level("loud").is_err());
    }
}

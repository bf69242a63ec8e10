use std::time::Duration;

use crate::adapters::mqtt::Qos;
use crate::app::AppError;
use crate::app::broker::ReconnectPolicy;

pub const DEFAULT_TOPIC: &str = "charger/1/connector/1/session/1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_qos: Qos,
    pub reconnect_interval_secs: u64,
    pub reconnect_max_secs: Option<u64>,
    pub db_path: String,
    pub http_bind: String,
    pub publish_interval_secs: u64,
    pub simulator_enabled: bool,
    pub simulator_session_id: u64,
    pub simulator_devices: usize,
    pub ingest_queue_capacity: usize,
    pub ingest_workers: usize,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        // A missing .env file is fine; variables may come from the process environment.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mqtt_host = non_empty(&lookup, "MQTT_BROKER_URL")
            .ok_or_else(|| AppError::config("MQTT_BROKER_URL is required"))?;

        let mqtt_keepalive_secs = parse_or_default(&lookup, "MQTT_KEEPALIVE_SECS", 60_u64)?;
        if mqtt_keepalive_secs < 5 {
            return Err(AppError::config("MQTT_KEEPALIVE_SECS must be at least 5"));
        }

        let qos_level = parse_or_default(&lookup, "MQTT_QOS", 1_u8)?;
        let mqtt_qos = Qos::from_level(qos_level)
            .ok_or_else(|| AppError::config("MQTT_QOS must be 0, 1 or 2"))?;

        let reconnect_interval_secs =
            parse_or_default(&lookup, "RECONNECT_INTERVAL_SECS", mqtt_keepalive_secs)?;
        let reconnect_max_secs = match lookup("RECONNECT_MAX_SECS") {
            Some(_) => Some(parse_or_default(&lookup, "RECONNECT_MAX_SECS", 0_u64)?),
            None => None,
        };
        if reconnect_interval_secs == 0 {
            return Err(AppError::config("RECONNECT_INTERVAL_SECS must be positive"));
        }

        let publish_interval_secs = parse_or_default(&lookup, "PUBLISH_INTERVAL_SECS", 60_u64)?;
        if publish_interval_secs == 0 {
            return Err(AppError::config("PUBLISH_INTERVAL_SECS must be positive"));
        }

        let simulator_session_id = parse_or_default(&lookup, "SIMULATOR_SESSION_ID", 1_u64)?;
        if simulator_session_id == 0 {
            return Err(AppError::config("SIMULATOR_SESSION_ID must be positive"));
        }

        let log_format = match non_empty(&lookup, "LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(_) => return Err(AppError::config("LOG_FORMAT must be text or json")),
        };

        Ok(Self {
            mqtt_host,
            mqtt_port: parse_or_default(&lookup, "MQTT_BROKER_PORT", 1883_u16)?,
            mqtt_topic: non_empty(&lookup, "MQTT_TOPIC")
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            mqtt_client_id: non_empty(&lookup, "MQTT_CLIENT_ID")
                .unwrap_or_else(|| "charging-telemetry".to_string()),
            mqtt_keepalive_secs,
            mqtt_qos,
            reconnect_interval_secs,
            reconnect_max_secs,
            db_path: non_empty(&lookup, "DB_PATH")
                .unwrap_or_else(|| "./data/charging_telemetry.db".to_string()),
            http_bind: non_empty(&lookup, "HTTP_BIND")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            publish_interval_secs,
            simulator_enabled: parse_bool_or_default(&lookup, "SIMULATOR_ENABLED", true)?,
            simulator_session_id,
            simulator_devices: parse_or_default(&lookup, "SIMULATOR_DEVICES", 6_usize)?,
            ingest_queue_capacity: parse_or_default(&lookup, "INGEST_QUEUE_CAPACITY", 256_usize)?,
            ingest_workers: parse_or_default(&lookup, "INGEST_WORKERS", 2_usize)?,
            log_format,
        })
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let base = Duration::from_secs(self.reconnect_interval_secs);
        match self.reconnect_max_secs {
            Some(max) if max > self.reconnect_interval_secs => ReconnectPolicy::Exponential {
                base,
                max: Duration::from_secs(max),
            },
            _ => ReconnectPolicy::Fixed(base),
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

fn parse_bool_or_default<F>(lookup: &F, key: &str, default: bool) -> Result<bool, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(AppError::config(format!("{key} must be a boolean"))),
    }
}

use crate::retry::RetryPolicy;
use chrono_tz::Tz;
use core::num::NonZeroU32;
use embassy_time::Duration;
use thiserror::Error;

pub const DEFAULT_MQTT_HOST: &str = "broker.hivemq.com";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTT_TOPIC: &str = "smart_fusion/sensors";
pub const DEFAULT_CLIENT_PREFIX: &str = "ESP32Client-";
pub const DEFAULT_TIMEZONE: &str = "UTC";

pub const SAMPLE_INTERVAL_MS: u64 = 5000;
pub const RECONNECT_DELAY_MS: u64 = 5000;
pub const WIFI_POLL_INTERVAL_MS: u64 = 500;
/// Polls without association before the station is asked to associate again.
pub const WIFI_REJOIN_EVERY_POLLS: u32 = 20;
pub const MQTT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
/// Hold-off before the ESP-IDF MQTT task retries a dropped session on its own.
/// Far longer than any tick, so the sampling loop always reconnects first.
pub const MQTT_LIBRARY_RECONNECT_HOLDOFF_S: u64 = 86_400;
pub const DHT11_MIN_INTERVAL_MS: u64 = 2000;

pub const TIMESTAMP_PATTERN: &str = "%Y-%m-%d %H:%M:%S";
pub const DHT11_EMPTY_SAMPLE_MSG: &str = "〇 DHT11 returned no data, skipping publish";

// MQTT 3.1.1 only guarantees client identifiers of up to 23 bytes,
// four of which are taken by the random hex suffix.
const MAX_CLIENT_PREFIX_LEN: usize = 19;
const MAX_SSID_LEN: usize = 32;
const MAX_PASS_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is not set")]
    Missing { key: &'static str },

    #[error("{key}={value:?} is not {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_prefix: String,
}

impl BrokerConfig {
    pub fn url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeConfig {
    pub wifi: WifiCredentials,
    pub broker: BrokerConfig,
    pub sample_interval: Duration,
    pub wifi_join: RetryPolicy,
    pub reconnect: RetryPolicy,
    pub timezone: Tz,
}

impl NodeConfig {
    /// Configuration baked into the image by `build.rs`.
    pub fn from_build_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| match key {
            "WIFI_SSID" => option_env!("WIFI_SSID"),
            "WIFI_PASS" => option_env!("WIFI_PASS"),
            "WIFI_MAX_POLLS" => option_env!("WIFI_MAX_POLLS"),
            "MQTT_HOST" => option_env!("MQTT_HOST"),
            "MQTT_PORT" => option_env!("MQTT_PORT"),
            "MQTT_TOPIC" => option_env!("MQTT_TOPIC"),
            "MQTT_CLIENT_PREFIX" => option_env!("MQTT_CLIENT_PREFIX"),
            "MQTT_MAX_CONNECT_ATTEMPTS" => option_env!("MQTT_MAX_CONNECT_ATTEMPTS"),
            "SAMPLE_INTERVAL_MS" => option_env!("SAMPLE_INTERVAL_MS"),
            "TIMEZONE" => option_env!("TIMEZONE"),
            _ => None,
        })
    }

    pub fn from_lookup<'a>(lookup: impl Fn(&str) -> Option<&'a str>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(str::trim).filter(|value| !value.is_empty());

        let ssid = get("WIFI_SSID").ok_or(ConfigError::Missing { key: "WIFI_SSID" })?;
        if ssid.len() > MAX_SSID_LEN {
            return Err(invalid("WIFI_SSID", ssid, "at most 32 bytes"));
        }
        let password = get("WIFI_PASS").unwrap_or_default();
        if password.len() > MAX_PASS_LEN {
            return Err(invalid("WIFI_PASS", password, "at most 64 bytes"));
        }

        let port = match get("MQTT_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| invalid("MQTT_PORT", raw, "a TCP port"))?,
            None => DEFAULT_MQTT_PORT,
        };

        let topic = get("MQTT_TOPIC").unwrap_or(DEFAULT_MQTT_TOPIC);
        if topic.contains(['+', '#']) {
            return Err(invalid("MQTT_TOPIC", topic, "a topic without wildcards"));
        }

        let client_prefix = get("MQTT_CLIENT_PREFIX").unwrap_or(DEFAULT_CLIENT_PREFIX);
        if client_prefix.len() > MAX_CLIENT_PREFIX_LEN {
            return Err(invalid(
                "MQTT_CLIENT_PREFIX",
                client_prefix,
                "at most 19 bytes",
            ));
        }

        let sample_interval_ms = match get("SAMPLE_INTERVAL_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| invalid("SAMPLE_INTERVAL_MS", raw, "a positive number"))?,
            None => SAMPLE_INTERVAL_MS,
        };

        let timezone_name = get("TIMEZONE").unwrap_or(DEFAULT_TIMEZONE);
        let timezone = timezone_name
            .parse::<Tz>()
            .map_err(|_| invalid("TIMEZONE", timezone_name, "an IANA timezone"))?;

        Ok(Self {
            wifi: WifiCredentials {
                ssid: ssid.to_owned(),
                password: password.to_owned(),
            },
            broker: BrokerConfig {
                host: get("MQTT_HOST").unwrap_or(DEFAULT_MQTT_HOST).to_owned(),
                port,
                topic: topic.to_owned(),
                client_prefix: client_prefix.to_owned(),
            },
            sample_interval: Duration::from_millis(sample_interval_ms),
            wifi_join: retry_policy(
                Duration::from_millis(WIFI_POLL_INTERVAL_MS),
                "WIFI_MAX_POLLS",
                get("WIFI_MAX_POLLS"),
            )?,
            reconnect: retry_policy(
                Duration::from_millis(RECONNECT_DELAY_MS),
                "MQTT_MAX_CONNECT_ATTEMPTS",
                get("MQTT_MAX_CONNECT_ATTEMPTS"),
            )?,
            timezone,
        })
    }
}

fn retry_policy(
    delay: Duration,
    key: &'static str,
    raw: Option<&str>,
) -> Result<RetryPolicy, ConfigError> {
    match raw {
        None => Ok(RetryPolicy::unbounded(delay)),
        Some(raw) => raw
            .parse::<NonZeroU32>()
            .map(|max_attempts| RetryPolicy::bounded(delay, max_attempts))
            .map_err(|_| invalid(key, raw, "a positive number")),
    }
}

fn invalid(key: &'static str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_owned(),
        expected,
    }
}

use crate::config::DHT11_EMPTY_SAMPLE_MSG;
use crate::models::Reading;
use crate::time_utils::{get_formatted_timestamp, get_uptime_string};
use embassy_time::Duration;
use log::{error, info, warn};

const SPLASH_SCREEN: &str = r#"
  _____           _
 |  ___|   _ ___(_) ___  _ __
 | |_ | | | / __| |/ _ \| '_ \
 |  _|| |_| \__ \ | (_) | | | |
 |_|   \__,_|___/_|\___/|_| |_|   edge node"#;

pub(crate) enum LogLevel {
    Info,
    Warn,
    Error,
}

pub fn print_splash_screen() {
    info!("{}", SPLASH_SCREEN);
}

pub(crate) fn log_reading(data: &Reading) {
    let env_msg = format!(
        "[ 🌡️ Temp {:.2}C | 💧Humidity {:.2}% | 🏭 CO raw {} ]",
        data.temperature, data.humidity, data.co_raw
    );
    log_message(LogLevel::Info, &env_msg);
}

pub(crate) fn log_sensor_error(sensor_name: &str, error: impl std::fmt::Debug) {
    log_message(
        LogLevel::Error,
        &format!("🚫 {} Error: {:?}", sensor_name, error),
    );
}

pub(crate) fn log_empty_sample() {
    log_message(LogLevel::Warn, DHT11_EMPTY_SAMPLE_MSG);
}

pub(crate) fn log_connect_attempt(attempt: u32, client_id: &str) {
    log_message(
        LogLevel::Info,
        &format!(
            "📡 Attempting MQTT connection #{} as {}...",
            attempt, client_id
        ),
    );
}

pub(crate) fn log_connected(client_id: &str) {
    log_message(
        LogLevel::Info,
        &format!("📡 MQTT connected as {}", client_id),
    );
}

pub(crate) fn log_connect_failed(error: impl std::fmt::Debug, retry_in: Duration) {
    log_message(
        LogLevel::Warn,
        &format!(
            "📡 MQTT connection failed, rc={:?}, try again in {} seconds",
            error,
            retry_in.as_secs()
        ),
    );
}

pub(crate) fn log_publish(topic: &str, payload: &str) {
    log_message(
        LogLevel::Info,
        &format!("📤 Publishing to {}: {}", topic, payload),
    );
}

pub(crate) fn log_publish_failed(error: impl std::fmt::Debug) {
    log_message(LogLevel::Error, &format!("📤 Publish failed: {:?}", error));
}

fn log_message(level: LogLevel, message: &str) {
    let prefix = format!("{} [{}]", get_uptime_string(), get_formatted_timestamp());

    match level {
        LogLevel::Error => error!("\x1b[31m{} {}\x1b[0m", prefix, message),
        LogLevel::Warn => warn!("\x1b[38;5;11m{} {}\x1b[0m", prefix, message),
        LogLevel::Info => info!("\x1b[38;5;40m{} {}\x1b[0m", prefix, message),
    }
}

use crate::config::TIMESTAMP_PATTERN;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::OnceLock;

static TIMEZONE: OnceLock<Tz> = OnceLock::new();

/// Sets the timezone used by log timestamps. Only the first call has an effect.
pub fn set_timezone(timezone: Tz) {
    let _ = TIMEZONE.set(timezone);
}

#[cfg(target_os = "espidf")]
pub async fn setup_ntp() -> anyhow::Result<esp_idf_svc::sntp::EspSntp<'static>> {
    use anyhow::Context;
    use embassy_time::Timer;
    use esp_idf_svc::sntp::{EspSntp, SyncStatus};
    use log::{info, warn};

    let ntp_client = EspSntp::new_default().context("‼️ Failed to init NTP")?;
    info!("\x1b[38;5;27m ⏳ Time sync in progress...");

    let mut wait_cycles = 0;
    const MAX_WAIT_CYCLES: u32 = 100;

    while ntp_client.get_sync_status() != SyncStatus::Completed {
        if wait_cycles >= MAX_WAIT_CYCLES {
            warn!(
                "\x1b[38;5;11m ⏳ NTP sync timed out. Proceeding with system time (sync will continue in background)."
            );
            return Ok(ntp_client);
        }

        Timer::after_millis(100).await;

        wait_cycles += 1;
    }

    info!("\x1b[38;5;27m ⏳ Time is synchronized");
    Ok(ntp_client)
}

#[cfg(target_os = "espidf")]
fn uptime_micros() -> i64 {
    unsafe { esp_idf_svc::sys::esp_timer_get_time() }
}

#[cfg(not(target_os = "espidf"))]
fn uptime_micros() -> i64 {
    static STARTED: OnceLock<std::time::Instant> = OnceLock::new();
    let elapsed = STARTED.get_or_init(std::time::Instant::now).elapsed();
    i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX)
}

pub fn get_uptime_string() -> String {
    format_uptime(uptime_micros())
}

pub(crate) fn format_uptime(micros: i64) -> String {
    let seconds = micros / 1_000_000;
    let millis = (micros % 1_000_000) / 1_000;
    format!("[{:>4}.{:03}s]", seconds, millis)
}

pub fn get_formatted_timestamp() -> String {
    get_current_time_in_timezone()
        .format(TIMESTAMP_PATTERN)
        .to_string()
}

fn get_current_time_in_timezone() -> DateTime<Tz> {
    Utc::now().with_timezone(TIMEZONE.get().unwrap_or(&chrono_tz::UTC))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_padded_seconds_and_millis() {
        assert_eq!(format_uptime(0), "[   0.000s]");
        assert_eq!(format_uptime(5_042_999), "[   5.042s]");
        assert_eq!(format_uptime(86_400_000_000), "[86400.000s]");
    }

    #[test]
    fn timestamp_follows_the_pattern() {
        let ts = get_formatted_timestamp();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_PATTERN).is_ok());
    }
}

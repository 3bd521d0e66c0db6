use crate::config::{WIFI_REJOIN_EVERY_POLLS, WifiCredentials};
use crate::retry::{RetryPolicy, Sleeper};
use core::fmt::Debug;
use log::{debug, info, warn};
use thiserror::Error;

#[cfg(target_os = "espidf")]
pub use esp::EspWifiLink;

/// A station-mode network interface.
pub trait NetworkLink {
    type Error: Debug;

    /// Starts (or restarts) association. Does not wait for it to complete.
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error>;

    fn is_associated(&mut self) -> Result<bool, Self::Error>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("WiFi not associated after {polls} polls")]
    Exhausted { polls: u32 },
}

/// Associates and waits for the link to come up, polling every `policy.delay`.
///
/// Returns the number of polls it took. With an unbounded policy this only
/// returns once associated.
pub async fn join_network<L, S>(
    link: &mut L,
    credentials: &WifiCredentials,
    policy: &RetryPolicy,
    sleeper: &mut S,
) -> Result<u32, JoinError>
where
    L: NetworkLink,
    S: Sleeper,
{
    info!("📶 Connecting to {}", credentials.ssid);
    issue_begin(link, credentials);

    let mut polls = 0;
    loop {
        match link.is_associated() {
            Ok(true) => {
                info!("📶 WiFi connected after {} polls", polls);
                return Ok(polls);
            }
            Ok(false) => {}
            Err(e) => warn!("📶 WiFi status check failed: {:?}", e),
        }

        if policy.is_exhausted(polls) {
            return Err(JoinError::Exhausted { polls });
        }

        sleeper.sleep(policy.delay).await;
        polls += 1;

        if polls % WIFI_REJOIN_EVERY_POLLS == 0 {
            info!("📶 Still not connected after {} polls, retrying...", polls);
            issue_begin(link, credentials);
        } else {
            debug!("📶 .");
        }
    }
}

/// Re-issues association when the link dropped, without waiting for it.
pub(crate) fn ensure_link<L: NetworkLink>(link: &mut L, credentials: &WifiCredentials) {
    match link.is_associated() {
        Ok(true) => {}
        Ok(false) => {
            warn!("📶 WiFi is down, re-associating...");
            issue_begin(link, credentials);
        }
        Err(e) => warn!("📶 WiFi status check failed: {:?}", e),
    }
}

fn issue_begin<L: NetworkLink>(link: &mut L, credentials: &WifiCredentials) {
    if let Err(e) = link.begin(credentials) {
        warn!("📶 Connect call failed: {:?}", e);
    }
}

#[cfg(target_os = "espidf")]
mod esp {
    use super::NetworkLink;
    use crate::config::WifiCredentials;
    use anyhow::anyhow;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::modem::Modem;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration as WifiConfig, EspWifi};
    use log::{info, warn};

    pub struct EspWifiLink {
        wifi: EspWifi<'static>,
        started: bool,
        was_up: bool,
    }

    impl EspWifiLink {
        pub fn new(
            modem: Modem,
            sys_loop: EspSystemEventLoop,
            nvs: EspDefaultNvsPartition,
        ) -> anyhow::Result<Self> {
            Ok(Self {
                wifi: EspWifi::new(modem, sys_loop, Some(nvs))?,
                started: false,
                was_up: false,
            })
        }
    }

    impl NetworkLink for EspWifiLink {
        type Error = anyhow::Error;

        fn begin(&mut self, credentials: &WifiCredentials) -> anyhow::Result<()> {
            if !self.started {
                let auth_method = if credentials.password.is_empty() {
                    AuthMethod::None
                } else {
                    AuthMethod::WPA2Personal
                };

                self.wifi.set_configuration(&WifiConfig::Client(ClientConfiguration {
                    ssid: credentials
                        .ssid
                        .as_str()
                        .try_into()
                        .map_err(|_| anyhow!("SSID is too long"))?,
                    password: credentials
                        .password
                        .as_str()
                        .try_into()
                        .map_err(|_| anyhow!("Password is too long"))?,
                    auth_method,
                    ..Default::default()
                }))?;
                self.wifi.start()?;
                self.started = true;
                info!("📶 WiFi starting...");
            }

            self.wifi.connect()?;
            Ok(())
        }

        fn is_associated(&mut self) -> anyhow::Result<bool> {
            let up = self.wifi.is_up()?;

            if up && !self.was_up {
                let ip_info = self.wifi.sta_netif().get_ip_info()?;
                info!("📶 WiFi Connected! IP: {}", ip_info.ip);
            } else if !up && self.was_up {
                warn!("📶 WiFi connection lost");
            }
            self.was_up = up;

            Ok(up)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeLink;
    use super::*;
    use crate::retry::testing::RecordingSleeper;
    use core::num::NonZeroU32;
    use embassy_futures::block_on;
    use embassy_time::Duration;

    fn credentials() -> WifiCredentials {
        WifiCredentials {
            ssid: "home".into(),
            password: "secret".into(),
        }
    }

    #[test]
    fn polls_every_half_second_until_associated() {
        let mut link = FakeLink::up_after(6);
        let mut sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::unbounded(Duration::from_millis(500));

        let polls = block_on(join_network(&mut link, &credentials(), &policy, &mut sleeper));

        assert_eq!(polls, Ok(6));
        assert_eq!(sleeper.sleeps, vec![Duration::from_millis(500); 6]);
        assert_eq!(link.begins, 1);
    }

    #[test]
    fn already_associated_link_does_not_sleep() {
        let mut link = FakeLink::up_after(0);
        let mut sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::unbounded(Duration::from_millis(500));

        let polls = block_on(join_network(&mut link, &credentials(), &policy, &mut sleeper));

        assert_eq!(polls, Ok(0));
        assert!(sleeper.sleeps.is_empty());
    }

    #[test]
    fn association_is_reissued_periodically() {
        let mut link = FakeLink::up_after(45);
        let mut sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::unbounded(Duration::from_millis(500));

        block_on(join_network(&mut link, &credentials(), &policy, &mut sleeper)).unwrap();

        // initial begin, then after polls 20 and 40
        assert_eq!(link.begins, 3);
    }

    #[test]
    fn bounded_policy_gives_up() {
        let mut link = FakeLink::never_up();
        let mut sleeper = RecordingSleeper::default();
        let policy =
            RetryPolicy::bounded(Duration::from_millis(500), NonZeroU32::new(10).unwrap());

        let result = block_on(join_network(&mut link, &credentials(), &policy, &mut sleeper));

        assert_eq!(result, Err(JoinError::Exhausted { polls: 10 }));
        assert_eq!(sleeper.sleeps.len(), 10);
    }

    #[test]
    fn ensure_link_only_reassociates_when_down() {
        let mut link = FakeLink::up_after(0);
        ensure_link(&mut link, &credentials());
        assert_eq!(link.begins, 0);

        let mut link = FakeLink::never_up();
        ensure_link(&mut link, &credentials());
        assert_eq!(link.begins, 1);
    }
}

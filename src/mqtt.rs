use crate::logging::{log_connect_attempt, log_connect_failed, log_connected};
use crate::retry::{RetryPolicy, Sleeper};
use core::fmt::Debug;
use core::sync::atomic::{AtomicBool, Ordering};
use log::error;
use thiserror::Error;

#[cfg(target_os = "espidf")]
pub use esp::{BrokerError, EspBrokerClient, EspRandomIds};

/// A publish-only MQTT session.
#[allow(async_fn_in_trait)]
pub trait MessagingClient {
    type Error: Debug;

    fn is_connected(&self) -> bool;

    /// One handshake attempt with the configured broker.
    async fn connect(&mut self, client_id: &str) -> Result<(), Self::Error>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;

    /// Services inbound control traffic. Call once per tick.
    fn pump(&mut self);
}

/// Source of the random part of a client identifier.
pub trait ClientIdSource {
    fn next_suffix(&mut self) -> u16;
}

pub fn client_identifier(prefix: &str, suffix: u16) -> String {
    format!("{prefix}{suffix:x}")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconnectError {
    #[error("broker unreachable after {attempts} connection attempts")]
    Exhausted { attempts: u32 },
}

/// Brings the broker session up if it is down.
///
/// Each attempt uses a freshly generated client identifier so a stale session
/// left on the broker by a previous boot cannot collide with the new one.
/// Failed attempts are separated by `policy.delay`. `before_attempt` runs
/// ahead of every attempt.
///
/// Returns the number of attempts made, `0` when already connected.
pub async fn ensure_connected<M, I, S>(
    client: &mut M,
    ids: &mut I,
    client_prefix: &str,
    policy: &RetryPolicy,
    sleeper: &mut S,
    mut before_attempt: impl FnMut(),
) -> Result<u32, ReconnectError>
where
    M: MessagingClient,
    I: ClientIdSource,
    S: Sleeper,
{
    if client.is_connected() {
        return Ok(0);
    }

    let mut attempts = 0;
    loop {
        before_attempt();
        attempts += 1;

        let client_id = client_identifier(client_prefix, ids.next_suffix());
        log_connect_attempt(attempts, &client_id);

        match client.connect(&client_id).await {
            Ok(()) => {
                log_connected(&client_id);
                return Ok(attempts);
            }
            Err(e) if policy.is_exhausted(attempts) => {
                error!("📡 Giving up on the broker after {} attempts: {:?}", attempts, e);
                return Err(ReconnectError::Exhausted { attempts });
            }
            Err(e) => {
                log_connect_failed(e, policy.delay);
                sleeper.sleep(policy.delay).await;
            }
        }
    }
}

/// Session flags written by the MQTT library's event task.
///
/// A drop is latched until the next [`SessionFlags::begin`], so a session the
/// library re-established by itself still reads as down and the reconnect
/// loop replaces it with a fresh identifier.
#[derive(Debug, Default)]
pub struct SessionFlags {
    connected: AtomicBool,
    dropped: AtomicBool,
}

impl SessionFlags {
    /// Clears both flags for a new connection attempt.
    pub fn begin(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.dropped.store(false, Ordering::SeqCst);
    }

    pub fn on_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn on_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.dropped.store(true, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.dropped.load(Ordering::SeqCst)
    }
}

#[cfg(target_os = "espidf")]
mod esp {
    use super::{ClientIdSource, MessagingClient, SessionFlags};
    use crate::config::{
        BrokerConfig, MQTT_HANDSHAKE_TIMEOUT_MS, MQTT_LIBRARY_RECONNECT_HOLDOFF_S,
    };
    use embassy_time::{Duration, Instant, Timer};
    use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
    use esp_idf_svc::sys::{EspError, esp_random};
    use log::warn;
    use std::sync::{Arc, Mutex};
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum BrokerError {
        #[error("not connected to the broker")]
        NotConnected,

        #[error("no CONNACK within {0} ms")]
        HandshakeTimeout(u64),

        #[error("broker refused the session: {0}")]
        Refused(String),

        #[error(transparent)]
        Esp(#[from] EspError),
    }

    /// State written by the ESP-IDF MQTT task and read by the sampling loop.
    #[derive(Default)]
    struct SessionState {
        flags: SessionFlags,
        last_error: Mutex<Option<String>>,
    }

    impl SessionState {
        fn on_event(&self, payload: EventPayload<'_, EspError>) {
            match payload {
                EventPayload::Connected(_) => self.flags.on_connected(),
                EventPayload::Disconnected => self.flags.on_disconnected(),
                EventPayload::Error(e) => {
                    if let Ok(mut slot) = self.last_error.lock() {
                        *slot = Some(format!("{e:?}"));
                    }
                }
                _ => {}
            }
        }

        fn take_error(&self) -> Option<String> {
            self.last_error.lock().ok().and_then(|mut slot| slot.take())
        }
    }

    /// ESP-IDF MQTT client, rebuilt on every connection attempt so each
    /// session carries its own client identifier.
    pub struct EspBrokerClient {
        url: String,
        client: Option<EspMqttClient<'static>>,
        state: Arc<SessionState>,
        handshake_timeout: Duration,
    }

    impl EspBrokerClient {
        pub fn new(broker: &BrokerConfig) -> Self {
            Self {
                url: broker.url(),
                client: None,
                state: Arc::new(SessionState::default()),
                handshake_timeout: Duration::from_millis(MQTT_HANDSHAKE_TIMEOUT_MS),
            }
        }

        fn drop_session(&mut self) {
            self.client = None;
            self.state.flags.begin();
        }
    }

    impl MessagingClient for EspBrokerClient {
        type Error = BrokerError;

        fn is_connected(&self) -> bool {
            self.client.is_some() && self.state.flags.is_live()
        }

        async fn connect(&mut self, client_id: &str) -> Result<(), BrokerError> {
            self.drop_session();
            let _ = self.state.take_error();

            let conf = MqttClientConfiguration {
                client_id: Some(client_id),
                reconnect_timeout: Some(core::time::Duration::from_secs(
                    MQTT_LIBRARY_RECONNECT_HOLDOFF_S,
                )),
                ..Default::default()
            };
            let state = self.state.clone();
            let client = EspMqttClient::new_cb(&self.url, &conf, move |event| {
                state.on_event(event.payload())
            })?;
            self.client = Some(client);

            let deadline = Instant::now() + self.handshake_timeout;
            while Instant::now() < deadline {
                if self.state.flags.is_live() {
                    return Ok(());
                }
                if let Some(reason) = self.state.take_error() {
                    self.drop_session();
                    return Err(BrokerError::Refused(reason));
                }
                Timer::after_millis(100).await;
            }

            self.drop_session();
            Err(BrokerError::HandshakeTimeout(
                self.handshake_timeout.as_millis(),
            ))
        }

        fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
            if !self.is_connected() {
                return Err(BrokerError::NotConnected);
            }
            let client = self.client.as_mut().ok_or(BrokerError::NotConnected)?;
            client.publish(topic, QoS::AtMostOnce, false, payload)?;
            Ok(())
        }

        fn pump(&mut self) {
            if let Some(reason) = self.state.take_error() {
                warn!("📡 MQTT client reported: {}", reason);
            }

            // A dropped session is torn down even if the IDF task already
            // brought it back, since that session reuses the old identifier.
            if self.client.is_some() && !self.state.flags.is_live() {
                warn!("📡 Broker connection lost");
                self.drop_session();
            }
        }
    }

    /// Client identifier suffixes from the hardware RNG.
    pub struct EspRandomIds;

    impl ClientIdSource for EspRandomIds {
        fn next_suffix(&mut self) -> u16 {
            let random = unsafe { esp_random() };
            (random % 0xffff) as u16
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeBroker, SequentialIds};
    use super::*;
    use crate::retry::testing::RecordingSleeper;
    use core::num::NonZeroU32;
    use embassy_futures::block_on;
    use embassy_time::Duration;

    const FIVE_SECONDS: Duration = Duration::from_secs(5);

    fn reconnect(
        broker: &mut FakeBroker,
        ids: &mut SequentialIds,
        policy: RetryPolicy,
        sleeper: &mut RecordingSleeper,
    ) -> Result<u32, ReconnectError> {
        block_on(ensure_connected(
            broker,
            ids,
            "ESP32Client-",
            &policy,
            sleeper,
            || {},
        ))
    }

    #[test]
    fn identifier_is_prefix_plus_lowercase_hex() {
        assert_eq!(client_identifier("ESP32Client-", 0xbeef), "ESP32Client-beef");
        assert_eq!(client_identifier("node-", 0x0a), "node-a");
    }

    #[test]
    fn connected_client_is_left_alone() {
        let mut broker = FakeBroker::accepting_on(1);
        broker.connected = true;
        let mut ids = SequentialIds::default();
        let mut sleeper = RecordingSleeper::default();

        let attempts = reconnect(
            &mut broker,
            &mut ids,
            RetryPolicy::unbounded(FIVE_SECONDS),
            &mut sleeper,
        );

        assert_eq!(attempts, Ok(0));
        assert!(broker.attempted_ids.is_empty());
        assert!(sleeper.sleeps.is_empty());
    }

    #[test]
    fn accepts_on_nth_attempt_after_n_minus_one_waits() {
        let mut broker = FakeBroker::accepting_on(4);
        let mut ids = SequentialIds::default();
        let mut sleeper = RecordingSleeper::default();

        let attempts = reconnect(
            &mut broker,
            &mut ids,
            RetryPolicy::unbounded(FIVE_SECONDS),
            &mut sleeper,
        );

        assert_eq!(attempts, Ok(4));
        assert_eq!(broker.attempted_ids.len(), 4);
        assert_eq!(sleeper.sleeps, vec![FIVE_SECONDS; 3]);
        assert!(broker.is_connected());
    }

    #[test]
    fn keeps_retrying_a_broker_that_stays_down() {
        let mut broker = FakeBroker::accepting_on(2_001);
        let mut ids = SequentialIds::default();
        let mut sleeper = RecordingSleeper::default();

        let attempts = reconnect(
            &mut broker,
            &mut ids,
            RetryPolicy::unbounded(FIVE_SECONDS),
            &mut sleeper,
        );

        assert_eq!(attempts, Ok(2_001));
        assert_eq!(sleeper.sleeps.len(), 2_000);
        assert!(sleeper.sleeps.iter().all(|d| *d == FIVE_SECONDS));
    }

    #[test]
    fn bounded_policy_stops_without_a_trailing_wait() {
        let mut broker = FakeBroker::rejecting();
        let mut ids = SequentialIds::default();
        let mut sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::bounded(FIVE_SECONDS, NonZeroU32::new(3).unwrap());

        let result = reconnect(&mut broker, &mut ids, policy, &mut sleeper);

        assert_eq!(result, Err(ReconnectError::Exhausted { attempts: 3 }));
        assert_eq!(broker.attempted_ids.len(), 3);
        assert_eq!(sleeper.sleeps.len(), 2);
    }

    #[test]
    fn every_attempt_generates_a_new_identifier() {
        let mut broker = FakeBroker::accepting_on(3);
        let mut ids = SequentialIds::default();
        let mut sleeper = RecordingSleeper::default();

        reconnect(
            &mut broker,
            &mut ids,
            RetryPolicy::unbounded(FIVE_SECONDS),
            &mut sleeper,
        )
        .unwrap();

        assert_eq!(
            broker.attempted_ids,
            ["ESP32Client-0", "ESP32Client-1", "ESP32Client-2"]
        );
    }

    #[test]
    fn hook_runs_before_every_attempt() {
        let mut broker = FakeBroker::accepting_on(3);
        let mut ids = SequentialIds::default();
        let mut sleeper = RecordingSleeper::default();
        let mut hooks = 0;

        block_on(ensure_connected(
            &mut broker,
            &mut ids,
            "ESP32Client-",
            &RetryPolicy::unbounded(FIVE_SECONDS),
            &mut sleeper,
            || hooks += 1,
        ))
        .unwrap();

        assert_eq!(hooks, 3);
    }

    #[test]
    fn session_is_live_between_connack_and_drop() {
        let flags = SessionFlags::default();
        assert!(!flags.is_live());

        flags.on_connected();
        assert!(flags.is_live());

        flags.on_disconnected();
        assert!(!flags.is_live());
    }

    #[test]
    fn session_restored_by_the_library_still_reads_as_lost() {
        let flags = SessionFlags::default();
        flags.on_connected();

        flags.on_disconnected();
        flags.on_connected();

        assert!(!flags.is_live());
    }

    #[test]
    fn new_attempt_clears_a_latched_drop() {
        let flags = SessionFlags::default();
        flags.on_connected();
        flags.on_disconnected();

        flags.begin();
        assert!(!flags.is_live());
        flags.on_connected();
        assert!(flags.is_live());
    }
}

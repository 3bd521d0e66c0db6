use crate::config::NodeConfig;
use crate::logging::{
    log_empty_sample, log_publish, log_publish_failed, log_reading, log_sensor_error,
};
use crate::models::Payload;
use crate::mqtt::{ClientIdSource, MessagingClient, ReconnectError, ensure_connected};
use crate::network::{JoinError, NetworkLink, ensure_link, join_network};
use crate::retry::Sleeper;
use crate::sensors::{ClimateSensor, GasSensor, SensorReader};
use core::convert::Infallible;
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    PublishFailed,
    /// Temperature or humidity was `NaN`.
    SkippedInvalid,
    /// The gas ADC could not be read.
    SkippedSensorFault,
}

/// The node's only control loop. Owns every peripheral and network object.
pub struct SamplingLoop<L, M, I, C, G, S> {
    link: L,
    client: M,
    ids: I,
    sensors: SensorReader<C, G>,
    sleeper: S,
    config: NodeConfig,
}

impl<L, M, I, C, G, S> SamplingLoop<L, M, I, C, G, S>
where
    L: NetworkLink,
    M: MessagingClient,
    I: ClientIdSource,
    C: ClimateSensor,
    G: GasSensor,
    S: Sleeper,
{
    pub fn new(
        link: L,
        client: M,
        ids: I,
        sensors: SensorReader<C, G>,
        sleeper: S,
        config: NodeConfig,
    ) -> Self {
        Self {
            link,
            client,
            ids,
            sensors,
            sleeper,
            config,
        }
    }

    pub async fn join_network(&mut self) -> Result<u32, JoinError> {
        join_network(
            &mut self.link,
            &self.config.wifi,
            &self.config.wifi_join,
            &mut self.sleeper,
        )
        .await
    }

    /// Runs ticks until a bounded reconnect policy gives up. With the default
    /// unbounded policy this never returns.
    pub async fn run(&mut self) -> Result<Infallible, ReconnectError> {
        loop {
            self.tick().await?;
        }
    }

    /// One sampling period: reconnect if needed, service the client, sample,
    /// publish, then sleep for the sampling interval whatever the outcome.
    pub async fn tick(&mut self) -> Result<TickOutcome, ReconnectError> {
        let link = &mut self.link;
        let wifi = &self.config.wifi;
        ensure_connected(
            &mut self.client,
            &mut self.ids,
            &self.config.broker.client_prefix,
            &self.config.reconnect,
            &mut self.sleeper,
            || ensure_link(link, wifi),
        )
        .await?;

        self.client.pump();

        let outcome = self.sample_and_publish();

        self.sleeper.sleep(self.config.sample_interval).await;
        Ok(outcome)
    }

    fn sample_and_publish(&mut self) -> TickOutcome {
        let Some(reading) = self.sensors.take_reading() else {
            return TickOutcome::SkippedSensorFault;
        };

        let Ok(payload) = Payload::try_from(&reading) else {
            log_empty_sample();
            return TickOutcome::SkippedInvalid;
        };
        log_reading(&reading);

        let json = match payload.to_json() {
            Ok(json) => json,
            Err(e) => {
                log_sensor_error("Payload", e);
                return TickOutcome::PublishFailed;
            }
        };

        let topic = &self.config.broker.topic;
        log_publish(topic, &json);

        match self.client.publish(topic, json.as_bytes()) {
            Ok(()) => {
                info!("📤 Publish success");
                TickOutcome::Published
            }
            Err(e) => {
                log_publish_failed(e);
                TickOutcome::PublishFailed
            }
        }
    }
}

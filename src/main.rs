#[cfg(target_os = "espidf")]
#[embassy_executor::main]
async fn main(_spawner: embassy_executor::Spawner) {
    use esp_idf_svc::hal::delay::FreeRtos;
    use log::error;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    smart_fusion_node::logging::print_splash_screen();

    if let Err(e) = device::run().await {
        error!("\x1b[31m‼️ {:?}\x1b[0m", e);
    }

    error!("\x1b[31m‼️ Restarting in 5s...\x1b[0m");
    FreeRtos::delay_ms(5000);
    esp_idf_svc::hal::reset::restart();
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!(
        "smart-fusion-node is ESP-IDF firmware; build it for an espidf target or run `cargo test --lib`"
    );
}

#[cfg(target_os = "espidf")]
mod device {
    use anyhow::Context;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::delay::Ets;
    use esp_idf_svc::hal::gpio::{IOPin, PinDriver, Pull};
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{info, warn};
    use smart_fusion_node::config::NodeConfig;
    use smart_fusion_node::dht11::Dht11;
    use smart_fusion_node::mqtt::{EspBrokerClient, EspRandomIds};
    use smart_fusion_node::network::EspWifiLink;
    use smart_fusion_node::retry::EmbassySleeper;
    use smart_fusion_node::sensors::{Mq7Sensor, SensorReader};
    use smart_fusion_node::tasks::SamplingLoop;
    use smart_fusion_node::time_utils;

    /// Builds every driver, joins the network and runs the sampling loop.
    /// Only returns when a bounded retry policy gives up or setup fails.
    pub(crate) async fn run() -> anyhow::Result<()> {
        let config = NodeConfig::from_build_env().context("‼️ Invalid build configuration")?;
        time_utils::set_timezone(config.timezone);

        let peripherals = Peripherals::take().context("Failed to take Peripherals")?;
        let sys_loop = EspSystemEventLoop::take().context("Failed to take system event loop")?;
        let nvs = EspDefaultNvsPartition::take().context("Failed to take NVS partition")?;

        // to disable the 'Lighthouse'
        let mut led_data_pin = PinDriver::output(peripherals.pins.gpio8)
            .context("Failed to initialize PinDriver")?;
        led_data_pin.set_low()?;

        let mut dht_pin = PinDriver::input_output_od(peripherals.pins.gpio4.downgrade())
            .context("Failed to initialize DHT11 data pin")?;
        dht_pin.set_pull(Pull::Up)?;
        let dht = Dht11::new(dht_pin, Ets).context("‼️ Failed to init DHT11")?;

        let mq7 = Mq7Sensor::new(peripherals.adc1, peripherals.pins.gpio3)
            .context("‼️ Failed to init MQ-7 ADC channel")?;

        info!("\x1b[38;5;27m✅ Sensors initialized successfully!\x1b[0m");

        let link = EspWifiLink::new(peripherals.modem, sys_loop, nvs)
            .context("‼️ Failed to init WiFi")?;
        let client = EspBrokerClient::new(&config.broker);

        let mut node = SamplingLoop::new(
            link,
            client,
            EspRandomIds,
            SensorReader::new(dht, mq7),
            EmbassySleeper,
            config,
        );

        node.join_network().await.context("‼️ WiFi unavailable")?;

        let _sntp = match time_utils::setup_ntp().await {
            Ok(sntp) => Some(sntp),
            Err(e) => {
                warn!("⏳ Log timestamps stay unsynchronized: {:?}", e);
                None
            }
        };

        let Err(e) = node.run().await;
        Err(e).context("‼️ Broker unreachable")
    }
}

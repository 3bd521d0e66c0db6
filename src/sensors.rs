use crate::dht11::Dht11;
use crate::logging::log_sensor_error;
use crate::models::Reading;
use core::fmt::Debug;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

#[cfg(target_os = "espidf")]
pub use esp::Mq7Sensor;

/// Temperature/humidity source. A failed read is reported as `NaN`.
pub trait ClimateSensor {
    fn read_temperature(&mut self) -> f32;
    fn read_humidity(&mut self) -> f32;
}

/// Raw analog gas channel, no calibration.
pub trait GasSensor {
    type Error: Debug;

    fn read_raw(&mut self) -> Result<u16, Self::Error>;
}

impl<P, D> ClimateSensor for Dht11<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    fn read_temperature(&mut self) -> f32 {
        self.measure().map_or(f32::NAN, |m| m.temperature)
    }

    fn read_humidity(&mut self) -> f32 {
        self.measure().map_or(f32::NAN, |m| m.humidity)
    }
}

pub struct SensorReader<C, G> {
    climate: C,
    gas: G,
}

impl<C: ClimateSensor, G: GasSensor> SensorReader<C, G> {
    pub fn new(climate: C, gas: G) -> Self {
        Self { climate, gas }
    }

    /// Samples every sensor once.
    ///
    /// Returns `None` only when the ADC itself fails; a DHT11 failure still
    /// yields a reading, with `NaN` in the affected fields.
    pub fn take_reading(&mut self) -> Option<Reading> {
        let humidity = self.climate.read_humidity();
        let temperature = self.climate.read_temperature();

        let co_raw = match self.gas.read_raw() {
            Ok(raw) => raw,
            Err(e) => {
                log_sensor_error("MQ-7 ADC", e);
                return None;
            }
        };

        Some(Reading {
            temperature,
            humidity,
            co_raw,
        })
    }
}

#[cfg(target_os = "espidf")]
mod esp {
    use super::GasSensor;
    use esp_idf_svc::hal::adc::ADC1;
    use esp_idf_svc::hal::adc::attenuation::DB_11;
    use esp_idf_svc::hal::adc::oneshot::config::AdcChannelConfig;
    use esp_idf_svc::hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
    use esp_idf_svc::hal::gpio::Gpio3;
    use esp_idf_svc::sys::EspError;

    /// MQ-7 analog output on ADC1 channel 3 (GPIO3 on the ESP32-C3).
    pub struct Mq7Sensor {
        channel: AdcChannelDriver<'static, Gpio3, AdcDriver<'static, ADC1>>,
    }

    impl Mq7Sensor {
        pub fn new(adc: ADC1, pin: Gpio3) -> anyhow::Result<Self> {
            let driver = AdcDriver::new(adc)?;
            // 11 dB covers the full 0-3.1 V range of the divided sensor output
            let config = AdcChannelConfig {
                attenuation: DB_11,
                ..Default::default()
            };

            Ok(Self {
                channel: AdcChannelDriver::new(driver, pin, &config)?,
            })
        }
    }

    impl GasSensor for Mq7Sensor {
        type Error = EspError;

        fn read_raw(&mut self) -> Result<u16, EspError> {
            self.channel.read_raw()
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{ClimateSensor, GasSensor};

    /// Serves the same values every tick.
    #[derive(Clone, Copy)]
    pub(crate) struct FixedClimate {
        pub(crate) temperature: f32,
        pub(crate) humidity: f32,
    }

    impl ClimateSensor for FixedClimate {
        fn read_temperature(&mut self) -> f32 {
            self.temperature
        }

        fn read_humidity(&mut self) -> f32 {
            self.humidity
        }
    }

    /// `None` simulates an ADC driver fault.
    #[derive(Clone, Copy)]
    pub(crate) struct FixedGas(pub(crate) Option<u16>);

    impl GasSensor for FixedGas {
        type Error = &'static str;

        fn read_raw(&mut self) -> Result<u16, Self::Error> {
            self.0.ok_or("adc timeout")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FixedClimate, FixedGas};
    use super::*;

    #[test]
    fn reading_carries_all_three_values() {
        let climate = FixedClimate {
            temperature: 24.5,
            humidity: 60.0,
        };
        let mut reader = SensorReader::new(climate, FixedGas(Some(312)));

        assert_eq!(
            reader.take_reading(),
            Some(Reading {
                temperature: 24.5,
                humidity: 60.0,
                co_raw: 312,
            })
        );
    }

    #[test]
    fn climate_failure_still_produces_a_reading() {
        let climate = FixedClimate {
            temperature: f32::NAN,
            humidity: f32::NAN,
        };
        let mut reader = SensorReader::new(climate, FixedGas(Some(4095)));

        let reading = reader.take_reading().unwrap();

        assert!(!reading.is_valid());
        assert_eq!(reading.co_raw, 4095);
    }

    #[test]
    fn adc_failure_yields_no_reading() {
        let climate = FixedClimate {
            temperature: 24.5,
            humidity: 60.0,
        };
        let mut reader = SensorReader::new(climate, FixedGas(None));

        assert_eq!(reader.take_reading(), None);
    }
}

//! Bit-banged DHT11 driver over a single open-drain data line.
//!
//! Protocol: the host holds the line low for 18 ms and releases it; the
//! sensor answers with 80 µs low / 80 µs high and then sends 40 bits, each a
//! 50 µs low followed by a high pulse of ~26 µs (`0`) or ~70 µs (`1`).
//! Bytes are humidity, humidity tenths, temperature, temperature tenths
//! (bit 7 is the sign) and a checksum.

use crate::config::DHT11_MIN_INTERVAL_MS;
use crate::logging::log_sensor_error;
use embedded_hal::delay::DelayNs;
use embassy_time::{Duration, Instant};
use embedded_hal::digital::{ErrorKind, InputPin, OutputPin};
use thiserror::Error;

const START_SIGNAL_MS: u32 = 18;
const RESPONSE_TIMEOUT_US: u32 = 100;
const BIT_START_TIMEOUT_US: u32 = 70;
/// High pulses longer than this are ones.
const ONE_THRESHOLD_US: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DhtError {
    #[error("no edge within the expected window ({phase})")]
    Timeout { phase: &'static str },

    #[error("checksum mismatch: computed {computed:#04x}, received {received:#04x}")]
    Checksum { computed: u8, received: u8 },

    #[error("data pin error: {0:?}")]
    Pin(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub temperature: f32,
    pub humidity: f32,
}

pub struct Dht11<P, D> {
    pin: P,
    delay: D,
    min_interval: Duration,
    last: Option<(Instant, Result<Measurement, DhtError>)>,
}

impl<P, D> Dht11<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    /// Takes an open-drain pin with a pull-up and leaves the line idle (high).
    pub fn new(mut pin: P, delay: D) -> Result<Self, DhtError> {
        pin.set_high().map_err(pin_error)?;

        Ok(Self {
            pin,
            delay,
            min_interval: Duration::from_millis(DHT11_MIN_INTERVAL_MS),
            last: None,
        })
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Reads the sensor, or returns the previous result if it is younger than
    /// the sensor's minimum sampling period.
    pub fn measure(&mut self) -> Result<Measurement, DhtError> {
        if let Some((taken_at, result)) = &self.last
            && taken_at.elapsed() < self.min_interval
        {
            return *result;
        }

        let result = self.read_frame().and_then(decode);
        if let Err(e) = &result {
            log_sensor_error("DHT11", e);
        }
        self.last = Some((Instant::now(), result));
        result
    }

    fn read_frame(&mut self) -> Result<[u8; 5], DhtError> {
        self.pin.set_low().map_err(pin_error)?;
        self.delay.delay_ms(START_SIGNAL_MS);
        self.pin.set_high().map_err(pin_error)?;

        self.wait_while(true, RESPONSE_TIMEOUT_US, "response")?;
        self.wait_while(false, RESPONSE_TIMEOUT_US, "response low")?;
        self.wait_while(true, RESPONSE_TIMEOUT_US, "response high")?;

        let mut data = [0u8; 5];
        for bit in 0..40 {
            self.wait_while(false, BIT_START_TIMEOUT_US, "bit start")?;
            let high_us = self.wait_while(true, RESPONSE_TIMEOUT_US, "bit value")?;
            if high_us > ONE_THRESHOLD_US {
                data[bit / 8] |= 1 << (7 - bit % 8);
            }
        }

        Ok(data)
    }

    /// Spins while the line sits at `high`, returning roughly how many
    /// microseconds that took.
    fn wait_while(
        &mut self,
        high: bool,
        timeout_us: u32,
        phase: &'static str,
    ) -> Result<u32, DhtError> {
        let mut elapsed_us = 0;
        while self.pin.is_high().map_err(pin_error)? == high {
            if elapsed_us >= timeout_us {
                return Err(DhtError::Timeout { phase });
            }
            self.delay.delay_us(1);
            elapsed_us += 1;
        }
        Ok(elapsed_us)
    }
}

fn decode(data: [u8; 5]) -> Result<Measurement, DhtError> {
    let computed = data[..4]
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    if computed != data[4] {
        return Err(DhtError::Checksum {
            computed,
            received: data[4],
        });
    }

    let humidity = f32::from(data[0]) + f32::from(data[1]) * 0.1;
    let mut temperature = f32::from(data[2]) + f32::from(data[3] & 0x0f) * 0.1;
    if data[3] & 0x80 != 0 {
        temperature = -temperature;
    }

    Ok(Measurement {
        temperature,
        humidity,
    })
}

fn pin_error(e: impl embedded_hal::digital::Error) -> DhtError {
    DhtError::Pin(e.kind())
}

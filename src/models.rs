use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;
use thiserror::Error;

/// One sample of every sensor, taken once per tick and dropped after publishing.
///
/// The DHT11 side reports a failed read as `NaN`; the gas channel is a raw
/// ADC count with no calibration and no validity check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    pub co_raw: u16,
}

impl Reading {
    pub fn is_valid(&self) -> bool {
        self.temperature.is_finite() && self.humidity.is_finite()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("temperature/humidity not available (t={temperature}, h={humidity})")]
    InvalidReading { temperature: f32, humidity: f32 },
}

/// The message body published on every successful tick:
/// `{"temp":24.50,"hum":60.00,"co_raw":312}`.
///
/// Field order is the declaration order. Floats always carry two decimals.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct Payload {
    #[serde(serialize_with = "two_decimals")]
    temp: f32,
    #[serde(serialize_with = "two_decimals")]
    hum: f32,
    co_raw: u16,
}

impl Payload {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl TryFrom<&Reading> for Payload {
    type Error = PayloadError;

    fn try_from(reading: &Reading) -> Result<Self, Self::Error> {
        if !reading.is_valid() {
            return Err(PayloadError::InvalidReading {
                temperature: reading.temperature,
                humidity: reading.humidity,
            });
        }

        Ok(Self {
            temp: reading.temperature,
            hum: reading.humidity,
            co_raw: reading.co_raw,
        })
    }
}

fn two_decimals<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    let raw = RawValue::from_string(format!("{:.2}", value)).map_err(S::Error::custom)?;
    raw.serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn payload(temperature: f32, humidity: f32, co_raw: u16) -> String {
        let reading = Reading {
            temperature,
            humidity,
            co_raw,
        };
        Payload::try_from(&reading).unwrap().to_json().unwrap()
    }

    #[test]
    fn reference_reading_serializes_exactly() {
        assert_eq!(
            payload(24.5, 60.0, 312),
            r#"{"temp":24.50,"hum":60.00,"co_raw":312}"#
        );
    }

    #[test]
    fn negative_and_extreme_values() {
        assert_eq!(
            payload(-3.2, 0.0, 0),
            r#"{"temp":-3.20,"hum":0.00,"co_raw":0}"#
        );
        assert_eq!(
            payload(50.0, 95.0, u16::MAX),
            r#"{"temp":50.00,"hum":95.00,"co_raw":65535}"#
        );
    }

    #[test]
    fn nan_readings_do_not_become_payloads() {
        for (t, h) in [(f32::NAN, 60.0), (24.5, f32::NAN), (f32::NAN, f32::NAN)] {
            let reading = Reading {
                temperature: t,
                humidity: h,
                co_raw: 312,
            };
            assert!(!reading.is_valid());
            assert!(matches!(
                Payload::try_from(&reading),
                Err(PayloadError::InvalidReading { .. })
            ));
        }
    }

    proptest! {
        #[test]
        fn payload_has_three_fields_in_order(
            t in -40.0f32..85.0,
            h in 0.0f32..100.0,
            co in any::<u16>(),
        ) {
            let json = payload(t, h, co);

            let temp_at = json.find("\"temp\":").unwrap();
            let hum_at = json.find("\"hum\":").unwrap();
            let co_at = json.find("\"co_raw\":").unwrap();
            prop_assert!(temp_at < hum_at && hum_at < co_at);

            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            let object = value.as_object().unwrap();
            prop_assert_eq!(object.len(), 3);
            prop_assert!((object["temp"].as_f64().unwrap() - f64::from(t)).abs() <= 0.005 + 1e-6);
            prop_assert!((object["hum"].as_f64().unwrap() - f64::from(h)).abs() <= 0.005 + 1e-6);
            prop_assert_eq!(object["co_raw"].as_u64().unwrap(), u64::from(co));
        }
    }
}

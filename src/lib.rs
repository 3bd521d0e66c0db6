//! Edge sensor node: samples a DHT11 and an MQ-7 and publishes the readings
//! as JSON to an MQTT broker over WiFi.
//!
//! Everything except the ESP-IDF adapters builds on the host, so the control
//! loop is tested with in-memory fakes.

pub mod config;
pub mod dht11;
pub mod logging;
pub mod models;
pub mod mqtt;
pub mod network;
pub mod retry;
pub mod sensors;
pub mod tasks;
pub mod time_utils;

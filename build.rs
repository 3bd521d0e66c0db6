use dotenvy::dotenv_iter;
use embuild::espidf;

fn main() {
    load_dotenv_variables();

    // The library is also built for the host to run its unit tests,
    // there is no ESP-IDF environment to forward in that case.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        espidf::sysenv::output();
    }
}

/// Bridges the gap between the host machine's environment and the ESP32 target.
///
/// Since microcontrollers do not have a traditional file system to read `.env` files
/// at runtime, we must "bake" these values into the binary during compilation.
///
/// This function uses the Cargo Communication Protocol:
/// 1. It reads key-value pairs from the local `.env` file via `dotenvy`.
/// 2. It emits `cargo:rustc-env=KEY=VALUE` instructions to the console.
/// 3. Cargo intercepts these instructions and provides them to the `rustc` compiler.
/// 4. `option_env!("KEY")` in `config.rs` then picks them up, and
///    `NodeConfig::from_build_env` validates them at boot.
///
/// Keys that are absent fall back to the defaults in `config.rs`, except the
/// WiFi SSID which has no sensible default and is rejected at boot.
///
/// # Security Note
/// This method hard-codes secrets into the firmware image. For commercial products,
/// consider using ESP-IDF's **NVS (Non-Volatile Storage)** or **Wi-Fi Provisioning**
/// to allow users to set credentials without re-flashing.
fn load_dotenv_variables() {
    // To ensure the build script re-runs if the secrets change
    println!("cargo:rerun-if-changed=.env");

    if let Ok(iter) = dotenv_iter() {
        for item in iter {
            let (key, value) = item.expect("Failed to read .env element");
            println!("cargo:rustc-env={}={}", key, value);
        }
    }
}

// Centralized version information

// Firmware release tag shown in the boot banner
pub const FIRMWARE_VERSION: &str = "v3.0-rust";

// Cargo package version from Cargo.toml
pub const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

// Version info string for logging
pub fn version_info() -> String {
    format!("Firmware: {}, Cargo: {}", FIRMWARE_VERSION, CARGO_VERSION)
}

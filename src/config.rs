use anyhow::Result;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use railyard_core::config::{Config, NetworkConfig};

const CONFIG_NAMESPACE: &str = "railyard";
const CONFIG_KEY: &str = "config";

/// Compiled-in defaults, with Wi-Fi credentials from `wifi_config.h` when present.
pub fn compiled_default() -> Config {
    let ssid = env!("WIFI_SSID");
    let password = env!("WIFI_PASSWORD");
    log::info!(
        "Config default: SSID='{}', Password={}",
        if ssid.is_empty() { "<built-in>" } else { ssid },
        if password.is_empty() { "<built-in>" } else { "<set>" }
    );
    Config {
        network: NetworkConfig::default().with_credentials(ssid, password),
        ..Config::default()
    }
}

pub fn load_or_default(partition: &EspDefaultNvsPartition) -> Result<Config> {
    match load_from_nvs(partition) {
        Ok(config) => match config.validate() {
            Ok(()) => {
                log::info!("Loaded configuration from NVS");
                Ok(config)
            }
            Err(e) => {
                log::warn!("Stored configuration rejected ({}), using defaults", e);
                store_defaults(partition)
            }
        },
        Err(e) => {
            log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
            store_defaults(partition)
        }
    }
}

pub fn save(partition: &EspDefaultNvsPartition, config: &Config) -> Result<()> {
    let mut nvs = open(partition, false)?;
    let json = serde_json::to_vec(config)?;
    nvs.set_blob(CONFIG_KEY, &json)?;
    log::info!("Configuration saved to NVS");
    Ok(())
}

fn store_defaults(partition: &EspDefaultNvsPartition) -> Result<Config> {
    let config = compiled_default();
    if let Err(e) = save(partition, &config) {
        log::warn!("Failed to save default config to NVS: {:?}", e);
    }
    Ok(config)
}

fn load_from_nvs(partition: &EspDefaultNvsPartition) -> Result<Config> {
    let nvs = open(partition, true)?;
    let mut buf = vec![0u8; 2048];
    let data = nvs
        .get_blob(CONFIG_KEY, &mut buf)?
        .ok_or_else(|| anyhow::anyhow!("Config not found in NVS"))?;
    Ok(serde_json::from_slice(data)?)
}

fn open(partition: &EspDefaultNvsPartition, read_only: bool) -> Result<EspNvs<NvsDefault>> {
    Ok(EspNvs::new(partition.clone(), CONFIG_NAMESPACE, !read_only)?)
}

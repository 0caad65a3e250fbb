use anyhow::{anyhow, Context, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    ipv4::{Configuration as IpConfiguration, Mask, RouterConfiguration, Subnet},
    netif::{EspNetif, NetifConfiguration},
    nvs::EspDefaultNvsPartition,
    wifi::{AccessPointConfiguration, AuthMethod, BlockingWifi, Configuration, EspWifi},
};
use railyard_core::config::NetworkConfig;
use std::net::Ipv4Addr;

/// Soft access point the layout's tablets join; the controller is its router.
pub struct AccessPoint {
    wifi: BlockingWifi<EspWifi<'static>>,
    pub ssid: String,
}

impl AccessPoint {
    pub fn start(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        network: &NetworkConfig,
    ) -> Result<Self> {
        log::info!("Starting access point '{}'", network.ssid);

        if network.ssid.is_empty() {
            log::error!("Access point SSID is empty! Check wifi_config.h");
            anyhow::bail!("Access point SSID cannot be empty");
        }

        let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;
        esp_wifi
            .swap_netif_ap(router_netif(network)?)
            .context("failed to apply access point address")?;

        let cfg = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: network
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("Invalid SSID format: {}", network.ssid))?,
            password: network
                .password
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("Invalid password format"))?,
            auth_method: if network.password.is_empty() {
                log::warn!("Access point password is empty, running an open network");
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            channel: 1,
            ..Default::default()
        });

        let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;
        wifi.set_configuration(&cfg)?;
        wifi.start()?;
        wifi.wait_netif_up()?;

        let ap = Self {
            wifi,
            ssid: network.ssid.clone(),
        };
        log::info!(
            "Access point up: SSID '{}', address {}",
            ap.ssid,
            ap.get_ip().unwrap_or_else(|| "unknown".to_string())
        );
        Ok(ap)
    }

    pub fn get_ip(&self) -> Option<String> {
        self.wifi
            .wifi()
            .ap_netif()
            .get_ip_info()
            .ok()
            .map(|ip_info| format!("{}", ip_info.ip))
    }

    pub fn get_mac(&self) -> String {
        self.wifi
            .wifi()
            .ap_netif()
            .get_mac()
            .ok()
            .map(|mac| {
                format!(
                    "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
                    mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
                )
            })
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

fn router_netif(network: &NetworkConfig) -> Result<EspNetif> {
    let mask_ip = Ipv4Addr::from(network.netmask);
    let mask = Mask::try_from(mask_ip).map_err(|_| anyhow!("invalid subnet mask: {}", mask_ip))?;
    if network.ip != network.gateway {
        log::warn!(
            "Access point address {:?} differs from gateway {:?}; serving on the gateway",
            network.ip,
            network.gateway
        );
    }

    let conf = NetifConfiguration {
        ip_configuration: Some(IpConfiguration::Router(RouterConfiguration {
            subnet: Subnet {
                gateway: Ipv4Addr::from(network.gateway),
                mask,
            },
            dhcp_enabled: true,
            dns: None,
            secondary_dns: None,
        })),
        ..NetifConfiguration::wifi_default_router()
    };
    Ok(EspNetif::new_with_conf(&conf)?)
}

use log::{info, warn};

/// Last reset reason as a string
pub fn get_reset_reason() -> &'static str {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };

    match reason {
        esp_idf_sys::esp_reset_reason_t_ESP_RST_UNKNOWN => "Unknown",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_POWERON => "Power-on",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_EXT => "External pin",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SW => "Software reset",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC => "Panic",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT => "Interrupt watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT => "Task watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_WDT => "Other watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_DEEPSLEEP => "Deep sleep",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT => "Brownout",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SDIO => "SDIO",
        _ => "Unknown reason code",
    }
}

/// True when the previous boot ended badly enough to be worth a warning
pub fn was_abnormal_reset() -> bool {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };
    matches!(
        reason,
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC
            | esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT
            | esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT
            | esp_idf_sys::esp_reset_reason_t_ESP_RST_WDT
            | esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT
    )
}

pub fn log_reset_reason() {
    let reason = get_reset_reason();
    if was_abnormal_reset() {
        warn!("Last reset: {}", reason);
    } else {
        info!("Last reset: {}", reason);
    }
}

/// Restarts into whatever partition is marked for boot.
pub fn restart() {
    info!("Restarting system...");
    log::logger().flush();
    unsafe { esp_idf_sys::esp_restart() };
}

use std::time::Duration;

use serde::Serialize;
use url::Url;

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // Voice server REST endpoint
    pub api_url: String,

    // Audio devices, matched against display names
    pub input_device: String,
    pub output_device: String,

    // Normalized volumes, 0..100
    pub input_volume: i32,
    pub output_volume: i32,
    pub bypass_effects: bool,
    pub loopback: bool,

    // Transceiver presets
    pub unicom_hz: u32,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub height_m: f64,
    pub position_update_ms: u64,
}

impl Config {
    /// Build the configuration from the environment variables set at compile
    /// time by `build.rs` (all values come from `config.toml`).
    pub fn new() -> Result<Self, &'static str> {
        let api_url = env!("AFV_API_URL");
        Url::parse(api_url).map_err(|_| "Failed to parse AFV_API_URL")?;

        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            api_url: api_url.to_string(),

            input_device: env!("AFV_INPUT_DEVICE").to_string(),
            output_device: env!("AFV_OUTPUT_DEVICE").to_string(),
            input_volume: env!("AFV_INPUT_VOLUME").parse()
                .map_err(|_| "Failed to parse AFV_INPUT_VOLUME")?,
            output_volume: env!("AFV_OUTPUT_VOLUME").parse()
                .map_err(|_| "Failed to parse AFV_OUTPUT_VOLUME")?,
            bypass_effects: env!("AFV_BYPASS_EFFECTS").parse()
                .map_err(|_| "Failed to parse AFV_BYPASS_EFFECTS")?,
            loopback: env!("AFV_LOOPBACK").parse()
                .map_err(|_| "Failed to parse AFV_LOOPBACK")?,

            unicom_hz: env!("AFV_UNICOM_HZ").parse()
                .map_err(|_| "Failed to parse AFV_UNICOM_HZ")?,
            latitude_deg: env!("AFV_LATITUDE_DEG").parse()
                .map_err(|_| "Failed to parse AFV_LATITUDE_DEG")?,
            longitude_deg: env!("AFV_LONGITUDE_DEG").parse()
                .map_err(|_| "Failed to parse AFV_LONGITUDE_DEG")?,
            height_m: env!("AFV_HEIGHT_M").parse()
                .map_err(|_| "Failed to parse AFV_HEIGHT_M")?,
            position_update_ms: env!("AFV_POSITION_UPDATE_MS").parse()
                .map_err(|_| "Failed to parse AFV_POSITION_UPDATE_MS")?,
        })
    }

    /// Like [`Config::new`], with the failure as an error the binary can report.
    pub fn load() -> anyhow::Result<Self> {
        Self::new().map_err(anyhow::Error::msg)
    }

    pub fn position_update_interval(&self) -> Duration {
        Duration::from_millis(self.position_update_ms.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

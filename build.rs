use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    voice_server: VoiceServer,
    audio: Audio,
    transceivers: Transceivers,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct VoiceServer {
    api_url: String,
}

#[derive(Deserialize)]
struct Audio {
    input_device: String,
    output_device: String,
    input_volume: i32,
    output_volume: i32,
    bypass_effects: bool,
    loopback: bool,
}

#[derive(Deserialize)]
struct Transceivers {
    unicom_hz: u32,
    latitude_deg: f64,
    longitude_deg: f64,
    height_m: f64,
    position_update_ms: u64,
}

// Bake config.toml into the binary as rustc-env variables
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    println!("cargo:rustc-env=AFV_API_URL={}", config.voice_server.api_url);

    println!("cargo:rustc-env=AFV_INPUT_DEVICE={}", config.audio.input_device);
    println!("cargo:rustc-env=AFV_OUTPUT_DEVICE={}", config.audio.output_device);
    println!("cargo:rustc-env=AFV_INPUT_VOLUME={}", config.audio.input_volume);
    println!("cargo:rustc-env=AFV_OUTPUT_VOLUME={}", config.audio.output_volume);
    println!("cargo:rustc-env=AFV_BYPASS_EFFECTS={}", config.audio.bypass_effects);
    println!("cargo:rustc-env=AFV_LOOPBACK={}", config.audio.loopback);

    println!("cargo:rustc-env=AFV_UNICOM_HZ={}", config.transceivers.unicom_hz);
    println!("cargo:rustc-env=AFV_LATITUDE_DEG={}", config.transceivers.latitude_deg);
    println!("cargo:rustc-env=AFV_LONGITUDE_DEG={}", config.transceivers.longitude_deg);
    println!("cargo:rustc-env=AFV_HEIGHT_M={}", config.transceivers.height_m);
    println!(
        "cargo:rustc-env=AFV_POSITION_UPDATE_MS={}",
        config.transceivers.position_update_ms
    );
}

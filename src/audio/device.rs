//! Audio device descriptions and the backend abstraction the input and
//! output paths are written against.

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// 16-bit signed little endian
    I16,
    /// 32-bit float little endian
    F32,
}

impl SampleType {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleType::I16 => 2,
            SampleType::F32 => 4,
        }
    }
}

/// PCM stream format, requested from or negotiated with a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
    pub sample_type: SampleType,
}

impl AudioFormat {
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_type.bytes_per_sample() * self.channels as usize
    }
}

/// A device as reported by the audio subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    /// Display name, several variants of one card share it
    pub name: String,
    /// Backend identifier used to open the device (e.g. `plughw:CARD=PCH,DEV=0`)
    pub id: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
}

impl AudioDeviceInfo {
    pub fn new(name: &str, id: &str, direction: DeviceDirection) -> Self {
        Self {
            name: name.to_string(),
            id: id.to_string(),
            direction,
            is_default: false,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == DeviceDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == DeviceDirection::Output
    }

    /// Same name and direction, variant ignored.
    pub fn matches_name_and_direction(&self, other: &AudioDeviceInfo) -> bool {
        self.direction == other.direction && self.name == other.name
    }

    // lower is better
    fn latency_rank(&self) -> u8 {
        if self.id.starts_with("plughw:") {
            0
        } else if self.id.starts_with("sysdefault:") {
            1
        } else if self.id == "default" {
            2
        } else {
            3
        }
    }
}

/// Blocking capture stream, one call returns at most one device period.
pub trait InputStream: Send {
    fn format(&self) -> AudioFormat;
    /// Read captured bytes into `buf`, returns the number of bytes filled.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Blocking playback stream paced by the device.
pub trait OutputStream: Send {
    fn format(&self) -> AudioFormat;
    /// Bytes the device consumes per period.
    fn period_bytes(&self) -> usize;
    fn write(&mut self, buf: &[u8]) -> Result<()>;
}

pub trait AudioBackend: Send + Sync {
    fn devices(&self) -> Vec<AudioDeviceInfo>;
    fn open_input(&self, device: &AudioDeviceInfo, format: AudioFormat) -> Result<Box<dyn InputStream>>;
    fn open_output(&self, device: &AudioDeviceInfo, format: AudioFormat) -> Result<Box<dyn OutputStream>>;
}

/// Distinct display names of all devices in one direction.
pub fn device_names(devices: &[AudioDeviceInfo], direction: DeviceDirection) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for device in devices.iter().filter(|d| d.direction == direction) {
        if !names.contains(&device.name) {
            names.push(device.name.clone());
        }
    }
    names
}

/// Pick the variant of `requested` with the lowest latency that still
/// converts formats. Unknown devices are returned unchanged.
pub fn lowest_latency_variant(devices: &[AudioDeviceInfo], requested: &AudioDeviceInfo) -> AudioDeviceInfo {
    devices
        .iter()
        .filter(|d| d.matches_name_and_direction(requested))
        .min_by_key(|d| d.latency_rank())
        .cloned()
        .unwrap_or_else(|| requested.clone())
}

/// Resolve a display name: exact match first, then prefix match, then the
/// system default of that direction.
pub fn resolve_device(devices: &[AudioDeviceInfo], direction: DeviceDirection, name: &str) -> Option<AudioDeviceInfo> {
    let candidates: Vec<&AudioDeviceInfo> = devices.iter().filter(|d| d.direction == direction).collect();

    if let Some(device) = candidates.iter().find(|d| d.name == name || d.id == name) {
        return Some((*device).clone());
    }
    if !name.is_empty() {
        if let Some(device) = candidates.iter().find(|d| d.name.starts_with(name)) {
            return Some((*device).clone());
        }
    }

    log::info!("No {:?} device named \"{}\", using system default", direction, name);
    candidates
        .iter()
        .find(|d| d.is_default)
        .or_else(|| candidates.first())
        .map(|d| (*d).clone())
}

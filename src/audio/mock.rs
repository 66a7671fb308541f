//! In-memory audio backend for tests.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use super::device::{AudioBackend, AudioDeviceInfo, AudioFormat, DeviceDirection, InputStream, OutputStream};
use super::opus_codec::FRAME_SIZE;

#[derive(Debug, Default)]
pub struct MockLog {
    pub opened_inputs: Vec<String>,
    pub opened_outputs: Vec<String>,
    pub bytes_written: usize,
}

/// Capture devices deliver a constant sample value, playback devices swallow
/// everything. Streams pace themselves with a short sleep.
#[derive(Clone)]
pub struct MockBackend {
    pub devices: Vec<AudioDeviceInfo>,
    pub capture_channels: u32,
    pub capture_value: i16,
    pub log: Arc<Mutex<MockLog>>,
}

impl MockBackend {
    pub fn new() -> Self {
        let mut mic = AudioDeviceInfo::new("Mock Mic", "plughw:CARD=Mock,DEV=0", DeviceDirection::Input);
        mic.is_default = true;
        let mut speaker = AudioDeviceInfo::new("Mock Speaker", "plughw:CARD=Mock,DEV=0", DeviceDirection::Output);
        speaker.is_default = true;
        Self {
            devices: vec![
                mic,
                AudioDeviceInfo::new("USB Headset", "plughw:CARD=Headset,DEV=0", DeviceDirection::Input),
                speaker,
                AudioDeviceInfo::new("USB Headset", "plughw:CARD=Headset,DEV=0", DeviceDirection::Output),
            ],
            capture_channels: 1,
            capture_value: 1000,
            log: Arc::new(Mutex::new(MockLog::default())),
        }
    }

    pub fn input(&self, name: &str) -> AudioDeviceInfo {
        self.find(name, DeviceDirection::Input)
    }

    pub fn output(&self, name: &str) -> AudioDeviceInfo {
        self.find(name, DeviceDirection::Output)
    }

    fn find(&self, name: &str, direction: DeviceDirection) -> AudioDeviceInfo {
        self.devices
            .iter()
            .find(|d| d.name == name && d.direction == direction)
            .cloned()
            .unwrap_or_else(|| panic!("no mock device {name}"))
    }
}

impl AudioBackend for MockBackend {
    fn devices(&self) -> Vec<AudioDeviceInfo> {
        self.devices.clone()
    }

    fn open_input(&self, device: &AudioDeviceInfo, format: AudioFormat) -> Result<Box<dyn InputStream>> {
        self.log.lock().unwrap().opened_inputs.push(device.id.clone());
        Ok(Box::new(MockInput {
            format: AudioFormat {
                channels: self.capture_channels,
                ..format
            },
            value: self.capture_value,
        }))
    }

    fn open_output(&self, device: &AudioDeviceInfo, format: AudioFormat) -> Result<Box<dyn OutputStream>> {
        self.log.lock().unwrap().opened_outputs.push(device.id.clone());
        Ok(Box::new(MockOutput {
            format,
            log: self.log.clone(),
        }))
    }
}

struct MockInput {
    format: AudioFormat,
    value: i16,
}

impl InputStream for MockInput {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        thread::sleep(Duration::from_millis(2));
        let len = (FRAME_SIZE * self.format.bytes_per_frame()).min(buf.len());
        for chunk in buf[..len].chunks_exact_mut(2) {
            chunk.copy_from_slice(&self.value.to_le_bytes());
        }
        Ok(len)
    }
}

struct MockOutput {
    format: AudioFormat,
    log: Arc<Mutex<MockLog>>,
}

impl OutputStream for MockOutput {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn period_bytes(&self) -> usize {
        FRAME_SIZE * self.format.bytes_per_frame()
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        thread::sleep(Duration::from_millis(2));
        self.log.lock().unwrap().bytes_written += buf.len();
        Ok(())
    }
}

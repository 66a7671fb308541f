//! ALSA PCM device wrappers for audio capture and playback.

use alsa::device_name::HintIter;
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::device::{
    AudioBackend, AudioDeviceInfo, AudioFormat, DeviceDirection, InputStream, OutputStream, SampleType,
};

/// Frames per period, one 20 ms frame at 48 kHz.
const PERIOD_FRAMES: usize = 960;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual format after negotiation
    pub format: AudioFormat,
    /// Period size in frames (one frame = channels × sample width)
    pub period_size: usize,
}

/// Audio backend on top of the ALSA PCM API.
#[derive(Debug, Default)]
pub struct AlsaBackend;

impl AlsaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for AlsaBackend {
    fn devices(&self) -> Vec<AudioDeviceInfo> {
        let hints = match HintIter::new_str(None, "pcm") {
            Ok(hints) => hints,
            Err(e) => {
                log::error!("Failed to enumerate ALSA devices: {}", e);
                return Vec::new();
            }
        };

        let mut devices = Vec::new();
        for hint in hints {
            let Some(id) = hint.name else { continue };
            if id == "null" {
                continue;
            }
            // first description line is the card name, the rest describes the variant
            let name = hint
                .desc
                .as_deref()
                .and_then(|d| d.lines().next())
                .map(|d| d.trim().to_string())
                .unwrap_or_else(|| id.clone());

            let directions: &[DeviceDirection] = match hint.direction {
                Some(Direction::Capture) => &[DeviceDirection::Input],
                Some(Direction::Playback) => &[DeviceDirection::Output],
                None => &[DeviceDirection::Input, DeviceDirection::Output],
            };
            for direction in directions {
                let mut device = AudioDeviceInfo::new(&name, &id, *direction);
                device.is_default = id == "default";
                devices.push(device);
            }
        }
        devices
    }

    fn open_input(&self, device: &AudioDeviceInfo, format: AudioFormat) -> Result<Box<dyn InputStream>> {
        let (pcm, params) = open_capture(&device.id, format)?;
        Ok(Box::new(AlsaInput { pcm, params }))
    }

    fn open_output(&self, device: &AudioDeviceInfo, format: AudioFormat) -> Result<Box<dyn OutputStream>> {
        let (pcm, params) = open_playback(&device.id, format)?;
        Ok(Box::new(AlsaOutput { pcm, params }))
    }
}

struct AlsaInput {
    pcm: PCM,
    params: AlsaParams,
}

impl InputStream for AlsaInput {
    fn format(&self) -> AudioFormat {
        self.params.format
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_bytes = self.params.format.bytes_per_frame();
        let io = self.pcm.io_bytes();
        match io.readi(buf) {
            Ok(frames) => Ok(frames * frame_bytes),
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                self.pcm.prepare().context("Failed to recover PCM capture")?;
                Ok(0)
            }
        }
    }
}

struct AlsaOutput {
    pcm: PCM,
    params: AlsaParams,
}

impl OutputStream for AlsaOutput {
    fn format(&self) -> AudioFormat {
        self.params.format
    }

    fn period_bytes(&self) -> usize {
        self.params.period_size * self.params.format.bytes_per_frame()
    }

    // Retry short writes and XRUNs without losing frames
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let frame_bytes = self.params.format.bytes_per_frame();
        let total_frames = buf.len() / frame_bytes;
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        let io = self.pcm.io_bytes();

        while frames_written < total_frames {
            let offset = frames_written * frame_bytes;
            match io.writei(&buf[offset..total_frames * frame_bytes]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    self.pcm.prepare().context("Failed to recover PCM playback")?;

                    // the device keeps falling behind, drop the rest of this period
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Open a PCM device for capture (recording).
pub fn open_capture(device: &str, format: AudioFormat) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Capture, format, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(device: &str, format: AudioFormat) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Playback, format, "Playback")
}

fn open_pcm(device: &str, direction: Direction, format: AudioFormat, dir_name: &str) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    let alsa_format = match format.sample_type {
        SampleType::I16 => Format::S16LE,
        SampleType::F32 => Format::FloatLE,
    };

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(alsa_format)
            .with_context(|| format!("{:?} not supported by '{}'", format.sample_type, device))?;
        // some codecs only open in stereo, the caller converts
        if hwp.set_channels(format.channels).is_err() {
            hwp.set_channels(2)?;
        }
        hwp.set_rate(format.sample_rate, ValueOr::Nearest)
            .with_context(|| format!("{} Hz not supported by '{}'", format.sample_rate, device))?;
        hwp.set_period_size_near(PERIOD_FRAMES as alsa::pcm::Frames, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let (actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (ch, ps)
    };

    let params = AlsaParams {
        format: AudioFormat {
            sample_rate: format.sample_rate,
            channels: actual_channels,
            sample_type: format.sample_type,
        },
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        format.sample_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

//! Pull-based playback path.

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::device::{AudioBackend, AudioDeviceInfo, AudioFormat, SampleType, lowest_latency_variant};
use super::opus_codec::SAMPLE_RATE;
use super::play;
use super::sample_provider::SampleProvider;
use super::stream_thread::StreamThread;
use super::volume::{OutputVolumeStreamArgs, PeakMeter};

/// Extra bytes requested per period on Windows, one mono 20 ms frame.
const WINDOWS_PADDING_BYTES: usize = 3840;

const BYTES_PER_SAMPLE: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    OutputVolumeStream(OutputVolumeStreamArgs),
}

/// Read-only byte adapter between the mixer and the playback device.
pub struct PullBuffer {
    provider: Box<dyn SampleProvider>,
    channels: usize,
    meter: PeakMeter,
    events: mpsc::Sender<OutputEvent>,
    samples: Vec<f32>,
}

impl PullBuffer {
    pub fn new(provider: Box<dyn SampleProvider>, channels: u32, events: mpsc::Sender<OutputEvent>) -> Self {
        Self {
            provider,
            channels: channels.max(1) as usize,
            meter: PeakMeter::new(),
            events,
            samples: Vec::new(),
        }
    }

    pub fn bytes_available(&self) -> usize {
        if cfg!(target_os = "windows") {
            WINDOWS_PADDING_BYTES
        } else {
            0
        }
    }
}

impl io::Read for PullBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let frame_bytes = BYTES_PER_SAMPLE * self.channels;
        let count = buf.len() / frame_bytes;

        self.samples.clear();
        self.samples.resize(count, 0.0);
        self.provider.read_samples(&mut self.samples);

        let peak = self.samples.iter().fold(0f32, |max, s| max.max(s.abs()));
        if let Some(args) = self.meter.push(peak, count) {
            match self.events.try_send(OutputEvent::OutputVolumeStream(args)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => log::warn!("Output event queue full, dropping event"),
                Err(TrySendError::Closed(_)) => log::debug!("Output event receiver dropped"),
            }
        }

        for (frame, sample) in buf.chunks_exact_mut(frame_bytes).zip(&self.samples) {
            let bytes = sample.to_le_bytes();
            for channel in frame.chunks_exact_mut(BYTES_PER_SAMPLE) {
                channel.copy_from_slice(&bytes);
            }
        }
        Ok(count * frame_bytes)
    }
}

impl io::Write for PullBuffer {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "playback buffer is read-only"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Owns the playback device while started.
pub struct Output {
    backend: Arc<dyn AudioBackend>,
    events: mpsc::Sender<OutputEvent>,
    device: Option<AudioDeviceInfo>,
    playback: Option<StreamThread>,
}

impl Output {
    pub fn new(backend: Arc<dyn AudioBackend>, events: mpsc::Sender<OutputEvent>) -> Self {
        Self {
            backend,
            events,
            device: None,
            playback: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.playback.is_some()
    }

    pub fn device(&self) -> Option<&AudioDeviceInfo> {
        self.device.as_ref()
    }

    pub fn start(&mut self, device: &AudioDeviceInfo, provider: Box<dyn SampleProvider>) {
        if self.is_started() {
            log::info!("Output already started");
            return;
        }
        debug_assert!(device.is_output(), "not an output device: {}", device.name);
        if !device.is_output() {
            log::error!("\"{}\" is not an output device", device.name);
            return;
        }

        let variant = lowest_latency_variant(&self.backend.devices(), device);
        let format = AudioFormat {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            sample_type: SampleType::F32,
        };
        let stream = match self.backend.open_output(&variant, format) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Failed to open output device \"{}\": {:#}", device.name, e);
                return;
            }
        };

        let pull = PullBuffer::new(provider, stream.format().channels, self.events.clone());
        match StreamThread::spawn("afv-playback", move |running| play::playback_loop(stream, pull, running)) {
            Ok(thread) => {
                log::info!("Output started on \"{}\" ({})", device.name, variant.id);
                self.playback = Some(thread);
                self.device = Some(device.clone());
            }
            Err(e) => log::error!("Failed to spawn playback thread: {:#}", e),
        }
    }

    pub fn stop(&mut self) {
        let Some(mut playback) = self.playback.take() else {
            return;
        };
        playback.stop();
        self.device = None;
        log::info!("Output stopped");
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockBackend;
    use std::io::{Read, Write};
    use std::time::Duration;

    struct Constant(f32);

    impl SampleProvider for Constant {
        fn read_samples(&mut self, buf: &mut [f32]) -> usize {
            buf.fill(self.0);
            buf.len()
        }
    }

    #[test]
    fn mono_is_duplicated_to_every_channel() {
        let (tx, _rx) = mpsc::channel(4);
        let mut pull = PullBuffer::new(Box::new(Constant(0.25)), 2, tx);
        let mut buf = vec![0u8; 8 * 3 + 5];
        let n = pull.read(&mut buf).unwrap();
        assert_eq!(n, 24);
        for chunk in buf[..n].chunks_exact(4) {
            assert_eq!(f32::from_le_bytes(chunk.try_into().unwrap()), 0.25);
        }
    }

    #[test]
    fn write_is_unsupported() {
        let (tx, _rx) = mpsc::channel(4);
        let mut pull = PullBuffer::new(Box::new(Constant(0.0)), 1, tx);
        let err = pull.write(&[0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn reports_output_peak_every_4800_samples() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut pull = PullBuffer::new(Box::new(Constant(-0.5)), 1, tx);
        let mut buf = vec![0u8; 960 * 4];
        for _ in 0..4 {
            pull.read(&mut buf).unwrap();
        }
        assert!(rx.try_recv().is_err());
        pull.read(&mut buf).unwrap();
        let OutputEvent::OutputVolumeStream(args) = rx.try_recv().unwrap();
        assert_eq!(args.peak_raw, 0.5);
    }

    #[test]
    fn no_padding_off_windows() {
        let (tx, _rx) = mpsc::channel(1);
        let pull = PullBuffer::new(Box::new(Constant(0.0)), 1, tx);
        if cfg!(target_os = "windows") {
            assert_eq!(pull.bytes_available(), WINDOWS_PADDING_BYTES);
        } else {
            assert_eq!(pull.bytes_available(), 0);
        }
    }

    #[test]
    fn start_is_idempotent_and_stop_joins() {
        let backend = MockBackend::new();
        let (tx, _rx) = mpsc::channel(16);
        let mut output = Output::new(Arc::new(backend.clone()), tx);

        output.start(&backend.output("USB Headset"), Box::new(Constant(0.0)));
        output.start(&backend.output("USB Headset"), Box::new(Constant(0.0)));
        assert!(output.is_started());
        assert_eq!(backend.log.lock().unwrap().opened_outputs, vec!["plughw:CARD=Headset,DEV=0"]);

        std::thread::sleep(Duration::from_millis(20));
        output.stop();
        output.stop();
        assert!(!output.is_started());
        let written = backend.log.lock().unwrap().bytes_written;
        assert!(written > 0);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(backend.log.lock().unwrap().bytes_written, written);
    }
}

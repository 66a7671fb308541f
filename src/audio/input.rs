//! Microphone capture path: device bytes are sliced into 20 ms frames,
//! downmixed, amplified, metered and Opus encoded on the capture thread.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::device::{AudioBackend, AudioDeviceInfo, AudioFormat, SampleType, lowest_latency_variant};
use super::opus_codec::{FRAME_SIZE, OpusEncoder, SAMPLE_RATE};
use super::permission::{MicrophonePermission, PermissionStatus};
use super::record;
use super::stream_thread::StreamThread;
use super::volume::{GainControl, InputVolumeStreamArgs, PeakMeter};

/// Bytes in one mono 16-bit frame.
const FRAME_BYTES: usize = FRAME_SIZE * 2;

/// One encoded frame ready for the voice server.
#[derive(Debug, Clone, PartialEq)]
pub struct OpusDataAvailableArgs {
    pub sequence_counter: u32,
    pub audio: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    OpusDataAvailable(OpusDataAvailableArgs),
    InputVolumeStream(InputVolumeStreamArgs),
    /// Answer to a deferred microphone permission request.
    PermissionResolved(bool),
}

/// Apply `gain` to one sample with saturation.
pub fn apply_gain(sample: i16, gain: f64) -> i16 {
    (sample as f64 * gain).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Turns raw interleaved capture bytes into encoded frames.
pub struct InputProcessor {
    channels: usize,
    buffer: Vec<u8>,
    gain: GainControl,
    meter: PeakMeter,
    encoder: OpusEncoder,
    sequence_counter: u32,
}

impl InputProcessor {
    pub fn new(channels: u32, gain: GainControl) -> Result<Self> {
        let channels = channels.max(1) as usize;
        Ok(Self {
            channels,
            buffer: Vec::with_capacity(FRAME_BYTES * channels * 2),
            gain,
            meter: PeakMeter::new(),
            encoder: OpusEncoder::new()?,
            sequence_counter: 0,
        })
    }

    fn frame_bytes(&self) -> usize {
        FRAME_BYTES * self.channels
    }

    /// Append captured bytes and emit events for every complete frame.
    pub fn push_bytes(&mut self, data: &[u8], emit: &mut impl FnMut(InputEvent)) {
        self.buffer.extend_from_slice(data);
        let frame_bytes = self.frame_bytes();
        while self.buffer.len() >= frame_bytes {
            let frame: Vec<u8> = self.buffer.drain(..frame_bytes).collect();
            self.process_frame(&frame, emit);
        }
    }

    fn process_frame(&mut self, frame: &[u8], emit: &mut impl FnMut(InputEvent)) {
        let gain = self.gain.get();
        let mut samples = downmix(frame, self.channels);

        let mut peak = 0f32;
        for sample in samples.iter_mut() {
            *sample = apply_gain(*sample, gain);
            peak = peak.max((*sample as f32).abs() / 32768.0);
        }

        if let Some(args) = self.meter.push(peak, samples.len()) {
            emit(InputEvent::InputVolumeStream(args));
        }

        match self.encoder.encode(&samples) {
            Ok(packet) => {
                emit(InputEvent::OpusDataAvailable(OpusDataAvailableArgs {
                    sequence_counter: self.sequence_counter,
                    audio: Bytes::from(packet),
                }));
                self.sequence_counter = self.sequence_counter.wrapping_add(1);
            }
            Err(e) => log::error!("Opus encode error: {}", e),
        }
    }
}

// interleaved i16 LE → mono by averaging the channels
fn downmix(frame: &[u8], channels: usize) -> Vec<i16> {
    frame
        .chunks_exact(2 * channels)
        .map(|interleaved| {
            let sum: i32 = interleaved
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32)
                .sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Owns the capture device while started.
pub struct Input {
    backend: Arc<dyn AudioBackend>,
    permission: Arc<dyn MicrophonePermission>,
    events: mpsc::Sender<InputEvent>,
    gain: GainControl,
    gain_ratio: f64,
    device: Option<AudioDeviceInfo>,
    pending_device: Option<AudioDeviceInfo>,
    capture: Option<StreamThread>,
}

impl Input {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        permission: Arc<dyn MicrophonePermission>,
        events: mpsc::Sender<InputEvent>,
    ) -> Self {
        Self {
            backend,
            permission,
            events,
            gain: GainControl::default(),
            gain_ratio: 1.0,
            device: None,
            pending_device: None,
            capture: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.capture.is_some()
    }

    /// Device passed to the last successful `start`.
    pub fn device(&self) -> Option<&AudioDeviceInfo> {
        self.device.as_ref()
    }

    pub fn start(&mut self, device: &AudioDeviceInfo) {
        if self.is_started() || self.pending_device.is_some() {
            log::info!("Input already started");
            return;
        }
        debug_assert!(device.is_input(), "not an input device: {}", device.name);
        if !device.is_input() {
            log::error!("\"{}\" is not an input device", device.name);
            return;
        }

        match self.permission.status() {
            PermissionStatus::Granted => self.start_capture(device),
            PermissionStatus::Denied => {
                log::error!("Microphone access denied, input not started");
            }
            PermissionStatus::Unrequested | PermissionStatus::Pending => {
                log::info!("Requesting microphone access for \"{}\"", device.name);
                self.pending_device = Some(device.clone());
                let answer = self.permission.request();
                let events = self.events.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move {
                            let granted = answer.await.unwrap_or(false);
                            if events.send(InputEvent::PermissionResolved(granted)).await.is_err() {
                                log::debug!("Input event receiver dropped before permission answer");
                            }
                        });
                    }
                    Err(_) => {
                        log::error!("No async runtime to wait for microphone access");
                        self.pending_device = None;
                    }
                }
            }
        }
    }

    /// Continue a start deferred by the permission request.
    pub fn on_permission_resolved(&mut self, granted: bool) {
        let Some(device) = self.pending_device.take() else {
            log::debug!("Permission answer without pending start, ignored");
            return;
        };
        if granted {
            self.start_capture(&device);
        } else {
            log::error!("Microphone access denied, input not started");
        }
    }

    fn start_capture(&mut self, device: &AudioDeviceInfo) {
        let variant = lowest_latency_variant(&self.backend.devices(), device);
        let format = AudioFormat {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            sample_type: SampleType::I16,
        };

        let stream = match self.backend.open_input(&variant, format) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Failed to open input device \"{}\": {:#}", device.name, e);
                return;
            }
        };
        let processor = match InputProcessor::new(stream.format().channels, self.gain.clone()) {
            Ok(processor) => processor,
            Err(e) => {
                log::error!("Failed to create input processor: {:#}", e);
                return;
            }
        };

        let events = self.events.clone();
        match StreamThread::spawn("afv-capture", move |running| {
            record::capture_loop(stream, processor, events, running)
        }) {
            Ok(thread) => {
                log::info!("Input started on \"{}\" ({})", device.name, variant.id);
                self.capture = Some(thread);
                self.device = Some(device.clone());
            }
            Err(e) => log::error!("Failed to spawn capture thread: {:#}", e),
        }
    }

    /// Stop capturing. Nothing is delivered once this returns.
    pub fn stop(&mut self) {
        self.pending_device = None;
        let Some(mut capture) = self.capture.take() else {
            return;
        };
        capture.stop();
        self.device = None;
        log::info!("Input stopped");
    }

    /// Set the linear input gain, returns whether it changed.
    pub fn set_gain_ratio(&mut self, ratio: f64) -> bool {
        if (self.gain_ratio - ratio).abs() < f64::EPSILON {
            return false;
        }
        self.gain_ratio = ratio;
        self.gain.set(ratio);
        true
    }

    pub fn gain_ratio(&self) -> f64 {
        self.gain_ratio
    }
}

impl Drop for Input {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockBackend;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn collect(processor: &mut InputProcessor, data: &[u8]) -> Vec<InputEvent> {
        let mut events = Vec::new();
        processor.push_bytes(data, &mut |e| events.push(e));
        events
    }

    fn mono_frame(value: i16, samples: usize) -> Vec<u8> {
        std::iter::repeat_n(value.to_le_bytes(), samples).flatten().collect()
    }

    #[test]
    fn gain_saturates() {
        assert_eq!(apply_gain(1000, 2.0), 2000);
        assert_eq!(apply_gain(20000, 2.0), i16::MAX);
        assert_eq!(apply_gain(-20000, 2.0), i16::MIN);
        assert_eq!(apply_gain(3, 0.5), 2);
        assert_eq!(apply_gain(-3, 0.5), -2);
    }

    #[test]
    fn gain_keeps_full_ratio_precision() {
        // 30951 * 10^(-18/20) = 3896.50004..., which f32 math rounds down
        let ratio = crate::audio::volume::db_to_ratio(-18.0);
        assert_eq!(apply_gain(30951, ratio), 3897);

        let gain = GainControl::default();
        gain.set(ratio);
        assert_eq!(gain.get(), ratio);
    }

    #[test]
    fn slices_only_complete_frames() {
        let mut processor = InputProcessor::new(1, GainControl::default()).unwrap();
        assert!(collect(&mut processor, &mono_frame(100, 500)).is_empty());
        let events = collect(&mut processor, &mono_frame(100, 460));
        assert_eq!(events.len(), 1);
        assert!(processor.buffer.is_empty());

        // two and a half frames in one chunk
        let events = collect(&mut processor, &mono_frame(100, 2400));
        assert_eq!(events.len(), 2);
        assert_eq!(processor.buffer.len(), 480 * 2);
    }

    #[test]
    fn sequence_counter_increments_and_wraps() {
        let mut processor = InputProcessor::new(1, GainControl::default()).unwrap();
        processor.sequence_counter = u32::MAX - 1;
        let counters: Vec<u32> = collect(&mut processor, &mono_frame(0, FRAME_SIZE * 3))
            .into_iter()
            .filter_map(|e| match e {
                InputEvent::OpusDataAvailable(args) => Some(args.sequence_counter),
                _ => None,
            })
            .collect();
        assert_eq!(counters, vec![u32::MAX - 1, u32::MAX, 0]);
    }

    #[test]
    fn volume_event_every_five_frames() {
        let gain = GainControl::new(2.0);
        let mut processor = InputProcessor::new(1, gain).unwrap();
        let events = collect(&mut processor, &mono_frame(8192, FRAME_SIZE * 5));
        let volumes: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                InputEvent::InputVolumeStream(args) => Some(*args),
                _ => None,
            })
            .collect();
        assert_eq!(volumes.len(), 1);
        // 8192 * 2 / 32768
        assert!((volumes[0].peak_raw - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stereo_is_averaged() {
        let mut frame = Vec::new();
        for _ in 0..4 {
            frame.extend_from_slice(&1000i16.to_le_bytes());
            frame.extend_from_slice(&(-3000i16).to_le_bytes());
        }
        assert_eq!(downmix(&frame, 2), vec![-1000; 4]);

        // stereo frames are twice as long
        let mut processor = InputProcessor::new(2, GainControl::default()).unwrap();
        assert!(collect(&mut processor, &mono_frame(10, FRAME_SIZE)).is_empty());
        assert_eq!(collect(&mut processor, &mono_frame(10, FRAME_SIZE)).len(), 1);
    }

    struct ScriptedPermission {
        status: PermissionStatus,
        answer: Mutex<Option<oneshot::Sender<bool>>>,
    }

    impl ScriptedPermission {
        fn new(status: PermissionStatus) -> Self {
            Self {
                status,
                answer: Mutex::new(None),
            }
        }

        fn answer(&self, granted: bool) {
            let tx = self.answer.lock().unwrap().take().expect("no request made");
            tx.send(granted).unwrap();
        }
    }

    impl MicrophonePermission for ScriptedPermission {
        fn status(&self) -> PermissionStatus {
            self.status
        }

        fn request(&self) -> oneshot::Receiver<bool> {
            let (tx, rx) = oneshot::channel();
            *self.answer.lock().unwrap() = Some(tx);
            rx
        }
    }

    async fn next_permission_answer(rx: &mut mpsc::Receiver<InputEvent>) -> bool {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            if let InputEvent::PermissionResolved(granted) = event {
                return granted;
            }
        }
    }

    #[tokio::test]
    async fn pending_permission_defers_start_until_granted() {
        let backend = MockBackend::new();
        let permission = Arc::new(ScriptedPermission::new(PermissionStatus::Unrequested));
        let (tx, mut rx) = mpsc::channel(64);
        let mut input = Input::new(Arc::new(backend.clone()), permission.clone(), tx);

        input.start(&backend.input("Mock Mic"));
        assert!(!input.is_started());
        assert!(backend.log.lock().unwrap().opened_inputs.is_empty());

        permission.answer(true);
        let granted = next_permission_answer(&mut rx).await;
        input.on_permission_resolved(granted);
        assert!(input.is_started());
        assert_eq!(backend.log.lock().unwrap().opened_inputs, vec!["plughw:CARD=Mock,DEV=0"]);
        input.stop();
    }

    #[tokio::test]
    async fn denied_permission_never_starts() {
        let backend = MockBackend::new();
        let permission = Arc::new(ScriptedPermission::new(PermissionStatus::Pending));
        let (tx, mut rx) = mpsc::channel(64);
        let mut input = Input::new(Arc::new(backend.clone()), permission.clone(), tx);

        input.start(&backend.input("Mock Mic"));
        permission.answer(false);
        let granted = next_permission_answer(&mut rx).await;
        input.on_permission_resolved(granted);
        assert!(!input.is_started());

        let denied = Arc::new(ScriptedPermission::new(PermissionStatus::Denied));
        let (tx, _rx) = mpsc::channel(64);
        let mut input = Input::new(Arc::new(backend.clone()), denied, tx);
        input.start(&backend.input("Mock Mic"));
        assert!(!input.is_started());
        assert!(backend.log.lock().unwrap().opened_inputs.is_empty());
    }

    #[tokio::test]
    async fn captures_until_stopped() {
        let backend = MockBackend::new();
        let (tx, mut rx) = mpsc::channel(256);
        let mut input = Input::new(
            Arc::new(backend.clone()),
            Arc::new(crate::audio::permission::NoPermissionModel),
            tx,
        );

        input.start(&backend.input("Mock Mic"));
        input.start(&backend.input("Mock Mic"));
        assert_eq!(backend.log.lock().unwrap().opened_inputs.len(), 1);

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, InputEvent::OpusDataAvailable(ref args) if args.sequence_counter == 0));

        input.stop();
        input.stop();
        assert!(!input.is_started());
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn gain_ratio_reports_changes() {
        let backend = MockBackend::new();
        let (tx, _rx) = mpsc::channel(1);
        let mut input = Input::new(
            Arc::new(backend),
            Arc::new(crate::audio::permission::NoPermissionModel),
            tx,
        );
        assert!(!input.set_gain_ratio(1.0));
        assert!(input.set_gain_ratio(2.0));
        assert!(!input.set_gain_ratio(2.0));
        assert_eq!(input.gain.get(), 2.0);
    }
}

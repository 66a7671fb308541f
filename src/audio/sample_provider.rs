//! Receive-side mixing: decoded voice from every audible station, per radio.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::opus_codec::SAMPLE_RATE;
use super::stream_decoder::{DecoderFactory, StreamDecoder, opus_decoder_factory};
use super::volume::GainControl;
use crate::protocol::{AudioDto, RxTransceiverDto, TransceiverDto, TxTransceiverDto};

/// A callsign is dropped after this many reads without new audio.
const IDLE_READS_BEFORE_REMOVAL: u32 = 10;
/// Queue bound per callsign, one second of audio.
const MAX_QUEUED_SAMPLES: usize = SAMPLE_RATE as usize;

const EFFECT_LOW_CUT_HZ: f32 = 300.0;
const EFFECT_HIGH_CUT_HZ: f32 = 3400.0;

/// Pull source of mono f32 samples at 48 kHz.
pub trait SampleProvider: Send {
    /// Fill `buf`, returns the number of samples written. Silence counts.
    fn read_samples(&mut self, buf: &mut [f32]) -> usize;
}

/// Mixer the client feeds with received frames and reads the radio output from.
pub trait RadioSampleProvider: SampleProvider {
    fn update_radio_transceivers(&mut self, transceivers: &[TransceiverDto]);
    fn ptt_update(&mut self, active: bool, transmitting: &[TxTransceiverDto]);
    fn add_opus_samples(&mut self, audio: &AudioDto, transceivers: &[RxTransceiverDto]);
    fn set_bypass_effects(&mut self, bypass: bool);
    fn receiving_callsigns(&self, transceiver_id: u16) -> Vec<String>;
}

/// Stations currently audible on one radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivingCallsignsArgs {
    pub transceiver_id: u16,
    pub callsigns: Vec<String>,
}

pub type CallsignsNotifier = mpsc::UnboundedSender<ReceivingCallsignsArgs>;

/// Provider shared by the worker (feeding) and the playback thread (pulling).
pub type SharedSampleProvider = Arc<Mutex<Box<dyn RadioSampleProvider>>>;

/// Builds a provider for a set of transceiver ids.
pub type SampleProviderFactory = Box<dyn Fn(&[u16], CallsignsNotifier) -> Box<dyn RadioSampleProvider> + Send>;

pub fn soundcard_provider_factory() -> SampleProviderFactory {
    Box::new(|ids: &[u16], notifier: CallsignsNotifier| {
        Box::new(SoundcardSampleProvider::new(ids, opus_decoder_factory(), notifier)) as Box<dyn RadioSampleProvider>
    })
}

/// Recover the guard of a poisoned lock, the mixer state stays usable.
pub fn lock_provider(provider: &SharedSampleProvider) -> MutexGuard<'_, Box<dyn RadioSampleProvider>> {
    provider.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Applies the output volume to a shared radio provider.
pub struct VolumeSampleProvider {
    source: SharedSampleProvider,
    volume: GainControl,
}

impl VolumeSampleProvider {
    pub fn new(source: SharedSampleProvider, volume: GainControl) -> Self {
        Self { source, volume }
    }
}

impl SampleProvider for VolumeSampleProvider {
    fn read_samples(&mut self, buf: &mut [f32]) -> usize {
        let n = lock_provider(&self.source).read_samples(buf);
        let volume = self.volume.get() as f32;
        if volume != 1.0 {
            for sample in &mut buf[..n] {
                *sample *= volume;
            }
        }
        n
    }
}

struct CallsignStream {
    callsign: String,
    decoder: Box<dyn StreamDecoder>,
    queue: VecDeque<f32>,
    idle_reads: u32,
    last_packet: bool,
}

struct RadioReceiver {
    id: u16,
    frequency_hz: u32,
    streams: Vec<CallsignStream>,
}

impl RadioReceiver {
    fn callsigns(&self) -> Vec<String> {
        self.streams.iter().map(|s| s.callsign.clone()).collect()
    }
}

/// One-pole high-pass followed by one-pole low-pass, a narrow "radio" band.
#[derive(Debug)]
struct RadioEffect {
    hp_alpha: f32,
    lp_alpha: f32,
    hp_prev_in: f32,
    hp_prev_out: f32,
    lp_prev_out: f32,
}

impl RadioEffect {
    fn new() -> Self {
        let dt = 1.0 / SAMPLE_RATE as f32;
        let rc_hp = 1.0 / (2.0 * std::f32::consts::PI * EFFECT_LOW_CUT_HZ);
        let rc_lp = 1.0 / (2.0 * std::f32::consts::PI * EFFECT_HIGH_CUT_HZ);
        Self {
            hp_alpha: rc_hp / (rc_hp + dt),
            lp_alpha: dt / (rc_lp + dt),
            hp_prev_in: 0.0,
            hp_prev_out: 0.0,
            lp_prev_out: 0.0,
        }
    }

    fn process(&mut self, buf: &mut [f32]) {
        for sample in buf.iter_mut() {
            let hp = self.hp_alpha * (self.hp_prev_out + *sample - self.hp_prev_in);
            self.hp_prev_in = *sample;
            self.hp_prev_out = hp;
            self.lp_prev_out += self.lp_alpha * (hp - self.lp_prev_out);
            *sample = self.lp_prev_out;
        }
    }
}

/// Decodes, queues and mixes received voice for a fixed set of radios.
pub struct SoundcardSampleProvider {
    receivers: Vec<RadioReceiver>,
    decoders: DecoderFactory,
    notifier: CallsignsNotifier,
    bypass_effects: bool,
    ptt_active: bool,
    transmitting: Vec<u16>,
    effect: RadioEffect,
}

impl SoundcardSampleProvider {
    pub fn new(transceiver_ids: &[u16], decoders: DecoderFactory, notifier: CallsignsNotifier) -> Self {
        let receivers = transceiver_ids
            .iter()
            .map(|&id| RadioReceiver {
                id,
                frequency_hz: 0,
                streams: Vec::new(),
            })
            .collect();
        Self {
            receivers,
            decoders,
            notifier,
            bypass_effects: false,
            ptt_active: false,
            transmitting: Vec::new(),
            effect: RadioEffect::new(),
        }
    }

    fn notify(notifier: &CallsignsNotifier, receiver: &RadioReceiver) {
        let args = ReceivingCallsignsArgs {
            transceiver_id: receiver.id,
            callsigns: receiver.callsigns(),
        };
        if notifier.send(args).is_err() {
            log::debug!("Receiving callsigns listener dropped");
        }
    }

    fn is_muted(&self, receiver_id: u16) -> bool {
        self.ptt_active && self.transmitting.contains(&receiver_id)
    }
}

impl SampleProvider for SoundcardSampleProvider {
    fn read_samples(&mut self, buf: &mut [f32]) -> usize {
        buf.fill(0.0);
        let len = buf.len();

        for index in 0..self.receivers.len() {
            let muted = self.is_muted(self.receivers[index].id);
            let receiver = &mut self.receivers[index];
            let before = receiver.streams.len();

            receiver.streams.retain_mut(|stream| {
                if stream.queue.is_empty() {
                    stream.idle_reads += 1;
                    return !stream.last_packet && stream.idle_reads < IDLE_READS_BEFORE_REMOVAL;
                }
                let n = len.min(stream.queue.len());
                for (out, sample) in buf.iter_mut().zip(stream.queue.drain(..n)) {
                    if !muted {
                        *out += sample;
                    }
                }
                !(stream.last_packet && stream.queue.is_empty())
            });

            if receiver.streams.len() != before {
                Self::notify(&self.notifier, receiver);
            }
        }

        if !self.bypass_effects {
            self.effect.process(buf);
        }
        for sample in buf.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        len
    }
}

impl RadioSampleProvider for SoundcardSampleProvider {
    fn update_radio_transceivers(&mut self, transceivers: &[TransceiverDto]) {
        for receiver in &mut self.receivers {
            let frequency_hz = transceivers
                .iter()
                .find(|t| t.id == receiver.id)
                .map(|t| t.frequency_hz)
                .unwrap_or(0);
            if receiver.frequency_hz == frequency_hz {
                continue;
            }
            receiver.frequency_hz = frequency_hz;
            if !receiver.streams.is_empty() {
                receiver.streams.clear();
                Self::notify(&self.notifier, receiver);
            }
        }
    }

    fn ptt_update(&mut self, active: bool, transmitting: &[TxTransceiverDto]) {
        self.ptt_active = active;
        self.transmitting = transmitting.iter().map(|t| t.id).collect();
    }

    /// The frame plays once, on the strongest un-muted radio that heard it.
    /// Other radios that heard it queue silence so the callsign still shows.
    fn add_opus_samples(&mut self, audio: &AudioDto, transceivers: &[RxTransceiverDto]) {
        let mut heard: Vec<&RxTransceiverDto> = transceivers
            .iter()
            .filter(|rx| self.receivers.iter().any(|r| r.id == rx.id))
            .collect();
        heard.sort_by(|a, b| b.distance_ratio.total_cmp(&a.distance_ratio));

        let mut handled: Vec<u16> = Vec::with_capacity(heard.len());
        let mut played = false;
        for rx in heard {
            if handled.contains(&rx.id) {
                continue;
            }
            handled.push(rx.id);

            let muted = self.is_muted(rx.id);
            let Some(receiver) = self.receivers.iter_mut().find(|r| r.id == rx.id) else {
                continue;
            };
            if receiver.frequency_hz == 0 {
                continue;
            }

            let position = match receiver.streams.iter().position(|s| s.callsign == audio.callsign) {
                Some(position) => position,
                None => {
                    let decoder = match (self.decoders)() {
                        Ok(decoder) => decoder,
                        Err(e) => {
                            log::error!("Failed to create decoder for {}: {:#}", audio.callsign, e);
                            continue;
                        }
                    };
                    receiver.streams.push(CallsignStream {
                        callsign: audio.callsign.clone(),
                        decoder,
                        queue: VecDeque::new(),
                        idle_reads: 0,
                        last_packet: false,
                    });
                    Self::notify(&self.notifier, receiver);
                    receiver.streams.len() - 1
                }
            };

            let gain = if !played && !muted {
                played = true;
                rx.distance_ratio
            } else {
                0.0
            };
            let stream = &mut receiver.streams[position];
            match stream.decoder.decode(&audio.audio) {
                Ok(samples) => {
                    stream.queue.extend(samples.into_iter().map(|s| s * gain));
                }
                Err(e) => log::warn!("Dropping undecodable frame from {}: {:#}", audio.callsign, e),
            }
            if stream.queue.len() > MAX_QUEUED_SAMPLES {
                let excess = stream.queue.len() - MAX_QUEUED_SAMPLES;
                stream.queue.drain(..excess);
            }
            stream.idle_reads = 0;
            stream.last_packet = audio.last_packet;
        }
    }

    fn set_bypass_effects(&mut self, bypass: bool) {
        self.bypass_effects = bypass;
    }

    fn receiving_callsigns(&self, transceiver_id: u16) -> Vec<String> {
        self.receivers
            .iter()
            .find(|r| r.id == transceiver_id)
            .map(RadioReceiver::callsigns)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const COM1_HZ: u32 = 122_800_000;
    const COM2_HZ: u32 = 124_350_000;

    /// Every packet decodes to 960 samples of its first byte / 100.
    struct LevelDecoder;

    impl StreamDecoder for LevelDecoder {
        fn decode(&mut self, data: &[u8]) -> anyhow::Result<Vec<f32>> {
            let level = data.first().copied().unwrap_or(0) as f32 / 100.0;
            Ok(vec![level; 960])
        }
    }

    fn provider() -> (SoundcardSampleProvider, mpsc::UnboundedReceiver<ReceivingCallsignsArgs>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut provider = SoundcardSampleProvider::new(
            &[0, 1],
            Box::new(|| Ok(Box::new(LevelDecoder) as Box<dyn StreamDecoder>)),
            tx,
        );
        provider.update_radio_transceivers(&[
            TransceiverDto::new(0, COM1_HZ, 48.5, 11.5, 1000.0),
            TransceiverDto::new(1, COM2_HZ, 48.5, 11.5, 1000.0),
        ]);
        provider.set_bypass_effects(true);
        (provider, rx)
    }

    fn packet(callsign: &str, level: u8, last_packet: bool) -> AudioDto {
        AudioDto {
            callsign: callsign.into(),
            sequence_counter: 0,
            audio: Bytes::from(vec![level]),
            last_packet,
        }
    }

    fn heard_on(id: u16, distance_ratio: f32) -> RxTransceiverDto {
        RxTransceiverDto {
            id,
            frequency_hz: if id == 0 { COM1_HZ } else { COM2_HZ },
            distance_ratio,
        }
    }

    fn on(id: u16, distance_ratio: f32) -> Vec<RxTransceiverDto> {
        vec![heard_on(id, distance_ratio)]
    }

    #[test]
    fn routes_by_transceiver_id_and_reports_callsigns() {
        let (mut provider, mut rx) = provider();
        provider.add_opus_samples(&packet("DLH123", 50, false), &on(1, 0.5));

        assert_eq!(provider.receiving_callsigns(1), vec!["DLH123"]);
        assert!(provider.receiving_callsigns(0).is_empty());
        assert_eq!(
            rx.try_recv().unwrap(),
            ReceivingCallsignsArgs {
                transceiver_id: 1,
                callsigns: vec!["DLH123".into()]
            }
        );

        let mut buf = vec![0f32; 960];
        assert_eq!(provider.read_samples(&mut buf), 960);
        assert!(buf.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn shared_frequency_plays_frame_once() {
        let (mut provider, _rx) = provider();
        provider.update_radio_transceivers(&[
            TransceiverDto::new(0, COM1_HZ, 48.5, 11.5, 1000.0),
            TransceiverDto::new(1, COM1_HZ, 48.5, 11.5, 1000.0),
        ]);
        provider.add_opus_samples(
            &packet("BAW1", 30, false),
            &[RxTransceiverDto {
                id: 0,
                frequency_hz: COM1_HZ,
                distance_ratio: 1.0,
            }],
        );

        let mut buf = vec![0f32; 960];
        provider.read_samples(&mut buf);
        assert!((buf[0] - 0.3).abs() < 1e-6);
        assert_eq!(provider.receiving_callsigns(0), vec!["BAW1"]);
        assert!(provider.receiving_callsigns(1).is_empty());
    }

    #[test]
    fn heard_on_both_radios_plays_strongest_only() {
        let (mut provider, _rx) = provider();
        provider.add_opus_samples(&packet("A", 50, false), &[heard_on(0, 0.4), heard_on(1, 0.8), heard_on(1, 0.2)]);

        let mut buf = vec![0f32; 960];
        provider.read_samples(&mut buf);
        assert!(buf.iter().all(|s| (s - 0.4).abs() < 1e-6));
        assert_eq!(provider.receiving_callsigns(0), vec!["A"]);
        assert_eq!(provider.receiving_callsigns(1), vec!["A"]);
    }

    #[test]
    fn muted_radio_hands_frame_to_next_one() {
        let (mut provider, _rx) = provider();
        provider.ptt_update(true, &[TxTransceiverDto { id: 1 }]);
        provider.add_opus_samples(&packet("A", 50, false), &[heard_on(1, 1.0), heard_on(0, 0.5)]);

        let mut buf = vec![0f32; 960];
        provider.read_samples(&mut buf);
        assert!(buf.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn mixes_and_clips() {
        let (mut provider, _rx) = provider();
        provider.add_opus_samples(&packet("A", 80, false), &on(0, 1.0));
        provider.add_opus_samples(&packet("B", 80, false), &on(0, 1.0));
        let mut buf = vec![0f32; 480];
        provider.read_samples(&mut buf);
        assert!(buf.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn transmitting_radio_is_muted_during_ptt() {
        let (mut provider, _rx) = provider();
        provider.ptt_update(true, &[TxTransceiverDto { id: 0 }]);
        provider.add_opus_samples(&packet("A", 50, false), &on(0, 1.0));
        provider.add_opus_samples(&packet("B", 30, false), &on(1, 1.0));

        let mut buf = vec![0f32; 960];
        provider.read_samples(&mut buf);
        assert!(buf.iter().all(|s| (s - 0.3).abs() < 1e-6));

        provider.ptt_update(false, &[TxTransceiverDto { id: 0 }]);
        provider.add_opus_samples(&packet("A", 50, false), &on(0, 1.0));
        provider.read_samples(&mut buf);
        assert!(buf.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn last_packet_removes_callsign_once_played() {
        let (mut provider, mut rx) = provider();
        provider.add_opus_samples(&packet("A", 10, false), &on(0, 1.0));
        provider.add_opus_samples(&packet("A", 10, true), &on(0, 1.0));
        let _ = rx.try_recv();

        let mut buf = vec![0f32; 960];
        provider.read_samples(&mut buf);
        assert_eq!(provider.receiving_callsigns(0), vec!["A"]);
        provider.read_samples(&mut buf);
        assert!(provider.receiving_callsigns(0).is_empty());
        assert_eq!(rx.try_recv().unwrap().callsigns, Vec::<String>::new());
    }

    #[test]
    fn idle_callsign_times_out() {
        let (mut provider, _rx) = provider();
        provider.add_opus_samples(&packet("A", 10, false), &on(0, 1.0));
        let mut buf = vec![0f32; 960];
        provider.read_samples(&mut buf);
        for _ in 0..IDLE_READS_BEFORE_REMOVAL - 1 {
            provider.read_samples(&mut buf);
            assert_eq!(provider.receiving_callsigns(0), vec!["A"]);
        }
        provider.read_samples(&mut buf);
        assert!(provider.receiving_callsigns(0).is_empty());
    }

    #[test]
    fn retune_clears_receiver() {
        let (mut provider, mut rx) = provider();
        provider.add_opus_samples(&packet("A", 10, false), &on(0, 1.0));
        let _ = rx.try_recv();
        provider.update_radio_transceivers(&[TransceiverDto::new(0, 121_500_000, 48.5, 11.5, 1000.0)]);
        assert!(provider.receiving_callsigns(0).is_empty());
        assert!(rx.try_recv().unwrap().callsigns.is_empty());
    }

    #[test]
    fn effect_attenuates_dc() {
        let (mut provider, _rx) = provider();
        provider.set_bypass_effects(false);
        for _ in 0..5 {
            provider.add_opus_samples(&packet("A", 50, false), &on(0, 1.0));
        }
        let mut buf = vec![0f32; 4800];
        provider.read_samples(&mut buf);
        assert!(buf[4799].abs() < 0.05);
    }

    #[test]
    fn volume_stage_scales_output() {
        let (provider, _rx) = provider();
        let mut boxed: Box<dyn RadioSampleProvider> = Box::new(provider);
        boxed.add_opus_samples(&packet("A", 50, false), &on(0, 1.0));
        let shared: SharedSampleProvider = Arc::new(Mutex::new(boxed));
        let mut volume = VolumeSampleProvider::new(shared, GainControl::new(0.5));
        let mut buf = vec![0f32; 960];
        volume.read_samples(&mut buf);
        assert!(buf.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }
}

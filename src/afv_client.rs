//! AFV client: owns the audio paths, the sample provider and the voice
//! server connection, and keeps the radio state (transceivers, PTT, volume)
//! consistent between them.
//!
//! Lives inside the worker task spawned by [`crate::bridge::AfvClientBridge`];
//! audio threads and the connection reach it through the channels returned
//! in [`AudioEvents`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::audio::device::{AudioBackend, AudioDeviceInfo, DeviceDirection, device_names, resolve_device};
use crate::audio::sample_provider::lock_provider;
use crate::audio::volume::{GainControl, db_to_ratio};
use crate::audio::{
    Input, InputEvent, InputVolumeStreamArgs, MicrophonePermission, OpusDataAvailableArgs, Output, OutputEvent,
    OutputVolumeStreamArgs, ReceivingCallsignsArgs, SampleProviderFactory, SharedSampleProvider,
    VolumeSampleProvider,
};
use crate::config::Config;
use crate::connection::ClientConnection;
use crate::protocol::{
    AudioDto, AudioRxOnTransceiversDto, AudioTxOnTransceiversDto, RxTransceiverDto, StationDto, TransceiverDto,
    TxTransceiverDto, round_to_khz,
};

pub const MIN_DB_IN: f64 = -18.0;
pub const MAX_DB_IN: f64 = 18.0;
pub const MIN_DB_OUT: f64 = -60.0;
pub const MAX_DB_OUT: f64 = 18.0;

/// Callsign used for the own microphone routed back to the speaker.
pub const LOOPBACK_CALLSIGN: &str = "loopback";

/// Transceivers a started client listens on, COM1 and COM2.
pub const ALL_TRANSCEIVER_IDS: [u16; 2] = [0, 1];

const INPUT_EVENT_QUEUE: usize = 64;
const OUTPUT_EVENT_QUEUE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComUnit {
    Com1,
    Com2,
}

impl ComUnit {
    pub fn transceiver_id(self) -> u16 {
        match self {
            ComUnit::Com1 => 0,
            ComUnit::Com2 => 1,
        }
    }

    /// Unknown ids map to COM1.
    pub fn from_transceiver_id(id: u16) -> Self {
        match id {
            1 => ComUnit::Com2,
            _ => ComUnit::Com1,
        }
    }
}

/// One cockpit radio.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ComSystem {
    pub frequency_hz: u32,
    pub transmit_enabled: bool,
    pub receive_enabled: bool,
}

/// Position and radios of the own aircraft.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OwnAircraft {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    pub com1: ComSystem,
    pub com2: ComSystem,
}

/// Simulator side the transceivers are synchronised from.
pub trait OwnAircraftSource: Send {
    fn own_aircraft(&self) -> OwnAircraft;
}

/// Notifications for the application shell.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionStatusChanged(ConnectionStatus),
    InputVolumePeakVu(f64),
    OutputVolumePeakVu(f64),
    ReceivingCallsignsChanged(ReceivingCallsignsArgs),
    Ptt(bool),
    Started { input: String, output: String },
    Stopped,
    UpdatedFromOwnAircraftCockpit,
}

/// Receiving ends of the audio side channels, drained by the worker.
pub struct AudioEvents {
    pub input: mpsc::Receiver<InputEvent>,
    pub output: mpsc::Receiver<OutputEvent>,
    pub callsigns: mpsc::UnboundedReceiver<ReceivingCallsignsArgs>,
}

/// Observable client state, published by the worker after every event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSnapshot {
    pub connection_status: ConnectionStatus,
    pub callsign: String,
    pub is_started: bool,
    pub ptt: bool,
    pub loopback: bool,
    pub muted: bool,
    pub input_volume_db: f64,
    pub output_volume_db: f64,
    pub normalized_input_volume: i32,
    pub normalized_output_volume: i32,
    pub input_peak_vu: f64,
    pub output_peak_vu: f64,
    pub transceivers: Vec<TransceiverDto>,
    pub enabled_transceivers: Vec<u16>,
    pub transmitting_transceivers: Vec<u16>,
    pub receiving_com1: Vec<String>,
    pub receiving_com2: Vec<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub started_at_unix_secs: Option<u64>,
}

pub struct AfvClient {
    config: Config,
    backend: Arc<dyn AudioBackend>,
    input: Input,
    output: Output,
    provider: Option<SharedSampleProvider>,
    provider_factory: SampleProviderFactory,
    callsigns_tx: mpsc::UnboundedSender<ReceivingCallsignsArgs>,
    connection: Box<dyn ClientConnection>,
    own_aircraft: Option<Box<dyn OwnAircraftSource>>,
    events: mpsc::Sender<ClientEvent>,

    callsign: String,
    transceivers: Vec<TransceiverDto>,
    enabled_transceivers: BTreeSet<u16>,
    transmitting_transceivers: Vec<TxTransceiverDto>,
    aliased_stations: Vec<StationDto>,

    is_started: bool,
    transmit: bool,
    transmit_history: bool,
    loopback: bool,
    bypass_effects: bool,

    input_volume_db: f64,
    output_volume_db: f64,
    output_volume: GainControl,
    max_db_reading_in_ptt_interval: f64,
    input_volume_stream: InputVolumeStreamArgs,
    output_volume_stream: OutputVolumeStreamArgs,

    started_at: Option<SystemTime>,
    resync: Option<Interval>,
}

impl AfvClient {
    pub fn new(
        config: Config,
        connection: Box<dyn ClientConnection>,
        backend: Arc<dyn AudioBackend>,
        provider_factory: SampleProviderFactory,
        permission: Arc<dyn MicrophonePermission>,
        events: mpsc::Sender<ClientEvent>,
    ) -> (Self, AudioEvents) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_EVENT_QUEUE);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_EVENT_QUEUE);
        let (callsigns_tx, callsigns_rx) = mpsc::unbounded_channel();

        let mut client = Self {
            input: Input::new(backend.clone(), permission, input_tx),
            output: Output::new(backend.clone(), output_tx),
            backend,
            provider: None,
            provider_factory,
            callsigns_tx,
            connection,
            own_aircraft: None,
            events,
            callsign: String::new(),
            transceivers: Vec::new(),
            enabled_transceivers: BTreeSet::new(),
            transmitting_transceivers: Vec::new(),
            aliased_stations: Vec::new(),
            is_started: false,
            transmit: false,
            transmit_history: false,
            loopback: config.loopback,
            bypass_effects: config.bypass_effects,
            input_volume_db: 0.0,
            output_volume_db: 0.0,
            output_volume: GainControl::default(),
            max_db_reading_in_ptt_interval: -100.0,
            input_volume_stream: InputVolumeStreamArgs::default(),
            output_volume_stream: OutputVolumeStreamArgs::default(),
            started_at: None,
            resync: None,
            config,
        };

        client.init_transceivers();
        client.set_normalized_input_volume(client.config.input_volume);
        client.set_normalized_output_volume(client.config.output_volume);
        log::info!("AFV client created ({} {})", client.config.app_name, client.config.app_version);

        let audio_events = AudioEvents {
            input: input_rx,
            output: output_rx,
            callsigns: callsigns_rx,
        };
        (client, audio_events)
    }

    fn init_transceivers(&mut self) {
        let c = &self.config;
        self.transceivers = ALL_TRANSCEIVER_IDS
            .iter()
            .map(|&id| TransceiverDto::new(id, c.unicom_hz, c.latitude_deg, c.longitude_deg, c.height_m))
            .collect();
        self.enabled_transceivers = ALL_TRANSCEIVER_IDS.into_iter().collect();
        self.transmitting_transceivers = vec![TxTransceiverDto { id: 0 }];
    }

    fn emit(&self, event: ClientEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => log::warn!("Client event queue full, dropping {:?}", event),
            Err(TrySendError::Closed(_)) => log::debug!("Client event receiver dropped"),
        }
    }

    pub fn set_own_aircraft_source(&mut self, source: Option<Box<dyn OwnAircraftSource>>) {
        self.own_aircraft = source;
    }

    // ======================== Connection ========================

    pub async fn connect_to(&mut self, cid: &str, password: &str, callsign: &str) {
        self.callsign = callsign.to_string();
        if let Err(e) = self.connection.connect_to(cid, password, callsign).await {
            log::error!("Voice server login failed for {}: {:#}", callsign, e);
        }
        self.aliased_stations = self.connection.aliased_stations().await;
        self.resync_transceivers().await;
        self.emit(ClientEvent::ConnectionStatusChanged(self.connection_status()));
    }

    /// Local transceiver state is kept for the next login.
    pub async fn disconnect_from(&mut self) {
        self.connection.disconnect_from().await;
        self.emit(ClientEvent::ConnectionStatusChanged(ConnectionStatus::Disconnected));
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        if self.connection.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn update_voice_server_url(&mut self, url: &str) -> bool {
        self.connection.update_voice_server_url(url)
    }

    // ======================== Audio lifecycle ========================

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub async fn start(&mut self, input: &AudioDeviceInfo, output: &AudioDeviceInfo, transceiver_ids: &[u16]) {
        if self.is_started {
            log::info!("Client already started");
            return;
        }
        if self.transceivers.is_empty() {
            self.init_transceivers();
        }

        let radio = (self.provider_factory)(transceiver_ids, self.callsigns_tx.clone());
        let provider: SharedSampleProvider = Arc::new(Mutex::new(radio));
        {
            let mut radio = lock_provider(&provider);
            radio.set_bypass_effects(self.bypass_effects);
            radio.update_radio_transceivers(&self.enabled_transceiver_dtos());
        }
        let volume_stage = VolumeSampleProvider::new(provider.clone(), self.output_volume.clone());

        self.output.start(output, Box::new(volume_stage));
        self.input.start(input);
        self.provider = Some(provider);

        self.connection.set_receive_audio(true);
        let period = self.config.position_update_interval();
        let mut resync = tokio::time::interval_at(Instant::now() + period, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.resync = Some(resync);

        self.started_at = Some(SystemTime::now());
        self.is_started = true;
        log::info!("Started [Input: {}] [Output: {}]", input.name, output.name);
        self.emit(ClientEvent::Started {
            input: input.name.clone(),
            output: output.name.clone(),
        });

        self.resync_transceivers().await;
    }

    /// Start on devices given by display name. Unknown names fall back to the
    /// system default device.
    pub async fn start_with_names(&mut self, input_name: &str, output_name: &str) {
        let devices = self.backend.devices();
        let input = resolve_device(&devices, DeviceDirection::Input, input_name);
        let output = resolve_device(&devices, DeviceDirection::Output, output_name);
        match (input, output) {
            (Some(input), Some(output)) => self.start(&input, &output, &ALL_TRANSCEIVER_IDS).await,
            _ => log::error!("No audio devices for \"{}\" / \"{}\"", input_name, output_name),
        }
    }

    pub async fn stop(&mut self) {
        if !self.is_started {
            log::info!("Client not started");
            return;
        }
        self.is_started = false;
        self.connection.set_receive_audio(false);

        self.transceivers.clear();
        self.update_transceivers().await;

        self.input.stop();
        self.output.stop();
        self.provider = None;
        self.resync = None;
        self.transmit = false;
        self.transmit_history = false;
        log::info!("Client stopped");
        self.emit(ClientEvent::Stopped);
    }

    pub async fn restart_with_new_devices(&mut self, input: &AudioDeviceInfo, output: &AudioDeviceInfo) {
        self.stop().await;
        self.start(input, output, &ALL_TRANSCEIVER_IDS).await;
    }

    /// Stop audio and log off.
    pub async fn graceful_shutdown(&mut self) {
        self.stop().await;
        self.disconnect_from().await;
    }

    pub fn available_input_devices(&self) -> Vec<String> {
        device_names(&self.backend.devices(), DeviceDirection::Input)
    }

    pub fn available_output_devices(&self) -> Vec<String> {
        device_names(&self.backend.devices(), DeviceDirection::Output)
    }

    pub fn uses_same_devices(&self, input: &AudioDeviceInfo, output: &AudioDeviceInfo) -> bool {
        match (self.input.device(), self.output.device()) {
            (Some(i), Some(o)) => i.matches_name_and_direction(input) && o.matches_name_and_direction(output),
            _ => false,
        }
    }

    /// Completes once per resync period while audio is started.
    pub async fn next_resync(&mut self) {
        match self.resync.as_mut() {
            Some(resync) => {
                resync.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Periodic keepalive of the transceiver state.
    pub async fn resync_transceivers(&mut self) {
        let aircraft = self.own_aircraft.as_ref().map(|source| source.own_aircraft());
        match aircraft {
            Some(aircraft) => self.apply_own_aircraft(&aircraft).await,
            None => self.update_transceivers().await,
        }
    }

    // ======================== PTT & audio flow ========================

    pub fn set_ptt(&mut self, active: bool) {
        if !self.is_started {
            log::info!("Voice client not started");
            return;
        }
        if self.transmit == active {
            return;
        }
        self.transmit = active;

        if let Some(provider) = &self.provider {
            lock_provider(provider).ptt_update(active, &self.transmitting_transceivers);
        }
        if !active {
            // AGC hook, only the tracking value is reset
            self.max_db_reading_in_ptt_interval = -100.0;
        }

        log::info!("PTT {}", if active { "pressed" } else { "released" });
        self.emit(ClientEvent::Ptt(active));
    }

    pub fn is_ptt(&self) -> bool {
        self.transmit
    }

    /// Loudest input reading of the current PTT interval, -100 dB after release.
    pub fn max_db_reading_in_ptt_interval(&self) -> f64 {
        self.max_db_reading_in_ptt_interval
    }

    pub fn set_loopback(&mut self, loopback: bool) {
        self.loopback = loopback;
    }

    pub fn is_loopback(&self) -> bool {
        self.loopback
    }

    /// Encoded microphone frame from the capture thread.
    pub async fn opus_data_available(&mut self, args: OpusDataAvailableArgs) {
        let transmit = self.transmit;

        if self.loopback && transmit {
            let Some(provider) = &self.provider else {
                return;
            };
            let audio = AudioDto {
                callsign: LOOPBACK_CALLSIGN.to_string(),
                sequence_counter: 0,
                audio: args.audio,
                last_packet: false,
            };
            let frequency_of = |index: usize| {
                self.transceivers
                    .get(index)
                    .map(|t| t.frequency_hz)
                    .unwrap_or(self.config.unicom_hz)
            };
            let rx = [
                RxTransceiverDto {
                    id: 0,
                    frequency_hz: frequency_of(0),
                    distance_ratio: 1.0,
                },
                RxTransceiverDto {
                    id: 1,
                    frequency_hz: frequency_of(1),
                    distance_ratio: 1.0,
                },
            ];
            lock_provider(provider).add_opus_samples(&audio, &rx);
            return;
        }

        if !self.transmitting_transceivers.is_empty() && self.connection.is_connected() {
            // the frame after PTT release closes the transmission
            let last_packet = match (transmit, self.transmit_history) {
                (true, _) => Some(false),
                (false, true) => Some(true),
                (false, false) => None,
            };
            if let Some(last_packet) = last_packet {
                let dto = AudioTxOnTransceiversDto {
                    callsign: self.callsign.clone(),
                    sequence_counter: args.sequence_counter,
                    audio: args.audio,
                    last_packet,
                    transceivers: self.transmitting_transceivers.clone(),
                };
                self.connection.send_to_voice_server(dto).await;
            }
        }
        self.transmit_history = transmit;
    }

    /// Received voice from the connection.
    pub fn audio_out_data_available(&mut self, dto: &AudioRxOnTransceiversDto) {
        let Some(provider) = &self.provider else {
            log::debug!("Audio from {} dropped, client not started", dto.callsign);
            return;
        };
        lock_provider(provider).add_opus_samples(&AudioDto::from(dto), &dto.transceivers);
    }

    pub async fn on_input_event(&mut self, event: InputEvent) {
        match event {
            InputEvent::OpusDataAvailable(args) => self.opus_data_available(args).await,
            InputEvent::InputVolumeStream(args) => self.input_volume_stream(args),
            InputEvent::PermissionResolved(granted) => self.input.on_permission_resolved(granted),
        }
    }

    pub fn on_output_event(&mut self, event: OutputEvent) {
        match event {
            OutputEvent::OutputVolumeStream(args) => self.output_volume_stream(args),
        }
    }

    pub fn on_receiving_callsigns(&mut self, args: ReceivingCallsignsArgs) {
        self.emit(ClientEvent::ReceivingCallsignsChanged(args));
    }

    pub fn input_volume_stream(&mut self, args: InputVolumeStreamArgs) {
        self.input_volume_stream = args;
        self.emit(ClientEvent::InputVolumePeakVu(args.peak_vu));
    }

    pub fn output_volume_stream(&mut self, args: OutputVolumeStreamArgs) {
        self.output_volume_stream = args;
        self.emit(ClientEvent::OutputVolumePeakVu(args.peak_vu));
    }

    pub fn input_volume_peak_vu(&self) -> f64 {
        self.input_volume_stream.peak_vu
    }

    pub fn output_volume_peak_vu(&self) -> f64 {
        self.output_volume_stream.peak_vu
    }

    pub fn receiving_callsigns(&self, transceiver_id: u16) -> Vec<String> {
        match &self.provider {
            Some(provider) => lock_provider(provider).receiving_callsigns(transceiver_id),
            None => Vec::new(),
        }
    }

    pub fn receiving_callsigns_com1(&self) -> Vec<String> {
        self.receiving_callsigns(ComUnit::Com1.transceiver_id())
    }

    pub fn receiving_callsigns_com2(&self) -> Vec<String> {
        self.receiving_callsigns(ComUnit::Com2.transceiver_id())
    }

    // ======================== Transceivers ========================

    pub fn transceivers(&self) -> &[TransceiverDto] {
        &self.transceivers
    }

    fn enabled_transceiver_dtos(&self) -> Vec<TransceiverDto> {
        self.transceivers
            .iter()
            .filter(|t| self.enabled_transceivers.contains(&t.id))
            .cloned()
            .collect()
    }

    /// Push the enabled transceivers to the server and the mixer.
    pub async fn update_transceivers(&mut self) {
        if !self.connection.is_connected() {
            log::debug!("Not connected, transceivers not pushed");
            return;
        }

        let aircraft = self.own_aircraft.as_ref().map(|source| source.own_aircraft());
        if let Some(aircraft) = aircraft {
            self.update_position(aircraft.latitude_deg, aircraft.longitude_deg, aircraft.altitude_m);
            self.set_com_frequency(ComUnit::Com1.transceiver_id(), aircraft.com1.frequency_hz);
            self.set_com_frequency(ComUnit::Com2.transceiver_id(), aircraft.com2.frequency_hz);
        }

        let enabled = self.enabled_transceiver_dtos();
        self.connection.update_transceivers(&self.callsign, &enabled).await;
        if self.is_started {
            if let Some(provider) = &self.provider {
                lock_provider(provider).update_radio_transceivers(&enabled);
            }
        }
    }

    pub async fn update_com_frequency(&mut self, id: u16, frequency_hz: u32) {
        if self.set_com_frequency(id, frequency_hz) {
            self.update_transceivers().await;
        }
    }

    pub async fn update_com_unit_frequency(&mut self, com: ComUnit, frequency_hz: u32) {
        self.update_com_frequency(com.transceiver_id(), frequency_hz).await;
    }

    // stores the rounded, aliased frequency, returns whether it changed
    fn set_com_frequency(&mut self, id: u16, frequency_hz: u32) -> bool {
        if id != 0 && id != 1 {
            return false;
        }
        let frequency_hz = self.alias_frequency_hz(frequency_hz);
        match self.transceivers.iter_mut().find(|t| t.id == id) {
            Some(transceiver) if transceiver.frequency_hz != frequency_hz => {
                transceiver.frequency_hz = frequency_hz;
                true
            }
            _ => false,
        }
    }

    /// Rounded frequency, replaced by the real frequency of an aliased station.
    pub fn alias_frequency_hz(&self, frequency_hz: u32) -> u32 {
        let rounded = round_to_khz(frequency_hz);
        match self.aliased_stations.iter().find(|s| s.frequency_alias_hz == rounded) {
            Some(station) => {
                log::debug!("Aliasing {}Hz [VHF] to {}Hz [HF]", frequency_hz, station.frequency_hz);
                station.frequency_hz
            }
            None => rounded,
        }
    }

    pub fn update_position(&mut self, latitude_deg: f64, longitude_deg: f64, height_m: f64) {
        for transceiver in &mut self.transceivers {
            transceiver.lat_deg = latitude_deg;
            transceiver.lon_deg = longitude_deg;
            transceiver.height_agl_m = height_m;
            transceiver.height_msl_m = height_m;
        }
    }

    pub async fn enable_transceiver(&mut self, id: u16, enable: bool) {
        if enable {
            self.enabled_transceivers.insert(id);
        } else {
            self.enabled_transceivers.remove(&id);
        }
        self.update_transceivers().await;
    }

    pub async fn enable_com_unit(&mut self, com: ComUnit, enable: bool) {
        self.enable_transceiver(com.transceiver_id(), enable).await;
    }

    /// Enabled and existing.
    pub fn is_enabled_transceiver(&self, id: u16) -> bool {
        self.enabled_transceivers.contains(&id) && self.transceivers.iter().any(|t| t.id == id)
    }

    pub fn is_enabled_com_unit(&self, com: ComUnit) -> bool {
        self.is_enabled_transceiver(com.transceiver_id())
    }

    pub fn set_transmitting_transceivers(&mut self, ids: &[u16]) {
        self.transmitting_transceivers = ids.iter().map(|&id| TxTransceiverDto { id }).collect();
    }

    pub fn set_transmitting_transceiver(&mut self, id: u16) {
        self.set_transmitting_transceivers(&[id]);
    }

    pub fn set_transmitting_com_unit(&mut self, com: ComUnit) {
        self.set_transmitting_transceiver(com.transceiver_id());
    }

    pub fn is_transmitting_transceiver(&self, id: u16) -> bool {
        self.transmitting_transceivers.iter().any(|t| t.id == id)
    }

    pub fn is_transmitting_com_unit(&self, com: ComUnit) -> bool {
        self.is_transmitting_transceiver(com.transceiver_id())
    }

    /// Take position, frequencies and radio selection from the cockpit.
    pub async fn update_from_own_aircraft(&mut self, aircraft: &OwnAircraft) {
        self.apply_own_aircraft(aircraft).await;
        self.emit(ClientEvent::UpdatedFromOwnAircraftCockpit);
    }

    async fn apply_own_aircraft(&mut self, aircraft: &OwnAircraft) {
        let com1_id = ComUnit::Com1.transceiver_id();
        let com2_id = ComUnit::Com2.transceiver_id();
        let transceivers = {
            let transceiver = |id: u16, com: &ComSystem| {
                TransceiverDto::new(
                    id,
                    self.alias_frequency_hz(com.frequency_hz),
                    aircraft.latitude_deg,
                    aircraft.longitude_deg,
                    aircraft.altitude_m,
                )
            };
            vec![transceiver(com1_id, &aircraft.com1), transceiver(com2_id, &aircraft.com2)]
        };

        // receive counts as enabled
        let enabled1 = aircraft.com1.receive_enabled;
        let enabled2 = aircraft.com2.receive_enabled;
        let mut enabled = BTreeSet::new();
        if enabled1 {
            enabled.insert(com1_id);
        }
        if enabled2 {
            enabled.insert(com2_id);
        }

        // only one transmitting radio, COM1 wins
        let transmitting = if aircraft.com1.transmit_enabled && enabled1 {
            vec![TxTransceiverDto { id: com1_id }]
        } else if aircraft.com2.transmit_enabled && enabled2 {
            vec![TxTransceiverDto { id: com2_id }]
        } else {
            Vec::new()
        };

        self.transceivers = transceivers;
        self.enabled_transceivers = enabled;
        self.transmitting_transceivers = transmitting;

        let enabled = self.enabled_transceiver_dtos();
        if self.connection.is_connected() {
            self.connection.update_transceivers(&self.callsign, &enabled).await;
        }
        if let Some(provider) = &self.provider {
            lock_provider(provider).update_radio_transceivers(&enabled);
        }
    }

    // ======================== Volume ========================

    pub fn input_volume_db(&self) -> f64 {
        self.input_volume_db
    }

    /// Clamped to [-18, 18] dB, returns whether the gain changed.
    pub fn set_input_volume_db(&mut self, value_db: f64) -> bool {
        let value_db = value_db.clamp(MIN_DB_IN, MAX_DB_IN);
        self.input_volume_db = value_db;
        self.input.set_gain_ratio(db_to_ratio(value_db))
    }

    pub fn output_volume_db(&self) -> f64 {
        self.output_volume_db
    }

    /// Clamped to [-60, 18] dB, returns whether the volume changed.
    pub fn set_output_volume_db(&mut self, value_db: f64) -> bool {
        let value_db = value_db.clamp(MIN_DB_OUT, MAX_DB_OUT);
        let changed = (self.output_volume_db - value_db).abs() > f64::EPSILON;
        self.output_volume_db = value_db;
        self.output_volume.set(db_to_ratio(value_db));
        changed
    }

    /// 0..100, linear over the input dB range.
    pub fn normalized_input_volume(&self) -> i32 {
        let range = MAX_DB_IN - MIN_DB_IN;
        ((self.input_volume_db - MIN_DB_IN) / range * 100.0).round() as i32
    }

    pub fn set_normalized_input_volume(&mut self, volume: i32) -> bool {
        let volume = volume.clamp(0, 100);
        let range = MAX_DB_IN - MIN_DB_IN;
        self.set_input_volume_db(MIN_DB_IN + volume as f64 * range / 100.0)
    }

    /// 0..100 with 50 at 0 dB: the lower half covers the attenuation range,
    /// the upper half the boost range.
    pub fn normalized_output_volume(&self) -> i32 {
        let db = self.output_volume_db;
        if db < 0.0 {
            ((db - MIN_DB_OUT) * 50.0 / MIN_DB_OUT.abs()).round() as i32
        } else {
            50 + (db * 50.0 / MAX_DB_OUT).round() as i32
        }
    }

    pub fn set_normalized_output_volume(&mut self, volume: i32) -> bool {
        let volume = volume.clamp(0, 100);
        let db = if volume >= 50 {
            (volume - 50) as f64 * MAX_DB_OUT / 50.0
        } else {
            MIN_DB_OUT + volume as f64 * MIN_DB_OUT.abs() / 50.0
        };
        self.set_output_volume_db(db)
    }

    pub fn is_muted(&self) -> bool {
        self.normalized_output_volume() < 1
    }

    pub fn set_muted(&mut self, mute: bool) {
        self.set_normalized_output_volume(if mute { 0 } else { 50 });
    }

    pub fn set_bypass_effects(&mut self, bypass: bool) {
        self.bypass_effects = bypass;
        if let Some(provider) = &self.provider {
            lock_provider(provider).set_bypass_effects(bypass);
        }
    }

    pub fn is_bypassing_effects(&self) -> bool {
        self.bypass_effects
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.and_then(|t| t.elapsed().ok())
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            connection_status: self.connection_status(),
            callsign: self.callsign.clone(),
            is_started: self.is_started,
            ptt: self.transmit,
            loopback: self.loopback,
            muted: self.is_muted(),
            input_volume_db: self.input_volume_db,
            output_volume_db: self.output_volume_db,
            normalized_input_volume: self.normalized_input_volume(),
            normalized_output_volume: self.normalized_output_volume(),
            input_peak_vu: self.input_volume_stream.peak_vu,
            output_peak_vu: self.output_volume_stream.peak_vu,
            transceivers: self.transceivers.clone(),
            enabled_transceivers: self.enabled_transceivers.iter().copied().collect(),
            transmitting_transceivers: self.transmitting_transceivers.iter().map(|t| t.id).collect(),
            receiving_com1: self.receiving_callsigns_com1(),
            receiving_com2: self.receiving_callsigns_com2(),
            input_device: self.input.device().map(|d| d.name.clone()),
            output_device: self.output.device().map(|d| d.name.clone()),
            started_at_unix_secs: self
                .started_at
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
        }
    }
}

//! Worker task owning the [`AfvClient`] and the façade used to drive it.
//!
//! All client state lives in one tokio task. Callers send [`ClientCommand`]s
//! and read the latest [`ClientSnapshot`]; audio threads and the voice
//! connection feed the same task through their own channels.

use anyhow::{Result, anyhow};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::afv_client::{AfvClient, AudioEvents, ClientSnapshot, OwnAircraft};
use crate::audio::AudioDeviceInfo;
use crate::protocol::AudioRxOnTransceiversDto;

const COMMAND_QUEUE: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    ConnectTo {
        cid: String,
        password: String,
        callsign: String,
    },
    DisconnectFrom,
    /// Start on devices given by display name.
    Start {
        input: String,
        output: String,
    },
    StartWithDevices {
        input: AudioDeviceInfo,
        output: AudioDeviceInfo,
        transceiver_ids: Vec<u16>,
    },
    Stop,
    RestartWithNewDevices {
        input: AudioDeviceInfo,
        output: AudioDeviceInfo,
    },
    SetPtt(bool),
    SetLoopback(bool),
    SetMuted(bool),
    SetBypassEffects(bool),
    SetInputVolumeDb(f64),
    SetOutputVolumeDb(f64),
    SetNormalizedInputVolume(i32),
    SetNormalizedOutputVolume(i32),
    UpdateComFrequency {
        id: u16,
        frequency_hz: u32,
    },
    UpdatePosition {
        latitude_deg: f64,
        longitude_deg: f64,
        height_m: f64,
    },
    EnableTransceiver {
        id: u16,
        enable: bool,
    },
    SetTransmittingTransceivers(Vec<u16>),
    UpdateFromOwnAircraft(OwnAircraft),
    UpdateVoiceServerUrl(String),
    Shutdown,
}

/// Caller side of the worker. Dropping it shuts the client down.
pub struct AfvClientBridge {
    commands: mpsc::Sender<ClientCommand>,
    snapshot: watch::Receiver<ClientSnapshot>,
}

impl AfvClientBridge {
    pub fn spawn(
        client: AfvClient,
        audio: AudioEvents,
        inbound_audio: mpsc::Receiver<AudioRxOnTransceiversDto>,
    ) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot_tx, snapshot_rx) = watch::channel(client.snapshot());

        let worker = Worker {
            client,
            audio,
            inbound_audio,
            commands: command_rx,
            snapshot: snapshot_tx,
        };
        let handle = tokio::spawn(worker.run());

        let bridge = Self {
            commands: command_tx,
            snapshot: snapshot_rx,
        };
        (bridge, handle)
    }

    pub async fn send(&self, command: ClientCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("AFV client worker has stopped"))
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified after every handled event.
    pub fn subscribe(&self) -> watch::Receiver<ClientSnapshot> {
        self.snapshot.clone()
    }

    pub async fn connect_to(&self, cid: &str, password: &str, callsign: &str) -> Result<()> {
        self.send(ClientCommand::ConnectTo {
            cid: cid.to_string(),
            password: password.to_string(),
            callsign: callsign.to_string(),
        })
        .await
    }

    pub async fn disconnect_from(&self) -> Result<()> {
        self.send(ClientCommand::DisconnectFrom).await
    }

    pub async fn start(&self, input: &str, output: &str) -> Result<()> {
        self.send(ClientCommand::Start {
            input: input.to_string(),
            output: output.to_string(),
        })
        .await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(ClientCommand::Stop).await
    }

    pub async fn set_ptt(&self, active: bool) -> Result<()> {
        self.send(ClientCommand::SetPtt(active)).await
    }

    pub async fn set_loopback(&self, loopback: bool) -> Result<()> {
        self.send(ClientCommand::SetLoopback(loopback)).await
    }

    pub async fn update_com_frequency(&self, id: u16, frequency_hz: u32) -> Result<()> {
        self.send(ClientCommand::UpdateComFrequency { id, frequency_hz }).await
    }

    /// Stop audio, log off and wait for the worker to finish.
    pub async fn shutdown(self, handle: JoinHandle<()>) -> Result<()> {
        self.send(ClientCommand::Shutdown).await?;
        handle.await.map_err(|e| anyhow!("AFV client worker failed: {}", e))
    }
}

struct Worker {
    client: AfvClient,
    audio: AudioEvents,
    inbound_audio: mpsc::Receiver<AudioRxOnTransceiversDto>,
    commands: mpsc::Receiver<ClientCommand>,
    snapshot: watch::Sender<ClientSnapshot>,
}

impl Worker {
    async fn run(mut self) {
        log::info!("AFV client worker started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(ClientCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }

                Some(event) = self.audio.input.recv() => {
                    self.client.on_input_event(event).await;
                }

                Some(event) = self.audio.output.recv() => {
                    self.client.on_output_event(event);
                }

                Some(args) = self.audio.callsigns.recv() => {
                    self.client.on_receiving_callsigns(args);
                }

                Some(dto) = self.inbound_audio.recv() => {
                    self.client.audio_out_data_available(&dto);
                }

                _ = self.client.next_resync() => {
                    self.client.resync_transceivers().await;
                }
            }
            self.snapshot.send_replace(self.client.snapshot());
        }

        self.client.graceful_shutdown().await;
        self.snapshot.send_replace(self.client.snapshot());
        log::info!("AFV client worker stopped");
    }

    async fn handle_command(&mut self, command: ClientCommand) {
        let client = &mut self.client;
        match command {
            ClientCommand::ConnectTo {
                cid,
                password,
                callsign,
            } => client.connect_to(&cid, &password, &callsign).await,
            ClientCommand::DisconnectFrom => client.disconnect_from().await,
            ClientCommand::Start { input, output } => client.start_with_names(&input, &output).await,
            ClientCommand::StartWithDevices {
                input,
                output,
                transceiver_ids,
            } => client.start(&input, &output, &transceiver_ids).await,
            ClientCommand::Stop => client.stop().await,
            ClientCommand::RestartWithNewDevices { input, output } => {
                client.restart_with_new_devices(&input, &output).await
            }
            ClientCommand::SetPtt(active) => client.set_ptt(active),
            ClientCommand::SetLoopback(loopback) => client.set_loopback(loopback),
            ClientCommand::SetMuted(mute) => client.set_muted(mute),
            ClientCommand::SetBypassEffects(bypass) => client.set_bypass_effects(bypass),
            ClientCommand::SetInputVolumeDb(db) => {
                client.set_input_volume_db(db);
            }
            ClientCommand::SetOutputVolumeDb(db) => {
                client.set_output_volume_db(db);
            }
            ClientCommand::SetNormalizedInputVolume(volume) => {
                client.set_normalized_input_volume(volume);
            }
            ClientCommand::SetNormalizedOutputVolume(volume) => {
                client.set_normalized_output_volume(volume);
            }
            ClientCommand::UpdateComFrequency { id, frequency_hz } => {
                client.update_com_frequency(id, frequency_hz).await
            }
            ClientCommand::UpdatePosition {
                latitude_deg,
                longitude_deg,
                height_m,
            } => client.update_position(latitude_deg, longitude_deg, height_m),
            ClientCommand::EnableTransceiver { id, enable } => client.enable_transceiver(id, enable).await,
            ClientCommand::SetTransmittingTransceivers(ids) => client.set_transmitting_transceivers(&ids),
            ClientCommand::UpdateFromOwnAircraft(aircraft) => client.update_from_own_aircraft(&aircraft).await,
            ClientCommand::UpdateVoiceServerUrl(url) => {
                if !client.update_voice_server_url(&url) {
                    log::info!("Voice server URL unchanged: {}", url);
                }
            }
            // handled by the run loop
            ClientCommand::Shutdown => {}
        }
    }
}

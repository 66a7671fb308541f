//! Transport to the AFV voice server.

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::protocol::{AudioTxOnTransceiversDto, StationDto, TransceiverDto};

/// Voice server session. Authentication, the encrypted voice channel and
/// the REST calls live behind this trait; inbound audio is delivered on a
/// channel owned by the implementation.
#[async_trait]
pub trait ClientConnection: Send {
    async fn connect_to(&mut self, cid: &str, password: &str, callsign: &str) -> Result<()>;
    async fn disconnect_from(&mut self);
    fn is_connected(&self) -> bool;
    /// Ask the server to start or stop forwarding received voice.
    fn set_receive_audio(&mut self, receive: bool);
    async fn update_transceivers(&mut self, callsign: &str, transceivers: &[TransceiverDto]);
    async fn send_to_voice_server(&mut self, dto: AudioTxOnTransceiversDto);
    async fn aliased_stations(&mut self) -> Vec<StationDto>;
    /// Returns whether the URL changed.
    fn update_voice_server_url(&mut self, url: &str) -> bool;
}

/// Connection that never reaches a server, used for the local mic test.
#[derive(Debug, Clone)]
pub struct OfflineConnection {
    api_url: Url,
}

impl OfflineConnection {
    pub fn new(api_url: Url) -> Self {
        Self { api_url }
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }
}

#[async_trait]
impl ClientConnection for OfflineConnection {
    async fn connect_to(&mut self, _cid: &str, _password: &str, callsign: &str) -> Result<()> {
        anyhow::bail!("Offline connection cannot log in {} to {}", callsign, self.api_url)
    }

    async fn disconnect_from(&mut self) {}

    fn is_connected(&self) -> bool {
        false
    }

    fn set_receive_audio(&mut self, _receive: bool) {}

    async fn update_transceivers(&mut self, _callsign: &str, _transceivers: &[TransceiverDto]) {}

    async fn send_to_voice_server(&mut self, _dto: AudioTxOnTransceiversDto) {}

    async fn aliased_stations(&mut self) -> Vec<StationDto> {
        Vec::new()
    }

    fn update_voice_server_url(&mut self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) if parsed != self.api_url => {
                self.api_url = parsed;
                true
            }
            Ok(_) => false,
            Err(e) => {
                log::warn!("Ignoring invalid voice server URL {}: {}", url, e);
                false
            }
        }
    }
}

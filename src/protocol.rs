//! Data transfer objects exchanged with the voice server and the sample provider.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Default UNICOM frequency (122.800 MHz).
pub const UNICOM_HZ: u32 = 122_800_000;

/// Round a frequency to the nearest kHz. Cockpit frequencies arrive as
/// floating point conversions (128074999 Hz), the server expects 128075000.
pub fn round_to_khz(frequency_hz: u32) -> u32 {
    ((frequency_hz as f64 / 1000.0).round() as u32).saturating_mul(1000)
}

/// One radio unit with its frequency and position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransceiverDto {
    #[serde(rename = "ID")]
    pub id: u16,
    #[serde(rename = "Frequency")]
    pub frequency_hz: u32,
    #[serde(rename = "LatDeg")]
    pub lat_deg: f64,
    #[serde(rename = "LonDeg")]
    pub lon_deg: f64,
    #[serde(rename = "HeightMslM")]
    pub height_msl_m: f64,
    #[serde(rename = "HeightAglM")]
    pub height_agl_m: f64,
}

impl TransceiverDto {
    pub fn new(id: u16, frequency_hz: u32, lat_deg: f64, lon_deg: f64, height_m: f64) -> Self {
        Self {
            id,
            frequency_hz: round_to_khz(frequency_hz),
            lat_deg,
            lon_deg,
            height_msl_m: height_m,
            height_agl_m: height_m,
        }
    }
}

/// Transceiver the outgoing audio is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxTransceiverDto {
    #[serde(rename = "ID")]
    pub id: u16,
}

/// Transceiver an incoming frame was received on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RxTransceiverDto {
    #[serde(rename = "ID")]
    pub id: u16,
    #[serde(rename = "Frequency")]
    pub frequency_hz: u32,
    #[serde(rename = "DistanceRatio")]
    pub distance_ratio: f32,
}

/// Station whose VHF frequency is an alias for an HF frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationDto {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Frequency")]
    pub frequency_hz: u32,
    #[serde(rename = "FrequencyAlias")]
    pub frequency_alias_hz: u32,
}

/// Outbound voice packet.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTxOnTransceiversDto {
    pub callsign: String,
    pub sequence_counter: u32,
    pub audio: Bytes,
    pub last_packet: bool,
    pub transceivers: Vec<TxTransceiverDto>,
}

/// Inbound voice packet as delivered by the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioRxOnTransceiversDto {
    pub callsign: String,
    pub sequence_counter: u32,
    pub last_packet: bool,
    pub audio: Bytes,
    pub transceivers: Vec<RxTransceiverDto>,
}

/// Encoded audio handed to the sample provider.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDto {
    pub callsign: String,
    pub sequence_counter: u32,
    pub audio: Bytes,
    pub last_packet: bool,
}

impl From<&AudioRxOnTransceiversDto> for AudioDto {
    fn from(dto: &AudioRxOnTransceiversDto) -> Self {
        Self {
            callsign: dto.callsign.clone(),
            sequence_counter: dto.sequence_counter,
            audio: dto.audio.clone(),
            last_packet: dto.last_packet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_khz() {
        assert_eq!(round_to_khz(128_074_999), 128_075_000);
        assert_eq!(round_to_khz(122_800_400), 122_800_000);
        assert_eq!(round_to_khz(122_800_500), 122_801_000);
    }

    #[test]
    fn transceiver_json_uses_server_field_names() {
        let dto = TransceiverDto::new(1, 118_700_001, 48.35, 11.78, 450.0);
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["ID"], 1);
        assert_eq!(json["Frequency"], 118_700_000);
        assert_eq!(json["HeightMslM"], 450.0);
        assert_eq!(json["HeightAglM"], 450.0);
    }

    #[test]
    fn parses_aliased_station() {
        let text = r#"{"ID":"a1","Name":"EGGX_FSS","Frequency":5616000,"FrequencyAlias":131800000}"#;
        let station: StationDto = serde_json::from_str(text).unwrap();
        assert_eq!(station.frequency_hz, 5_616_000);
        assert_eq!(station.frequency_alias_hz, 131_800_000);
    }
}

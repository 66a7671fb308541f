//! Opus encoder/decoder for the fixed AFV voice format (48 kHz mono, 20 ms).

use anyhow::{Context, Result};

use super::stream_decoder::StreamDecoder;

pub const SAMPLE_RATE: u32 = 48_000;
/// 20 ms at 48 kHz
pub const FRAME_SIZE: usize = 960;
pub const BITRATE: i32 = 16_000;

/// Largest packet libopus produces for a single frame.
const MAX_PACKET_SIZE: usize = 1275;

// ======================== Opus Encoder ========================

pub struct OpusEncoder {
    encoder: opus::Encoder,
}

impl OpusEncoder {
    /// Mono VOIP encoder at 16 kbit/s.
    pub fn new() -> Result<Self> {
        let mut encoder = opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip)
            .context("Failed to create Opus encoder")?;
        encoder.set_bitrate(opus::Bitrate::Bits(BITRATE))?;
        Ok(Self { encoder })
    }

    /// Encode one frame of `FRAME_SIZE` mono samples.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        if pcm.len() != FRAME_SIZE {
            anyhow::bail!("Opus frame must hold {} samples, got {}", FRAME_SIZE, pcm.len());
        }
        let mut opus_buf = vec![0u8; MAX_PACKET_SIZE];
        let encoded_len = self.encoder.encode(pcm, &mut opus_buf)?;
        opus_buf.truncate(encoded_len);
        Ok(opus_buf)
    }
}

// ======================== Opus Decoder ========================

pub struct OpusDecoder {
    decoder: opus::Decoder,
}

impl OpusDecoder {
    pub fn new() -> Result<Self> {
        let decoder = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono).context("Failed to create Opus decoder")?;
        Ok(Self { decoder })
    }

    /// Decode an Opus packet to mono f32 samples.
    pub fn decode(&mut self, opus_data: &[u8]) -> Result<Vec<f32>> {
        // max 120ms @ 48kHz = 5760 samples
        let mut pcm_buf = vec![0f32; 5760];
        let decoded = self.decoder.decode_float(opus_data, &mut pcm_buf, false)?;
        pcm_buf.truncate(decoded);
        Ok(pcm_buf)
    }
}

impl StreamDecoder for OpusDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>> {
        OpusDecoder::decode(self, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_decodes_a_frame() {
        let mut encoder = OpusEncoder::new().unwrap();
        let pcm: Vec<i16> = (0..FRAME_SIZE)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();
        let packet = encoder.encode(&pcm).unwrap();
        assert!(!packet.is_empty());
        assert!(packet.len() <= MAX_PACKET_SIZE);

        let mut decoder = OpusDecoder::new().unwrap();
        let decoded = decoder.decode(&packet).unwrap();
        assert_eq!(decoded.len(), FRAME_SIZE);
    }

    #[test]
    fn rejects_partial_frames() {
        let mut encoder = OpusEncoder::new().unwrap();
        assert!(encoder.encode(&[0i16; 100]).is_err());
    }
}

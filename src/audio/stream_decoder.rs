//! Decoder seam used by the sample provider, one instance per talking station.

use anyhow::Result;

/// A trait for audio stream decoders that convert compressed voice frames
/// into mono f32 PCM at the client sample rate.
pub trait StreamDecoder: Send {
    /// Decode compressed audio bytes into mono f32 samples.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>>;
}

/// Creates a fresh decoder whenever a new callsign starts transmitting.
pub type DecoderFactory = Box<dyn Fn() -> Result<Box<dyn StreamDecoder>> + Send>;

/// Factory producing Opus decoders.
pub fn opus_decoder_factory() -> DecoderFactory {
    Box::new(|| Ok(Box::new(super::opus_codec::OpusDecoder::new()?) as Box<dyn StreamDecoder>))
}

//! audio - Voice capture, playback, codec and mixing
//!
//! ALSA device I/O runs on dedicated OS threads, Opus encodes the microphone
//! and decodes received voice, the sample provider mixes received stations.

mod alsa_device;
pub mod device;
pub mod input;
pub mod opus_codec;
pub mod output;
pub mod permission;
mod play;
mod record;
pub mod sample_provider;
pub mod stream_decoder;
mod stream_thread;
pub mod volume;

#[cfg(test)]
pub(crate) mod mock;

pub use alsa_device::AlsaBackend;
pub use device::{AudioBackend, AudioDeviceInfo, DeviceDirection};
pub use input::{Input, InputEvent, OpusDataAvailableArgs};
pub use output::{Output, OutputEvent, PullBuffer};
pub use permission::{MicrophonePermission, NoPermissionModel, PermissionStatus};
pub use sample_provider::{
    CallsignsNotifier, RadioSampleProvider, ReceivingCallsignsArgs, SampleProvider, SampleProviderFactory,
    SharedSampleProvider, SoundcardSampleProvider, VolumeSampleProvider,
};
pub use stream_decoder::StreamDecoder;
pub use volume::{InputVolumeStreamArgs, OutputVolumeStreamArgs, VolumeStreamArgs};

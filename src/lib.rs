//! Audio for VATSIM voice client: microphone capture and Opus encoding,
//! received voice mixing and playback, and the client that ties them to a
//! voice server connection.

pub mod afv_client;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod protocol;

pub use afv_client::{AfvClient, ClientEvent, ClientSnapshot, ComUnit, ConnectionStatus, OwnAircraft};
pub use bridge::{AfvClientBridge, ClientCommand};
pub use config::Config;

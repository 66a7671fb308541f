use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use super::device::OutputStream;
use super::output::PullBuffer;

/// Body of the `afv-playback` thread. The device write blocks for one
/// period, which paces the pull from the mixer.
pub fn playback_loop(mut stream: Box<dyn OutputStream>, mut pull: PullBuffer, running: &AtomicBool) -> Result<()> {
    let period_bytes = stream.period_bytes();
    let mut buf = Vec::with_capacity(period_bytes + pull.bytes_available());

    log::info!(
        "Playback started: rate={}, ch={}, period_bytes={}",
        stream.format().sample_rate,
        stream.format().channels,
        period_bytes,
    );

    while running.load(Ordering::Relaxed) {
        buf.resize(period_bytes + pull.bytes_available(), 0);
        let n = pull.read(&mut buf).context("Failed to pull playback samples")?;
        if n == 0 {
            continue;
        }
        stream.write(&buf[..n])?;
    }

    log::info!("Playback stopped");
    Ok(())
}

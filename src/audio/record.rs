use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::device::InputStream;
use super::input::{InputEvent, InputProcessor};
use super::opus_codec::FRAME_SIZE;

/// Body of the `afv-capture` thread: device → frame slicer → Opus → worker.
pub fn capture_loop(
    mut stream: Box<dyn InputStream>,
    mut processor: InputProcessor,
    events: mpsc::Sender<InputEvent>,
    running: &AtomicBool,
) -> Result<()> {
    let format = stream.format();
    let mut read_buf = vec![0u8; FRAME_SIZE * format.bytes_per_frame()];

    log::info!(
        "Capture started: rate={}, ch={}",
        format.sample_rate,
        format.channels
    );

    while running.load(Ordering::Relaxed) {
        let n = stream.read(&mut read_buf)?;
        if n == 0 {
            continue;
        }
        processor.push_bytes(&read_buf[..n], &mut |event| forward(&events, event));
    }

    log::info!("Capture stopped");
    Ok(())
}

// Never block the audio thread on a slow worker.
fn forward(events: &mpsc::Sender<InputEvent>, event: InputEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => log::warn!("Input event queue full, dropping event"),
        Err(TrySendError::Closed(_)) => log::debug!("Input event receiver dropped"),
    }
}

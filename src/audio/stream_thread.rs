//! Dedicated OS thread running one blocking device loop.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with async network tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;

pub struct StreamThread {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn `body`, which must return once the running flag goes false.
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(&AtomicBool) -> Result<()> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = running.clone();
            let thread_name = name.to_string();
            thread::Builder::new().name(name.into()).spawn(move || {
                if let Err(e) = body(&running) {
                    log::error!("{} thread error: {}", thread_name, e);
                }
                running.store(false, Ordering::SeqCst);
            })?
        };

        Ok(Self {
            name: name.to_string(),
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the thread to stop and wait for it to finish.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                log::error!("{} thread panicked", self.name);
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn stop_joins_the_loop() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = iterations.clone();
        let mut worker = StreamThread::spawn("test-loop", move |running| {
            while running.load(Ordering::Relaxed) {
                counter.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        worker.stop();
        assert!(!worker.is_running());
        let after_stop = iterations.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(iterations.load(Ordering::Relaxed), after_stop);
        // second stop is harmless
        worker.stop();
    }

    #[test]
    fn failed_loop_clears_running_flag() {
        let mut worker = StreamThread::spawn("test-fail", |_| anyhow::bail!("device gone")).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!worker.is_running());
        worker.stop();
    }
}

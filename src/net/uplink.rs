//! Microphone uplink: drains the mono capture FIFO into binary frames.
//!
//! Runs on its own thread so a slow network never backs up into capture.
//! Each iteration waits for one whole chunk and sends it as a frame when the
//! transport is open and streaming is enabled; otherwise the chunk is
//! discarded so the FIFO keeps tracking live audio.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::transport::Transport;
use crate::audio::{ByteConsumer, CHUNK_BYTES, CHUNK_DURATION};

const SEND_WARN_EVERY: u64 = 100;

#[derive(Debug, Default)]
pub struct UplinkStats {
    pub sent: AtomicU64,
    /// Chunks discarded while the link was closed or streaming was off.
    pub discarded: AtomicU64,
    pub send_failures: AtomicU64,
}

pub struct Uplink {
    running: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
    thread: Option<JoinHandle<ByteConsumer>>,
    consumer: Option<ByteConsumer>,
    stats: Arc<UplinkStats>,
}

impl Uplink {
    pub fn new(consumer: ByteConsumer) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            streaming: Arc::new(AtomicBool::new(true)),
            thread: None,
            consumer: Some(consumer),
            stats: Arc::new(UplinkStats::default()),
        }
    }

    /// Spawn the uplink thread. Sends are driven on `runtime`.
    pub fn start(&mut self, transport: Transport, runtime: Handle) -> std::io::Result<()> {
        let Some(mut consumer) = self.consumer.take() else {
            warn!("Uplink already running");
            return Ok(());
        };
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let streaming = Arc::clone(&self.streaming);
        let stats = Arc::clone(&self.stats);

        let spawned = std::thread::Builder::new()
            .name("audio-uplink".into())
            .spawn(move || {
                let mut chunk = [0u8; CHUNK_BYTES];
                info!("Uplink started");
                while running.load(Ordering::Acquire) {
                    if !consumer.wait_available(CHUNK_BYTES, CHUNK_DURATION * 2) {
                        continue;
                    }
                    let n = consumer.read(&mut chunk, CHUNK_DURATION);
                    if n < CHUNK_BYTES {
                        continue;
                    }
                    if !streaming.load(Ordering::Relaxed) || !transport.is_open() {
                        stats.discarded.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    match runtime.block_on(transport.send_binary(&chunk)) {
                        Ok(()) => {
                            stats.sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            let failures = stats.send_failures.fetch_add(1, Ordering::Relaxed) + 1;
                            if failures % SEND_WARN_EVERY == 1 {
                                warn!(error = %e, failures, "Uplink send failed, chunk dropped");
                            }
                        }
                    }
                }
                info!(
                    sent = stats.sent.load(Ordering::Relaxed),
                    discarded = stats.discarded.load(Ordering::Relaxed),
                    "Uplink stopped"
                );
                consumer
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Gate streaming without stopping the thread (`audio_start` /
    /// `audio_stop`).
    pub fn set_streaming(&self, on: bool) {
        if self.streaming.swap(on, Ordering::AcqRel) != on {
            debug!(on, "Uplink streaming");
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(consumer) => self.consumer = Some(consumer),
                Err(_) => error!("Uplink thread panicked"),
            }
        }
    }

    pub fn stats(&self) -> Arc<UplinkStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for Uplink {
    fn drop(&mut self) {
        self.stop();
    }
}

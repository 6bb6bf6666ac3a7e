//! Speaker playback pipeline.
//!
//! The transport side pushes inbound PCM through a [`PlaybackFeeder`]; a
//! dedicated thread drains the FIFO one chunk per iteration and writes it to
//! the codec. On underrun the thread writes a chunk of silence instead, so
//! the codec clock keeps running and the speaker does not click.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::codec::{AudioCodec, AudioError};
use super::ring_buffer::{byte_ring, ByteConsumer, ByteProducer};
use super::state::{PlaybackState, PlaybackStateMachine};
use super::{CHUNK_BYTES, CHUNK_DURATION};

/// Default FIFO: about two seconds of 16 kHz mono.
pub const DEFAULT_PLAYBACK_BYTES: usize = 32 * 1024;

/// How long the loop waits for network audio before writing silence.
const RECV_TIMEOUT: Duration = Duration::from_millis(20);

/// How long `feed` waits for room before dropping the frame.
const FEED_TIMEOUT: Duration = Duration::from_millis(10);

/// Codec write timeout; generous so a slow clock is not mistaken for a fault.
const WRITE_TIMEOUT: Duration = Duration::from_millis(200);

const FEED_WARN_EVERY: u64 = 50;

/// What one loop iteration wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pumped {
    /// `n` bytes of real audio, at most one chunk.
    Audio(usize),
    Silence,
}

#[derive(Debug, Default)]
pub struct PlaybackStats {
    pub audio_chunks: AtomicU64,
    pub silence_chunks: AtomicU64,
    /// FIFO fill in bytes as of the last iteration.
    pub level: AtomicUsize,
}

/// Producer half handed to the transport's binary-frame handler.
pub struct PlaybackFeeder {
    producer: ByteProducer,
}

impl PlaybackFeeder {
    /// Queue a frame of inbound PCM. Frames that would split a sample are
    /// refused so the FIFO stays sample aligned.
    pub fn feed(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        if pcm.len() % 2 != 0 {
            return Err(AudioError::Misaligned(pcm.len()));
        }
        if pcm.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.producer.send(pcm, FEED_TIMEOUT) {
            let n = self.producer.drop_counter().get();
            if n % FEED_WARN_EVERY == 1 {
                warn!(dropped = n, error = %e, "Playback FIFO full, dropping audio");
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub fn free_size(&self) -> usize {
        self.producer.free_size()
    }

    pub fn dropped(&self) -> u64 {
        self.producer.drop_counter().get()
    }
}

pub struct PlaybackPipeline {
    state: Arc<PlaybackStateMachine>,
    thread: Option<JoinHandle<ByteConsumer>>,
    consumer: Option<ByteConsumer>,
    stats: Arc<PlaybackStats>,
    capacity: usize,
}

impl PlaybackPipeline {
    pub fn new(capacity: usize) -> Result<(Self, PlaybackFeeder), AudioError> {
        let (producer, consumer) = byte_ring(capacity)?;
        Ok((
            Self {
                state: PlaybackStateMachine::new(),
                thread: None,
                consumer: Some(consumer),
                stats: Arc::new(PlaybackStats::default()),
                capacity,
            },
            PlaybackFeeder { producer },
        ))
    }

    pub fn start(&mut self, codec: Arc<dyn AudioCodec>) -> Result<(), AudioError> {
        let Some(mut consumer) = self.consumer.take() else {
            return Err(AudioError::AlreadyRunning("playback"));
        };
        if !self.state.start() {
            self.consumer = Some(consumer);
            return Err(AudioError::AlreadyRunning("playback"));
        }

        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let handle = std::thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || {
                let mut chunk = [0u8; CHUNK_BYTES];
                info!("Playback started");
                loop {
                    match state.current() {
                        PlaybackState::Idle => break,
                        PlaybackState::Paused => {
                            std::thread::sleep(Duration::from_millis(10));
                            continue;
                        }
                        PlaybackState::Playing => {}
                    }
                    match pump_once(&mut consumer, codec.as_ref(), &mut chunk) {
                        Ok(Pumped::Audio(_)) => {
                            stats.audio_chunks.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Pumped::Silence) => {
                            stats.silence_chunks.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            debug!(error = %e, "Playback write failed");
                            std::thread::sleep(CHUNK_DURATION);
                        }
                    }
                    stats.level.store(consumer.used_size(), Ordering::Relaxed);
                }
                info!(
                    audio = stats.audio_chunks.load(Ordering::Relaxed),
                    silence = stats.silence_chunks.load(Ordering::Relaxed),
                    "Playback stopped"
                );
                consumer
            });

        match handle {
            Ok(h) => {
                self.thread = Some(h);
                Ok(())
            }
            Err(e) => {
                self.state.stop();
                Err(AudioError::Stream(format!("failed to spawn playback thread: {e}")))
            }
        }
    }

    /// Stop the thread and drop anything still queued.
    pub fn stop(&mut self) {
        self.state.stop();
        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(mut consumer) => {
                    consumer.clear();
                    self.consumer = Some(consumer);
                }
                Err(_) => error!("Playback thread panicked"),
            }
        }
        self.stats.level.store(0, Ordering::Relaxed);
    }

    pub fn pause(&self) -> bool {
        self.state.pause()
    }

    pub fn resume(&self) -> bool {
        self.state.resume()
    }

    pub fn state(&self) -> PlaybackState {
        self.state.current()
    }

    /// FIFO fill as a fraction of capacity.
    pub fn fill_level(&self) -> f32 {
        self.stats.level.load(Ordering::Relaxed) as f32 / self.capacity as f32
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One iteration: write up to one chunk of queued audio as is, or one full
/// chunk of silence when the FIFO stayed empty for the receive timeout.
/// Short runs are never padded, so frames of any size play back to back.
pub fn pump_once(
    consumer: &mut ByteConsumer,
    codec: &dyn AudioCodec,
    chunk: &mut [u8; CHUNK_BYTES],
) -> Result<Pumped, AudioError> {
    let mut filled = 0;
    if let Some(slice) = consumer.recv_up_to(CHUNK_BYTES, RECV_TIMEOUT) {
        chunk[..slice.len()].copy_from_slice(&slice);
        filled = slice.len();
    }
    // A short first run means we hit the wrap point; take the rest.
    if filled > 0 && filled < CHUNK_BYTES {
        if let Some(slice) = consumer.recv_up_to(CHUNK_BYTES - filled, Duration::ZERO) {
            chunk[filled..filled + slice.len()].copy_from_slice(&slice);
            filled += slice.len();
        }
    }
    if filled == 0 {
        chunk.fill(0);
        codec.write(chunk, WRITE_TIMEOUT)?;
        return Ok(Pumped::Silence);
    }
    codec.write(&chunk[..filled], WRITE_TIMEOUT)?;
    Ok(Pumped::Audio(filled))
}

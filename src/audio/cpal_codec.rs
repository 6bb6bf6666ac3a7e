//! Host audio codec on top of cpal.
//!
//! Opens the default input and output devices, preferring a 16 kHz f32
//! configuration and resampling linearly when the device will not do 16 kHz.
//! cpal streams are not `Send` on every platform, so a small owner thread
//! builds them and keeps them alive; the codec talks to the stream callbacks
//! through two byte rings and a handful of atomics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::codec::{AudioCodec, AudioError, CodecFormat};
use super::ring_buffer::{byte_ring, ByteConsumer, ByteProducer, RingError};
use super::{BITS_PER_SAMPLE, CHUNK_BYTES, SAMPLE_RATE};

/// Capture ring: eight stereo chunks.
const CAPTURE_RING_BYTES: usize = CHUNK_BYTES * 2 * 8;

/// Output ring: four mono chunks (80 ms of latency at the speaker).
const OUTPUT_RING_BYTES: usize = CHUNK_BYTES * 4;

/// List available input and output device names.
pub fn list_devices() -> (Vec<String>, Vec<String>) {
    let host = cpal::default_host();
    (
        device_names(host.input_devices()),
        device_names(host.output_devices()),
    )
}

fn device_names<I, E>(devices: Result<I, E>) -> Vec<String>
where
    I: Iterator<Item = cpal::Device>,
{
    devices
        .map(|iter| iter.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Gain state shared with the stream callbacks.
struct Levels {
    volume: AtomicU8,
    muted: AtomicBool,
    /// Linear mic gain stored as f32 bits.
    mic_gain: AtomicU32,
    suspended: AtomicBool,
}

impl Levels {
    fn output_gain(&self) -> f32 {
        if self.muted.load(Ordering::Relaxed) {
            0.0
        } else {
            self.volume.load(Ordering::Relaxed) as f32 / 100.0
        }
    }

    fn mic_gain(&self) -> f32 {
        f32::from_bits(self.mic_gain.load(Ordering::Relaxed))
    }
}

enum StreamCmd {
    Play,
    Pause,
    Shutdown,
}

pub struct CpalCodec {
    format: CodecFormat,
    capture: Mutex<ByteConsumer>,
    playback: Mutex<ByteProducer>,
    levels: Arc<Levels>,
    control: Mutex<std_mpsc::Sender<StreamCmd>>,
}

impl CpalCodec {
    /// Open the default devices and start both streams.
    pub fn open() -> Result<Self, AudioError> {
        let (capture_tx, capture_rx) = byte_ring(CAPTURE_RING_BYTES)?;
        let (playback_tx, playback_rx) = byte_ring(OUTPUT_RING_BYTES)?;
        let levels = Arc::new(Levels {
            volume: AtomicU8::new(70),
            muted: AtomicBool::new(false),
            mic_gain: AtomicU32::new(1.0f32.to_bits()),
            suspended: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let thread_levels = Arc::clone(&levels);
        std::thread::Builder::new()
            .name("audio-host".into())
            .spawn(move || {
                let streams = build_streams(capture_tx, playback_rx, thread_levels);
                let (input, output, channels) = match streams {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(channels));
                for cmd in cmd_rx {
                    let result = match cmd {
                        StreamCmd::Play => input.play().and_then(|_| output.play()).map_err(|e| e.to_string()),
                        StreamCmd::Pause => input.pause().and_then(|_| output.pause()).map_err(|e| e.to_string()),
                        StreamCmd::Shutdown => break,
                    };
                    if let Err(e) = result {
                        error!("Audio stream control failed: {}", e);
                    }
                }
                info!("Audio streams closed");
            })
            .map_err(|e| AudioError::Stream(format!("failed to spawn audio host thread: {e}")))?;

        let input_channels = ready_rx
            .recv()
            .map_err(|_| AudioError::Stream("audio host thread exited early".into()))??;

        Ok(Self {
            format: CodecFormat {
                sample_rate: SAMPLE_RATE,
                bits_per_sample: BITS_PER_SAMPLE,
                input_channels,
                output_channels: 1,
            },
            capture: Mutex::new(capture_rx),
            playback: Mutex::new(playback_tx),
            levels,
            control: Mutex::new(cmd_tx),
        })
    }

    fn send_cmd(&self, cmd: StreamCmd) -> Result<(), AudioError> {
        self.control
            .lock()
            .send(cmd)
            .map_err(|_| AudioError::Stream("audio host thread is gone".into()))
    }
}

impl Drop for CpalCodec {
    fn drop(&mut self) {
        let _ = self.send_cmd(StreamCmd::Shutdown);
    }
}

impl AudioCodec for CpalCodec {
    fn format(&self) -> CodecFormat {
        self.format
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AudioError> {
        if self.levels.suspended.load(Ordering::Acquire) {
            std::thread::sleep(timeout);
            return Err(AudioError::Suspended);
        }
        let mut rx = self.capture.lock();
        if !rx.wait_available(buf.len(), timeout) {
            return Err(AudioError::Timeout(timeout));
        }
        Ok(rx.read(buf, Duration::ZERO))
    }

    fn write(&self, buf: &[u8], timeout: Duration) -> Result<usize, AudioError> {
        if self.levels.suspended.load(Ordering::Acquire) {
            return Err(AudioError::Suspended);
        }
        let mut tx = self.playback.lock();
        for piece in buf.chunks(tx.capacity()) {
            tx.send(piece, timeout).map_err(|e| match e {
                RingError::Timeout { .. } => AudioError::Timeout(timeout),
                other => AudioError::Ring(other),
            })?;
        }
        Ok(buf.len())
    }

    fn set_volume(&self, volume: u8) -> Result<(), AudioError> {
        self.levels.volume.store(volume.min(100), Ordering::Relaxed);
        Ok(())
    }

    fn volume(&self) -> u8 {
        self.levels.volume.load(Ordering::Relaxed)
    }

    fn set_muted(&self, muted: bool) -> Result<(), AudioError> {
        self.levels.muted.store(muted, Ordering::Relaxed);
        Ok(())
    }

    fn set_mic_gain(&self, db: f32) -> Result<(), AudioError> {
        let linear = db_to_linear(db);
        self.levels.mic_gain.store(linear.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn suspend(&self) -> Result<(), AudioError> {
        self.levels.suspended.store(true, Ordering::Release);
        self.send_cmd(StreamCmd::Pause)
    }

    fn resume(&self) -> Result<(), AudioError> {
        self.send_cmd(StreamCmd::Play)?;
        self.levels.suspended.store(false, Ordering::Release);
        Ok(())
    }
}

/// Decibels to a linear amplitude factor.
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Pick a stream config: f32 at 16 kHz with the wanted channel count if the
/// device offers it, otherwise any f32 16 kHz range, otherwise `None`.
fn prefer_16k(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    want_channels: u16,
) -> Option<StreamConfig> {
    let candidates: Vec<_> = ranges
        .filter(|r| {
            r.sample_format() == SampleFormat::F32
                && r.min_sample_rate().0 <= SAMPLE_RATE
                && r.max_sample_rate().0 >= SAMPLE_RATE
        })
        .collect();
    candidates
        .iter()
        .find(|r| r.channels() == want_channels)
        .or_else(|| candidates.first())
        .map(|r| r.clone().with_sample_rate(SampleRate(SAMPLE_RATE)).config())
}

fn build_streams(
    mut capture_tx: ByteProducer,
    mut playback_rx: ByteConsumer,
    levels: Arc<Levels>,
) -> Result<(cpal::Stream, cpal::Stream, u16), AudioError> {
    let host = cpal::default_host();

    // --- input ---
    let input = host
        .default_input_device()
        .ok_or_else(|| AudioError::Device("no default input device".into()))?;
    let in_name = input.name().unwrap_or_else(|_| "unknown".into());
    let in_config = match input.supported_input_configs() {
        Ok(ranges) => prefer_16k(ranges, 2),
        Err(_) => None,
    };
    let in_config = match in_config {
        Some(c) => c,
        None => input
            .default_input_config()
            .map_err(|e| AudioError::Device(format!("input config: {e}")))?
            .config(),
    };
    let in_rate = in_config.sample_rate.0;
    let dev_in_ch = in_config.channels.max(1) as usize;
    let used_in_ch = dev_in_ch.min(2);
    info!(device = %in_name, rate = in_rate, channels = dev_in_ch, "Selected input device");

    let in_levels = Arc::clone(&levels);
    let mut per_channel: Vec<Vec<f32>> = vec![Vec::new(); used_in_ch];
    let mut bytes: Vec<u8> = Vec::new();
    let input_stream = input
        .build_input_stream(
            &in_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let gain = in_levels.mic_gain();
                for (c, chan) in per_channel.iter_mut().enumerate() {
                    let mono: Vec<f32> = data.chunks_exact(dev_in_ch).map(|f| f[c]).collect();
                    *chan = resample_linear(&mono, in_rate, SAMPLE_RATE);
                }
                let frames = per_channel.iter().map(Vec::len).min().unwrap_or(0);
                bytes.clear();
                for i in 0..frames {
                    for chan in &per_channel {
                        bytes.extend_from_slice(&f32_to_i16(chan[i] * gain).to_le_bytes());
                    }
                }
                // A full ring means the capture thread is behind; drop.
                let _ = capture_tx.try_send(&bytes);
            },
            move |err| {
                error!("Audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::Stream(format!("failed to build input stream: {e}")))?;

    // --- output ---
    let output = host
        .default_output_device()
        .ok_or_else(|| AudioError::Device("no default output device".into()))?;
    let out_name = output.name().unwrap_or_else(|_| "unknown".into());
    let out_config = match output.supported_output_configs() {
        Ok(ranges) => prefer_16k(ranges, 1),
        Err(_) => None,
    };
    let out_config = match out_config {
        Some(c) => c,
        None => output
            .default_output_config()
            .map_err(|e| AudioError::Device(format!("output config: {e}")))?
            .config(),
    };
    let out_rate = out_config.sample_rate.0;
    let out_ch = out_config.channels.max(1) as usize;
    info!(device = %out_name, rate = out_rate, channels = out_ch, "Selected output device");

    let mut converter = RateConverter::new(SAMPLE_RATE, out_rate);
    let mut pending: VecDeque<f32> = VecDeque::new();
    let mut scratch: Vec<u8> = Vec::new();
    let output_stream = output
        .build_output_stream(
            &out_config,
            move |out: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let frames = out.len() / out_ch;
                let need = (frames as f64 * converter.step).ceil() as usize + 2;
                if pending.len() < need {
                    scratch.resize((need - pending.len()) * 2, 0);
                    let n = playback_rx.read(&mut scratch, Duration::ZERO);
                    pending.extend(
                        scratch[..n]
                            .chunks_exact(2)
                            .map(|p| i16::from_le_bytes([p[0], p[1]]) as f32 / 32768.0),
                    );
                }
                let gain = levels.output_gain();
                for frame in out.chunks_exact_mut(out_ch) {
                    let s = converter.next_sample(|| pending.pop_front().unwrap_or(0.0)) * gain;
                    frame.fill(s);
                }
            },
            move |err| {
                error!("Audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::Stream(format!("failed to build output stream: {e}")))?;

    input_stream
        .play()
        .map_err(|e| AudioError::Stream(format!("failed to start input stream: {e}")))?;
    if let Err(e) = output_stream.play() {
        warn!("Failed to start output stream: {}", e);
    }

    Ok((input_stream, output_stream, used_in_ch as u16))
}

fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Simple linear resampler from `from_rate` to `to_rate` over one block.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Streaming linear interpolator that pulls source samples on demand, so
/// block boundaries in the output callback do not click.
struct RateConverter {
    step: f64,
    pos: f64,
    prev: f32,
    next: f32,
}

impl RateConverter {
    fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate as f64,
            pos: 1.0,
            prev: 0.0,
            next: 0.0,
        }
    }

    fn next_sample(&mut self, mut pull: impl FnMut() -> f32) -> f32 {
        while self.pos >= 1.0 {
            self.prev = self.next;
            self.next = pull();
            self.pos -= 1.0;
        }
        let s = self.prev + (self.next - self.prev) * self.pos as f32;
        self.pos += self.step;
        s
    }
}

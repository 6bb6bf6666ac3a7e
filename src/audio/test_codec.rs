//! In-memory codec for pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::codec::{AudioCodec, AudioError, CodecFormat};
use super::{BITS_PER_SAMPLE, SAMPLE_RATE};

pub(crate) struct FakeCodec {
    format: CodecFormat,
    capture: Mutex<VecDeque<u8>>,
    pub written: Mutex<Vec<(Instant, Vec<u8>)>>,
    volume: AtomicU8,
    suspended: AtomicBool,
}

impl FakeCodec {
    pub fn new(input_channels: u16) -> Self {
        Self {
            format: CodecFormat {
                sample_rate: SAMPLE_RATE,
                bits_per_sample: BITS_PER_SAMPLE,
                input_channels,
                output_channels: 1,
            },
            capture: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            volume: AtomicU8::new(0),
            suspended: AtomicBool::new(false),
        }
    }

    pub fn push_capture(&self, bytes: &[u8]) {
        self.capture.lock().extend(bytes.iter().copied());
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Relaxed)
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        self.written
            .lock()
            .iter()
            .flat_map(|(_, b)| b.iter().copied())
            .collect()
    }
}

impl AudioCodec for FakeCodec {
    fn format(&self) -> CodecFormat {
        self.format
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, AudioError> {
        let mut capture = self.capture.lock();
        if capture.len() < buf.len() {
            drop(capture);
            std::thread::sleep(timeout.min(Duration::from_millis(2)));
            return Err(AudioError::Timeout(timeout));
        }
        for b in buf.iter_mut() {
            *b = capture.pop_front().unwrap_or(0);
        }
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8], _timeout: Duration) -> Result<usize, AudioError> {
        self.written.lock().push((Instant::now(), buf.to_vec()));
        Ok(buf.len())
    }

    fn set_volume(&self, volume: u8) -> Result<(), AudioError> {
        self.volume.store(volume.min(100), Ordering::Relaxed);
        Ok(())
    }

    fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    fn set_muted(&self, _muted: bool) -> Result<(), AudioError> {
        Ok(())
    }

    fn set_mic_gain(&self, _db: f32) -> Result<(), AudioError> {
        Ok(())
    }

    fn suspend(&self) -> Result<(), AudioError> {
        self.suspended.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn resume(&self) -> Result<(), AudioError> {
        self.suspended.store(false, Ordering::Relaxed);
        Ok(())
    }
}

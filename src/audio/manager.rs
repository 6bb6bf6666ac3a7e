//! Codec ownership and output/input level control.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::capture::CaptureConfig;
use super::codec::{AudioCodec, AudioError, CodecFormat};
use super::playback::DEFAULT_PLAYBACK_BYTES;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Speaker volume, percent.
    pub volume: u8,
    /// Microphone gain in dB.
    pub mic_gain_db: f32,
    pub capture: CaptureConfig,
    /// Playback FIFO size in bytes.
    pub playback_buffer_bytes: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 70,
            mic_gain_db: 24.0,
            capture: CaptureConfig::default(),
            playback_buffer_bytes: DEFAULT_PLAYBACK_BYTES,
        }
    }
}

pub struct AudioManager {
    codec: Arc<dyn AudioCodec>,
    muted: AtomicBool,
    suspended: AtomicBool,
}

impl AudioManager {
    /// Take ownership of an opened codec and apply the configured levels.
    pub fn init(codec: Arc<dyn AudioCodec>, config: &AudioConfig) -> Result<Self, AudioError> {
        let manager = Self {
            codec,
            muted: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
        };
        manager.set_volume(config.volume as i32)?;
        manager.codec.set_mic_gain(config.mic_gain_db)?;

        let CodecFormat {
            sample_rate,
            bits_per_sample,
            input_channels,
            output_channels,
        } = manager.codec.format();
        info!(
            sample_rate,
            bits_per_sample,
            input_channels,
            output_channels,
            volume = manager.volume(),
            mic_gain_db = config.mic_gain_db,
            "Audio manager ready"
        );
        Ok(manager)
    }

    pub fn codec(&self) -> Arc<dyn AudioCodec> {
        Arc::clone(&self.codec)
    }

    /// Set speaker volume; out-of-range values are clamped to 0..=100.
    pub fn set_volume(&self, volume: i32) -> Result<(), AudioError> {
        let clamped = volume.clamp(0, 100) as u8;
        if clamped as i32 != volume {
            warn!(requested = volume, applied = clamped, "Volume clamped");
        }
        self.codec.set_volume(clamped)
    }

    pub fn volume(&self) -> u8 {
        self.codec.volume()
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), AudioError> {
        self.codec.set_muted(muted)?;
        self.muted.store(muted, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Pause the codec streams (low-power idle).
    pub fn suspend(&self) -> Result<(), AudioError> {
        if self.suspended.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Audio suspended");
        self.codec.suspend()
    }

    pub fn resume(&self) -> Result<(), AudioError> {
        if !self.suspended.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Audio resumed");
        self.codec.resume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_codec::FakeCodec;

    #[test]
    fn test_init_applies_configured_volume() {
        let codec = Arc::new(FakeCodec::new(2));
        let config = AudioConfig {
            volume: 55,
            ..AudioConfig::default()
        };
        let manager = AudioManager::init(codec, &config).unwrap();
        assert_eq!(manager.volume(), 55);
    }

    #[test]
    fn test_volume_clamped() {
        let codec = Arc::new(FakeCodec::new(2));
        let manager = AudioManager::init(codec, &AudioConfig::default()).unwrap();
        manager.set_volume(150).unwrap();
        assert_eq!(manager.volume(), 100);
        manager.set_volume(-5).unwrap();
        assert_eq!(manager.volume(), 0);
    }

    #[test]
    fn test_suspend_resume_idempotent() {
        let codec = Arc::new(FakeCodec::new(2));
        let manager = AudioManager::init(codec.clone(), &AudioConfig::default()).unwrap();
        manager.suspend().unwrap();
        manager.suspend().unwrap();
        assert!(codec.is_suspended());
        manager.resume().unwrap();
        assert!(!codec.is_suspended());
    }

    #[test]
    fn test_mute_tracked() {
        let codec = Arc::new(FakeCodec::new(2));
        let manager = AudioManager::init(codec, &AudioConfig::default()).unwrap();
        manager.set_muted(true).unwrap();
        assert!(manager.is_muted());
    }
}

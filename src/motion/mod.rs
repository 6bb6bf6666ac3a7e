//! Motion sensing: accelerometer seam, shake detector and sampling thread.

pub mod detector;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::ErrorKind;

pub use detector::ShakeDetector;

const READ_WARN_EVERY: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Magnitude (m/s²) a direction change must exceed to count.
    pub threshold: f32,
    /// Direction changes inside `window_ms` that make a shake.
    pub count_trigger: u32,
    pub window_ms: u64,
    pub cooldown_ms: u64,
    pub sample_period_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            threshold: 15.0,
            count_trigger: 3,
            window_ms: 500,
            cooldown_ms: 2000,
            sample_period_ms: 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("accelerometer read failed: {0}")]
    Read(String),
    #[error("motion monitor already running")]
    AlreadyRunning,
    #[error("failed to spawn motion thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl MotionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Read(_) => ErrorKind::TransientIo,
            Self::AlreadyRunning => ErrorKind::State,
            Self::Spawn(_) => ErrorKind::Fatal,
        }
    }
}

/// Three-axis accelerometer in m/s².
pub trait Accelerometer: Send {
    fn read(&mut self) -> Result<[f32; 3], MotionError>;
}

/// A device resting flat on a desk.
#[derive(Debug, Default)]
pub struct StillAccelerometer;

impl Accelerometer for StillAccelerometer {
    fn read(&mut self) -> Result<[f32; 3], MotionError> {
        Ok([0.0, 0.0, 9.81])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionEvent {
    Shake { intensity: f32 },
}

/// Samples the accelerometer on its own thread and posts shake events.
pub struct MotionMonitor {
    config: MotionConfig,
    detector: Arc<Mutex<ShakeDetector>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    read_failures: Arc<AtomicU64>,
}

impl MotionMonitor {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            detector: Arc::new(Mutex::new(ShakeDetector::new(config.clone()))),
            config,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            read_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(
        &mut self,
        mut sensor: Box<dyn Accelerometer>,
        events: mpsc::UnboundedSender<MotionEvent>,
    ) -> Result<(), MotionError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(MotionError::AlreadyRunning);
        }
        let running = Arc::clone(&self.running);
        let detector = Arc::clone(&self.detector);
        let failures = Arc::clone(&self.read_failures);
        let period = Duration::from_millis(self.config.sample_period_ms.max(1));

        let spawned = std::thread::Builder::new()
            .name("motion".into())
            .spawn(move || {
                let epoch = Instant::now();
                while running.load(Ordering::Acquire) {
                    match sensor.read() {
                        Ok(sample) => {
                            let now_ms = epoch.elapsed().as_millis() as u64;
                            let shake = detector.lock().process(sample, now_ms);
                            if let Some(intensity) = shake {
                                info!(intensity, "Shake detected");
                                if events.send(MotionEvent::Shake { intensity }).is_err() {
                                    debug!("Motion event receiver gone");
                                }
                            }
                        }
                        Err(e) => {
                            let n = failures.fetch_add(1, Ordering::Relaxed) + 1;
                            if n % READ_WARN_EVERY == 1 {
                                warn!(error = %e, failures = n, "Accelerometer read failed");
                            }
                        }
                    }
                    std::thread::sleep(period);
                }
            });

        match spawned {
            Ok(handle) => {
                info!(
                    threshold = self.config.threshold,
                    count = self.config.count_trigger,
                    "Motion detection started"
                );
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Motion thread panicked");
            }
            info!("Motion detection stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_shaking(&self) -> bool {
        self.detector.lock().is_shaking()
    }

    pub fn shake_intensity(&self) -> f32 {
        self.detector.lock().intensity()
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.config.cooldown_ms)
    }
}

impl Drop for MotionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Alternates between two magnitudes on every read.
    struct Rattle {
        high: bool,
    }

    impl Accelerometer for Rattle {
        fn read(&mut self) -> Result<[f32; 3], MotionError> {
            self.high = !self.high;
            Ok([0.0, 0.0, if self.high { 30.0 } else { 2.0 }])
        }
    }

    struct Broken;

    impl Accelerometer for Broken {
        fn read(&mut self) -> Result<[f32; 3], MotionError> {
            Err(MotionError::Read("bus".into()))
        }
    }

    #[tokio::test]
    async fn test_monitor_posts_shake() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = MotionMonitor::new(MotionConfig {
            sample_period_ms: 5,
            ..MotionConfig::default()
        });
        monitor.start(Box::new(Rattle { high: false }), tx).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let MotionEvent::Shake { intensity } = event;
        assert!(intensity > 0.5);
        assert!(monitor.is_shaking());
        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_double_start_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut monitor = MotionMonitor::new(MotionConfig::default());
        monitor.start(Box::new(StillAccelerometer), tx.clone()).unwrap();
        let err = monitor.start(Box::new(StillAccelerometer), tx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        monitor.stop();
    }

    #[test]
    fn test_read_failures_are_counted() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut monitor = MotionMonitor::new(MotionConfig {
            sample_period_ms: 1,
            ..MotionConfig::default()
        });
        monitor.start(Box::new(Broken), tx).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        monitor.stop();
        assert!(monitor.read_failures.load(Ordering::Relaxed) > 0);
        assert!(!monitor.is_shaking());
    }
}

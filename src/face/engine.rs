//! The face engine: shared animation state plus the render thread.
//!
//! Lock order is always engine state first, then the display. Setters only
//! touch the engine state; every widget mutation happens on the next frame
//! while both locks are held, so a setter never waits on the display bus.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::animation::{Animator, Eye, FaceTiming};
use super::display::{lock_display, DisplayBackend, DisplayError, Rect, SharedDisplay};
use super::emotion::{Emotion, EmotionParams};
use super::layout::{compute_layout, FaceGeometry, MouthShape};
use super::modes::{
    AnimationKind, AnimationState, ClockSpec, ClockState, DisplayMode, ModeKind, PixelArt,
    TextContent, TimerSpec, TimerState, Weather,
};
use super::scene::{Scene, SceneWidgets};
use crate::error::ErrorKind;

/// Scene mutations give up on the display after this long and retry next
/// frame.
pub const DISPLAY_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// Setters give up on the engine state after this long.
pub const ENGINE_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Touches this close to an eye still count as hitting it.
const HIT_MARGIN: i32 = 10;

/// Longest step `tick` will take; longer gaps are treated as this.
const MAX_TICK_SECS: f32 = 0.1;

#[derive(Debug, Error)]
pub enum FaceError {
    #[error("face engine state busy")]
    Busy,
    #[error(transparent)]
    Display(#[from] DisplayError),
    #[error("render thread already running")]
    AlreadyRunning,
    #[error("failed to spawn render thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl FaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy => ErrorKind::TransientIo,
            Self::Display(e) => e.kind(),
            Self::AlreadyRunning => ErrorKind::State,
            Self::Spawn(_) => ErrorKind::Fatal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// Render period. 16 ms on a desktop host, 66 ms on the device.
    pub frame_period_ms: u64,
    pub initial_emotion: Emotion,
    pub geometry: FaceGeometry,
    pub timing: FaceTiming,
    /// Fixed RNG seed for blink timing and particles. Random when unset.
    pub seed: Option<u64>,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            frame_period_ms: 16,
            initial_emotion: Emotion::Neutral,
            geometry: FaceGeometry::default(),
            timing: FaceTiming::default(),
            seed: None,
        }
    }
}

struct EngineState {
    anim: Animator,
    mode: DisplayMode,
    /// The scene still shows the previous mode.
    mode_dirty: bool,
    scene: Scene,
    frames: u64,
    particle_seed: u64,
}

struct Inner {
    state: Mutex<EngineState>,
    display: SharedDisplay,
    geometry: FaceGeometry,
    period: Duration,
    running: AtomicBool,
    /// Frames per second times ten.
    fps_x10: AtomicU32,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; all clones drive the same face.
#[derive(Clone)]
pub struct FaceEngine {
    inner: Arc<Inner>,
}

impl FaceEngine {
    /// Create the widget set on `display`. The render thread is not started.
    pub fn new(display: SharedDisplay, config: &FaceConfig) -> Result<Self, FaceError> {
        let geometry = config.geometry.clone().validated();
        let scene = {
            let mut d = lock_display(&display, DISPLAY_LOCK_TIMEOUT)?;
            let (w, h) = d.size();
            if (w, h) != (geometry.width, geometry.height) {
                warn!(
                    panel_width = w,
                    panel_height = h,
                    geometry_width = geometry.width,
                    geometry_height = geometry.height,
                    "Face geometry does not match the panel"
                );
            }
            Scene::build(&mut *d, geometry.change_gate_px)?
        };
        let seed = config.seed.unwrap_or_else(rand::random);
        let state = EngineState {
            anim: Animator::new(config.initial_emotion, config.timing.clone(), Some(seed)),
            mode: DisplayMode::Face,
            mode_dirty: true,
            scene,
            frames: 0,
            particle_seed: seed,
        };
        info!(
            width = geometry.width,
            height = geometry.height,
            period_ms = config.frame_period_ms,
            emotion = %config.initial_emotion,
            "Face engine created"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                display,
                geometry,
                period: Duration::from_millis(config.frame_period_ms.max(1)),
                running: AtomicBool::new(false),
                fps_x10: AtomicU32::new(0),
                thread: Mutex::new(None),
            }),
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, EngineState>, FaceError> {
        self.inner
            .state
            .try_lock_for(ENGINE_LOCK_TIMEOUT)
            .ok_or(FaceError::Busy)
    }

    // -----------------------------------------------------------------------
    // Render loop
    // -----------------------------------------------------------------------

    pub fn start(&self) -> Result<(), FaceError> {
        let mut slot = self.inner.thread.lock();
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(FaceError::AlreadyRunning);
        }
        let engine = self.clone();
        let handle = thread::Builder::new()
            .name("face-render".into())
            .spawn(move || engine.render_loop())
            .inspect_err(|_| self.inner.running.store(false, Ordering::Release))?;
        *slot = Some(handle);
        info!(period_ms = self.inner.period.as_millis() as u64, "Face render thread started");
        Ok(())
    }

    /// Ask the render thread to finish, give it two frame periods, then join.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        thread::sleep(self.inner.period * 2);
        if let Some(handle) = self.inner.thread.lock().take() {
            if handle.join().is_err() {
                warn!("Face render thread panicked");
            }
        }
        info!("Face render thread stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn render_loop(&self) {
        let period = self.inner.period;
        let mut last = Instant::now();
        let mut window = Instant::now();
        let mut window_frames = 0u32;
        let mut failures = 0u64;

        while self.inner.running.load(Ordering::Acquire) {
            let started = Instant::now();
            let dt = started.duration_since(last).as_secs_f32().max(0.001);
            last = started;

            match self.tick(dt) {
                Ok(()) => window_frames += 1,
                Err(FaceError::Busy) | Err(FaceError::Display(DisplayError::LockTimeout(_))) => {
                    trace!("Frame skipped, lock busy");
                }
                Err(e) => {
                    failures += 1;
                    if failures % 100 == 1 {
                        warn!(error = %e, failures, "Frame render failed");
                    }
                }
            }

            let elapsed = window.elapsed();
            if elapsed >= Duration::from_secs(1) {
                let fps = window_frames as f32 / elapsed.as_secs_f32();
                self.inner.fps_x10.store((fps * 10.0).round() as u32, Ordering::Relaxed);
                window = Instant::now();
                window_frames = 0;
            }

            let spent = started.elapsed();
            if spent < period {
                thread::sleep(period - spent);
            }
        }
    }

    /// Advance the animation by `dt` seconds and reconcile the scene.
    ///
    /// The render thread calls this every period; hosts without the thread
    /// (and tests) can step the face directly.
    pub fn tick(&self, dt: f32) -> Result<(), FaceError> {
        let dt = if dt.is_finite() { dt.clamp(0.0, MAX_TICK_SECS) } else { 0.0 };
        let geom = &self.inner.geometry;
        let mut guard = self.lock_state()?;
        let st = &mut *guard;
        st.anim.advance(dt, geom);
        st.mode.advance(dt);

        let mut display = lock_display(&self.inner.display, DISPLAY_LOCK_TIMEOUT)?;
        let d: &mut dyn DisplayBackend = &mut *display;

        if st.mode_dirty {
            match st.scene.enter(d, &st.mode, geom) {
                Ok(()) => {}
                Err(DisplayError::OutOfMemory) => {
                    warn!(mode = %st.mode.kind(), "Out of widget memory, falling back to face");
                    st.mode = DisplayMode::Face;
                    st.scene.enter(d, &st.mode, geom)?;
                }
                Err(e) => return Err(e.into()),
            }
            st.mode_dirty = false;
        }

        match &st.mode {
            DisplayMode::Face => {
                let layout = compute_layout(geom, &st.anim.pose());
                st.scene.render_face(d, &layout)?;
            }
            mode => st.scene.refresh(d, mode, geom)?,
        }

        st.frames += 1;
        if st.frames % geom.full_refresh_frames.max(1) == 0 {
            d.invalidate_all()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Face state
    // -----------------------------------------------------------------------

    pub fn set_emotion(&self, emotion: Emotion) -> Result<(), FaceError> {
        let mut st = self.lock_state()?;
        if st.anim.emotion() != emotion {
            debug!(from = %st.anim.emotion(), to = %emotion, "Emotion target");
        }
        st.anim.set_emotion(emotion);
        Ok(())
    }

    /// The emotion the face is showing or moving toward.
    pub fn emotion(&self) -> Result<Emotion, FaceError> {
        Ok(self.lock_state()?.anim.emotion())
    }

    /// Current interpolated emotion vector.
    pub fn params(&self) -> Result<EmotionParams, FaceError> {
        Ok(*self.lock_state()?.anim.params())
    }

    pub fn set_cat_mode(&self, on: bool) -> Result<(), FaceError> {
        self.set_emotion(if on { Emotion::Cat } else { Emotion::Neutral })
    }

    /// Gaze target in [0,1]^2; out-of-range values are clamped.
    pub fn set_gaze(&self, x: f32, y: f32) -> Result<(), FaceError> {
        self.lock_state()?.anim.set_gaze_target(x, y);
        Ok(())
    }

    /// Where the eyes are looking right now.
    pub fn gaze(&self) -> Result<(f32, f32), FaceError> {
        Ok(self.lock_state()?.anim.gaze())
    }

    pub fn gaze_target(&self) -> Result<(f32, f32), FaceError> {
        Ok(self.lock_state()?.anim.gaze_target())
    }

    /// Whole-face lean in pixels.
    pub fn face_offset(&self) -> Result<(f32, f32), FaceError> {
        let (nx, ny) = self.lock_state()?.anim.offset();
        let (mx, my) = self.inner.geometry.max_shift_px();
        Ok((nx * mx, ny * my))
    }

    pub fn blink(&self) -> Result<(), FaceError> {
        self.lock_state()?.anim.force_blink();
        Ok(())
    }

    /// Briefly close one eye.
    pub fn poke_eye(&self, eye: Eye) -> Result<(), FaceError> {
        debug!(eye = eye.as_str(), "Eye poked");
        self.lock_state()?.anim.poke(eye);
        Ok(())
    }

    /// Which eye, if any, a touch at (x, y) lands on. Only the face has eyes.
    pub fn hit_test_eye(&self, x: i32, y: i32) -> Option<Eye> {
        let st = self.lock_state().ok()?;
        if st.mode.kind() != ModeKind::Face {
            return None;
        }
        let [left, right] = st.scene.eye_rects();
        let grown = |r: Rect| {
            Rect::new(r.x - HIT_MARGIN, r.y - HIT_MARGIN, r.w + 2 * HIT_MARGIN, r.h + 2 * HIT_MARGIN)
        };
        if grown(left).contains(x, y) {
            Some(Eye::Left)
        } else if grown(right).contains(x, y) {
            Some(Eye::Right)
        } else {
            None
        }
    }

    /// Dizzy face with a wobbling gaze. Turning it off restores the emotion
    /// shown before.
    pub fn set_dizzy(&self, on: bool) -> Result<(), FaceError> {
        self.lock_state()?.anim.set_dizzy(on);
        Ok(())
    }

    pub fn is_dizzy(&self) -> Result<bool, FaceError> {
        Ok(self.lock_state()?.anim.is_dizzy())
    }

    pub fn mouth_shape(&self) -> Result<Option<MouthShape>, FaceError> {
        Ok(self.lock_state()?.scene.mouth_shape())
    }

    pub fn widgets(&self) -> Result<SceneWidgets, FaceError> {
        Ok(self.lock_state()?.scene.widgets())
    }

    pub fn fps(&self) -> f32 {
        self.inner.fps_x10.load(Ordering::Relaxed) as f32 / 10.0
    }

    pub fn geometry(&self) -> &FaceGeometry {
        &self.inner.geometry
    }

    // -----------------------------------------------------------------------
    // Modes
    // -----------------------------------------------------------------------

    pub fn mode(&self) -> Result<ModeKind, FaceError> {
        Ok(self.lock_state()?.mode.kind())
    }

    fn switch_mode(&self, mode: DisplayMode) -> Result<(), FaceError> {
        let mut st = self.lock_state()?;
        info!(from = %st.mode.kind(), to = %mode.kind(), "Display mode");
        st.mode = mode;
        st.mode_dirty = true;
        Ok(())
    }

    /// Leave `kind` for the face; a no-op when some other mode is showing.
    fn leave_mode(&self, kind: ModeKind) -> Result<(), FaceError> {
        let mut st = self.lock_state()?;
        if st.mode.kind() != kind {
            debug!(current = %st.mode.kind(), requested = %kind, "Clear ignored, mode not active");
            return Ok(());
        }
        info!(from = %kind, "Back to face");
        st.mode = DisplayMode::Face;
        st.mode_dirty = true;
        Ok(())
    }

    pub fn show_text(&self, content: TextContent) -> Result<(), FaceError> {
        self.switch_mode(DisplayMode::Text(content))
    }

    pub fn clear_text(&self) -> Result<(), FaceError> {
        self.leave_mode(ModeKind::Text)
    }

    /// Cells outside the 12x16 grid are dropped when drawn.
    pub fn show_pixel_art(&self, art: PixelArt) -> Result<(), FaceError> {
        self.switch_mode(DisplayMode::PixelArt(art))
    }

    pub fn clear_pixel_art(&self) -> Result<(), FaceError> {
        self.leave_mode(ModeKind::PixelArt)
    }

    pub fn show_weather(&self, weather: Weather) -> Result<(), FaceError> {
        self.switch_mode(DisplayMode::Weather(weather))
    }

    pub fn show_timer(&self, timer: TimerSpec) -> Result<(), FaceError> {
        self.switch_mode(DisplayMode::Timer(TimerState::new(timer)))
    }

    /// Start or pause the timer. Returns false when no timer is showing.
    pub fn timer_toggle(&self) -> Result<bool, FaceError> {
        let mut st = self.lock_state()?;
        match &mut st.mode {
            DisplayMode::Timer(timer) if timer.remaining > 0.0 => {
                timer.running = !timer.running;
                debug!(running = timer.running, "Timer toggled");
                Ok(true)
            }
            DisplayMode::Timer(_) => Ok(true),
            _ => Ok(false),
        }
    }

    pub fn show_clock(&self, clock: ClockSpec) -> Result<(), FaceError> {
        self.switch_mode(DisplayMode::Clock(ClockState::new(clock)))
    }

    pub fn show_animation(&self, kind: AnimationKind) -> Result<(), FaceError> {
        let g = &self.inner.geometry;
        let seed = {
            let mut st = self.lock_state()?;
            st.particle_seed = st.particle_seed.wrapping_add(1);
            st.particle_seed
        };
        self.switch_mode(DisplayMode::Animation(AnimationState::new(
            kind,
            g.pixel_cols,
            g.pixel_rows,
            seed,
        )))
    }

    /// Back to the face from whatever is showing.
    pub fn clear_display(&self) -> Result<(), FaceError> {
        let mut st = self.lock_state()?;
        if st.mode.kind() != ModeKind::Face {
            info!(from = %st.mode.kind(), "Display cleared");
            st.mode = DisplayMode::Face;
            st.mode_dirty = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::display::{MemoryDisplay, Rgb, WidgetKind};
    use crate::face::modes::Pixel;

    fn engine() -> (FaceEngine, Arc<Mutex<MemoryDisplay>>) {
        let mem = Arc::new(Mutex::new(MemoryDisplay::new(502, 410)));
        let shared: SharedDisplay = mem.clone();
        let config = FaceConfig {
            seed: Some(11),
            ..FaceConfig::default()
        };
        (FaceEngine::new(shared, &config).unwrap(), mem)
    }

    fn run(engine: &FaceEngine, seconds: f32) {
        for _ in 0..(seconds / 0.016).round() as usize {
            engine.tick(0.016).unwrap();
        }
    }

    #[test]
    fn test_happy_transition_shows_smile() {
        let (engine, mem) = engine();
        run(&engine, 0.1);
        engine.set_emotion(Emotion::Happy).unwrap();
        run(&engine, 1.0);
        assert!((engine.params().unwrap().mouth_curve - 0.8).abs() < 1e-3);
        assert_eq!(engine.mouth_shape().unwrap(), Some(MouthShape::Smile));
        let ids = engine.widgets().unwrap();
        let d = mem.lock();
        assert!(!d.widget(ids.mouth_arc).unwrap().hidden);
        assert!(d.widget(ids.mouth_bar).unwrap().hidden);
    }

    #[test]
    fn test_surprise_opens_mouth_and_eyes() {
        let (engine, mem) = engine();
        run(&engine, 0.1);
        engine.set_emotion(Emotion::Surprised).unwrap();
        run(&engine, 0.4);
        assert_eq!(engine.mouth_shape().unwrap(), Some(MouthShape::O));
        let ids = engine.widgets().unwrap();
        let d = mem.lock();
        let arc = d.widget(ids.mouth_arc).unwrap();
        assert!(!arc.hidden);
        assert_eq!((arc.arc.0, arc.arc.1), (0, 360));
        let p = engine.params().unwrap();
        assert!(p.eye_height * p.eye_openness >= 60.0 * 1.15 - 1e-3);
    }

    #[test]
    fn test_gaze_leans_face() {
        let (engine, mem) = engine();
        run(&engine, 0.1);
        let ids = engine.widgets().unwrap();
        let rest_x = mem.lock().widget(ids.eyes[0]).unwrap().rect.x;
        engine.set_gaze(0.0, 0.5).unwrap();
        run(&engine, 0.5);
        assert_eq!(engine.gaze_target().unwrap(), (0.0, 0.5));
        let (ox, _) = engine.face_offset().unwrap();
        let (max_x, _) = engine.geometry().max_shift_px();
        assert!(ox < -0.6 * max_x);
        let moved_x = mem.lock().widget(ids.eyes[0]).unwrap().rect.x;
        assert!(moved_x < rest_x + ox as i32 / 2);
    }

    #[test]
    fn test_pixel_art_and_clear() {
        let (engine, mem) = engine();
        run(&engine, 0.05);
        engine
            .show_pixel_art(PixelArt {
                pixels: vec![
                    Pixel { x: 0, y: 0, color: Rgb(0xFF0000) },
                    Pixel { x: 12, y: 0, color: Rgb(0x00FF00) },
                ],
                bg: Rgb::BLACK,
            })
            .unwrap();
        engine.tick(0.016).unwrap();
        assert_eq!(engine.mode().unwrap(), ModeKind::PixelArt);
        let ids = engine.widgets().unwrap();
        assert_eq!(ids.cells.len(), 1);
        {
            let d = mem.lock();
            let cell = d.widget(ids.cells[0]).unwrap();
            assert_eq!(cell.color, Rgb(0xFF0000));
            assert_eq!(cell.rect, engine.geometry().pixel_rect(0, 0));
            assert!(ids.eyes.iter().all(|&e| d.widget(e).unwrap().hidden));
            assert_eq!(d.background(), Rgb::BLACK);
        }

        engine.clear_pixel_art().unwrap();
        engine.tick(0.016).unwrap();
        assert_eq!(engine.mode().unwrap(), ModeKind::Face);
        let d = mem.lock();
        assert!(ids.eyes.iter().all(|&e| !d.widget(e).unwrap().hidden));
        assert!(d.widget(ids.cells[0]).is_none());
    }

    #[test]
    fn test_clear_text_only_leaves_text_mode() {
        let (engine, _mem) = engine();
        engine.show_timer(TimerSpec { minutes: 1, seconds: 0, label: String::new(), running: true }).unwrap();
        engine.clear_text().unwrap();
        assert_eq!(engine.mode().unwrap(), ModeKind::Timer);
        engine.clear_display().unwrap();
        assert_eq!(engine.mode().unwrap(), ModeKind::Face);
    }

    #[test]
    fn test_text_round_trip_redraws_eyes_next_frame() {
        let (engine, mem) = engine();
        run(&engine, 0.1);
        engine
            .show_text(TextContent {
                text: "hello".into(),
                size: crate::face::display::FontSize::Medium,
                color: Rgb::WHITE,
                bg: Rgb::FACE_BG,
            })
            .unwrap();
        engine.tick(0.016).unwrap();
        let ids = engine.widgets().unwrap();
        assert!(mem.lock().widget(ids.eyes[0]).unwrap().hidden);
        engine.clear_text().unwrap();
        engine.tick(0.016).unwrap();
        let d = mem.lock();
        assert!(!d.widget(ids.eyes[0]).unwrap().hidden);
        assert!(d.widget(ids.title).unwrap().hidden);
    }

    #[test]
    fn test_timer_counts_on_screen() {
        let (engine, mem) = engine();
        engine
            .show_timer(TimerSpec { minutes: 0, seconds: 5, label: "eggs".into(), running: true })
            .unwrap();
        engine.tick(0.016).unwrap();
        let ids = engine.widgets().unwrap();
        assert_eq!(mem.lock().widget(ids.title).unwrap().text, "00:05");
        for _ in 0..20 {
            engine.tick(0.1).unwrap();
        }
        assert_eq!(mem.lock().widget(ids.title).unwrap().text, "00:03");
        assert!(engine.timer_toggle().unwrap());
        for _ in 0..20 {
            engine.tick(0.1).unwrap();
        }
        assert_eq!(mem.lock().widget(ids.title).unwrap().text, "00:03");
    }

    #[test]
    fn test_out_of_memory_falls_back_to_face() {
        let mem = Arc::new(Mutex::new(MemoryDisplay::new(502, 410).with_widget_limit(13)));
        let shared: SharedDisplay = mem.clone();
        let engine = FaceEngine::new(shared, &FaceConfig::default()).unwrap();
        engine
            .show_pixel_art(PixelArt {
                pixels: (0..12).map(|x| Pixel { x, y: 3, color: Rgb::WHITE }).collect(),
                bg: Rgb::BLACK,
            })
            .unwrap();
        engine.tick(0.016).unwrap();
        assert_eq!(engine.mode().unwrap(), ModeKind::Face);
        assert_eq!(mem.lock().widgets_of(WidgetKind::Rect).count(), 5);
    }

    #[test]
    fn test_busy_display_skips_frame() {
        let (engine, mem) = engine();
        let guard = mem.lock();
        let err = engine.tick(0.016).unwrap_err();
        assert!(matches!(err, FaceError::Display(DisplayError::LockTimeout(_))));
        assert_eq!(err.kind(), ErrorKind::TransientIo);
        drop(guard);
        engine.tick(0.016).unwrap();
    }

    #[test]
    fn test_hit_test_and_poke() {
        let (engine, _mem) = engine();
        run(&engine, 0.05);
        let g = engine.geometry().clone();
        let [(lx, ly), (rx, ry)] = g.base_eye_centers();
        assert_eq!(engine.hit_test_eye(lx as i32, ly as i32), Some(Eye::Left));
        assert_eq!(engine.hit_test_eye(rx as i32, ry as i32), Some(Eye::Right));
        assert_eq!(engine.hit_test_eye(5, 400), None);
        engine.poke_eye(Eye::Left).unwrap();
        run(&engine, 0.1);
    }

    #[test]
    fn test_eye_height_floor_over_many_frames() {
        use rand::{Rng, SeedableRng};
        let (engine, mem) = engine();
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let ids = engine.widgets().unwrap();
        for frame in 0..1000 {
            if frame % 40 == 0 {
                let e = Emotion::ALL[rng.gen_range(0..Emotion::ALL.len())];
                engine.set_emotion(e).unwrap();
                engine.set_gaze(rng.gen_range(-0.5..1.5), rng.gen_range(-0.5..1.5)).unwrap();
            }
            if frame % 25 == 0 {
                engine.blink().unwrap();
            }
            engine.tick(0.016).unwrap();
            let d = mem.lock();
            for id in ids.eyes {
                assert!(d.widget(id).unwrap().rect.h >= 5);
            }
        }
    }

    #[test]
    fn test_tick_caps_long_steps() {
        let (engine, _mem) = engine();
        engine.tick(0.016).unwrap();
        engine.set_emotion(Emotion::Happy).unwrap();
        engine.tick(100.0).unwrap();
        let curve = engine.params().unwrap().mouth_curve;
        assert!(curve > 0.0 && curve < 0.7, "curve {curve}");
        engine.tick(f32::NAN).unwrap();
        assert!(engine.params().unwrap().mouth_curve.is_finite());
    }

    #[test]
    fn test_getters_time_out_while_state_is_held() {
        let (engine, _mem) = engine();
        let held = engine.inner.state.lock();
        let started = Instant::now();
        assert!(matches!(engine.emotion(), Err(FaceError::Busy)));
        assert!(matches!(engine.mode(), Err(FaceError::Busy)));
        assert!(engine.hit_test_eye(0, 0).is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(held);
        assert_eq!(engine.emotion().unwrap(), FaceConfig::default().initial_emotion);
    }

    #[test]
    fn test_render_thread_runs_and_stops() {
        let (engine, _mem) = engine();
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(FaceError::AlreadyRunning)));
        std::thread::sleep(Duration::from_millis(1200));
        assert!(engine.fps() > 10.0);
        engine.stop();
        assert!(!engine.is_running());
    }
}

//! What the screen shows when it is not the face.
//!
//! The content structs double as decoded command payloads; the runtime
//! variants carry the little bit of state the timer, clock and particle
//! screens advance every frame.

use std::fmt;

use chrono::{NaiveTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::display::{FontSize, Rgb};

#[derive(Debug, Clone, PartialEq)]
pub struct TextContent {
    pub text: String,
    pub size: FontSize,
    pub color: Rgb,
    pub bg: Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pixel {
    pub x: i32,
    pub y: i32,
    pub color: Rgb,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PixelArt {
    pub pixels: Vec<Pixel>,
    pub bg: Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherIcon {
    Sunny,
    PartlyCloudy,
    Cloudy,
    Rainy,
    Stormy,
    Snowy,
    Foggy,
}

impl WeatherIcon {
    /// Unrecognised icon names show clouds.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "sunny" | "clear" | "sun" => Self::Sunny,
            "partly_cloudy" | "partly-cloudy" | "partly" => Self::PartlyCloudy,
            "rainy" | "rain" | "drizzle" => Self::Rainy,
            "stormy" | "storm" | "thunder" => Self::Stormy,
            "snowy" | "snow" => Self::Snowy,
            "foggy" | "fog" | "mist" => Self::Foggy,
            _ => Self::Cloudy,
        }
    }

    /// 5x5 sprite, one string per row, `#` = primary, `o` = accent.
    pub fn sprite(self) -> [&'static str; 5] {
        match self {
            Self::Sunny => ["#.#.#", ".###.", "##o##", ".###.", "#.#.#"],
            Self::PartlyCloudy => ["..#..", ".#ooo", "#oooo", ".....", "....."],
            Self::Cloudy => [".....", ".ooo.", "ooooo", "ooooo", "....."],
            Self::Rainy => [".ooo.", "ooooo", ".....", "#.#.#", ".#.#."],
            Self::Stormy => [".ooo.", "ooooo", "..#..", ".#...", "..#.."],
            Self::Snowy => [".ooo.", "ooooo", ".....", "o.o.o", ".o.o."],
            Self::Foggy => ["ooooo", ".....", "ooooo", ".....", "ooooo"],
        }
    }

    pub fn colors(self) -> (Rgb, Rgb) {
        let sun = Rgb(0xFFC83C);
        let cloud = Rgb(0xC8C8D2);
        match self {
            Self::Sunny | Self::PartlyCloudy => (sun, cloud),
            Self::Rainy => (Rgb(0x3C8CFF), cloud),
            Self::Stormy => (Rgb(0xFFE650), Rgb(0x787882)),
            Self::Snowy => (Rgb::WHITE, Rgb::WHITE),
            Self::Cloudy | Self::Foggy => (cloud, cloud),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Weather {
    pub temp: String,
    pub icon: WeatherIcon,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimerSpec {
    pub minutes: u32,
    pub seconds: u32,
    pub label: String,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSpec {
    pub hours: u32,
    pub minutes: u32,
    pub is_24h: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationKind {
    Rain,
    Snow,
    Stars,
    Matrix,
}

impl AnimationKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "rain" => Some(Self::Rain),
            "snow" => Some(Self::Snow),
            "stars" => Some(Self::Stars),
            "matrix" => Some(Self::Matrix),
            _ => None,
        }
    }

    fn particle_count(self) -> usize {
        match self {
            Self::Rain => 18,
            Self::Snow => 14,
            Self::Stars => 12,
            Self::Matrix => 20,
        }
    }

    /// Cells per second.
    fn speed_range(self) -> (f32, f32) {
        match self {
            Self::Rain => (8.0, 14.0),
            Self::Snow => (1.5, 3.5),
            Self::Stars => (0.0, 0.0),
            Self::Matrix => (4.0, 10.0),
        }
    }

    pub fn background(self) -> Rgb {
        match self {
            Self::Rain => Rgb(0x0A1428),
            Self::Snow => Rgb(0x141E32),
            Self::Stars | Self::Matrix => Rgb::BLACK,
        }
    }

    fn color(self, rng: &mut StdRng) -> Rgb {
        match self {
            Self::Rain => Rgb(0x3C8CFF),
            Self::Snow => Rgb::WHITE,
            Self::Stars => {
                let v = rng.gen_range(120..=255u8);
                Rgb::from_rgb(v, v, v.saturating_sub(30))
            }
            Self::Matrix => Rgb::from_rgb(0, rng.gen_range(140..=255u8), 60),
        }
    }
}

impl fmt::Display for AnimationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rain => "rain",
            Self::Snow => "snow",
            Self::Stars => "stars",
            Self::Matrix => "matrix",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TimerState {
    pub remaining: f32,
    pub label: String,
    pub running: bool,
}

impl TimerState {
    pub fn new(spec: TimerSpec) -> Self {
        Self {
            remaining: (spec.minutes * 60 + spec.seconds) as f32,
            label: spec.label,
            running: spec.running,
        }
    }

    fn advance(&mut self, dt: f32) {
        if self.running {
            self.remaining = (self.remaining - dt).max(0.0);
            if self.remaining == 0.0 {
                self.running = false;
            }
        }
    }

    /// `MM:SS`, rounding partial seconds up so 0:00 only shows when done.
    pub fn display_text(&self) -> String {
        let total = self.remaining.ceil() as u32;
        format!("{:02}:{:02}", total / 60, total % 60)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClockState {
    time: NaiveTime,
    carry: f32,
    pub is_24h: bool,
}

impl ClockState {
    pub fn new(spec: ClockSpec) -> Self {
        let time = NaiveTime::from_hms_opt(spec.hours % 24, spec.minutes % 60, 0)
            .unwrap_or(NaiveTime::MIN);
        Self {
            time,
            carry: 0.0,
            is_24h: spec.is_24h,
        }
    }

    fn advance(&mut self, dt: f32) {
        self.carry += dt;
        let whole = self.carry.floor();
        if whole >= 1.0 {
            self.carry -= whole;
            self.time += chrono::Duration::seconds(whole as i64);
        }
    }

    pub fn display_text(&self) -> String {
        if self.is_24h {
            self.time.format("%H:%M").to_string()
        } else {
            let (_, h12) = self.time.hour12();
            format!("{}:{:02}", h12, self.time.minute())
        }
    }

    pub fn detail_text(&self) -> &'static str {
        match (self.is_24h, self.time.hour12().0) {
            (true, _) => "",
            (false, true) => "PM",
            (false, false) => "AM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub x: f32,
    pub y: f32,
    pub speed: f32,
    pub color: Rgb,
    /// Stars twinkle by toggling visibility.
    pub lit: bool,
}

impl Particle {
    pub fn cell(&self) -> (i32, i32) {
        (self.x.floor() as i32, self.y.floor() as i32)
    }
}

#[derive(Debug, Clone)]
pub struct AnimationState {
    pub kind: AnimationKind,
    pub particles: Vec<Particle>,
    cols: i32,
    rows: i32,
    rng: StdRng,
}

impl AnimationState {
    pub fn new(kind: AnimationKind, cols: i32, rows: i32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let particles = (0..kind.particle_count())
            .map(|_| spawn(kind, cols, rows, &mut rng, true))
            .collect();
        Self {
            kind,
            particles,
            cols,
            rows,
            rng,
        }
    }

    fn advance(&mut self, dt: f32) {
        for i in 0..self.particles.len() {
            let p = &mut self.particles[i];
            match self.kind {
                AnimationKind::Stars => {
                    if self.rng.gen_bool((dt as f64 * 0.8).min(1.0)) {
                        p.lit = !p.lit;
                    }
                }
                AnimationKind::Snow => {
                    p.y += p.speed * dt;
                    p.x += (p.y * 1.7).sin() * 0.6 * dt;
                }
                AnimationKind::Rain | AnimationKind::Matrix => p.y += p.speed * dt,
            }
            let out = p.y >= self.rows as f32 || p.x < 0.0 || p.x >= self.cols as f32;
            if out {
                self.particles[i] = spawn(self.kind, self.cols, self.rows, &mut self.rng, false);
            }
        }
    }
}

fn spawn(kind: AnimationKind, cols: i32, rows: i32, rng: &mut StdRng, anywhere: bool) -> Particle {
    let (lo, hi) = kind.speed_range();
    let y = if anywhere || kind == AnimationKind::Stars {
        rng.gen_range(0.0..rows as f32)
    } else {
        0.0
    };
    Particle {
        x: rng.gen_range(0..cols) as f32 + 0.5,
        y,
        speed: if hi > lo { rng.gen_range(lo..hi) } else { lo },
        color: kind.color(rng),
        lit: true,
    }
}

/// Which screen is showing. The renderer dispatches on this tag.
#[derive(Debug, Clone)]
pub enum DisplayMode {
    Face,
    Text(TextContent),
    PixelArt(PixelArt),
    Weather(Weather),
    Timer(TimerState),
    Clock(ClockState),
    Animation(AnimationState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Face,
    Text,
    PixelArt,
    Weather,
    Timer,
    Clock,
    Animation,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Face => "face",
            Self::Text => "text",
            Self::PixelArt => "pixel_art",
            Self::Weather => "weather",
            Self::Timer => "timer",
            Self::Clock => "clock",
            Self::Animation => "animation",
        };
        f.write_str(name)
    }
}

impl DisplayMode {
    pub fn kind(&self) -> ModeKind {
        match self {
            Self::Face => ModeKind::Face,
            Self::Text(_) => ModeKind::Text,
            Self::PixelArt(_) => ModeKind::PixelArt,
            Self::Weather(_) => ModeKind::Weather,
            Self::Timer(_) => ModeKind::Timer,
            Self::Clock(_) => ModeKind::Clock,
            Self::Animation(_) => ModeKind::Animation,
        }
    }

    /// Step the screens that change on their own.
    pub fn advance(&mut self, dt: f32) {
        match self {
            Self::Timer(t) => t.advance(dt),
            Self::Clock(c) => c.advance(dt),
            Self::Animation(a) => a.advance(dt),
            Self::Face | Self::Text(_) | Self::PixelArt(_) | Self::Weather(_) => {}
        }
    }
}

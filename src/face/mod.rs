//! Face animation engine and the alternate information screens.

pub mod animation;
pub mod display;
pub mod emotion;
pub mod engine;
pub mod layout;
pub mod modes;
pub mod scene;

pub use animation::{Eye, FaceTiming};
pub use display::{DisplayBackend, FontSize, MemoryDisplay, Rgb, SharedDisplay};
pub use emotion::Emotion;
pub use engine::{FaceConfig, FaceEngine, FaceError};
pub use layout::{FaceGeometry, MouthShape};
pub use modes::{
    AnimationKind, ClockSpec, ModeKind, Pixel, PixelArt, TextContent, TimerSpec, Weather,
    WeatherIcon,
};

//! Retained-mode display seam.
//!
//! The face engine never draws pixels. It creates a handful of widgets once
//! and afterwards only moves, resizes, recolors and hides them; the backend
//! (an LVGL-style library on a device, [`MemoryDisplay`] on the host) turns
//! that into bus traffic. Every call is made while holding the display lock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

pub type WidgetId = u32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    #[error("no widget with id {0}")]
    UnknownWidget(WidgetId),
    #[error("widget {id} is a {kind:?}, not usable for {op}")]
    WrongKind {
        id: WidgetId,
        kind: WidgetKind,
        op: &'static str,
    },
    #[error("display out of widget memory")]
    OutOfMemory,
    #[error("display lock not acquired within {0:?}")]
    LockTimeout(Duration),
}

impl DisplayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownWidget(_) | Self::WrongKind { .. } => ErrorKind::InvalidArgument,
            Self::OutOfMemory => ErrorKind::ResourceExhausted,
            Self::LockTimeout(_) => ErrorKind::TransientIo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    /// Filled rounded rectangle.
    Rect,
    /// Stroked arc inside its bounding box.
    Arc,
    /// Stroked straight line.
    Line,
    /// Text.
    Label,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }

    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && px < self.x + self.w && py >= self.y && py < self.y + self.h
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// 24-bit 0xRRGGBB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u32);

impl Rgb {
    pub const WHITE: Rgb = Rgb(0xFF_FF_FF);
    pub const BLACK: Rgb = Rgb(0x00_00_00);
    /// Default face background.
    pub const FACE_BG: Rgb = Rgb(0x1E_1E_28);

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Rgb(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    pub const fn r(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn g(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn b(self) -> u8 {
        self.0 as u8
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:06X}", self.0 & 0xFF_FF_FF)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontSize {
    Small,
    #[default]
    Medium,
    Large,
    #[serde(rename = "xlarge")]
    XLarge,
}

impl FontSize {
    /// Glyph height in pixels on the reference panel.
    pub fn px(self) -> i32 {
        match self {
            Self::Small => 34,
            Self::Medium => 54,
            Self::Large => 75,
            Self::XLarge => 109,
        }
    }

    /// Name lookup that falls back to medium.
    pub fn from_name(name: &str) -> Self {
        match name {
            "small" => Self::Small,
            "large" => Self::Large,
            "xlarge" => Self::XLarge,
            _ => Self::Medium,
        }
    }
}

/// Hardware-agnostic retained widget API.
pub trait DisplayBackend: Send {
    /// Panel size in pixels.
    fn size(&self) -> (i32, i32);

    fn create(&mut self, kind: WidgetKind) -> Result<WidgetId, DisplayError>;
    fn delete(&mut self, id: WidgetId) -> Result<(), DisplayError>;

    fn set_rect(&mut self, id: WidgetId, rect: Rect) -> Result<(), DisplayError>;
    fn set_radius(&mut self, id: WidgetId, radius: i32) -> Result<(), DisplayError>;
    fn set_color(&mut self, id: WidgetId, color: Rgb) -> Result<(), DisplayError>;
    fn set_hidden(&mut self, id: WidgetId, hidden: bool) -> Result<(), DisplayError>;

    /// Arc angles in degrees, clockwise from 3 o'clock.
    fn set_arc(
        &mut self,
        id: WidgetId,
        start_deg: u16,
        end_deg: u16,
        thickness: i32,
    ) -> Result<(), DisplayError>;

    fn set_line(
        &mut self,
        id: WidgetId,
        from: Point,
        to: Point,
        width: i32,
    ) -> Result<(), DisplayError>;

    fn set_text(&mut self, id: WidgetId, text: &str, font: FontSize) -> Result<(), DisplayError>;

    fn set_background(&mut self, color: Rgb) -> Result<(), DisplayError>;

    /// Mark one widget's area dirty.
    fn invalidate(&mut self, id: WidgetId) -> Result<(), DisplayError>;

    /// Mark the whole screen dirty.
    fn invalidate_all(&mut self) -> Result<(), DisplayError>;
}

/// The single display lock.
pub type SharedDisplay = Arc<Mutex<dyn DisplayBackend>>;

/// Take the display lock, giving up after `timeout`.
pub fn lock_display(
    display: &SharedDisplay,
    timeout: Duration,
) -> Result<MutexGuard<'_, dyn DisplayBackend>, DisplayError> {
    display
        .try_lock_for(timeout)
        .ok_or(DisplayError::LockTimeout(timeout))
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub kind: WidgetKind,
    pub rect: Rect,
    pub radius: i32,
    pub color: Rgb,
    pub hidden: bool,
    pub arc: (u16, u16, i32),
    pub line: (Point, Point, i32),
    pub text: String,
    pub font: FontSize,
}

/// Counts of what the engine asked the backend to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Property writes (geometry, color, visibility, text).
    pub writes: u64,
    pub invalidations: u64,
    pub full_invalidations: u64,
    pub created: u64,
    pub deleted: u64,
}

/// Retained scene kept in memory. Used on hosts without a panel and in
/// tests, where it doubles as an inspector for what would be on screen.
pub struct MemoryDisplay {
    width: i32,
    height: i32,
    widgets: Vec<Option<Widget>>,
    background: Rgb,
    stats: DrawStats,
    widget_limit: usize,
}

impl MemoryDisplay {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            widgets: Vec::new(),
            background: Rgb::BLACK,
            stats: DrawStats::default(),
            widget_limit: usize::MAX,
        }
    }

    /// Cap live widgets, to exercise out-of-memory paths.
    pub fn with_widget_limit(mut self, limit: usize) -> Self {
        self.widget_limit = limit;
        self
    }

    pub fn into_shared(self) -> SharedDisplay {
        Arc::new(Mutex::new(self))
    }

    pub fn widget(&self, id: WidgetId) -> Option<&Widget> {
        self.widgets.get(id as usize).and_then(Option::as_ref)
    }

    /// Live widgets of one kind, visible or not.
    pub fn widgets_of(&self, kind: WidgetKind) -> impl Iterator<Item = &Widget> {
        self.widgets
            .iter()
            .flatten()
            .filter(move |w| w.kind == kind)
    }

    pub fn live_count(&self) -> usize {
        self.widgets.iter().flatten().count()
    }

    pub fn background(&self) -> Rgb {
        self.background
    }

    pub fn stats(&self) -> DrawStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = DrawStats::default();
    }

    /// Coarse character-cell picture of the visible widgets.
    pub fn ascii_snapshot(&self, cols: usize, rows: usize) -> String {
        let mut grid = vec![vec![' '; cols]; rows];
        let (width, height) = (self.width.max(1) as i64, self.height.max(1) as i64);
        let (cols_i, rows_i) = (cols as i64, rows as i64);
        let span = |lo: i32, len: i32, cells: i64, extent: i64| -> (usize, usize) {
            let start = (lo as i64 * cells / extent).clamp(0, cells);
            let end = (((lo + len) as i64 * cells + extent - 1) / extent).clamp(0, cells);
            (start as usize, end as usize)
        };
        for w in self.widgets.iter().flatten().filter(|w| !w.hidden) {
            let glyph = match w.kind {
                WidgetKind::Rect => '#',
                WidgetKind::Arc => 'o',
                WidgetKind::Line => '-',
                WidgetKind::Label => 'T',
            };
            let rect = match w.kind {
                WidgetKind::Line => {
                    let (a, b, _) = w.line;
                    Rect::new(
                        a.x.min(b.x),
                        a.y.min(b.y),
                        (a.x - b.x).abs() + 1,
                        (a.y - b.y).abs() + 1,
                    )
                }
                _ => w.rect,
            };
            let (c0, c1) = span(rect.x, rect.w, cols_i, width);
            let (r0, r1) = span(rect.y, rect.h, rows_i, height);
            for row in grid.iter_mut().take(r1).skip(r0) {
                for cell in row.iter_mut().take(c1).skip(c0) {
                    *cell = glyph;
                }
            }
        }
        grid.into_iter()
            .map(|row| row.into_iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn get_mut(&mut self, id: WidgetId) -> Result<&mut Widget, DisplayError> {
        self.stats.writes += 1;
        self.widgets
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(DisplayError::UnknownWidget(id))
    }
}

impl DisplayBackend for MemoryDisplay {
    fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    fn create(&mut self, kind: WidgetKind) -> Result<WidgetId, DisplayError> {
        if self.live_count() >= self.widget_limit {
            return Err(DisplayError::OutOfMemory);
        }
        let widget = Widget {
            kind,
            rect: Rect::default(),
            radius: 0,
            color: Rgb::WHITE,
            hidden: false,
            arc: (0, 360, 1),
            line: (Point::default(), Point::default(), 1),
            text: String::new(),
            font: FontSize::Medium,
        };
        self.stats.created += 1;
        // Reuse a freed slot if there is one.
        if let Some(slot) = self.widgets.iter().position(Option::is_none) {
            self.widgets[slot] = Some(widget);
            return Ok(slot as WidgetId);
        }
        self.widgets.push(Some(widget));
        Ok((self.widgets.len() - 1) as WidgetId)
    }

    fn delete(&mut self, id: WidgetId) -> Result<(), DisplayError> {
        let slot = self
            .widgets
            .get_mut(id as usize)
            .ok_or(DisplayError::UnknownWidget(id))?;
        if slot.take().is_none() {
            return Err(DisplayError::UnknownWidget(id));
        }
        self.stats.deleted += 1;
        Ok(())
    }

    fn set_rect(&mut self, id: WidgetId, rect: Rect) -> Result<(), DisplayError> {
        self.get_mut(id)?.rect = rect;
        Ok(())
    }

    fn set_radius(&mut self, id: WidgetId, radius: i32) -> Result<(), DisplayError> {
        self.get_mut(id)?.radius = radius;
        Ok(())
    }

    fn set_color(&mut self, id: WidgetId, color: Rgb) -> Result<(), DisplayError> {
        self.get_mut(id)?.color = color;
        Ok(())
    }

    fn set_hidden(&mut self, id: WidgetId, hidden: bool) -> Result<(), DisplayError> {
        self.get_mut(id)?.hidden = hidden;
        Ok(())
    }

    fn set_arc(
        &mut self,
        id: WidgetId,
        start_deg: u16,
        end_deg: u16,
        thickness: i32,
    ) -> Result<(), DisplayError> {
        let w = self.get_mut(id)?;
        if w.kind != WidgetKind::Arc {
            return Err(DisplayError::WrongKind {
                id,
                kind: w.kind,
                op: "set_arc",
            });
        }
        w.arc = (start_deg, end_deg, thickness);
        Ok(())
    }

    fn set_line(
        &mut self,
        id: WidgetId,
        from: Point,
        to: Point,
        width: i32,
    ) -> Result<(), DisplayError> {
        let w = self.get_mut(id)?;
        if w.kind != WidgetKind::Line {
            return Err(DisplayError::WrongKind {
                id,
                kind: w.kind,
                op: "set_line",
            });
        }
        w.line = (from, to, width);
        Ok(())
    }

    fn set_text(&mut self, id: WidgetId, text: &str, font: FontSize) -> Result<(), DisplayError> {
        let w = self.get_mut(id)?;
        if w.kind != WidgetKind::Label {
            return Err(DisplayError::WrongKind {
                id,
                kind: w.kind,
                op: "set_text",
            });
        }
        w.text = text.to_string();
        w.font = font;
        Ok(())
    }

    fn set_background(&mut self, color: Rgb) -> Result<(), DisplayError> {
        self.stats.writes += 1;
        self.background = color;
        Ok(())
    }

    fn invalidate(&mut self, id: WidgetId) -> Result<(), DisplayError> {
        if self.widget(id).is_none() {
            return Err(DisplayError::UnknownWidget(id));
        }
        self.stats.invalidations += 1;
        Ok(())
    }

    fn invalidate_all(&mut self) -> Result<(), DisplayError> {
        self.stats.full_invalidations += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_display_widget_lifecycle() {
        let mut d = MemoryDisplay::new(100, 100);
        let a = d.create(WidgetKind::Rect).unwrap();
        let b = d.create(WidgetKind::Label).unwrap();
        d.set_rect(a, Rect::new(1, 2, 3, 4)).unwrap();
        d.set_text(b, "hi", FontSize::Large).unwrap();
        assert_eq!(d.widget(a).unwrap().rect, Rect::new(1, 2, 3, 4));
        assert_eq!(d.widget(b).unwrap().text, "hi");

        d.delete(a).unwrap();
        assert!(d.widget(a).is_none());
        assert_eq!(d.set_hidden(a, true), Err(DisplayError::UnknownWidget(a)));
        // Freed slot is reused.
        assert_eq!(d.create(WidgetKind::Rect).unwrap(), a);
        assert_eq!(d.stats().created, 3);
        assert_eq!(d.stats().deleted, 1);
    }

    #[test]
    fn test_memory_display_kind_checks() {
        let mut d = MemoryDisplay::new(10, 10);
        let r = d.create(WidgetKind::Rect).unwrap();
        let err = d.set_arc(r, 0, 180, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_memory_display_widget_limit() {
        let mut d = MemoryDisplay::new(10, 10).with_widget_limit(1);
        d.create(WidgetKind::Rect).unwrap();
        assert_eq!(d.create(WidgetKind::Rect), Err(DisplayError::OutOfMemory));
    }

    #[test]
    fn test_lock_display_times_out() {
        let shared = MemoryDisplay::new(10, 10).into_shared();
        let _held = shared.lock();
        let err = lock_display(&shared, Duration::from_millis(5)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::TransientIo);
    }

    #[test]
    fn test_ascii_snapshot_draws_visible_only() {
        let mut d = MemoryDisplay::new(100, 100);
        let a = d.create(WidgetKind::Rect).unwrap();
        d.set_rect(a, Rect::new(0, 0, 50, 50)).unwrap();
        let b = d.create(WidgetKind::Rect).unwrap();
        d.set_rect(b, Rect::new(50, 50, 50, 50)).unwrap();
        d.set_hidden(b, true).unwrap();
        let snap = d.ascii_snapshot(4, 4);
        let rows: Vec<&str> = snap.lines().collect();
        assert_eq!(rows[0], "##  ");
        assert_eq!(rows[3], "    ");
    }

    #[test]
    fn test_rgb_components_and_display() {
        let c = Rgb::from_rgb(0x12, 0x34, 0x56);
        assert_eq!(c, Rgb(0x123456));
        assert_eq!((c.r(), c.g(), c.b()), (0x12, 0x34, 0x56));
        assert_eq!(c.to_string(), "#123456");
    }

    #[test]
    fn test_font_size_fallback() {
        assert_eq!(FontSize::from_name("xlarge"), FontSize::XLarge);
        assert_eq!(FontSize::from_name("huge"), FontSize::Medium);
    }
}

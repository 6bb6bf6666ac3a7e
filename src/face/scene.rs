//! Retained widget set and the change-gated writes that keep it in sync.
//!
//! Every widget remembers the last values written to it. A write only reaches
//! the backend when a value actually changed (or, for geometry, moved by more
//! than the gate). Poisoning a slot replaces the remembered values with
//! sentinels so the next frame rewrites everything.

use tracing::{debug, warn};

use super::display::{DisplayBackend, DisplayError, FontSize, Point, Rect, Rgb, WidgetId, WidgetKind};
use super::layout::{FaceGeometry, FaceLayout, MouthShape};
use super::modes::DisplayMode;

/// Out-of-range coordinate no real layout produces.
const SENTINEL: i32 = i32::MIN / 4;

const FACE_FG: Rgb = Rgb::WHITE;

#[derive(Debug, Clone)]
struct Slot {
    id: WidgetId,
    rect: Rect,
    radius: i32,
    color: Option<Rgb>,
    hidden: Option<bool>,
    line: Option<(Point, Point)>,
    text: Option<(String, FontSize)>,
}

fn moved(a: i32, b: i32, gate: i32) -> bool {
    (a as i64 - b as i64).abs() > gate as i64
}

impl Slot {
    fn new(id: WidgetId) -> Self {
        let mut slot = Self {
            id,
            rect: Rect::default(),
            radius: 0,
            color: None,
            hidden: None,
            line: None,
            text: None,
        };
        slot.poison();
        slot
    }

    fn poison(&mut self) {
        self.rect = Rect::new(SENTINEL, SENTINEL, SENTINEL, SENTINEL);
        self.radius = SENTINEL;
        self.color = None;
        self.hidden = None;
        self.line = None;
        self.text = None;
    }

    fn show(&mut self, d: &mut dyn DisplayBackend, visible: bool) -> Result<(), DisplayError> {
        if self.hidden != Some(!visible) {
            d.set_hidden(self.id, !visible)?;
            self.hidden = Some(!visible);
        }
        Ok(())
    }

    fn place(&mut self, d: &mut dyn DisplayBackend, rect: Rect, gate: i32) -> Result<bool, DisplayError> {
        let r = self.rect;
        if moved(r.x, rect.x, gate) || moved(r.y, rect.y, gate) || moved(r.w, rect.w, gate) || moved(r.h, rect.h, gate) {
            d.set_rect(self.id, rect)?;
            self.rect = rect;
            return Ok(true);
        }
        Ok(false)
    }

    fn set_radius(&mut self, d: &mut dyn DisplayBackend, radius: i32) -> Result<(), DisplayError> {
        if self.radius != radius {
            d.set_radius(self.id, radius)?;
            self.radius = radius;
        }
        Ok(())
    }

    fn set_color(&mut self, d: &mut dyn DisplayBackend, color: Rgb) -> Result<(), DisplayError> {
        if self.color != Some(color) {
            d.set_color(self.id, color)?;
            self.color = Some(color);
        }
        Ok(())
    }

    fn set_line(
        &mut self,
        d: &mut dyn DisplayBackend,
        (from, to): (Point, Point),
        width: i32,
        gate: i32,
    ) -> Result<(), DisplayError> {
        let stale = match self.line {
            None => true,
            Some((a, b)) => {
                moved(a.x, from.x, gate) || moved(a.y, from.y, gate) || moved(b.x, to.x, gate) || moved(b.y, to.y, gate)
            }
        };
        if stale {
            d.set_line(self.id, from, to, width)?;
            self.line = Some((from, to));
        }
        Ok(())
    }

    fn set_text(&mut self, d: &mut dyn DisplayBackend, text: &str, font: FontSize) -> Result<(), DisplayError> {
        let same = matches!(&self.text, Some((t, f)) if t == text && *f == font);
        if !same {
            d.set_text(self.id, text, font)?;
            self.text = Some((text.to_string(), font));
        }
        Ok(())
    }
}

/// Widget ids currently owned by the scene, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneWidgets {
    pub eyes: [WidgetId; 2],
    pub mouth_arc: WidgetId,
    pub mouth_bar: WidgetId,
    pub brows: [WidgetId; 2],
    pub sparkles: [WidgetId; 2],
    pub title: WidgetId,
    pub detail: WidgetId,
    pub cells: Vec<WidgetId>,
}

pub struct Scene {
    eyes: [Slot; 2],
    mouth_arc: Slot,
    /// Straight mouth, drawn as a thin rectangle.
    mouth_bar: Slot,
    brows: [Slot; 2],
    sparkles: [Slot; 2],
    title: Slot,
    detail: Slot,
    cells: Vec<Slot>,
    mouth: Option<MouthShape>,
    brows_on: Option<bool>,
    sparkles_on: Option<bool>,
    background: Option<Rgb>,
    gate: i32,
}

impl Scene {
    /// Create the fixed widget set, all hidden. Nothing is left behind on
    /// failure.
    pub fn build(d: &mut dyn DisplayBackend, gate: i32) -> Result<Self, DisplayError> {
        let mut created = Vec::new();
        let result = Self::create_all(d, &mut created, gate);
        if result.is_err() {
            for id in created {
                let _ = d.delete(id);
            }
        }
        result
    }

    fn create_all(d: &mut dyn DisplayBackend, created: &mut Vec<WidgetId>, gate: i32) -> Result<Self, DisplayError> {
        let mut make = |kind: WidgetKind| -> Result<Slot, DisplayError> {
            let id = d.create(kind)?;
            created.push(id);
            let mut slot = Slot::new(id);
            slot.show(d, false)?;
            Ok(slot)
        };
        Ok(Self {
            eyes: [make(WidgetKind::Rect)?, make(WidgetKind::Rect)?],
            mouth_arc: make(WidgetKind::Arc)?,
            mouth_bar: make(WidgetKind::Rect)?,
            brows: [make(WidgetKind::Line)?, make(WidgetKind::Line)?],
            sparkles: [make(WidgetKind::Rect)?, make(WidgetKind::Rect)?],
            title: make(WidgetKind::Label)?,
            detail: make(WidgetKind::Label)?,
            cells: Vec::new(),
            mouth: None,
            brows_on: None,
            sparkles_on: None,
            background: None,
            gate,
        })
    }

    pub fn widgets(&self) -> SceneWidgets {
        SceneWidgets {
            eyes: [self.eyes[0].id, self.eyes[1].id],
            mouth_arc: self.mouth_arc.id,
            mouth_bar: self.mouth_bar.id,
            brows: [self.brows[0].id, self.brows[1].id],
            sparkles: [self.sparkles[0].id, self.sparkles[1].id],
            title: self.title.id,
            detail: self.detail.id,
            cells: self.cells.iter().map(|c| c.id).collect(),
        }
    }

    pub fn mouth_shape(&self) -> Option<MouthShape> {
        self.mouth
    }

    /// Last eye rectangles written to the display.
    pub fn eye_rects(&self) -> [Rect; 2] {
        [self.eyes[0].rect, self.eyes[1].rect]
    }

    fn set_background(&mut self, d: &mut dyn DisplayBackend, color: Rgb) -> Result<(), DisplayError> {
        if self.background != Some(color) {
            d.set_background(color)?;
            self.background = Some(color);
        }
        Ok(())
    }

    fn face_slots(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.eyes
            .iter_mut()
            .chain([&mut self.mouth_arc, &mut self.mouth_bar])
            .chain(self.brows.iter_mut())
            .chain(self.sparkles.iter_mut())
    }

    fn hide_face(&mut self, d: &mut dyn DisplayBackend) -> Result<(), DisplayError> {
        for slot in self.face_slots() {
            slot.show(d, false)?;
        }
        self.mouth = None;
        self.brows_on = None;
        self.sparkles_on = None;
        Ok(())
    }

    fn hide_labels(&mut self, d: &mut dyn DisplayBackend) -> Result<(), DisplayError> {
        self.title.show(d, false)?;
        self.detail.show(d, false)
    }

    fn clear_cells(&mut self, d: &mut dyn DisplayBackend) {
        for cell in self.cells.drain(..) {
            if let Err(e) = d.delete(cell.id) {
                warn!(id = cell.id, error = %e, "Failed to delete cell");
            }
        }
    }

    /// Create one filled cell per grid position. On failure every cell made
    /// so far is destroyed again.
    fn create_cells(
        &mut self,
        d: &mut dyn DisplayBackend,
        geom: &FaceGeometry,
        cells: impl IntoIterator<Item = (i32, i32, Rgb)>,
    ) -> Result<usize, DisplayError> {
        for (x, y, color) in cells {
            if !geom.in_pixel_grid(x, y) {
                continue;
            }
            if let Err(e) = self.add_cell(d, geom.pixel_rect(x, y), color) {
                self.clear_cells(d);
                return Err(e);
            }
        }
        Ok(self.cells.len())
    }

    fn add_cell(&mut self, d: &mut dyn DisplayBackend, rect: Rect, color: Rgb) -> Result<(), DisplayError> {
        let id = d.create(WidgetKind::Rect)?;
        self.cells.push(Slot::new(id));
        let n = self.cells.len() - 1;
        let slot = &mut self.cells[n];
        slot.place(d, rect, 0)?;
        slot.set_radius(d, 0)?;
        slot.set_color(d, color)?;
        slot.show(d, true)
    }

    fn place_label(
        slot: &mut Slot,
        d: &mut dyn DisplayBackend,
        geom: &FaceGeometry,
        text: &str,
        font: FontSize,
        color: Rgb,
        center_y: i32,
    ) -> Result<(), DisplayError> {
        let h = font.px() + 20;
        slot.set_text(d, text, font)?;
        slot.set_color(d, color)?;
        slot.place(d, Rect::new(20, center_y - h / 2, geom.width - 40, h), 0)?;
        slot.show(d, true)
    }

    /// Tear down whatever the previous mode showed and set up `mode`.
    pub fn enter(&mut self, d: &mut dyn DisplayBackend, mode: &DisplayMode, geom: &FaceGeometry) -> Result<(), DisplayError> {
        self.clear_cells(d);
        if !matches!(mode, DisplayMode::Face) {
            self.hide_face(d)?;
        }
        let mid = geom.height / 2;
        let (cell, _, oy) = geom.pixel_grid();
        match mode {
            DisplayMode::Face => {
                self.hide_labels(d)?;
                for slot in self.face_slots() {
                    slot.poison();
                }
                self.mouth = None;
                self.brows_on = None;
                self.sparkles_on = None;
                self.set_background(d, Rgb::FACE_BG)?;
            }
            DisplayMode::Text(content) => {
                self.set_background(d, content.bg)?;
                Self::place_label(&mut self.title, d, geom, &content.text, content.size, content.color, mid)?;
                self.detail.show(d, false)?;
            }
            DisplayMode::PixelArt(art) => {
                self.hide_labels(d)?;
                self.set_background(d, art.bg)?;
                let drawn = self.create_cells(d, geom, art.pixels.iter().map(|p| (p.x, p.y, p.color)))?;
                debug!(drawn, requested = art.pixels.len(), "Pixel art drawn");
            }
            DisplayMode::Weather(weather) => {
                self.set_background(d, Rgb::FACE_BG)?;
                let (primary, accent) = weather.icon.colors();
                let left = (geom.pixel_cols - 5) / 2;
                let sprite = weather.icon.sprite();
                let cells = sprite.iter().enumerate().flat_map(|(row, line)| {
                    line.bytes().enumerate().filter_map(move |(col, b)| {
                        let color = match b {
                            b'#' => primary,
                            b'o' => accent,
                            _ => return None,
                        };
                        Some((left + col as i32, 2 + row as i32, color))
                    })
                });
                self.create_cells(d, geom, cells)?;
                let temp_y = oy + cell * 9;
                Self::place_label(&mut self.title, d, geom, &weather.temp, FontSize::Large, Rgb::WHITE, temp_y)?;
                Self::place_label(&mut self.detail, d, geom, &weather.description, FontSize::Small, Rgb(0xC8C8D2), temp_y + cell * 3)?;
            }
            DisplayMode::Timer(timer) => {
                self.set_background(d, Rgb::FACE_BG)?;
                Self::place_label(&mut self.title, d, geom, &timer.display_text(), FontSize::XLarge, Rgb::WHITE, mid)?;
                Self::place_label(&mut self.detail, d, geom, &timer.label, FontSize::Small, Rgb(0xC8C8D2), mid + 110)?;
            }
            DisplayMode::Clock(clock) => {
                self.set_background(d, Rgb::FACE_BG)?;
                Self::place_label(&mut self.title, d, geom, &clock.display_text(), FontSize::XLarge, Rgb::WHITE, mid)?;
                Self::place_label(&mut self.detail, d, geom, clock.detail_text(), FontSize::Small, Rgb(0xC8C8D2), mid + 110)?;
            }
            DisplayMode::Animation(anim) => {
                self.hide_labels(d)?;
                self.set_background(d, anim.kind.background())?;
                let cells = anim.particles.iter().map(|p| {
                    let (x, y) = p.cell();
                    (x, y, p.color)
                });
                self.create_cells(d, geom, cells)?;
            }
        }
        d.invalidate_all()
    }

    /// Per-frame update for the screens that change on their own.
    pub fn refresh(&mut self, d: &mut dyn DisplayBackend, mode: &DisplayMode, geom: &FaceGeometry) -> Result<(), DisplayError> {
        match mode {
            DisplayMode::Timer(timer) => self.title.set_text(d, &timer.display_text(), FontSize::XLarge),
            DisplayMode::Clock(clock) => {
                self.title.set_text(d, &clock.display_text(), FontSize::XLarge)?;
                self.detail.set_text(d, clock.detail_text(), FontSize::Small)
            }
            DisplayMode::Animation(anim) => {
                for (slot, p) in self.cells.iter_mut().zip(&anim.particles) {
                    let (x, y) = p.cell();
                    slot.place(d, geom.pixel_rect(x, y), 0)?;
                    slot.set_color(d, p.color)?;
                    slot.show(d, p.lit)?;
                }
                Ok(())
            }
            DisplayMode::Face | DisplayMode::Text(_) | DisplayMode::PixelArt(_) | DisplayMode::Weather(_) => Ok(()),
        }
    }

    /// Bring the face widgets in line with `layout`.
    pub fn render_face(&mut self, d: &mut dyn DisplayBackend, layout: &FaceLayout) -> Result<(), DisplayError> {
        let gate = self.gate;
        for (i, eye) in self.eyes.iter_mut().enumerate() {
            eye.place(d, layout.eyes[i], gate)?;
            eye.set_radius(d, layout.eye_radius[i])?;
            eye.set_color(d, FACE_FG)?;
            eye.show(d, true)?;
        }

        let mouth = &layout.mouth;
        if self.mouth != Some(mouth.shape) {
            match self.mouth {
                Some(old) if old.uses_arc() => d.invalidate(self.mouth_arc.id)?,
                Some(MouthShape::Straight) => d.invalidate(self.mouth_bar.id)?,
                _ => {}
            }
            self.mouth_arc.show(d, false)?;
            self.mouth_bar.show(d, false)?;
            if let Some((start, end)) = mouth.shape.arc_angles() {
                d.set_arc(self.mouth_arc.id, start, end, mouth.thickness)?;
                self.mouth_arc.set_color(d, FACE_FG)?;
                self.mouth_arc.show(d, true)?;
            } else if mouth.shape == MouthShape::Straight {
                self.mouth_bar.set_color(d, FACE_FG)?;
                self.mouth_bar.show(d, true)?;
            }
            debug!(from = ?self.mouth, to = ?mouth.shape, "Mouth shape changed");
            self.mouth = Some(mouth.shape);
        }
        match mouth.shape {
            MouthShape::Hidden => {}
            MouthShape::Straight => {
                self.mouth_bar.place(d, mouth.rect, gate)?;
                self.mouth_bar.set_radius(d, mouth.rect.h / 2)?;
            }
            _ => {
                self.mouth_arc.place(d, mouth.rect, gate)?;
            }
        }

        let brows_on = layout.brows.is_some();
        if self.brows_on != Some(brows_on) {
            for brow in &mut self.brows {
                brow.set_color(d, FACE_FG)?;
                brow.show(d, brows_on)?;
            }
            self.brows_on = Some(brows_on);
        }
        if let Some(lines) = layout.brows {
            for (brow, line) in self.brows.iter_mut().zip(lines) {
                brow.set_line(d, line, layout.brow_width, gate)?;
            }
        }

        let sparkles_on = layout.sparkles.is_some();
        if self.sparkles_on != Some(sparkles_on) {
            for sparkle in &mut self.sparkles {
                sparkle.set_color(d, Rgb::FACE_BG)?;
                sparkle.show(d, sparkles_on)?;
            }
            self.sparkles_on = Some(sparkles_on);
        }
        if let Some(rects) = layout.sparkles {
            for (sparkle, rect) in self.sparkles.iter_mut().zip(rects) {
                sparkle.place(d, rect, gate)?;
                sparkle.set_radius(d, rect.w / 2)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::display::MemoryDisplay;
    use crate::face::emotion::Emotion;
    use crate::face::layout::{compute_layout, FacePose};
    use crate::face::modes::{Pixel, PixelArt, TextContent};

    fn layout(emotion: Emotion, gaze_x: f32) -> FaceLayout {
        compute_layout(
            &FaceGeometry::default(),
            &FacePose {
                params: emotion.params(),
                gaze: (gaze_x, 0.5),
                offset: (0.0, 0.0),
                closure: [0.0, 0.0],
            },
        )
    }

    fn setup() -> (MemoryDisplay, Scene) {
        let mut d = MemoryDisplay::new(502, 410);
        let mut scene = Scene::build(&mut d, 2).unwrap();
        scene.enter(&mut d, &DisplayMode::Face, &FaceGeometry::default()).unwrap();
        (d, scene)
    }

    #[test]
    fn test_small_moves_are_gated() {
        let (mut d, mut scene) = setup();
        scene.render_face(&mut d, &layout(Emotion::Neutral, 0.5)).unwrap();
        d.reset_stats();
        scene.render_face(&mut d, &layout(Emotion::Neutral, 0.5)).unwrap();
        assert_eq!(d.stats().writes, 0);
        // Under one pixel of gaze travel.
        scene.render_face(&mut d, &layout(Emotion::Neutral, 0.51)).unwrap();
        assert_eq!(d.stats().writes, 0);
        scene.render_face(&mut d, &layout(Emotion::Neutral, 0.6)).unwrap();
        assert!(d.stats().writes >= 2);
    }

    #[test]
    fn test_mouth_swap_only_on_bucket_change() {
        let (mut d, mut scene) = setup();
        let ids = scene.widgets();
        scene.render_face(&mut d, &layout(Emotion::Neutral, 0.5)).unwrap();
        assert!(!d.widget(ids.mouth_bar).unwrap().hidden);
        assert!(d.widget(ids.mouth_arc).unwrap().hidden);

        scene.render_face(&mut d, &layout(Emotion::Happy, 0.5)).unwrap();
        assert_eq!(scene.mouth_shape(), Some(MouthShape::Smile));
        let arc = d.widget(ids.mouth_arc).unwrap();
        assert!(!arc.hidden);
        assert_eq!((arc.arc.0, arc.arc.1), (0, 180));
        assert!(d.widget(ids.mouth_bar).unwrap().hidden);

        d.reset_stats();
        scene.render_face(&mut d, &layout(Emotion::Happy, 0.5)).unwrap();
        assert_eq!(d.stats().invalidations, 0);

        scene.render_face(&mut d, &layout(Emotion::EyesOnly, 0.5)).unwrap();
        assert!(d.widget(ids.mouth_arc).unwrap().hidden);
        assert!(d.widget(ids.mouth_bar).unwrap().hidden);
    }

    #[test]
    fn test_text_mode_hides_face_and_reentry_rewrites() {
        let (mut d, mut scene) = setup();
        let geom = FaceGeometry::default();
        let ids = scene.widgets();
        scene.render_face(&mut d, &layout(Emotion::Angry, 0.5)).unwrap();
        assert!(!d.widget(ids.brows[0]).unwrap().hidden);

        let text = DisplayMode::Text(TextContent {
            text: "hi".into(),
            size: FontSize::Large,
            color: Rgb::WHITE,
            bg: Rgb::BLACK,
        });
        scene.enter(&mut d, &text, &geom).unwrap();
        assert!(d.widget(ids.eyes[0]).unwrap().hidden);
        assert!(d.widget(ids.brows[0]).unwrap().hidden);
        assert_eq!(d.widget(ids.title).unwrap().text, "hi");
        assert!(!d.widget(ids.title).unwrap().hidden);
        assert_eq!(d.background(), Rgb::BLACK);

        scene.enter(&mut d, &DisplayMode::Face, &geom).unwrap();
        d.reset_stats();
        scene.render_face(&mut d, &layout(Emotion::Angry, 0.5)).unwrap();
        assert!(!d.widget(ids.eyes[0]).unwrap().hidden);
        assert!(!d.widget(ids.brows[0]).unwrap().hidden);
        assert!(d.widget(ids.title).unwrap().hidden);
        // Gates were poisoned, so unchanged geometry is written again.
        assert!(d.stats().writes >= 8);
    }

    #[test]
    fn test_pixel_art_replaces_previous_cells() {
        let (mut d, mut scene) = setup();
        let geom = FaceGeometry::default();
        let art = |n: i32| {
            DisplayMode::PixelArt(PixelArt {
                pixels: (0..n).map(|x| Pixel { x, y: 0, color: Rgb(0xFF0000) }).collect(),
                bg: Rgb::BLACK,
            })
        };
        let base = d.live_count();
        scene.enter(&mut d, &art(5), &geom).unwrap();
        assert_eq!(d.live_count(), base + 5);
        scene.enter(&mut d, &art(3), &geom).unwrap();
        assert_eq!(d.live_count(), base + 3);
        scene.enter(&mut d, &DisplayMode::Face, &geom).unwrap();
        assert_eq!(d.live_count(), base);
    }

    #[test]
    fn test_cell_allocation_failure_cleans_up() {
        let mut d = MemoryDisplay::new(502, 410).with_widget_limit(12);
        let geom = FaceGeometry::default();
        let mut scene = Scene::build(&mut d, 2).unwrap();
        let base = d.live_count();
        let art = DisplayMode::PixelArt(PixelArt {
            pixels: (0..10).map(|x| Pixel { x, y: 1, color: Rgb::WHITE }).collect(),
            bg: Rgb::BLACK,
        });
        let err = scene.enter(&mut d, &art, &geom).unwrap_err();
        assert_eq!(err, DisplayError::OutOfMemory);
        assert_eq!(d.live_count(), base);
        assert!(scene.widgets().cells.is_empty());
    }

    #[test]
    fn test_build_failure_leaves_nothing() {
        let mut d = MemoryDisplay::new(502, 410).with_widget_limit(4);
        assert!(Scene::build(&mut d, 2).is_err());
        assert_eq!(d.live_count(), 0);
    }
}

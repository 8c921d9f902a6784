//! Pan, zoom and element-drag state of the P&ID view.
//!
//! Pointer handling is an explicit state machine: a press enters
//! [`Interaction::Panning`] or [`Interaction::Dragging`], and the release
//! returns to [`Interaction::Idle`]. A press that never moves further than
//! [`DRAG_THRESHOLD`] is reported as a click, so a jittery click selects
//! instead of nudging the view.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, Div, Mul, Sub};

pub const MIN_ZOOM: f64 = 0.5;
pub const MAX_ZOOM: f64 = 5.0;
/// Zoom factor per wheel notch
pub const ZOOM_STEP: f64 = 1.1;
/// Screen pixels a press may travel and still count as a click
pub const DRAG_THRESHOLD: f64 = 4.0;
pub const NUDGE_STEP: f64 = 1.0;
pub const NUDGE_STEP_LARGE: f64 = 10.0;

pub type ElementId = String;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Vec2 {
    type Output = Vec2;
    fn div(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x / rhs, self.y / rhs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Idle,
    Panning {
        origin: Vec2,
        pan_at_press: Vec2,
        /// Element under the pointer at press time, for click selection
        target: Option<ElementId>,
        moved: bool,
    },
    Dragging {
        id: ElementId,
        origin: Vec2,
        offset_at_press: Vec2,
        moved: bool,
    },
}

/// What a pointer release amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum PointerOutcome {
    /// A click; carries the selection after it
    Selected(Option<ElementId>),
    Panned,
    Moved(ElementId),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Delete,
    Backspace,
    Escape,
}

#[derive(Debug, Clone)]
pub struct DiagramEditor {
    zoom: f64,
    pan: Vec2,
    selected: Option<ElementId>,
    edit_mode: bool,
    offsets: BTreeMap<ElementId, Vec2>,
    interaction: Interaction,
}

impl Default for DiagramEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagramEditor {
    pub fn new() -> Self {
        Self {
            zoom: 1.0,
            pan: Vec2::ZERO,
            selected: None,
            edit_mode: false,
            offsets: BTreeMap::new(),
            interaction: Interaction::Idle,
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn pan(&self) -> Vec2 {
        self.pan
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn edit_mode(&self) -> bool {
        self.edit_mode
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn offsets(&self) -> &BTreeMap<ElementId, Vec2> {
        &self.offsets
    }

    pub fn offset(&self, id: &str) -> Vec2 {
        self.offsets.get(id).copied().unwrap_or_default()
    }

    /// Switching modes abandons any interaction in flight
    pub fn set_edit_mode(&mut self, on: bool) {
        self.cancel_interaction();
        self.edit_mode = on;
    }

    pub fn select(&mut self, id: Option<&str>) {
        self.selected = id.map(str::to_string);
    }

    /// Press at screen position `pos` over `target` (None for background)
    pub fn pointer_down(&mut self, pos: Vec2, target: Option<&str>) {
        self.interaction = match (self.edit_mode, target) {
            (true, Some(id)) => {
                self.selected = Some(id.to_string());
                Interaction::Dragging {
                    id: id.to_string(),
                    origin: pos,
                    offset_at_press: self.offset(id),
                    moved: false,
                }
            }
            _ => Interaction::Panning {
                origin: pos,
                pan_at_press: self.pan,
                target: target.map(str::to_string),
                moved: false,
            },
        };
    }

    /// Returns true when the view or an element moved
    pub fn pointer_move(&mut self, pos: Vec2) -> bool {
        let zoom = self.zoom;
        match &mut self.interaction {
            Interaction::Idle => false,
            Interaction::Panning {
                origin,
                pan_at_press,
                moved,
                ..
            } => {
                let delta = pos - *origin;
                if !*moved && delta.length() < DRAG_THRESHOLD {
                    return false;
                }
                *moved = true;
                self.pan = *pan_at_press + delta;
                true
            }
            Interaction::Dragging {
                id,
                origin,
                offset_at_press,
                moved,
            } => {
                let delta = pos - *origin;
                if !*moved && delta.length() < DRAG_THRESHOLD {
                    return false;
                }
                *moved = true;
                // screen delta to diagram units
                self.offsets
                    .insert(id.clone(), *offset_at_press + delta / zoom);
                true
            }
        }
    }

    pub fn pointer_up(&mut self, pos: Vec2) -> PointerOutcome {
        self.pointer_move(pos);
        match std::mem::replace(&mut self.interaction, Interaction::Idle) {
            Interaction::Idle => PointerOutcome::None,
            Interaction::Panning { moved: true, .. } => PointerOutcome::Panned,
            Interaction::Panning { target, .. } => {
                self.click(target);
                PointerOutcome::Selected(self.selected.clone())
            }
            Interaction::Dragging { id, moved: true, .. } => PointerOutcome::Moved(id),
            Interaction::Dragging { id, .. } => PointerOutcome::Selected(Some(id)),
        }
    }

    /// Abort the current interaction and restore the state at press time
    pub fn cancel_interaction(&mut self) {
        match std::mem::replace(&mut self.interaction, Interaction::Idle) {
            Interaction::Panning { pan_at_press, .. } => self.pan = pan_at_press,
            Interaction::Dragging {
                id,
                offset_at_press,
                ..
            } => self.set_offset(&id, offset_at_press),
            Interaction::Idle => {}
        }
    }

    // Clicking the open element again closes its panel; background clears.
    fn click(&mut self, target: Option<ElementId>) {
        self.selected = match target {
            Some(id) if !self.edit_mode && self.selected.as_deref() == Some(id.as_str()) => None,
            other => other,
        };
    }

    /// Wheel zoom anchored at the pointer; negative `delta_y` zooms in
    pub fn wheel(&mut self, delta_y: f64, pointer: Vec2) {
        if delta_y == 0.0 || !delta_y.is_finite() {
            return;
        }
        let factor = if delta_y < 0.0 {
            ZOOM_STEP
        } else {
            1.0 / ZOOM_STEP
        };
        self.zoom_at(pointer, self.zoom * factor);
    }

    pub fn zoom_in(&mut self, center: Vec2) {
        self.zoom_at(center, self.zoom * ZOOM_STEP);
    }

    pub fn zoom_out(&mut self, center: Vec2) {
        self.zoom_at(center, self.zoom / ZOOM_STEP);
    }

    /// Set the zoom keeping the diagram point under `anchor` in place
    pub fn zoom_at(&mut self, anchor: Vec2, zoom: f64) {
        let zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        if zoom == self.zoom {
            return;
        }
        let diagram_point = (anchor - self.pan) / self.zoom;
        self.pan = anchor - diagram_point * zoom;
        self.zoom = zoom;
    }

    pub fn reset_view(&mut self) {
        self.zoom = 1.0;
        self.pan = Vec2::ZERO;
    }

    /// Screen position of a diagram point
    pub fn to_screen(&self, diagram: Vec2) -> Vec2 {
        self.pan + diagram * self.zoom
    }

    /// Returns true when the key changed something
    pub fn handle_key(&mut self, key: Key, shift: bool) -> bool {
        if key == Key::Escape {
            return self.selected.take().is_some();
        }
        if !self.edit_mode {
            return false;
        }
        let Some(id) = self.selected.clone() else {
            return false;
        };
        let step = if shift { NUDGE_STEP_LARGE } else { NUDGE_STEP };
        match key {
            Key::ArrowUp => self.nudge(&id, Vec2::new(0.0, -step)),
            Key::ArrowDown => self.nudge(&id, Vec2::new(0.0, step)),
            Key::ArrowLeft => self.nudge(&id, Vec2::new(-step, 0.0)),
            Key::ArrowRight => self.nudge(&id, Vec2::new(step, 0.0)),
            Key::Delete | Key::Backspace => return self.reset_offset(&id),
            Key::Escape => return false,
        }
        true
    }

    pub fn nudge(&mut self, id: &str, delta: Vec2) {
        let next = self.offset(id) + delta;
        self.set_offset(id, next);
    }

    /// Move the element back to its drawn position
    pub fn reset_offset(&mut self, id: &str) -> bool {
        self.offsets.remove(id).is_some()
    }

    fn set_offset(&mut self, id: &str, offset: Vec2) {
        if offset.is_zero() {
            self.offsets.remove(id);
        } else {
            self.offsets.insert(id.to_string(), offset);
        }
    }

    /// Non-zero offsets as pretty JSON, keyed by element id
    pub fn export_offsets(&self) -> Result<String> {
        let visible: BTreeMap<&str, Vec2> = self
            .offsets
            .iter()
            .filter(|(_, v)| !v.is_zero())
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        Ok(serde_json::to_string_pretty(&visible)?)
    }

    /// Replace all offsets with those in `text`; returns how many were loaded
    pub fn import_offsets(&mut self, text: &str) -> Result<usize> {
        let parsed: BTreeMap<ElementId, Vec2> = serde_json::from_str(text)?;
        check_finite(&parsed)?;
        self.cancel_interaction();
        self.offsets = parsed.into_iter().filter(|(_, v)| !v.is_zero()).collect();
        Ok(self.offsets.len())
    }
}

fn check_finite(offsets: &BTreeMap<ElementId, Vec2>) -> Result<()> {
    match offsets
        .iter()
        .find(|(_, v)| !v.x.is_finite() || !v.y.is_finite())
    {
        Some((id, _)) => Err(AppError::Diagram(format!("offset for {} is not finite", id))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn p(x: f64, y: f64) -> Vec2 {
        Vec2::new(x, y)
    }

    #[test]
    fn test_zoom_clamped_under_random_wheel_sequences() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut editor = DiagramEditor::new();
        for _ in 0..5000 {
            let delta = rng.gen_range(-500.0..500.0);
            let pointer = p(rng.gen_range(0.0..1200.0), rng.gen_range(0.0..800.0));
            editor.wheel(delta, pointer);
            assert!(editor.zoom() >= MIN_ZOOM && editor.zoom() <= MAX_ZOOM);
        }
        for _ in 0..100 {
            editor.zoom_in(p(0.0, 0.0));
        }
        assert_eq!(editor.zoom(), MAX_ZOOM);
        for _ in 0..100 {
            editor.wheel(1.0, p(10.0, 10.0));
        }
        assert_eq!(editor.zoom(), MIN_ZOOM);
    }

    #[test]
    fn test_wheel_zoom_keeps_point_under_pointer() {
        let mut editor = DiagramEditor::new();
        editor.pointer_down(p(0.0, 0.0), None);
        editor.pointer_up(p(40.0, -25.0));

        let pointer = p(300.0, 200.0);
        let before = (pointer - editor.pan()) / editor.zoom();
        editor.wheel(-120.0, pointer);
        editor.wheel(-120.0, pointer);
        let after = editor.to_screen(before);

        assert!((after.x - pointer.x).abs() < 1e-9);
        assert!((after.y - pointer.y).abs() < 1e-9);
    }

    #[test]
    fn test_short_drag_is_a_click() {
        let mut editor = DiagramEditor::new();
        editor.pointer_down(p(100.0, 100.0), Some("buffer_tank"));
        assert!(!editor.pointer_move(p(102.0, 101.0)));
        let outcome = editor.pointer_up(p(102.0, 102.0));

        assert_eq!(outcome, PointerOutcome::Selected(Some("buffer_tank".into())));
        assert_eq!(editor.pan(), Vec2::ZERO);
        assert_eq!(editor.interaction(), &Interaction::Idle);
    }

    #[test]
    fn test_long_drag_pans_without_selecting() {
        let mut editor = DiagramEditor::new();
        editor.pointer_down(p(100.0, 100.0), Some("buffer_tank"));
        assert!(editor.pointer_move(p(130.0, 90.0)));
        // moving back inside the threshold keeps panning
        assert!(editor.pointer_move(p(101.0, 100.0)));
        let outcome = editor.pointer_up(p(150.0, 120.0));

        assert_eq!(outcome, PointerOutcome::Panned);
        assert_eq!(editor.pan(), p(50.0, 20.0));
        assert_eq!(editor.selected(), None);
    }

    #[test]
    fn test_click_toggles_detail_panel() {
        let mut editor = DiagramEditor::new();
        editor.pointer_down(p(5.0, 5.0), Some("heat_pump"));
        editor.pointer_up(p(5.0, 5.0));
        assert_eq!(editor.selected(), Some("heat_pump"));

        editor.pointer_down(p(5.0, 5.0), Some("heat_pump"));
        editor.pointer_up(p(6.0, 5.0));
        assert_eq!(editor.selected(), None);

        editor.select(Some("heat_pump"));
        editor.pointer_down(p(5.0, 5.0), None);
        assert_eq!(editor.pointer_up(p(5.0, 5.0)), PointerOutcome::Selected(None));
    }

    #[test]
    fn test_edit_mode_drag_scales_by_zoom() {
        let mut editor = DiagramEditor::new();
        editor.zoom_at(Vec2::ZERO, 2.0);
        editor.set_edit_mode(true);

        editor.pointer_down(p(10.0, 10.0), Some("circulation_pump"));
        editor.pointer_move(p(30.0, 50.0));
        let outcome = editor.pointer_up(p(30.0, 50.0));

        assert_eq!(outcome, PointerOutcome::Moved("circulation_pump".into()));
        assert_eq!(editor.offset("circulation_pump"), p(10.0, 20.0));
        assert_eq!(editor.pan(), Vec2::ZERO);

        // second drag accumulates
        editor.pointer_down(p(0.0, 0.0), Some("circulation_pump"));
        editor.pointer_up(p(-40.0, 0.0));
        assert_eq!(editor.offset("circulation_pump"), p(-10.0, 20.0));
    }

    #[test]
    fn test_edit_mode_short_drag_only_selects() {
        let mut editor = DiagramEditor::new();
        editor.set_edit_mode(true);
        editor.pointer_down(p(0.0, 0.0), Some("mixing_valve"));
        let outcome = editor.pointer_up(p(3.0, 0.0));
        assert_eq!(outcome, PointerOutcome::Selected(Some("mixing_valve".into())));
        assert!(editor.offsets().is_empty());
    }

    #[test]
    fn test_keyboard_nudge_and_delete() {
        let mut editor = DiagramEditor::new();
        editor.select(Some("heat_pump"));
        assert!(!editor.handle_key(Key::ArrowRight, false));

        editor.set_edit_mode(true);
        assert!(editor.handle_key(Key::ArrowRight, false));
        assert!(editor.handle_key(Key::ArrowDown, true));
        assert_eq!(editor.offset("heat_pump"), p(1.0, 10.0));

        assert!(editor.handle_key(Key::Delete, false));
        assert_eq!(editor.offset("heat_pump"), Vec2::ZERO);
        assert!(!editor.handle_key(Key::Backspace, false));

        assert!(editor.handle_key(Key::Escape, false));
        assert_eq!(editor.selected(), None);
    }

    #[test]
    fn test_mode_switch_cancels_drag() {
        let mut editor = DiagramEditor::new();
        editor.set_edit_mode(true);
        editor.pointer_down(p(0.0, 0.0), Some("heat_pump"));
        editor.pointer_move(p(50.0, 0.0));
        editor.set_edit_mode(false);

        assert_eq!(editor.interaction(), &Interaction::Idle);
        assert!(editor.offsets().is_empty());
    }

    #[test]
    fn test_offsets_export_import() {
        let mut editor = DiagramEditor::new();
        editor.nudge("heat_pump", p(12.0, -4.5));
        editor.nudge("sensor_outside", p(3.0, 0.0));
        let text = editor.export_offsets().unwrap();

        let mut other = DiagramEditor::new();
        assert_eq!(other.import_offsets(&text).unwrap(), 2);
        assert_eq!(other.offsets(), editor.offsets());
        assert!(other.import_offsets("[1, 2]").is_err());
    }

    #[test]
    fn test_non_finite_offsets_rejected() {
        let mut offsets = BTreeMap::new();
        offsets.insert("heat_pump".to_string(), p(1.0, 2.0));
        assert!(check_finite(&offsets).is_ok());

        offsets.insert("buffer_tank".to_string(), p(f64::NAN, 0.0));
        match check_finite(&offsets) {
            Err(AppError::Diagram(msg)) => assert!(msg.contains("buffer_tank")),
            other => panic!("unexpected {other:?}"),
        }
    }
}

use std::time::Duration;

use crate::mapper::Point;

/// Period of the marker clock.
pub const CLOCK_INTERVAL: Duration = Duration::from_millis(16);
/// Fraction of the remaining distance covered per tick.
pub const APPROACH_RATE: f64 = 0.15;
/// Per-axis distance under which the marker snaps onto its target.
pub const SETTLE_DISTANCE: f64 = 0.5;

/// Rendered marker position chasing an authoritative target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerAnimator {
    current: Point,
    target: Point,
    bounds: Point,
    animating: bool,
    dragging: bool,
    visible: bool,
}

impl Default for MarkerAnimator {
    fn default() -> Self {
        Self {
            current: Point::default(),
            target: Point::default(),
            bounds: Point::default(),
            animating: false,
            dragging: false,
            visible: false,
        }
    }
}

impl MarkerAnimator {
    /// Places the marker at `origin` with targets clamped into
    /// `[0, width] × [0, height]`, and shows it.
    pub fn reset(&mut self, origin: Point, width: f64, height: f64) {
        self.bounds = Point::new(width.max(0.0), height.max(0.0));
        self.current = self.clamp(origin);
        self.target = self.current;
        self.animating = false;
        self.dragging = false;
        self.visible = true;
    }

    pub fn current(&self) -> Point {
        self.current
    }

    pub fn target(&self) -> Point {
        self.target
    }

    pub fn is_animating(&self) -> bool {
        self.animating
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.animating = false;
        self.dragging = false;
    }

    /// Sets a new target; the rendered position follows on later ticks.
    pub fn set_target(&mut self, target: Point) {
        self.target = self.clamp(target);
        if self.current != self.target {
            self.animating = true;
        }
    }

    /// Moves both the target and the rendered position, without animation.
    pub fn jump_to(&mut self, point: Point) {
        self.target = self.clamp(point);
        self.current = self.target;
        self.animating = false;
    }

    /// Advances one clock step. Returns true while further ticks are needed.
    pub fn tick(&mut self) -> bool {
        if !self.animating {
            return false;
        }
        let dx = self.target.x - self.current.x;
        let dy = self.target.y - self.current.y;
        if dx.abs() < SETTLE_DISTANCE && dy.abs() < SETTLE_DISTANCE {
            self.current = self.target;
            self.animating = false;
            return false;
        }
        self.current.x += dx * APPROACH_RATE;
        self.current.y += dy * APPROACH_RATE;
        true
    }

    pub fn begin_drag(&mut self, point: Point) {
        self.dragging = true;
        self.jump_to(point);
    }

    pub fn drag_to(&mut self, point: Point) {
        if self.dragging {
            self.jump_to(point);
        }
    }

    /// Ends a drag, animating towards `settle`. Returns false when no drag
    /// was in progress.
    pub fn end_drag(&mut self, settle: Point) -> bool {
        if !self.dragging {
            return false;
        }
        self.dragging = false;
        self.set_target(settle);
        true
    }

    fn clamp(&self, point: Point) -> Point {
        Point::new(
            point.x.clamp(0.0, self.bounds.x),
            point.y.clamp(0.0, self.bounds.y),
        )
    }
}

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::media::Viewport;

/// Distance from the viewport edge that triggers an edge-mode scroll.
pub const EDGE_MARGIN: f64 = 50.0;
/// Minimum spacing between playback-driven scrolls.
pub const SCROLL_THROTTLE: Duration = Duration::from_millis(500);
/// Length of one scroll animation.
pub const SCROLL_DURATION: Duration = Duration::from_millis(400);
/// Scrolls shorter than this are skipped.
pub const MIN_SCROLL_DISTANCE: f64 = 1.0;

/// How the grid follows the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollMode {
    /// Keep the marker row at the viewport center.
    #[default]
    Center,
    /// Scroll only when the marker nears the viewport top or bottom.
    Edge,
    Off,
}

impl ScrollMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Center => "center",
            Self::Edge => "edge",
            Self::Off => "off",
        }
    }
}

impl Display for ScrollMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScrollMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "center" => Ok(Self::Center),
            "edge" => Ok(Self::Edge),
            "off" => Ok(Self::Off),
            other => Err(format!("unknown scroll mode {other:?}")),
        }
    }
}

/// Cubic ease-out over `progress` in `[0, 1]`.
pub fn ease_out_cubic(progress: f64) -> f64 {
    let p = progress.clamp(0.0, 1.0);
    1.0 - (1.0 - p).powi(3)
}

/// One running scroll animation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnimation {
    pub id: u64,
    pub from: f64,
    pub to: f64,
    pub started: Instant,
}

impl ScrollAnimation {
    /// Scroll offset at `now` and whether the animation has finished.
    pub fn sample(&self, now: Instant) -> (f64, bool) {
        let elapsed = now.saturating_duration_since(self.started);
        let progress = (elapsed.as_secs_f64() / SCROLL_DURATION.as_secs_f64()).min(1.0);
        let offset = self.from + (self.to - self.from) * ease_out_cubic(progress);
        (offset, progress >= 1.0)
    }
}

/// Decides when and where the grid scrolls to follow the marker.
///
/// Holds at most one animation; starting another replaces it. The controller
/// never touches the host directly: callers apply the offsets returned by
/// [`AutoScroller::advance`].
#[derive(Debug, Clone)]
pub struct AutoScroller {
    mode: ScrollMode,
    last_scroll: Option<Instant>,
    animation: Option<ScrollAnimation>,
    last_animation_id: u64,
}

impl AutoScroller {
    pub fn new(mode: ScrollMode) -> Self {
        Self {
            mode,
            last_scroll: None,
            animation: None,
            last_animation_id: 0,
        }
    }

    pub fn mode(&self) -> ScrollMode {
        self.mode
    }

    /// Switches mode, cancelling any animation and restarting the throttle
    /// window at `now` so the new mode waits a full window before following.
    pub fn set_mode(&mut self, mode: ScrollMode, now: Instant) {
        debug!(from = %self.mode, to = %mode, "scroll mode changed");
        self.mode = mode;
        self.cancel();
        self.last_scroll = Some(now);
    }

    pub fn animation(&self) -> Option<&ScrollAnimation> {
        self.animation.as_ref()
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    pub fn cancel(&mut self) {
        self.animation = None;
    }

    /// Scroll offset the current mode wants for a marker at `marker_y`, or
    /// `None` when no scroll is needed.
    pub fn scroll_target(&self, marker_y: f64, viewport: Viewport) -> Option<f64> {
        match self.mode {
            ScrollMode::Off => None,
            ScrollMode::Center => Some((marker_y - viewport.height / 2.0).max(0.0)),
            ScrollMode::Edge => {
                let top = viewport.scroll_top;
                if marker_y < top + EDGE_MARGIN {
                    Some((marker_y - EDGE_MARGIN).max(0.0))
                } else if marker_y > top + viewport.height - EDGE_MARGIN {
                    Some(marker_y - viewport.height + EDGE_MARGIN)
                } else {
                    None
                }
            }
        }
    }

    /// Playback-driven follow, at most once per [`SCROLL_THROTTLE`].
    ///
    /// The throttle window restarts on every attempt, whether or not it
    /// produced an animation.
    pub fn on_playback_update(
        &mut self,
        marker_y: f64,
        viewport: Viewport,
        now: Instant,
    ) -> Option<u64> {
        if self.mode == ScrollMode::Off {
            return None;
        }
        if self
            .last_scroll
            .is_some_and(|last| now.saturating_duration_since(last) <= SCROLL_THROTTLE)
        {
            return None;
        }
        self.last_scroll = Some(now);
        self.scroll_to_marker(marker_y, viewport, now)
    }

    /// Explicit follow after navigation; ignores the throttle.
    pub fn scroll_to_marker(
        &mut self,
        marker_y: f64,
        viewport: Viewport,
        now: Instant,
    ) -> Option<u64> {
        let target = self.scroll_target(marker_y, viewport)?;
        self.smooth_scroll_to(viewport.scroll_top, target, now)
    }

    /// Starts an eased animation from `from` to `to`, replacing any running one.
    pub fn smooth_scroll_to(&mut self, from: f64, to: f64, now: Instant) -> Option<u64> {
        if (to - from).abs() < MIN_SCROLL_DISTANCE {
            return None;
        }
        self.last_animation_id += 1;
        let id = self.last_animation_id;
        if let Some(previous) = self.animation.replace(ScrollAnimation {
            id,
            from,
            to,
            started: now,
        }) {
            debug!(cancelled = previous.id, id, "scroll animation replaced");
        }
        Some(id)
    }

    /// Offset to apply at `now`, if an animation is running.
    pub fn advance(&mut self, now: Instant) -> Option<f64> {
        let animation = self.animation?;
        let (offset, done) = animation.sample(now);
        if done {
            self.animation = None;
        }
        Some(offset)
    }
}

impl Default for AutoScroller {
    fn default() -> Self {
        Self::new(ScrollMode::default())
    }
}

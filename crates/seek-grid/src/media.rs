use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::layout::{CellGeometry, GridLayout};

/// Identity of a media source, e.g. a file path or blob URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VideoKey(Arc<str>);

impl VideoKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VideoKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VideoKey {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for VideoKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&Path> for VideoKey {
    fn from(value: &Path) -> Self {
        Self(Arc::from(value.to_string_lossy().as_ref()))
    }
}

/// How much data a decode handle has buffered.
///
/// Mirrors the usual media-element ladder; frames can be captured from
/// [`ReadyState::CurrentData`] upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Nothing,
    Metadata,
    CurrentData,
    FutureData,
    EnoughData,
}

impl ReadyState {
    pub fn has_frame(self) -> bool {
        self >= Self::CurrentData
    }
}

/// Encoded thumbnail produced by a decode handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Off-screen decode context used for thumbnail extraction.
///
/// Handles are opened by [`GridHost::open_decoder`] and owned by one
/// extraction task at a time.
#[allow(async_fn_in_trait)]
pub trait DecodeHandle {
    fn ready_state(&self) -> ReadyState;

    /// Position the handle is currently showing.
    fn current_time(&self) -> f64;

    /// Resolves once the handle has frame data, or fails to load.
    async fn wait_ready(&mut self) -> Result<()>;

    /// Starts seeking to `seconds`; completion is awaited with [`Self::seeked`].
    fn start_seek(&mut self, seconds: f64);

    /// Resolves once the last started seek has completed.
    async fn seeked(&mut self) -> Result<()>;

    /// Captures the current frame scaled to exactly `width`×`height`.
    fn capture(&mut self, width: u32, height: u32) -> Result<CapturedFrame>;

    /// Stops loading and frees decoder resources.
    fn release(&mut self);
}

/// Scroll viewport of the grid container.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    pub scroll_top: f64,
    pub height: f64,
}

/// Services a grid consumes from the embedding application.
///
/// Implementations use interior mutability: the grid calls these from its
/// clock, input handlers and extraction tasks, all on one thread.
#[allow(async_fn_in_trait)]
pub trait GridHost {
    type Decoder: DecodeHandle;

    /// Identity of the media currently loaded in the player.
    fn source(&self) -> Option<VideoKey>;

    /// Media duration in seconds, once metadata is known.
    fn duration(&self) -> Option<f64>;

    fn current_time(&self) -> f64;

    fn set_current_time(&self, seconds: f64);

    fn is_paused(&self) -> bool;

    fn toggle_playback(&self);

    /// Creates an off-screen decode handle bound to `video`. Loading starts
    /// immediately; readiness is awaited separately.
    fn open_decoder(&self, video: &VideoKey) -> Result<Self::Decoder>;

    /// Resolves after the next layout/paint boundary.
    async fn next_frame(&self);

    /// Measures the first rendered cell. `None` when no cell was laid out.
    fn measure_cell(&self, layout: &GridLayout) -> Option<CellGeometry>;

    /// Size of the whole rendered grid box.
    fn grid_box(&self) -> (f64, f64);

    fn viewport(&self) -> Viewport;

    fn set_scroll_top(&self, scroll_top: f64);
}

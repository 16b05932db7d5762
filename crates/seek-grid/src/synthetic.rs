//! In-memory host for driving a grid without a real player: a fake playhead,
//! a fixed viewport and decode handles that take a configurable time to load
//! and seek. Used by the `simulate` command and by tests.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::{GridError, Result};
use crate::layout::{CellGeometry, GridLayout};
use crate::media::{CapturedFrame, DecodeHandle, GridHost, ReadyState, VideoKey, Viewport};

/// Simulated delay of one layout pass.
pub const FRAME_BOUNDARY: Duration = Duration::from_millis(16);

/// How long synthetic decode handles take to become ready and to seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderTiming {
    pub ready: Duration,
    pub seek: Duration,
}

impl Default for DecoderTiming {
    fn default() -> Self {
        Self {
            ready: Duration::from_millis(10),
            seek: Duration::from_millis(20),
        }
    }
}

#[derive(Debug)]
struct HostState {
    source: Option<VideoKey>,
    duration: Option<f64>,
    current_time: f64,
    paused: bool,
    viewport: Viewport,
    cell: Option<CellGeometry>,
    grid_box: (f64, f64),
    timing: DecoderTiming,
    fail_open: bool,
    opened: u32,
    released: Vec<u32>,
    decoder_seeks: Vec<f64>,
    scroll_writes: Vec<f64>,
    playback_writes: Vec<f64>,
    toggles: u32,
}

/// Cloneable handle to one simulated player; clones share state.
#[derive(Debug, Clone)]
pub struct SyntheticHost {
    state: Rc<RefCell<HostState>>,
}

impl SyntheticHost {
    /// A paused player with `source` loaded, 160×90 cells and a 300px viewport.
    pub fn new(source: impl Into<VideoKey>, duration: f64) -> Self {
        let host = Self::empty();
        host.load(source, duration);
        host
    }

    /// A player with nothing loaded.
    pub fn empty() -> Self {
        Self {
            state: Rc::new(RefCell::new(HostState {
                source: None,
                duration: None,
                current_time: 0.0,
                paused: true,
                viewport: Viewport {
                    scroll_top: 0.0,
                    height: 300.0,
                },
                cell: Some(CellGeometry {
                    cell_width: 160.0,
                    cell_height: 90.0,
                    gap: 2.0,
                }),
                grid_box: (0.0, 0.0),
                timing: DecoderTiming::default(),
                fail_open: false,
                opened: 0,
                released: Vec::new(),
                decoder_seeks: Vec::new(),
                scroll_writes: Vec::new(),
                playback_writes: Vec::new(),
                toggles: 0,
            })),
        }
    }

    pub fn with_timing(self, timing: DecoderTiming) -> Self {
        self.state.borrow_mut().timing = timing;
        self
    }

    pub fn with_viewport_height(self, height: f64) -> Self {
        self.state.borrow_mut().viewport.height = height;
        self
    }

    /// Makes cell measurement fail so the grid falls back to `grid_box`.
    pub fn without_cell_measurement(self, grid_box: (f64, f64)) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.cell = None;
            state.grid_box = grid_box;
        }
        self
    }

    /// Loads new media and rewinds the playhead.
    pub fn load(&self, source: impl Into<VideoKey>, duration: f64) {
        let mut state = self.state.borrow_mut();
        state.source = Some(source.into());
        state.duration = Some(duration);
        state.current_time = 0.0;
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.borrow_mut().paused = !playing;
    }

    /// Moves the playhead as playback would, without recording a seek.
    pub fn advance_playback(&self, seconds: f64) {
        let mut state = self.state.borrow_mut();
        let end = state.duration.unwrap_or(0.0);
        state.current_time = (state.current_time + seconds).clamp(0.0, end);
    }

    pub fn fail_open_decoders(&self, fail: bool) {
        self.state.borrow_mut().fail_open = fail;
    }

    pub fn opened_decoders(&self) -> u32 {
        self.state.borrow().opened
    }

    pub fn released_decoders(&self) -> Vec<u32> {
        self.state.borrow().released.clone()
    }

    /// Every seek issued by any decode handle, in order.
    pub fn decoder_seeks(&self) -> Vec<f64> {
        self.state.borrow().decoder_seeks.clone()
    }

    /// Every scroll offset written by the grid, in order.
    pub fn scroll_writes(&self) -> Vec<f64> {
        self.state.borrow().scroll_writes.clone()
    }

    /// Every playback time set by the grid, in order.
    pub fn playback_writes(&self) -> Vec<f64> {
        self.state.borrow().playback_writes.clone()
    }

    pub fn toggles(&self) -> u32 {
        self.state.borrow().toggles
    }
}

impl GridHost for SyntheticHost {
    type Decoder = SyntheticDecoder;

    fn source(&self) -> Option<VideoKey> {
        self.state.borrow().source.clone()
    }

    fn duration(&self) -> Option<f64> {
        self.state.borrow().duration
    }

    fn current_time(&self) -> f64 {
        self.state.borrow().current_time
    }

    fn set_current_time(&self, seconds: f64) {
        let mut state = self.state.borrow_mut();
        state.current_time = seconds;
        state.playback_writes.push(seconds);
    }

    fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    fn toggle_playback(&self) {
        let mut state = self.state.borrow_mut();
        state.paused = !state.paused;
        state.toggles += 1;
    }

    fn open_decoder(&self, video: &VideoKey) -> Result<SyntheticDecoder> {
        let mut state = self.state.borrow_mut();
        if state.fail_open {
            return Err(GridError::DecoderOpen {
                video: video.clone(),
                reason: "synthetic open failure".to_string(),
            });
        }
        state.opened += 1;
        Ok(SyntheticDecoder {
            id: state.opened,
            video: video.clone(),
            duration: state.duration.unwrap_or(0.0),
            timing: state.timing,
            time: 0.0,
            pending: None,
            ready: ReadyState::Metadata,
            host: Rc::clone(&self.state),
        })
    }

    async fn next_frame(&self) {
        sleep(FRAME_BOUNDARY).await;
    }

    fn measure_cell(&self, _layout: &GridLayout) -> Option<CellGeometry> {
        self.state.borrow().cell
    }

    fn grid_box(&self) -> (f64, f64) {
        self.state.borrow().grid_box
    }

    fn viewport(&self) -> Viewport {
        self.state.borrow().viewport
    }

    fn set_scroll_top(&self, scroll_top: f64) {
        let mut state = self.state.borrow_mut();
        state.viewport.scroll_top = scroll_top.max(0.0);
        state.scroll_writes.push(scroll_top);
    }
}

/// Decode handle whose captures encode the video and position they came from.
#[derive(Debug)]
pub struct SyntheticDecoder {
    id: u32,
    video: VideoKey,
    duration: f64,
    timing: DecoderTiming,
    time: f64,
    pending: Option<f64>,
    ready: ReadyState,
    host: Rc<RefCell<HostState>>,
}

impl DecodeHandle for SyntheticDecoder {
    fn ready_state(&self) -> ReadyState {
        self.ready
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    async fn wait_ready(&mut self) -> Result<()> {
        sleep(self.timing.ready).await;
        self.ready = ReadyState::EnoughData;
        Ok(())
    }

    fn start_seek(&mut self, seconds: f64) {
        self.host.borrow_mut().decoder_seeks.push(seconds);
        self.pending = Some(seconds.clamp(0.0, self.duration));
    }

    async fn seeked(&mut self) -> Result<()> {
        sleep(self.timing.seek).await;
        if let Some(target) = self.pending.take() {
            self.time = target;
        }
        Ok(())
    }

    fn capture(&mut self, width: u32, height: u32) -> Result<CapturedFrame> {
        Ok(CapturedFrame {
            width,
            height,
            bytes: format!("{}@{:.2}", self.video, self.time).into_bytes(),
        })
    }

    fn release(&mut self) {
        self.host.borrow_mut().released.push(self.id);
    }
}

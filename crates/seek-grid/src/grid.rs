use std::cell::RefCell;
use std::rc::Rc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::cache::{SharedFrameCache, ThumbnailBlob};
use crate::config::{GridConfig, GridConfigPatch};
use crate::error::{GridError, GridErrorEvent};
use crate::extract::{
    Extraction, ExtractionPlan, ExtractionStats, ExtractorLedger, FrameSink, TaskRegistry,
};
use crate::layout::{CellGeometry, GridLayout, GridSpec};
use crate::mapper::{CellInfo, CellTarget, CoordinateMapper, Point};
use crate::marker::{CLOCK_INTERVAL, MarkerAnimator};
use crate::media::GridHost;
use crate::scroll::{AutoScroller, ScrollMode};

type SeekCallback = Rc<dyn Fn(f64, Option<CellInfo>)>;
type ErrorCallback = Rc<dyn Fn(&GridErrorEvent)>;

/// Keys the grid reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridKey {
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    Space,
}

/// Render state of one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellView {
    pub index: usize,
    /// Cell start time as `m:ss`.
    pub label: String,
    /// `None` while the placeholder is still loading.
    pub thumbnail: Option<ThumbnailBlob>,
}

/// Everything a host needs to draw the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridView {
    pub layout: GridLayout,
    pub geometry: CellGeometry,
    pub cells: Vec<CellView>,
    pub marker: Point,
    pub marker_visible: bool,
    pub scroll_mode: ScrollMode,
}

#[derive(Debug)]
struct GridState {
    config: GridConfig,
    layout: GridLayout,
    geometry: CellGeometry,
    cells: Vec<CellView>,
    marker: MarkerAnimator,
    scroller: AutoScroller,
    last_stats: Option<ExtractionStats>,
    destroyed: bool,
}

impl GridState {
    fn mapper(&self) -> CoordinateMapper {
        CoordinateMapper::new(self.layout, self.geometry)
    }
}

#[derive(Default)]
struct Callbacks {
    on_seek: Option<SeekCallback>,
    on_error: Option<ErrorCallback>,
}

struct GridInner<H: GridHost> {
    host: H,
    cache: SharedFrameCache,
    registry: Rc<TaskRegistry>,
    ledger: ExtractorLedger<H::Decoder>,
    state: RefCell<GridState>,
    callbacks: RefCell<Callbacks>,
}

impl<H: GridHost> GridInner<H> {
    fn emit_error(&self, error: &GridError) {
        let event = GridErrorEvent::from_error(error);
        warn!(kind = event.kind.as_str(), error = %event.error, "{}", event.message);
        let callback = self.callbacks.borrow().on_error.clone();
        if let Some(callback) = callback {
            callback(&event);
        }
    }

    fn emit_seek(&self, time: f64, cell: Option<CellInfo>) {
        let callback = self.callbacks.borrow().on_seek.clone();
        if let Some(callback) = callback {
            callback(time, cell);
        }
    }
}

/// Writes extraction output into the cells of the grid that owns the task.
struct GridSink<'a, H: GridHost> {
    inner: &'a GridInner<H>,
}

impl<H: GridHost> FrameSink for GridSink<'_, H> {
    fn display(&self, index: usize, thumbnail: &ThumbnailBlob) {
        let mut state = self.inner.state.borrow_mut();
        if let Some(cell) = state.cells.get_mut(index) {
            cell.thumbnail = Some(thumbnail.clone());
        }
    }

    fn report(&self, error: GridError) {
        self.inner.emit_error(&error);
    }
}

/// A thumbnail grid bound to one host.
///
/// Cloning yields another handle to the same grid, so a clone can be moved
/// into a `spawn_local` task. All methods must be called from the thread that
/// owns the host.
pub struct ThumbnailGrid<H: GridHost> {
    inner: Rc<GridInner<H>>,
}

impl<H: GridHost> Clone for ThumbnailGrid<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<H: GridHost> ThumbnailGrid<H> {
    /// Creates an idle grid. Nothing is laid out until [`Self::rebuild`].
    pub fn new(host: H, cache: SharedFrameCache, config: GridConfig) -> Self {
        let (config, _) = config.sanitized();
        let scroller = AutoScroller::new(config.scroll_mode);
        Self {
            inner: Rc::new(GridInner {
                host,
                cache,
                registry: TaskRegistry::new(),
                ledger: ExtractorLedger::default(),
                state: RefCell::new(GridState {
                    config,
                    layout: GridLayout::from_spec(GridSpec {
                        duration_seconds: 0.0,
                        columns: 1,
                        seconds_per_cell: 1.0,
                    }),
                    geometry: CellGeometry::default(),
                    cells: Vec::new(),
                    marker: MarkerAnimator::default(),
                    scroller,
                    last_stats: None,
                    destroyed: false,
                }),
                callbacks: RefCell::new(Callbacks::default()),
            }),
        }
    }

    /// Called with the seek time and the cell under it after pointer seeks.
    pub fn on_seek(&self, callback: impl Fn(f64, Option<CellInfo>) + 'static) {
        self.inner.callbacks.borrow_mut().on_seek = Some(Rc::new(callback));
    }

    /// Called for every non-fatal error.
    pub fn on_error(&self, callback: impl Fn(&GridErrorEvent) + 'static) {
        self.inner.callbacks.borrow_mut().on_error = Some(Rc::new(callback));
    }

    pub fn host(&self) -> &H {
        &self.inner.host
    }

    pub fn cache(&self) -> &SharedFrameCache {
        &self.inner.cache
    }

    pub fn config(&self) -> GridConfig {
        self.inner.state.borrow().config.clone()
    }

    pub fn layout(&self) -> GridLayout {
        self.inner.state.borrow().layout
    }

    pub fn geometry(&self) -> CellGeometry {
        self.inner.state.borrow().geometry
    }

    pub fn mapper(&self) -> CoordinateMapper {
        self.inner.state.borrow().mapper()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.borrow().destroyed
    }

    /// Counters of the last extraction that ran to completion or cancellation.
    pub fn last_extraction(&self) -> Option<ExtractionStats> {
        self.inner.state.borrow().last_stats
    }

    pub fn view(&self) -> GridView {
        let state = self.inner.state.borrow();
        GridView {
            layout: state.layout,
            geometry: state.geometry,
            cells: state.cells.clone(),
            marker: state.marker.current(),
            marker_visible: state.marker.is_visible(),
            scroll_mode: state.scroller.mode(),
        }
    }

    /// Lays the grid out for the host's current media and extracts every
    /// thumbnail.
    ///
    /// Any running extraction is superseded immediately. If another rebuild
    /// starts before the first frame boundary, this one returns `None` without
    /// extracting. Returns `None` as well when the host has no duration or no
    /// source; that case is reported as `missing-input`.
    pub async fn rebuild(&self) -> Option<ExtractionStats> {
        let inner = &*self.inner;
        if self.is_destroyed() {
            return None;
        }

        let duration = inner
            .host
            .duration()
            .filter(|duration| duration.is_finite() && *duration > 0.0);
        let Some(duration) = duration else {
            inner.emit_error(&GridError::MissingDuration);
            return None;
        };
        let Some(video) = inner.host.source() else {
            inner.emit_error(&GridError::MissingSource);
            return None;
        };

        let token = inner.registry.begin(video.clone());
        inner.cache.register_video(&video);

        let (layout, config) = {
            let mut state = inner.state.borrow_mut();
            let (spec, _) =
                GridSpec::clamped(duration, state.config.columns, state.config.seconds_per_cell);
            let layout = GridLayout::from_spec(spec);
            state.layout = layout;
            state.cells = (0..layout.total_cells)
                .map(|index| CellView {
                    index,
                    label: layout.cell_label(index),
                    thumbnail: None,
                })
                .collect();
            state.marker.hide();
            state.scroller.cancel();
            (layout, state.config.clone())
        };
        inner.host.set_scroll_top(0.0);
        info!(
            task = token.id(),
            video = %video,
            duration,
            cells = layout.total_cells,
            rows = layout.rows,
            "grid laid out"
        );

        inner.host.next_frame().await;
        if !token.is_current() {
            debug!(task = token.id(), "rebuild superseded before measurement");
            return None;
        }

        let geometry = inner
            .host
            .measure_cell(&layout)
            .filter(|geometry| geometry.cell_width > 0.0 && geometry.cell_height > 0.0)
            .unwrap_or_else(|| {
                let (width, height) = inner.host.grid_box();
                debug!(width, height, "cell not measurable, using grid box");
                CellGeometry::fallback(&layout, width, height)
            });
        {
            let mut state = inner.state.borrow_mut();
            state.geometry = geometry;
            let (width, height) = geometry.grid_size(&layout);
            state
                .marker
                .reset(Point::new(0.0, geometry.cell_height / 2.0), width, height);
        }
        inner.host.set_scroll_top(0.0);

        let plan = ExtractionPlan::new(&layout, &geometry, inner.host.viewport());
        let sink = GridSink { inner };
        let extraction =
            Extraction::new(token, layout, config.thumb_size(), &inner.cache, &sink);
        let stats = extraction
            .run(
                |video| inner.host.open_decoder(video),
                config.parallel_extractors,
                &plan,
                &inner.ledger,
            )
            .await;

        inner.state.borrow_mut().last_stats = Some(stats);
        Some(stats)
    }

    /// Applies `patch`, reporting and clamping invalid values, then rebuilds.
    pub async fn configure(&self, patch: GridConfigPatch) -> Option<ExtractionStats> {
        let issues = {
            let mut state = self.inner.state.borrow_mut();
            let mut config = state.config.clone();
            patch.apply(&mut config);
            let (config, issues) = config.sanitized();
            debug!(
                columns = config.columns,
                seconds_per_cell = config.seconds_per_cell,
                thumb_width = config.thumb_width,
                thumb_height = config.thumb_height,
                "grid configured"
            );
            state.config = config;
            issues
        };
        for issue in &issues {
            self.inner.emit_error(issue);
        }
        self.rebuild().await
    }

    /// Sets playback time, clamped to the media.
    pub fn seek_to(&self, seconds: f64) {
        let host = &self.inner.host;
        let upper = host.duration().filter(|d| d.is_finite()).unwrap_or(f64::MAX);
        let seconds = if seconds.is_finite() { seconds } else { 0.0 };
        host.set_current_time(seconds.clamp(0.0, upper.max(0.0)));
    }

    /// Navigates to `(col, row)`, wrapping and clamping like
    /// [`CoordinateMapper::move_to_cell`], and scrolls to it immediately.
    pub fn move_to_cell(&self, col: i64, row: i64) -> Option<CellTarget> {
        let target = {
            let mut state = self.inner.state.borrow_mut();
            if state.destroyed {
                return None;
            }
            let target = state.mapper().move_to_cell(col, row)?;
            state.marker.set_target(target.center);
            target
        };
        self.seek_to(target.time);
        self.scroll_to_marker();
        Some(target)
    }

    pub fn set_scroll_mode(&self, mode: ScrollMode) {
        let mut state = self.inner.state.borrow_mut();
        state.scroller.set_mode(mode, Instant::now());
        state.config.scroll_mode = mode;
    }

    /// Cell under the host playhead, or `None` before the first layout.
    pub fn current_cell(&self) -> Option<CellInfo> {
        let time = self.inner.host.current_time();
        self.inner.state.borrow().mapper().cell_at_time(time)
    }

    /// Stops extraction, animation and the clock, and releases decode handles.
    /// The shared cache keeps its frames.
    pub fn destroy(&self) {
        let inner = &*self.inner;
        inner.registry.invalidate();
        {
            let mut state = inner.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.marker.hide();
            state.scroller.cancel();
            state.cells.clear();
        }
        inner.ledger.close();
        info!("grid destroyed");
    }

    /// Playback time-update notification.
    pub fn on_time_update(&self) {
        let host = &self.inner.host;
        let mut state = self.inner.state.borrow_mut();
        if state.destroyed || state.marker.is_dragging() || !state.marker.is_visible() {
            return;
        }
        let target = state.mapper().time_to_position(host.current_time());
        state.marker.set_target(target);
        if !host.is_paused() {
            let marker_y = state.marker.target().y;
            state
                .scroller
                .on_playback_update(marker_y, host.viewport(), Instant::now());
        }
    }

    /// One marker clock step. Returns true while something is still moving.
    pub fn tick(&self, now: Instant) -> bool {
        let host = &self.inner.host;
        let (offset, busy) = {
            let mut state = self.inner.state.borrow_mut();
            if state.destroyed {
                return false;
            }
            if state.marker.is_visible() && !state.marker.is_dragging() && !host.is_paused() {
                let target = state.mapper().time_to_position(host.current_time());
                state.marker.set_target(target);
            }
            let moving = state.marker.tick();
            let offset = state.scroller.advance(now);
            (offset, moving || state.scroller.is_animating())
        };
        if let Some(offset) = offset {
            host.set_scroll_top(offset);
        }
        busy
    }

    /// Drives [`Self::tick`] at the clock rate until the grid is destroyed.
    pub async fn run_clock(&self) {
        let mut clock = interval(CLOCK_INTERVAL);
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            let now = clock.tick().await;
            if self.is_destroyed() {
                break;
            }
            self.tick(now);
        }
        debug!("marker clock stopped");
    }

    /// Starts dragging at `point` (grid pixels) and seeks there.
    pub fn pointer_down(&self, point: Point) -> Option<f64> {
        let time = {
            let mut state = self.inner.state.borrow_mut();
            if state.destroyed || state.layout.is_empty() {
                return None;
            }
            let mapper = state.mapper();
            let point = mapper.clamp_point(point);
            state.marker.begin_drag(point);
            mapper.position_to_time(point.x, point.y)
        };
        Some(self.seek_and_notify(time))
    }

    /// Follows the pointer while dragging.
    pub fn pointer_move(&self, point: Point) -> Option<f64> {
        let time = {
            let mut state = self.inner.state.borrow_mut();
            if !state.marker.is_dragging() {
                return None;
            }
            let mapper = state.mapper();
            let point = mapper.clamp_point(point);
            state.marker.drag_to(point);
            mapper.position_to_time(point.x, point.y)
        };
        Some(self.seek_and_notify(time))
    }

    /// Ends a drag: the marker snaps to its row center and the view follows.
    pub fn pointer_up(&self) -> Option<f64> {
        let time = {
            let mut state = self.inner.state.borrow_mut();
            if !state.marker.is_dragging() {
                return None;
            }
            let mapper = state.mapper();
            let current = state.marker.current();
            let snapped = Point::new(current.x, mapper.snap_to_row(current.y));
            state.marker.end_drag(snapped);
            mapper.position_to_time(snapped.x, snapped.y)
        };
        self.seek_to(time);
        self.scroll_to_marker();
        Some(time)
    }

    /// Handles a key press. Returns false when the key was ignored.
    pub fn key_down(&self, key: GridKey) -> bool {
        if self.inner.host.duration().is_none() {
            return false;
        }
        if key == GridKey::Space {
            self.inner.host.toggle_playback();
            return true;
        }
        let Some(cell) = self.current_cell() else {
            return false;
        };
        let (col, row) = (cell.col as i64, cell.row as i64);
        let (col, row) = match key {
            GridKey::Left => (col - 1, row),
            GridKey::Right => (col + 1, row),
            GridKey::Up => (col, row - 1),
            GridKey::Down => (col, row + 1),
            GridKey::Home => (0, 0),
            GridKey::End => {
                let layout = self.layout();
                match layout.last_index().and_then(|last| layout.cell(last)) {
                    Some(last) => (last.col as i64, last.row as i64),
                    None => return false,
                }
            }
            GridKey::Space => return false,
        };
        self.move_to_cell(col, row).is_some()
    }

    fn seek_and_notify(&self, time: f64) -> f64 {
        self.seek_to(time);
        let cell = self.current_cell();
        self.inner.emit_seek(time, cell);
        time
    }

    fn scroll_to_marker(&self) {
        let viewport = self.inner.host.viewport();
        let mut state = self.inner.state.borrow_mut();
        let marker_y = state.marker.target().y;
        state
            .scroller
            .scroll_to_marker(marker_y, viewport, Instant::now());
    }
}

impl<H: GridHost + 'static> ThumbnailGrid<H> {
    /// Runs [`Self::rebuild`] on the current `LocalSet`.
    pub fn spawn_rebuild(&self) -> JoinHandle<Option<ExtractionStats>> {
        let grid = self.clone();
        tokio::task::spawn_local(async move { grid.rebuild().await })
    }

    /// Runs [`Self::run_clock`] on the current `LocalSet`.
    pub fn spawn_clock(&self) -> JoinHandle<()> {
        let grid = self.clone();
        tokio::task::spawn_local(async move { grid.run_clock().await })
    }
}

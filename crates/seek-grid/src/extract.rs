//! Thumbnail extraction: task identity, visible-first planning and the
//! cooperative per-handle extraction loop.
//!
//! Every suspension point is followed by a [`TaskToken::is_current`] check. A
//! superseded task stops at its next check and its in-flight results are
//! dropped; that is the only cancellation mechanism.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::cache::{SharedFrameCache, ThumbnailBlob};
use crate::error::{GridError, Result};
use crate::layout::{CellGeometry, GridLayout};
use crate::media::{DecodeHandle, VideoKey, Viewport};

/// Upper bound on waiting for a fresh decode handle to buffer a frame.
pub const DECODER_READY_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on waiting for one seek to complete.
pub const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
/// Delay between seek completion and capture, letting the frame present.
pub const FRAME_SETTLE_DELAY: Duration = Duration::from_millis(50);
/// Pause between cells so playback keeps priority.
pub const STEP_YIELD: Duration = Duration::from_millis(5);
/// A handle already this close to the sample time is captured without seeking.
pub const SEEK_REUSE_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone)]
struct ActiveTask {
    id: u64,
    video: VideoKey,
}

/// Tracks the single active extraction task of one grid.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    last_id: Cell<u64>,
    active: RefCell<Option<ActiveTask>>,
}

impl TaskRegistry {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Allocates the next task id for `video` and makes it the active task.
    pub fn begin(self: &Rc<Self>, video: VideoKey) -> TaskToken {
        let id = self.last_id.get() + 1;
        self.last_id.set(id);
        *self.active.borrow_mut() = Some(ActiveTask {
            id,
            video: video.clone(),
        });
        TaskToken {
            id,
            video,
            registry: Rc::clone(self),
        }
    }

    /// Leaves no task active.
    pub fn invalidate(&self) {
        *self.active.borrow_mut() = None;
    }

    pub fn active_id(&self) -> Option<u64> {
        self.active.borrow().as_ref().map(|task| task.id)
    }
}

/// Identity of one extraction task, passed into every async step.
#[derive(Debug, Clone)]
pub struct TaskToken {
    id: u64,
    video: VideoKey,
    registry: Rc<TaskRegistry>,
}

impl TaskToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn video(&self) -> &VideoKey {
        &self.video
    }

    /// True while this task is still the active one for the same video.
    pub fn is_current(&self) -> bool {
        self.registry
            .active
            .borrow()
            .as_ref()
            .is_some_and(|task| task.id == self.id && task.video == self.video)
    }
}

/// Cell indices in extraction order: the visible rows first, then the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPlan {
    pub visible: Vec<usize>,
    pub remainder: Vec<usize>,
}

impl ExtractionPlan {
    pub fn new(layout: &GridLayout, geometry: &CellGeometry, viewport: Viewport) -> Self {
        let rows = geometry.visible_rows(layout, viewport.scroll_top, viewport.height);
        let first = (rows.start * layout.columns).min(layout.total_cells);
        let end = (rows.end * layout.columns).min(layout.total_cells);

        Self {
            visible: (first..end).collect(),
            remainder: (0..first).chain(end..layout.total_cells).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.visible.len() + self.remainder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn phases(&self) -> [(&'static str, &[usize]); 2] {
        [("visible", &self.visible), ("remainder", &self.remainder)]
    }
}

/// Splits `indices` round-robin into `lanes` lists of near-equal length.
pub fn partition(indices: &[usize], lanes: usize) -> Vec<Vec<usize>> {
    let lanes = lanes.max(1);
    let mut out = vec![Vec::with_capacity(indices.len() / lanes + 1); lanes];
    for (position, index) in indices.iter().enumerate() {
        out[position % lanes].push(*index);
    }
    out
}

/// Receives extraction output for the task that produced it.
pub trait FrameSink {
    /// Shows `thumbnail` in cell `index`.
    fn display(&self, index: usize, thumbnail: &ThumbnailBlob);

    /// Reports a non-fatal failure.
    fn report(&self, error: GridError);
}

/// Decode handles owned by a grid between extraction tasks.
///
/// A finished or superseded task parks its handles here. They are released
/// once a newer task has its own handles ready, so the previous generation
/// keeps serving until the replacement exists.
#[derive(Debug)]
pub struct ExtractorLedger<D> {
    generation: Cell<u64>,
    parked: RefCell<Vec<D>>,
    closed: Cell<bool>,
}

impl<D> Default for ExtractorLedger<D> {
    fn default() -> Self {
        Self {
            generation: Cell::new(0),
            parked: RefCell::new(Vec::new()),
            closed: Cell::new(false),
        }
    }
}

impl<D: DecodeHandle> ExtractorLedger<D> {
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub fn parked_count(&self) -> usize {
        self.parked.borrow().len()
    }

    /// Starts a new generation, releasing every parked handle.
    fn install(&self) -> u64 {
        self.release_all();
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        generation
    }

    /// Keeps `handles` if they belong to the latest generation, else releases them.
    fn park(&self, generation: u64, handles: Vec<D>) {
        if !self.closed.get() && generation == self.generation.get() {
            self.parked.borrow_mut().extend(handles);
        } else {
            release_handles(handles);
        }
    }

    /// Releases every parked handle.
    pub fn release_all(&self) {
        let parked = std::mem::take(&mut *self.parked.borrow_mut());
        release_handles(parked);
    }

    /// Releases parked handles and makes every later `park` release instead.
    pub fn close(&self) {
        self.closed.set(true);
        self.release_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

fn release_handles<D: DecodeHandle>(handles: Vec<D>) {
    for mut handle in handles {
        handle.release();
    }
}

/// Counters describing one extraction task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub cache_hits: usize,
    pub extracted: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// One extraction task bound to its token, layout and output sink.
pub struct Extraction<'a, S> {
    token: TaskToken,
    layout: GridLayout,
    thumb_width: u32,
    thumb_height: u32,
    cache: &'a SharedFrameCache,
    sink: &'a S,
    stats: Cell<ExtractionStats>,
}

impl<'a, S: FrameSink> Extraction<'a, S> {
    pub fn new(
        token: TaskToken,
        layout: GridLayout,
        thumb_size: (u32, u32),
        cache: &'a SharedFrameCache,
        sink: &'a S,
    ) -> Self {
        Self {
            token,
            layout,
            thumb_width: thumb_size.0,
            thumb_height: thumb_size.1,
            cache,
            sink,
            stats: Cell::new(ExtractionStats::default()),
        }
    }

    pub fn token(&self) -> &TaskToken {
        &self.token
    }

    /// Opens `parallel` handles with `open`, extracts every planned cell and
    /// parks the handles in `ledger` when done.
    pub async fn run<D, F>(
        &self,
        open: F,
        parallel: usize,
        plan: &ExtractionPlan,
        ledger: &ExtractorLedger<D>,
    ) -> ExtractionStats
    where
        D: DecodeHandle,
        F: Fn(&VideoKey) -> Result<D>,
    {
        if !self.token.is_current() {
            return self.finish_cancelled();
        }
        if plan.is_empty() {
            debug!(task = self.token.id, "nothing to extract");
            return self.stats.get();
        }

        let mut handles = self.open_extractors(&open, parallel.max(1)).await;
        if !self.token.is_current() {
            release_handles(handles);
            return self.finish_cancelled();
        }
        let generation = ledger.install();
        if handles.is_empty() {
            warn!(task = self.token.id, "no decode handle available");
            return self.stats.get();
        }

        info!(
            task = self.token.id,
            video = %self.token.video,
            extractors = handles.len(),
            generation,
            cells = plan.len(),
            visible = plan.visible.len(),
            remainder = plan.remainder.len(),
            "extraction started"
        );
        self.run_phases(&mut handles, plan).await;
        ledger.park(generation, handles);

        let stats = self.stats.get();
        info!(
            task = self.token.id,
            cache_hits = stats.cache_hits,
            extracted = stats.extracted,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "extraction finished"
        );
        stats
    }

    async fn open_extractors<D, F>(&self, open: &F, count: usize) -> Vec<D>
    where
        D: DecodeHandle,
        F: Fn(&VideoKey) -> Result<D>,
    {
        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            match open(&self.token.video) {
                Ok(handle) => handles.push(handle),
                Err(error) => self.report(error),
            }
        }

        let readiness = join_all(handles.iter_mut().map(|handle| self.wait_ready(handle))).await;
        let mut usable = Vec::with_capacity(handles.len());
        for (mut handle, ready) in handles.into_iter().zip(readiness) {
            if ready {
                usable.push(handle);
            } else {
                handle.release();
            }
        }
        usable
    }

    /// Returns false when the handle failed to load and must be dropped.
    async fn wait_ready<D: DecodeHandle>(&self, handle: &mut D) -> bool {
        match timeout(DECODER_READY_TIMEOUT, handle.wait_ready()).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                self.report(GridError::DecoderOpen {
                    video: self.token.video.clone(),
                    reason: error.to_string(),
                });
                false
            }
            Err(_) => {
                warn!(
                    task = self.token.id,
                    ready_state = ?handle.ready_state(),
                    "decoder readiness timed out, continuing best-effort"
                );
                self.report(GridError::DecoderNotReady {
                    video: self.token.video.clone(),
                    waited: DECODER_READY_TIMEOUT,
                });
                true
            }
        }
    }

    async fn run_phases<D: DecodeHandle>(&self, handles: &mut [D], plan: &ExtractionPlan) {
        for (phase, indices) in plan.phases() {
            if !self.token.is_current() {
                self.mark_cancelled();
                return;
            }
            if indices.is_empty() {
                continue;
            }
            let lanes = partition(indices, handles.len());
            debug!(task = self.token.id, phase, cells = indices.len(), "phase started");
            join_all(
                handles
                    .iter_mut()
                    .zip(lanes)
                    .map(|(handle, lane)| self.run_lane(handle, lane)),
            )
            .await;
        }
    }

    async fn run_lane<D: DecodeHandle>(&self, handle: &mut D, lane: Vec<usize>) {
        for index in lane {
            if !self.token.is_current() {
                self.mark_cancelled();
                return;
            }

            let at_seconds = self.layout.sample_time(index);
            if let Some(frame) = self.cache.get(&self.token.video, at_seconds) {
                debug!(task = self.token.id, index, at_seconds, "frame cache hit");
                self.sink.display(index, &frame.resource);
                self.bump(|stats| stats.cache_hits += 1);
                continue;
            }

            let Some(captured) = self.extract_one(handle, at_seconds).await else {
                if !self.token.is_current() {
                    self.mark_cancelled();
                    return;
                }
                continue;
            };
            if !self.token.is_current() {
                self.mark_cancelled();
                return;
            }

            let blob = ThumbnailBlob::new(captured.bytes);
            self.cache.put(
                &self.token.video,
                at_seconds,
                captured.width,
                captured.height,
                blob.clone(),
            );
            self.sink.display(index, &blob);
            self.bump(|stats| stats.extracted += 1);

            sleep(STEP_YIELD).await;
        }
    }

    /// Seeks `handle` to `at_seconds` and captures a thumbnail.
    ///
    /// `None` when the task was superseded, the handle had no frame, or the
    /// capture failed (already reported).
    async fn extract_one<D: DecodeHandle>(
        &self,
        handle: &mut D,
        at_seconds: f64,
    ) -> Option<crate::media::CapturedFrame> {
        let positioned = (handle.current_time() - at_seconds).abs() < SEEK_REUSE_TOLERANCE
            && handle.ready_state().has_frame();

        if !positioned {
            handle.start_seek(at_seconds);
            match timeout(SEEK_TIMEOUT, handle.seeked()).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    self.report(GridError::Capture {
                        at_seconds,
                        reason: error.to_string(),
                    });
                    self.bump(|stats| stats.failed += 1);
                    return None;
                }
                Err(_) => {
                    self.report(GridError::SeekTimeout {
                        at_seconds,
                        waited: SEEK_TIMEOUT,
                    });
                }
            }
            if !self.token.is_current() {
                return None;
            }
            sleep(FRAME_SETTLE_DELAY).await;
            if !self.token.is_current() {
                return None;
            }
        }

        if !handle.ready_state().has_frame() {
            debug!(task = self.token.id, at_seconds, "no frame data, skipping cell");
            return None;
        }

        match handle.capture(self.thumb_width, self.thumb_height) {
            Ok(frame) => Some(frame),
            Err(error) => {
                self.report(GridError::Capture {
                    at_seconds,
                    reason: error.to_string(),
                });
                self.bump(|stats| stats.failed += 1);
                None
            }
        }
    }

    fn report(&self, error: GridError) {
        if self.token.is_current() {
            self.sink.report(error);
        }
    }

    fn bump(&self, update: impl FnOnce(&mut ExtractionStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    fn mark_cancelled(&self) {
        self.bump(|stats| stats.cancelled = true);
    }

    fn finish_cancelled(&self) -> ExtractionStats {
        self.mark_cancelled();
        debug!(task = self.token.id, "extraction superseded before start");
        self.stats.get()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use tokio::task::LocalSet;
    use tokio::time::{Instant, sleep};

    use super::{
        DECODER_READY_TIMEOUT, Extraction, ExtractionPlan, ExtractorLedger, FrameSink,
        TaskRegistry, partition,
    };
    use crate::cache::{SharedFrameCache, ThumbnailBlob};
    use crate::error::{GridError, GridErrorKind, Result};
    use crate::layout::{CellGeometry, compute_layout};
    use crate::media::{CapturedFrame, DecodeHandle, ReadyState, VideoKey, Viewport};

    #[derive(Debug, Default)]
    struct Journal {
        seeks: Vec<(u32, f64)>,
        captures: Vec<(u32, f64)>,
        released: Vec<u32>,
    }

    #[derive(Debug)]
    struct ScriptedDecoder {
        id: u32,
        journal: Rc<RefCell<Journal>>,
        ready: ReadyState,
        time: f64,
        pending: Option<f64>,
        seek_delay: Duration,
        ready_delay: Duration,
        fail_capture_at: Option<f64>,
        fail_ready: bool,
    }

    impl DecodeHandle for ScriptedDecoder {
        fn ready_state(&self) -> ReadyState {
            self.ready
        }

        fn current_time(&self) -> f64 {
            self.time
        }

        async fn wait_ready(&mut self) -> Result<()> {
            sleep(self.ready_delay).await;
            if self.fail_ready {
                return Err(GridError::Decode {
                    reason: "unsupported".to_string(),
                });
            }
            self.ready = ReadyState::EnoughData;
            Ok(())
        }

        fn start_seek(&mut self, seconds: f64) {
            self.journal.borrow_mut().seeks.push((self.id, seconds));
            self.pending = Some(seconds);
        }

        async fn seeked(&mut self) -> Result<()> {
            sleep(self.seek_delay).await;
            if let Some(target) = self.pending.take() {
                self.time = target;
            }
            Ok(())
        }

        fn capture(&mut self, width: u32, height: u32) -> Result<CapturedFrame> {
            if self
                .fail_capture_at
                .is_some_and(|t| (t - self.time).abs() < 1e-9)
            {
                return Err(GridError::Decode {
                    reason: "canvas tainted".to_string(),
                });
            }
            self.journal.borrow_mut().captures.push((self.id, self.time));
            Ok(CapturedFrame {
                width,
                height,
                bytes: vec![self.id as u8],
            })
        }

        fn release(&mut self) {
            self.journal.borrow_mut().released.push(self.id);
        }
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        displayed: RefCell<Vec<usize>>,
        errors: RefCell<Vec<GridErrorKind>>,
    }

    impl FrameSink for RecordingSink {
        fn display(&self, index: usize, _thumbnail: &ThumbnailBlob) {
            self.displayed.borrow_mut().push(index);
        }

        fn report(&self, error: GridError) {
            self.errors.borrow_mut().push(GridErrorKind::from(&error));
        }
    }

    struct Factory {
        journal: Rc<RefCell<Journal>>,
        next_id: RefCell<u32>,
        seek_delay: Duration,
        ready_delay: Duration,
        fail_capture_at: Option<f64>,
        fail_ready_ids: Vec<u32>,
        opened_state: ReadyState,
    }

    impl Factory {
        fn new(journal: &Rc<RefCell<Journal>>) -> Self {
            Self {
                journal: Rc::clone(journal),
                next_id: RefCell::new(0),
                seek_delay: Duration::from_millis(20),
                ready_delay: Duration::from_millis(10),
                fail_capture_at: None,
                fail_ready_ids: Vec::new(),
                opened_state: ReadyState::Metadata,
            }
        }

        fn open(&self, _video: &VideoKey) -> Result<ScriptedDecoder> {
            let mut next = self.next_id.borrow_mut();
            *next += 1;
            Ok(ScriptedDecoder {
                id: *next,
                journal: Rc::clone(&self.journal),
                ready: self.opened_state,
                time: 0.0,
                pending: None,
                seek_delay: self.seek_delay,
                ready_delay: self.ready_delay,
                fail_capture_at: self.fail_capture_at,
                fail_ready: self.fail_ready_ids.contains(&*next),
            })
        }
    }

    fn geometry() -> CellGeometry {
        CellGeometry {
            cell_width: 160.0,
            cell_height: 90.0,
            gap: 2.0,
        }
    }

    #[test]
    fn partition_spreads_indices_round_robin() {
        assert_eq!(
            partition(&[0, 1, 2, 3, 4], 2),
            vec![vec![0, 2, 4], vec![1, 3]]
        );
        assert_eq!(partition(&[7], 3), vec![vec![7], vec![], vec![]]);
        assert_eq!(partition(&[1, 2], 0), vec![vec![1, 2]]);
    }

    #[test]
    fn plan_puts_viewport_rows_first() {
        let layout = compute_layout(300.0, 4, 15.0);
        let plan = ExtractionPlan::new(
            &layout,
            &geometry(),
            Viewport {
                scroll_top: 92.0,
                height: 92.0,
            },
        );

        assert_eq!(plan.visible, vec![4, 5, 6, 7]);
        assert_eq!(
            plan.remainder,
            vec![0, 1, 2, 3, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19]
        );
        assert_eq!(plan.len(), layout.total_cells);
    }

    #[test]
    fn token_goes_stale_when_a_new_task_begins_or_registry_is_invalidated() {
        let registry = TaskRegistry::new();
        let first = registry.begin(VideoKey::from("a.mp4"));
        assert!(first.is_current());

        let second = registry.begin(VideoKey::from("a.mp4"));
        assert!(!first.is_current());
        assert!(second.is_current());
        assert!(second.id() > first.id());

        registry.invalidate();
        assert!(!second.is_current());
        assert_eq!(registry.active_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn extracts_every_cell_once_and_fills_the_cache() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let factory = Factory::new(&journal);
        let registry = TaskRegistry::new();
        let video = VideoKey::from("a.mp4");
        let cache = SharedFrameCache::default();
        let sink = RecordingSink::default();
        let layout = compute_layout(60.0, 2, 15.0);
        let plan = ExtractionPlan::new(&layout, &geometry(), Viewport::default());
        let ledger = ExtractorLedger::default();

        let extraction = Extraction::new(
            registry.begin(video.clone()),
            layout,
            (160, 90),
            &cache,
            &sink,
        );
        let stats = extraction
            .run(|v| factory.open(v), 1, &plan, &ledger)
            .await;

        assert_eq!(stats.extracted, 4);
        assert!(!stats.cancelled);
        assert_eq!(*sink.displayed.borrow(), vec![0, 1, 2, 3]);
        let seeks: Vec<f64> = journal.borrow().seeks.iter().map(|(_, t)| *t).collect();
        assert_eq!(seeks, vec![7.5, 22.5, 37.5, 52.5]);
        assert_eq!(cache.frame_count(), 4);
        assert_eq!(ledger.parked_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_cells_are_displayed_without_seeking() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let factory = Factory::new(&journal);
        let registry = TaskRegistry::new();
        let video = VideoKey::from("a.mp4");
        let cache = SharedFrameCache::default();
        cache.put(&video, 7.5, 160, 90, ThumbnailBlob::new(vec![1]));
        cache.put(&video, 22.5, 160, 90, ThumbnailBlob::new(vec![2]));
        let sink = RecordingSink::default();
        let layout = compute_layout(30.0, 2, 15.0);
        let plan = ExtractionPlan::new(&layout, &geometry(), Viewport::default());
        let ledger = ExtractorLedger::default();

        let extraction =
            Extraction::new(registry.begin(video), layout, (160, 90), &cache, &sink);
        let stats = extraction
            .run(|v| factory.open(v), 1, &plan, &ledger)
            .await;

        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.extracted, 0);
        assert!(journal.borrow().seeks.is_empty());
        assert_eq!(*sink.displayed.borrow(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn visible_cells_finish_before_remainder_starts_across_handles() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let factory = Factory::new(&journal);
        let registry = TaskRegistry::new();
        let cache = SharedFrameCache::default();
        let sink = RecordingSink::default();
        let layout = compute_layout(180.0, 3, 15.0);
        let plan = ExtractionPlan::new(
            &layout,
            &geometry(),
            Viewport {
                scroll_top: 184.0,
                height: 92.0,
            },
        );
        let ledger = ExtractorLedger::default();

        let extraction = Extraction::new(
            registry.begin(VideoKey::from("a.mp4")),
            layout,
            (160, 90),
            &cache,
            &sink,
        );
        let stats = extraction
            .run(|v| factory.open(v), 2, &plan, &ledger)
            .await;

        assert_eq!(stats.extracted, 12);
        let displayed = sink.displayed.borrow();
        let mut first_three: Vec<usize> = displayed[..3].to_vec();
        first_three.sort_unstable();
        assert_eq!(first_three, vec![6, 7, 8]);

        let handles_used: std::collections::BTreeSet<u32> =
            journal.borrow().captures.iter().map(|(id, _)| *id).collect();
        assert_eq!(handles_used.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_task_writes_nothing_after_new_task_is_active() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let journal = Rc::new(RefCell::new(Journal::default()));
                let factory = Rc::new(Factory::new(&journal));
                let registry = TaskRegistry::new();
                let cache = SharedFrameCache::default();
                let sink = Rc::new(RecordingSink::default());
                let layout = compute_layout(600.0, 4, 15.0);
                let plan = ExtractionPlan::new(&layout, &geometry(), Viewport::default());
                let ledger = Rc::new(ExtractorLedger::default());

                let token = registry.begin(VideoKey::from("a.mp4"));
                let running = {
                    let (factory, cache, sink, ledger) = (
                        Rc::clone(&factory),
                        cache.clone(),
                        Rc::clone(&sink),
                        Rc::clone(&ledger),
                    );
                    tokio::task::spawn_local(async move {
                        let extraction =
                            Extraction::new(token, layout, (160, 90), &cache, sink.as_ref());
                        extraction
                            .run(|v| factory.open(v), 1, &plan, &ledger)
                            .await
                    })
                };

                sleep(Duration::from_millis(200)).await;
                let _next = registry.begin(VideoKey::from("b.mp4"));
                let written_before = sink.displayed.borrow().len();
                assert!(written_before > 0);
                assert!(written_before < layout.total_cells);

                let stats = running.await.expect("task joins");
                assert!(stats.cancelled);
                assert_eq!(sink.displayed.borrow().len(), written_before);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn seek_timeout_falls_back_to_best_effort_capture() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut factory = Factory::new(&journal);
        factory.seek_delay = Duration::from_secs(30);
        let registry = TaskRegistry::new();
        let cache = SharedFrameCache::default();
        let sink = RecordingSink::default();
        let layout = compute_layout(15.0, 1, 15.0);
        let plan = ExtractionPlan::new(&layout, &geometry(), Viewport::default());
        let ledger = ExtractorLedger::default();

        let extraction = Extraction::new(
            registry.begin(VideoKey::from("a.mp4")),
            layout,
            (160, 90),
            &cache,
            &sink,
        );
        let stats = extraction
            .run(|v| factory.open(v), 1, &plan, &ledger)
            .await;

        assert_eq!(*sink.errors.borrow(), vec![GridErrorKind::Timeout]);
        assert_eq!(stats.extracted, 1);
        // The seek never landed; the frame was captured wherever the handle was.
        assert_eq!(journal.borrow().captures, vec![(1, 0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_plan_opens_no_decoder() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let factory = Factory::new(&journal);
        let registry = TaskRegistry::new();
        let cache = SharedFrameCache::default();
        let sink = RecordingSink::default();
        let layout = compute_layout(0.0, 3, 15.0);
        let plan = ExtractionPlan::new(&layout, &geometry(), Viewport::default());
        let ledger = ExtractorLedger::default();
        assert!(plan.is_empty());

        let extraction = Extraction::new(
            registry.begin(VideoKey::from("a.mp4")),
            layout,
            (160, 90),
            &cache,
            &sink,
        );
        let stats = extraction
            .run(|v| factory.open(v), 2, &plan, &ledger)
            .await;

        assert_eq!(stats.extracted, 0);
        assert_eq!(*factory.next_id.borrow(), 0);
        assert_eq!(ledger.parked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_keeps_the_handle_and_extracts_best_effort() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut factory = Factory::new(&journal);
        factory.ready_delay = DECODER_READY_TIMEOUT + Duration::from_secs(5);
        factory.opened_state = ReadyState::CurrentData;
        let registry = TaskRegistry::new();
        let cache = SharedFrameCache::default();
        let sink = RecordingSink::default();
        let layout = compute_layout(45.0, 3, 15.0);
        let plan = ExtractionPlan::new(&layout, &geometry(), Viewport::default());
        let ledger = ExtractorLedger::default();

        let started = Instant::now();
        let extraction = Extraction::new(
            registry.begin(VideoKey::from("a.mp4")),
            layout,
            (160, 90),
            &cache,
            &sink,
        );
        let stats = extraction
            .run(|v| factory.open(v), 1, &plan, &ledger)
            .await;

        assert!(started.elapsed() >= DECODER_READY_TIMEOUT);
        assert_eq!(*sink.errors.borrow(), vec![GridErrorKind::Timeout]);
        assert_eq!(stats.extracted, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(journal.borrow().seeks.len(), 3);
        assert!(journal.borrow().released.is_empty());
        assert_eq!(ledger.parked_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_is_reported_and_extraction_continues() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut factory = Factory::new(&journal);
        factory.fail_capture_at = Some(22.5);
        let registry = TaskRegistry::new();
        let cache = SharedFrameCache::default();
        let sink = RecordingSink::default();
        let layout = compute_layout(45.0, 3, 15.0);
        let plan = ExtractionPlan::new(&layout, &geometry(), Viewport::default());
        let ledger = ExtractorLedger::default();

        let extraction = Extraction::new(
            registry.begin(VideoKey::from("a.mp4")),
            layout,
            (160, 90),
            &cache,
            &sink,
        );
        let stats = extraction
            .run(|v| factory.open(v), 1, &plan, &ledger)
            .await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.extracted, 2);
        assert_eq!(*sink.displayed.borrow(), vec![0, 2]);
        assert_eq!(*sink.errors.borrow(), vec![GridErrorKind::Extraction]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handle_is_dropped_and_siblings_extract_everything() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut factory = Factory::new(&journal);
        factory.fail_ready_ids = vec![1];
        let registry = TaskRegistry::new();
        let cache = SharedFrameCache::default();
        let sink = RecordingSink::default();
        let layout = compute_layout(60.0, 4, 15.0);
        let plan = ExtractionPlan::new(&layout, &geometry(), Viewport::default());
        let ledger = ExtractorLedger::default();

        let extraction = Extraction::new(
            registry.begin(VideoKey::from("a.mp4")),
            layout,
            (160, 90),
            &cache,
            &sink,
        );
        let stats = extraction
            .run(|v| factory.open(v), 2, &plan, &ledger)
            .await;

        assert_eq!(stats.extracted, 4);
        assert_eq!(*sink.errors.borrow(), vec![GridErrorKind::Extraction]);
        assert_eq!(journal.borrow().released, vec![1]);
        assert!(journal.borrow().captures.iter().all(|(id, _)| *id == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn previous_generation_is_released_once_replacements_are_ready() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let factory = Factory::new(&journal);
        let registry = TaskRegistry::new();
        let cache = SharedFrameCache::default();
        let sink = RecordingSink::default();
        let layout = compute_layout(15.0, 1, 15.0);
        let plan = ExtractionPlan::new(&layout, &geometry(), Viewport::default());
        let ledger = ExtractorLedger::default();

        for name in ["a.mp4", "b.mp4"] {
            let extraction = Extraction::new(
                registry.begin(VideoKey::from(name)),
                layout,
                (160, 90),
                &cache,
                &sink,
            );
            extraction
                .run(|v| factory.open(v), 1, &plan, &ledger)
                .await;
        }

        assert_eq!(journal.borrow().released, vec![1]);
        assert_eq!(ledger.parked_count(), 1);
        assert_eq!(ledger.generation(), 2);

        ledger.release_all();
        assert_eq!(journal.borrow().released, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_ledger_releases_handles_of_a_finishing_task() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let factory = Factory::new(&journal);
        let registry = TaskRegistry::new();
        let cache = SharedFrameCache::default();
        let sink = RecordingSink::default();
        let layout = compute_layout(15.0, 1, 15.0);
        let plan = ExtractionPlan::new(&layout, &geometry(), Viewport::default());
        let ledger = ExtractorLedger::default();
        ledger.close();

        let extraction = Extraction::new(
            registry.begin(VideoKey::from("a.mp4")),
            layout,
            (160, 90),
            &cache,
            &sink,
        );
        extraction
            .run(|v| factory.open(v), 1, &plan, &ledger)
            .await;

        assert!(ledger.is_closed());
        assert_eq!(ledger.parked_count(), 0);
        assert_eq!(journal.borrow().released, vec![1]);
    }
}

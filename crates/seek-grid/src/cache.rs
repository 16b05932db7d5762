use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::media::VideoKey;
use crate::time::QuantizedTimestamp;

/// Number of videos retained when no capacity is configured.
pub const DEFAULT_VIDEO_CAPACITY: usize = 5;

/// Backing resource of a cached thumbnail.
///
/// Cloning yields another reference to the same resource. The cache calls
/// [`FrameResource::dispose`] exactly once on the copy it owns, when the frame
/// is replaced, its video is evicted, or the cache is cleared.
pub trait FrameResource: Clone {
    fn dispose(&mut self);
}

/// Encoded thumbnail bytes shared between the cache and displayed cells.
///
/// Disposal drops the cache's reference only; a cell still showing the image
/// keeps its own reference alive until it is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailBlob {
    bytes: Option<Arc<[u8]>>,
}

impl ThumbnailBlob {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: Some(bytes.into()),
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn is_disposed(&self) -> bool {
        self.bytes.is_none()
    }
}

impl FrameResource for ThumbnailBlob {
    fn dispose(&mut self) {
        self.bytes = None;
    }
}

/// One extracted thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFrame<R = ThumbnailBlob> {
    pub video: VideoKey,
    pub timestamp: QuantizedTimestamp,
    pub width: u32,
    pub height: u32,
    pub resource: R,
}

type VideoFrames<R> = BTreeMap<QuantizedTimestamp, CachedFrame<R>>;

/// Thumbnail cache spanning several recently viewed videos.
///
/// Eviction is per video: once `capacity` videos are held, adding frames for a
/// new video drops every frame of the least recently used one. Frames within a
/// video are never evicted individually.
///
/// # Example
/// ```
/// use seek_grid::cache::{FrameCache, ThumbnailBlob};
/// use seek_grid::media::VideoKey;
///
/// let mut cache = FrameCache::new(2);
/// let video = VideoKey::from("a.mp4");
/// cache.put(&video, 7.5, 160, 90, ThumbnailBlob::new(vec![1, 2, 3]));
///
/// assert!(cache.get(&video, 7.501).is_some());
/// assert!(cache.get(&video, 22.5).is_none());
/// ```
#[derive(Debug)]
pub struct FrameCache<R = ThumbnailBlob> {
    capacity: usize,
    videos: HashMap<VideoKey, VideoFrames<R>>,
    lru_order: VecDeque<VideoKey>,
}

impl<R: FrameResource> FrameCache<R> {
    /// Creates a cache retaining at most `capacity` videos.
    ///
    /// `capacity` must be positive.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame cache capacity must be positive");
        Self {
            capacity,
            videos: HashMap::new(),
            lru_order: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn video_count(&self) -> usize {
        self.videos.len()
    }

    /// Total frames across all retained videos.
    pub fn frame_count(&self) -> usize {
        self.videos.values().map(BTreeMap::len).sum()
    }

    pub fn contains_video(&self, video: &VideoKey) -> bool {
        self.videos.contains_key(video)
    }

    /// Returns the frame stored for `seconds`.
    ///
    /// A known video is marked as recently used whether or not the timestamp
    /// hits.
    pub fn get(&mut self, video: &VideoKey, seconds: f64) -> Option<CachedFrame<R>> {
        let timestamp = QuantizedTimestamp::from_seconds(seconds);
        let frame = self.videos.get(video)?.get(&timestamp).cloned();
        self.touch(video);
        frame
    }

    /// Inserts or replaces one frame.
    ///
    /// A replaced frame's resource is disposed before the new one is stored.
    pub fn put(&mut self, video: &VideoKey, seconds: f64, width: u32, height: u32, resource: R) {
        let timestamp = QuantizedTimestamp::from_seconds(seconds);
        let frames = self.ensure_video(video);
        let replaced = frames.insert(
            timestamp,
            CachedFrame {
                video: video.clone(),
                timestamp,
                width,
                height,
                resource,
            },
        );
        if let Some(mut old) = replaced {
            debug!(video = %video, %timestamp, "replacing cached frame");
            old.resource.dispose();
        }
    }

    /// Marks `video` as most recently used, creating its entry if needed.
    ///
    /// Creating an entry at capacity evicts the least recently used video.
    pub fn register_video(&mut self, video: &VideoKey) {
        let _ = self.ensure_video(video);
    }

    /// Disposes every frame of every video.
    pub fn clear(&mut self) {
        let disposed: usize = self
            .videos
            .drain()
            .map(|(_, frames)| dispose_all(frames))
            .sum();
        self.lru_order.clear();
        debug!(disposed, "frame cache cleared");
    }

    fn ensure_video(&mut self, video: &VideoKey) -> &mut VideoFrames<R> {
        if self.videos.contains_key(video) {
            self.touch(video);
        } else {
            while self.videos.len() >= self.capacity {
                if !self.evict_least_recent() {
                    break;
                }
            }
            self.lru_order.push_back(video.clone());
        }
        self.videos.entry(video.clone()).or_default()
    }

    fn touch(&mut self, video: &VideoKey) {
        if let Some(index) = self.lru_order.iter().position(|existing| existing == video) {
            let _ = self.lru_order.remove(index);
        }
        self.lru_order.push_back(video.clone());
    }

    fn evict_least_recent(&mut self) -> bool {
        let Some(oldest) = self.lru_order.pop_front() else {
            return false;
        };
        if let Some(frames) = self.videos.remove(&oldest) {
            let disposed = dispose_all(frames);
            debug!(video = %oldest, disposed, "evicted least recently used video");
        }
        true
    }
}

fn dispose_all<R: FrameResource>(frames: VideoFrames<R>) -> usize {
    let count = frames.len();
    for (_, mut frame) in frames {
        frame.resource.dispose();
    }
    count
}

/// Process-wide frame cache handle shared by every grid instance.
///
/// Created once by the host and cloned into each grid; a grid's `destroy`
/// never clears it, so revisiting a recent video is instant. Borrows are
/// never held across an await point.
#[derive(Debug)]
pub struct SharedFrameCache<R = ThumbnailBlob> {
    inner: Rc<RefCell<FrameCache<R>>>,
}

impl<R> Clone for SharedFrameCache<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: FrameResource> SharedFrameCache<R> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(FrameCache::new(capacity))),
        }
    }

    pub fn get(&self, video: &VideoKey, seconds: f64) -> Option<CachedFrame<R>> {
        self.inner.borrow_mut().get(video, seconds)
    }

    pub fn put(&self, video: &VideoKey, seconds: f64, width: u32, height: u32, resource: R) {
        self.inner
            .borrow_mut()
            .put(video, seconds, width, height, resource);
    }

    pub fn register_video(&self, video: &VideoKey) {
        self.inner.borrow_mut().register_video(video);
    }

    /// Disposes everything. Call only on process teardown.
    pub fn clear(&self) {
        self.inner.borrow_mut().clear();
    }

    pub fn contains_video(&self, video: &VideoKey) -> bool {
        self.inner.borrow().contains_video(video)
    }

    pub fn video_count(&self) -> usize {
        self.inner.borrow().video_count()
    }

    pub fn frame_count(&self) -> usize {
        self.inner.borrow().frame_count()
    }
}

impl Default for SharedFrameCache<ThumbnailBlob> {
    fn default() -> Self {
        Self::new(DEFAULT_VIDEO_CAPACITY)
    }
}

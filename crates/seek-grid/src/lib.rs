//! Thumbnail-grid scrubbing engine: lays a video's timeline out as a grid of
//! per-interval thumbnails, maps playback time to grid pixels and back,
//! extracts and caches thumbnails without blocking playback, and animates a
//! playhead marker with auto-scrolling.

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod grid;
pub mod layout;
pub mod mapper;
pub mod marker;
pub mod media;
pub mod scroll;
pub mod synthetic;
pub mod time;

pub use cache::{CachedFrame, FrameCache, FrameResource, SharedFrameCache, ThumbnailBlob};
pub use config::{GridConfig, GridConfigPatch};
pub use error::{GridError, GridErrorEvent, GridErrorKind, Result};
pub use extract::{ExtractionPlan, ExtractionStats, TaskRegistry, TaskToken};
pub use grid::{CellView, GridKey, GridView, ThumbnailGrid};
pub use layout::{Cell, CellGeometry, GridLayout, GridSpec, compute_layout};
pub use mapper::{CellInfo, CellTarget, CoordinateMapper, Point};
pub use marker::MarkerAnimator;
pub use media::{CapturedFrame, DecodeHandle, GridHost, ReadyState, VideoKey, Viewport};
pub use scroll::{AutoScroller, ScrollMode};
pub use time::{QuantizedTimestamp, format_clock};

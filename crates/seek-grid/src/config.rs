use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::DEFAULT_VIDEO_CAPACITY;
use crate::error::{GridError, Result};
use crate::layout::GridSpec;
use crate::scroll::ScrollMode;

pub const DEFAULT_COLUMNS: i64 = 3;
pub const DEFAULT_SECONDS_PER_CELL: f64 = 15.0;
pub const DEFAULT_THUMB_WIDTH: u32 = 160;
pub const DEFAULT_THUMB_HEIGHT: u32 = 90;

/// Grid settings a host may load from JSON or build in code.
///
/// Missing fields take their defaults. Out-of-range values are accepted here
/// and clamped by [`GridConfig::sanitized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub columns: i64,
    pub seconds_per_cell: f64,
    pub thumb_width: u32,
    pub thumb_height: u32,
    pub parallel_extractors: usize,
    pub scroll_mode: ScrollMode,
    pub cache_videos: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS,
            seconds_per_cell: DEFAULT_SECONDS_PER_CELL,
            thumb_width: DEFAULT_THUMB_WIDTH,
            thumb_height: DEFAULT_THUMB_HEIGHT,
            parallel_extractors: 1,
            scroll_mode: ScrollMode::default(),
            cache_videos: DEFAULT_VIDEO_CAPACITY,
        }
    }
}

impl GridConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| GridError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Returns a copy with every value in range, plus one `InvalidConfig`
    /// error per clamped field.
    pub fn sanitized(&self) -> (Self, Vec<GridError>) {
        let (spec, mut issues) = GridSpec::clamped(0.0, self.columns, self.seconds_per_cell);

        let mut at_least_one = |field: &'static str, value: usize| {
            if value == 0 {
                let issue = GridError::InvalidConfig {
                    field,
                    value: value.to_string(),
                    clamped_to: "1".to_string(),
                };
                warn!(%issue, "grid config clamped");
                issues.push(issue);
                1
            } else {
                value
            }
        };
        let thumb_width = at_least_one("thumb_width", self.thumb_width as usize) as u32;
        let thumb_height = at_least_one("thumb_height", self.thumb_height as usize) as u32;
        let parallel_extractors = at_least_one("parallel_extractors", self.parallel_extractors);
        let cache_videos = at_least_one("cache_videos", self.cache_videos);

        (
            Self {
                columns: i64::from(spec.columns),
                seconds_per_cell: spec.seconds_per_cell,
                thumb_width,
                thumb_height,
                parallel_extractors,
                scroll_mode: self.scroll_mode,
                cache_videos,
            },
            issues,
        )
    }

    pub fn thumb_size(&self) -> (u32, u32) {
        (self.thumb_width, self.thumb_height)
    }
}

/// Partial update applied by `configure`; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfigPatch {
    pub columns: Option<i64>,
    pub seconds_per_cell: Option<f64>,
    pub thumb_width: Option<u32>,
    pub thumb_height: Option<u32>,
}

impl GridConfigPatch {
    /// Writes the present fields into `config`.
    pub fn apply(&self, config: &mut GridConfig) {
        if let Some(columns) = self.columns {
            config.columns = columns;
        }
        if let Some(seconds_per_cell) = self.seconds_per_cell {
            config.seconds_per_cell = seconds_per_cell;
        }
        if let Some(thumb_width) = self.thumb_width {
            config.thumb_width = thumb_width;
        }
        if let Some(thumb_height) = self.thumb_height {
            config.thumb_height = thumb_height;
        }
    }
}

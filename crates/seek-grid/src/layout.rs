//! Grid layout: how many cells and rows a video needs, and the measured pixel
//! geometry of one cell once placeholders have been laid out by the host.

use std::ops::Range;

use tracing::warn;

use crate::error::GridError;
use crate::time::format_clock;

/// Smallest accepted column count.
pub const MIN_COLUMNS: u32 = 1;
/// Shortest accepted interval; anything below it, or non-finite, is clamped to it.
pub const MIN_SECONDS_PER_CELL: f64 = 1.0;
/// Gap assumed when the host cannot measure a rendered cell.
pub const FALLBACK_GAP: f64 = 2.0;
/// Sample times stay this far before the end of the media.
pub const SAMPLE_END_MARGIN: f64 = 0.1;

/// Layout inputs after clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub duration_seconds: f64,
    pub columns: u32,
    pub seconds_per_cell: f64,
}

impl GridSpec {
    /// Builds a spec, clamping columns and interval to safe minimums.
    ///
    /// Every clamp is returned as an `InvalidConfig` error so the caller can
    /// report it; the returned `GridSpec` is always usable.
    pub fn clamped(
        duration_seconds: f64,
        columns: i64,
        seconds_per_cell: f64,
    ) -> (Self, Vec<GridError>) {
        let mut issues = Vec::new();

        let safe_columns = if columns < i64::from(MIN_COLUMNS) {
            issues.push(GridError::InvalidConfig {
                field: "columns",
                value: columns.to_string(),
                clamped_to: MIN_COLUMNS.to_string(),
            });
            MIN_COLUMNS
        } else {
            u32::try_from(columns).unwrap_or(u32::MAX)
        };

        let interval_ok = seconds_per_cell.is_finite() && seconds_per_cell >= MIN_SECONDS_PER_CELL;
        let safe_interval = if !interval_ok {
            issues.push(GridError::InvalidConfig {
                field: "seconds_per_cell",
                value: seconds_per_cell.to_string(),
                clamped_to: MIN_SECONDS_PER_CELL.to_string(),
            });
            MIN_SECONDS_PER_CELL
        } else {
            seconds_per_cell
        };

        for issue in &issues {
            warn!(%issue, "grid input clamped");
        }

        (
            Self {
                duration_seconds,
                columns: safe_columns,
                seconds_per_cell: safe_interval,
            },
            issues,
        )
    }
}

/// Cell and row counts derived from a [`GridSpec`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub duration_seconds: f64,
    pub columns: usize,
    pub seconds_per_cell: f64,
    pub total_cells: usize,
    pub rows: usize,
}

/// One grid slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub index: usize,
    pub row: usize,
    pub col: usize,
}

/// Computes the layout for a video.
///
/// `columns` and `seconds_per_cell` are clamped like [`GridSpec::clamped`].
/// A missing, non-positive or non-finite duration yields an empty layout.
///
/// # Example
/// ```
/// use seek_grid::layout::compute_layout;
///
/// let layout = compute_layout(125.0, 4, 15.0);
/// assert_eq!(layout.total_cells, 9);
/// assert_eq!(layout.rows, 3);
/// ```
pub fn compute_layout(duration_seconds: f64, columns: i64, seconds_per_cell: f64) -> GridLayout {
    let (spec, _) = GridSpec::clamped(duration_seconds, columns, seconds_per_cell);
    GridLayout::from_spec(spec)
}

impl GridLayout {
    pub fn from_spec(spec: GridSpec) -> Self {
        let columns = spec.columns.max(MIN_COLUMNS) as usize;
        let duration = if spec.duration_seconds.is_finite() {
            spec.duration_seconds.max(0.0)
        } else {
            0.0
        };
        let total_cells = if duration > 0.0 {
            ((duration / spec.seconds_per_cell).ceil() as usize).max(1)
        } else {
            0
        };
        let rows = total_cells.div_ceil(columns);

        Self {
            duration_seconds: duration,
            columns,
            seconds_per_cell: spec.seconds_per_cell,
            total_cells,
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_cells == 0
    }

    /// Returns the cell at `index`, or `None` past the last cell.
    pub fn cell(&self, index: usize) -> Option<Cell> {
        (index < self.total_cells).then(|| Cell {
            index,
            row: index / self.columns,
            col: index % self.columns,
        })
    }

    pub fn last_index(&self) -> Option<usize> {
        self.total_cells.checked_sub(1)
    }

    /// Time sampled for the thumbnail of cell `index`: the middle of its
    /// interval, kept strictly inside the media.
    pub fn sample_time(&self, index: usize) -> f64 {
        let center = (index as f64 + 0.5) * self.seconds_per_cell;
        let latest = (self.duration_seconds - SAMPLE_END_MARGIN).max(0.0);
        center.min(latest).max(0.0)
    }

    pub fn cell_start_time(&self, index: usize) -> f64 {
        index as f64 * self.seconds_per_cell
    }

    /// `m:ss` label drawn on the cell.
    pub fn cell_label(&self, index: usize) -> String {
        format_clock(self.cell_start_time(index))
    }
}

/// Pixel geometry of one rendered cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGeometry {
    pub cell_width: f64,
    pub cell_height: f64,
    pub gap: f64,
}

impl Default for CellGeometry {
    fn default() -> Self {
        Self {
            cell_width: 0.0,
            cell_height: 0.0,
            gap: FALLBACK_GAP,
        }
    }
}

impl CellGeometry {
    /// Geometry derived from the whole grid box when no cell could be measured.
    pub fn fallback(layout: &GridLayout, grid_width: f64, grid_height: f64) -> Self {
        Self {
            cell_width: grid_width / layout.columns.max(1) as f64,
            cell_height: grid_height / layout.rows.max(1) as f64,
            gap: FALLBACK_GAP,
        }
    }

    pub fn column_pitch(&self) -> f64 {
        self.cell_width + self.gap
    }

    pub fn row_pitch(&self) -> f64 {
        self.cell_height + self.gap
    }

    /// Y of the center line of `row`.
    pub fn row_center(&self, row: usize) -> f64 {
        row as f64 * self.row_pitch() + self.cell_height / 2.0
    }

    /// Width and height of the whole grid.
    pub fn grid_size(&self, layout: &GridLayout) -> (f64, f64) {
        (
            span(layout.columns, self.cell_width, self.gap),
            span(layout.rows, self.cell_height, self.gap),
        )
    }

    /// Rows intersecting the viewport `[scroll_top, scroll_top + height)`.
    pub fn visible_rows(&self, layout: &GridLayout, scroll_top: f64, height: f64) -> Range<usize> {
        let pitch = self.row_pitch();
        if layout.rows == 0 || pitch <= 0.0 || height <= 0.0 {
            return 0..0;
        }
        let top = scroll_top.max(0.0);
        let first = ((top / pitch).floor() as usize).min(layout.rows);
        let last = (((top + height) / pitch).ceil() as usize).min(layout.rows);
        first..last.max(first)
    }
}

fn span(count: usize, size: f64, gap: f64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    count as f64 * size + (count - 1) as f64 * gap
}

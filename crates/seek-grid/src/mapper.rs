use serde::Serialize;

use crate::layout::{Cell, CellGeometry, GridLayout};

/// Keeps the continuous index strictly below `total_cells`.
const INDEX_EPSILON: f64 = 1e-6;

/// A point in grid pixel space, origin at the grid's top-left corner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Cell under the playhead, as reported to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellInfo {
    pub index: usize,
    pub col: usize,
    pub row: usize,
    pub time: f64,
    pub cell_start_time: f64,
    pub cell_end_time: f64,
}

/// Result of keyboard-style navigation to a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellTarget {
    pub cell: Cell,
    pub center: Point,
    pub time: f64,
}

/// Bidirectional mapping between playback time and grid pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    layout: GridLayout,
    geometry: CellGeometry,
}

impl CoordinateMapper {
    pub fn new(layout: GridLayout, geometry: CellGeometry) -> Self {
        Self { layout, geometry }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn geometry(&self) -> &CellGeometry {
        &self.geometry
    }

    /// Marker position for playback time `t`.
    ///
    /// X moves continuously through a cell; Y snaps to the row center.
    ///
    /// # Example
    /// ```
    /// use seek_grid::layout::{CellGeometry, compute_layout};
    /// use seek_grid::mapper::CoordinateMapper;
    ///
    /// let mapper = CoordinateMapper::new(
    ///     compute_layout(120.0, 4, 15.0),
    ///     CellGeometry { cell_width: 100.0, cell_height: 50.0, gap: 2.0 },
    /// );
    /// let p = mapper.time_to_position(22.5);
    /// assert_eq!((p.x, p.y), (152.0, 25.0));
    /// ```
    pub fn time_to_position(&self, t: f64) -> Point {
        let layout = &self.layout;
        let geometry = &self.geometry;
        if layout.total_cells == 0 || !t.is_finite() {
            return Point::new(0.0, geometry.cell_height / 2.0);
        }

        let max_index = (layout.total_cells as f64 - INDEX_EPSILON).max(0.0);
        let continuous = (t / layout.seconds_per_cell).clamp(0.0, max_index);
        let columns = layout.columns as f64;

        let row = (continuous / columns).floor();
        let position_in_row = continuous - row * columns;
        let col = position_in_row.floor().min(columns - 1.0);
        let col_fraction = (position_in_row - col).clamp(0.0, 1.0);

        Point::new(
            col * geometry.column_pitch() + col_fraction * geometry.cell_width,
            geometry.row_center(row as usize),
        )
    }

    /// Playback time under pixel `(x, y)`, clamped to `[0, duration]`.
    pub fn position_to_time(&self, x: f64, y: f64) -> f64 {
        let layout = &self.layout;
        let geometry = &self.geometry;
        if layout.total_cells == 0 {
            return 0.0;
        }

        let row = self.row_at(y) as f64;

        let column_pitch = geometry.column_pitch();
        let col = if column_pitch > 0.0 {
            (x / column_pitch).floor().clamp(0.0, layout.columns as f64 - 1.0)
        } else {
            0.0
        };
        let col_fraction = if geometry.cell_width > 0.0 {
            ((x - col * column_pitch) / geometry.cell_width).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let continuous = row * layout.columns as f64 + col + col_fraction;
        (continuous * layout.seconds_per_cell).clamp(0.0, layout.duration_seconds)
    }

    /// Nearest row for pixel height `y`.
    pub fn row_at(&self, y: f64) -> usize {
        let pitch = self.geometry.row_pitch();
        let last_row = self.layout.rows.saturating_sub(1) as f64;
        if pitch <= 0.0 || !y.is_finite() {
            return 0;
        }
        ((y - self.geometry.cell_height / 2.0) / pitch)
            .round()
            .clamp(0.0, last_row) as usize
    }

    /// Moves `y` to the center line of its nearest row.
    pub fn snap_to_row(&self, y: f64) -> f64 {
        self.geometry.row_center(self.row_at(y))
    }

    /// Clamps a point into the grid's pixel box.
    pub fn clamp_point(&self, point: Point) -> Point {
        let (width, height) = self.geometry.grid_size(&self.layout);
        Point::new(
            point.x.clamp(0.0, width.max(0.0)),
            point.y.clamp(0.0, height.max(0.0)),
        )
    }

    /// Resolves navigation to `(col, row)`.
    ///
    /// Columns past the right edge wrap into following rows; negative columns
    /// borrow from previous rows while one exists. Anything past the last cell
    /// lands on the last cell. The returned time is the cell center so that a
    /// later time-driven update lands back in the same cell.
    pub fn move_to_cell(&self, col: i64, row: i64) -> Option<CellTarget> {
        let layout = &self.layout;
        let last_index = layout.last_index()?;
        let columns = layout.columns as i64;

        let (mut col, mut row) = (col, row);
        if col >= columns {
            row = row.saturating_add(col / columns);
            col %= columns;
        } else if col < 0 {
            while col < 0 && row > 0 {
                row -= 1;
                col += columns;
            }
        }
        let col = col.max(0) as usize;
        let row = row.max(0) as usize;

        let requested = row.saturating_mul(layout.columns).saturating_add(col);
        let cell = layout.cell(requested.min(last_index))?;

        let center = Point::new(
            cell.col as f64 * self.geometry.column_pitch() + self.geometry.cell_width / 2.0,
            self.geometry.row_center(cell.row),
        );
        let time = ((cell.index as f64 + 0.5) * layout.seconds_per_cell)
            .min(layout.duration_seconds);

        Some(CellTarget { cell, center, time })
    }

    /// Cell containing playback time `t`.
    pub fn cell_at_time(&self, t: f64) -> Option<CellInfo> {
        let layout = &self.layout;
        let last_index = layout.last_index()?;
        let time = if t.is_finite() { t.max(0.0) } else { 0.0 };
        let index = ((time / layout.seconds_per_cell).floor() as usize).min(last_index);
        let cell = layout.cell(index)?;

        Some(CellInfo {
            index,
            col: cell.col,
            row: cell.row,
            time,
            cell_start_time: layout.cell_start_time(index),
            cell_end_time: layout.cell_start_time(index + 1),
        })
    }
}

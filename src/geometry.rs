//! Coordinate-to-key mapping for the printed overlay - pure functions, no
//! hardware.

use crate::config::{KeyRef, NumpadError};

/// The rectangle of the touchpad surface that carries the key grid
/// (device axis range minus the configured margins).
#[derive(Debug, Clone, Copy)]
pub struct UsableRect {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl UsableRect {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn width(&self) -> i32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> i32 {
        self.max_y - self.min_y
    }
}

/// Maps touchpad positions onto the configured key grid.
///
/// Column count is taken from the longest row; shorter rows simply have no
/// key in their trailing cells.
#[derive(Debug, Clone)]
pub struct KeyGrid {
    rows: Vec<Vec<Option<KeyRef>>>,
    rect: UsableRect,
    col_width: f64,
    row_height: f64,
}

impl KeyGrid {
    pub fn new(rows: Vec<Vec<Option<KeyRef>>>, rect: UsableRect) -> Result<Self, NumpadError> {
        if rows.is_empty() || rows[0].is_empty() {
            return Err(NumpadError::LayoutInvalid(
                "key grid must have at least one non-empty row".to_string(),
            ));
        }
        if rect.width() <= 0 || rect.height() <= 0 {
            return Err(NumpadError::BadDimensions(format!(
                "x {}-{}, y {}-{}",
                rect.min_x, rect.max_x, rect.min_y, rect.max_y
            )));
        }

        let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
        let row_count = rows.len();

        Ok(Self {
            rows,
            rect,
            col_width: f64::from(rect.width()) / col_count as f64,
            row_height: f64::from(rect.height()) / row_count as f64,
        })
    }

    pub fn rect(&self) -> UsableRect {
        self.rect
    }

    /// Map a position to the configured key under it. Returns `None` for
    /// positions outside the usable rectangle, in a grid gap, or past the
    /// end of a ragged row. Cell membership uses floor semantics, so a
    /// position exactly on an edge belongs to the cell starting there.
    pub fn map(&self, x: i32, y: i32) -> Option<&KeyRef> {
        if !self.rect.contains(x, y) {
            return None;
        }

        let col = (f64::from(x - self.rect.min_x) / self.col_width).floor() as i64;
        let row = (f64::from(y - self.rect.min_y) / self.row_height).floor() as i64;
        if row < 0 || col < 0 {
            return None;
        }

        self.rows
            .get(row as usize)?
            .get(col as usize)?
            .as_ref()
    }
}

/// Which corner of the touchpad an icon is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
}

/// Rectangle membership test for a gesture icon. Anchored at the full
/// device axis range, not the usable key rectangle, since the icons sit in
/// the touchpad corners outside the printed grid margins.
#[derive(Debug, Clone, Copy)]
pub struct IconRect {
    width: i32,
    height: i32,
    corner: Corner,
    pad_max_x: i32,
}

impl IconRect {
    pub fn new(width: i32, height: i32, corner: Corner, pad_max_x: i32) -> Self {
        Self {
            width,
            height,
            corner,
            pad_max_x,
        }
    }

    /// True when the position lies inside the icon. A zero-sized icon
    /// matches nothing, and the unset position sentinel is rejected.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        if self.width <= 0 || self.height <= 0 || x < 0 || y < 0 {
            return false;
        }
        match self.corner {
            Corner::TopLeft => x <= self.width && y <= self.height,
            Corner::TopRight => x >= self.pad_max_x - self.width && y <= self.height,
        }
    }
}

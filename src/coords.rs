use crate::error::ParseError;
use serde::{Deserialize, Serialize};

/// A screen coordinate handed to `Bridge::tap` / `Bridge::swipe`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Device input commands take whole pixels.
    pub fn to_pixels(self) -> (i64, i64) {
        (self.x.round() as i64, self.y.round() as i64)
    }
}

/// Parses a uiautomator bounds attribute (`"[x1,y1][x2,y2]"`) and returns the
/// midpoint of the box.
pub fn centroid(bounds: &str) -> Result<Point, ParseError> {
    let malformed = || ParseError::Bounds(bounds.to_string());

    let inner = bounds
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(malformed)?;
    let (first, second) = inner.split_once("][").ok_or_else(malformed)?;
    let (x1, y1) = parse_pair(first).ok_or_else(malformed)?;
    let (x2, y2) = parse_pair(second).ok_or_else(malformed)?;

    Ok(Point {
        x: (x1 + x2) as f64 / 2.0,
        y: (y1 + y2) as f64 / 2.0,
    })
}

fn parse_pair(s: &str) -> Option<(i64, i64)> {
    let (a, b) = s.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

//! Collinearity restrictions.
//!
//! A cell is restricted when it lies on one of the protected lines running
//! through an existing marker. Lines are given by a [`SlopeSet`] of primitive
//! lattice directions; each direction is walked both ways from its source.

use crate::geometry::{Bounds, Cell, CellIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// A primitive lattice direction `(dx, dy)` describing one protected line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[i32; 2]", into = "[i32; 2]")]
pub struct Slope {
    dx: i32,
    dy: i32,
}

#[derive(Debug, PartialEq, Eq, Error)]
#[error("slope {0}:{1} does not describe a line")]
pub struct InvalidSlope(pub i32, pub i32);

impl Slope {
    /// Builds a slope, reducing `(dx, dy)` to its primitive form.
    pub fn new(dx: i32, dy: i32) -> Result<Slope, InvalidSlope> {
        if dx == 0 && dy == 0 {
            return Err(InvalidSlope(dx, dy));
        }
        let g = gcd(dx.abs(), dy.abs());
        let (mut dx, mut dy) = (dx / g, dy / g);
        // (dx, dy) and (-dx, -dy) describe the same line
        if dx < 0 || (dx == 0 && dy < 0) {
            dx = -dx;
            dy = -dy;
        }
        Ok(Slope { dx, dy })
    }

    /// Whether `to` sits on this line through `from`, excluding `from` itself.
    fn passes(&self, from: Cell, to: Cell) -> bool {
        let ex = to.x as i64 - from.x as i64;
        let ey = to.y as i64 - from.y as i64;
        (ex != 0 || ey != 0) && ex * self.dy as i64 == ey * self.dx as i64
    }
}

impl TryFrom<[i32; 2]> for Slope {
    type Error = InvalidSlope;

    fn try_from(pair: [i32; 2]) -> Result<Slope, InvalidSlope> {
        Slope::new(pair[0], pair[1])
    }
}

impl From<Slope> for [i32; 2] {
    fn from(slope: Slope) -> [i32; 2] {
        [slope.dx, slope.dy]
    }
}

fn gcd(a: i32, b: i32) -> i32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// The configured set of protected lines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Slope>", into = "Vec<Slope>")]
pub struct SlopeSet {
    slopes: Vec<Slope>,
}

impl From<Vec<Slope>> for SlopeSet {
    fn from(slopes: Vec<Slope>) -> Self {
        SlopeSet::new(slopes)
    }
}

impl From<SlopeSet> for Vec<Slope> {
    fn from(set: SlopeSet) -> Self {
        set.slopes
    }
}

impl SlopeSet {
    pub fn new(slopes: impl IntoIterator<Item = Slope>) -> Self {
        let mut unique: Vec<Slope> = Vec::new();
        for slope in slopes {
            if !unique.contains(&slope) {
                unique.push(slope);
            }
        }
        SlopeSet { slopes: unique }
    }

    fn from_pairs(pairs: &[(i32, i32)]) -> Self {
        // pairs are literals known to be non-zero
        SlopeSet::new(pairs.iter().filter_map(|&(dx, dy)| Slope::new(dx, dy).ok()))
    }

    /// Horizontal, vertical, both diagonals and the four knight lines.
    pub fn standard() -> Self {
        SlopeSet::from_pairs(&[
            (1, 0),
            (0, 1),
            (1, 1),
            (1, -1),
            (1, 2),
            (2, 1),
            (1, -2),
            (2, -1),
        ])
    }

    /// Diagonals, knight lines, plus the 3:1 and 5:1 families.
    pub fn extended() -> Self {
        SlopeSet::from_pairs(&[
            (1, 1),
            (1, -1),
            (1, 2),
            (2, 1),
            (1, -2),
            (2, -1),
            (3, 1),
            (1, 3),
            (3, -1),
            (1, -3),
            (5, 1),
            (1, 5),
            (5, -1),
            (1, -5),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slope> {
        self.slopes.iter()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slopes.is_empty()
    }
}

impl Default for SlopeSet {
    fn default() -> Self {
        SlopeSet::standard()
    }
}

fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn ceil_div(a: i64, b: i64) -> i64 {
    -floor_div(-a, b)
}

/// Range of `k` for which `pos + k * step` stays within `[min, max]`.
fn step_range(pos: i32, step: i32, min: i32, max: i32) -> Option<(i64, i64)> {
    let (pos, step, min, max) = (pos as i64, step as i64, min as i64, max as i64);
    if step == 0 {
        return if pos >= min && pos <= max {
            Some((i64::MIN, i64::MAX))
        } else {
            None
        };
    }
    let (lo, hi) = if step > 0 {
        (ceil_div(min - pos, step), floor_div(max - pos, step))
    } else {
        (ceil_div(max - pos, step), floor_div(min - pos, step))
    };
    (lo <= hi).then_some((lo, hi))
}

/// Adds every cell of the ray `from + k * (dx, dy)`, `k >= 1`, that falls inside `window`.
fn walk_ray(from: Cell, dx: i32, dy: i32, window: &Bounds, out: &mut HashSet<Cell>) {
    let Some((lo_x, hi_x)) = step_range(from.x, dx, window.min_x, window.max_x) else {
        return;
    };
    let Some((lo_y, hi_y)) = step_range(from.y, dy, window.min_y, window.max_y) else {
        return;
    };
    let lo = lo_x.max(lo_y).max(1);
    let hi = hi_x.min(hi_y);
    for k in lo..=hi {
        out.insert(Cell::new(
            (from.x as i64 + k * dx as i64) as i32,
            (from.y as i64 + k * dy as i64) as i32,
        ));
    }
}

fn project_lines(source: Cell, slopes: &SlopeSet, window: &Bounds, out: &mut HashSet<Cell>) {
    for slope in slopes.iter() {
        walk_ray(source, slope.dx, slope.dy, window, out);
        walk_ray(source, -slope.dx, -slope.dy, window, out);
    }
}

/// Cells inside `window` lying on a protected line through `origin` or any marker.
///
/// Markers outside the window still contribute the part of their lines that
/// crosses it. `origin` itself is never part of the result.
pub fn restricted_points(
    origin: Cell,
    markers: &[Cell],
    window: &Bounds,
    slopes: &SlopeSet,
) -> HashSet<Cell> {
    let mut out = HashSet::new();
    if window.is_empty() {
        return out;
    }
    project_lines(origin, slopes, window, &mut out);
    for &marker in markers {
        project_lines(marker, slopes, window, &mut out);
    }
    out.remove(&origin);
    out
}

/// Same as [`restricted_points`], expressed as row-major indices into `window`.
pub fn restricted_cells(
    origin: Cell,
    markers: &[Cell],
    window: &Bounds,
    slopes: &SlopeSet,
) -> HashSet<CellIndex> {
    restricted_points(origin, markers, window, slopes)
        .into_iter()
        .filter_map(|cell| window.index_of(cell))
        .collect()
}

/// Markers whose protected lines pass through `candidate`.
pub fn blockers(candidate: Cell, markers: &[Cell], slopes: &SlopeSet) -> Vec<Cell> {
    markers
        .iter()
        .copied()
        .filter(|&marker| slopes.iter().any(|slope| slope.passes(marker, candidate)))
        .collect()
}

/// Scroll direction of a viewport query.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    None,
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::None => (0, 0),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = anyhow::Error;

    fn try_from(num: u8) -> anyhow::Result<Direction> {
        match num {
            0 => Ok(Direction::None),
            1 => Ok(Direction::Left),
            2 => Ok(Direction::Right),
            3 => Ok(Direction::Up),
            4 => Ok(Direction::Down),
            _ => Err(anyhow::anyhow!("Unsupported scroll direction '{}'", num)),
        }
    }
}

/// Running restricted-cell set for one scrolling viewport.
///
/// Marker-derived cells are kept between queries; each scroll step only scans
/// the newly exposed border strip. Lines through the viewport origin move with
/// it and are recomputed on every query.
pub struct ViewportTracker {
    radius: i32,
    state: Option<TrackedWindow>,
}

struct TrackedWindow {
    origin: Cell,
    window: Bounds,
    generation: u64,
    restricted: HashSet<Cell>,
}

/// Which scan a [`ViewportTracker::update`] performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scan {
    Full,
    Strip { cells: usize },
}

impl ViewportTracker {
    pub fn new(radius: i32) -> Self {
        ViewportTracker { radius, state: None }
    }

    pub fn window_for(&self, origin: Cell) -> Bounds {
        Bounds::centered(origin, self.radius)
    }

    /// Moves the viewport to `origin` and returns the restricted cells of the new window.
    ///
    /// `generation` identifies the marker set; any change forces a full rescan.
    pub fn update(
        &mut self,
        origin: Cell,
        direction: Direction,
        markers: &[Cell],
        slopes: &SlopeSet,
        generation: u64,
    ) -> (HashSet<Cell>, Scan) {
        let window = self.window_for(origin);
        let strip = self
            .state
            .as_ref()
            .filter(|tracked| tracked.generation == generation)
            .and_then(|tracked| border_strip(tracked, origin, direction, &window));

        let (tracked, scan) = match (self.state.take(), strip) {
            (Some(mut tracked), Some(strip)) => {
                let mut fresh = HashSet::new();
                for &marker in markers {
                    project_lines(marker, slopes, &strip, &mut fresh);
                }
                tracked.restricted.retain(|cell| window.contains(*cell));
                tracked.restricted.extend(fresh);
                tracked.origin = origin;
                tracked.window = window;
                (tracked, Scan::Strip { cells: strip.area() })
            }
            _ => {
                let mut restricted = HashSet::new();
                for &marker in markers {
                    project_lines(marker, slopes, &window, &mut restricted);
                }
                let tracked = TrackedWindow {
                    origin,
                    window,
                    generation,
                    restricted,
                };
                (tracked, Scan::Full)
            }
        };

        let mut result = tracked.restricted.clone();
        project_lines(origin, slopes, &window, &mut result);
        result.remove(&origin);
        self.state = Some(tracked);
        (result, scan)
    }
}

/// The strip newly exposed by moving `tracked` to `origin` along `direction`,
/// or `None` when the move cannot be served incrementally.
fn border_strip(
    tracked: &TrackedWindow,
    origin: Cell,
    direction: Direction,
    window: &Bounds,
) -> Option<Bounds> {
    let shift_x = origin.x - tracked.origin.x;
    let shift_y = origin.y - tracked.origin.y;
    let (dx, dy) = direction.delta();
    match (dx, dy) {
        (0, 0) => (shift_x == 0 && shift_y == 0).then_some(Bounds::new(0, 0, -1, -1)),
        (dx, 0) => {
            let steps = shift_x * dx;
            if shift_y != 0 || steps <= 0 || steps >= window.width() {
                return None;
            }
            Some(if dx > 0 {
                Bounds::new(window.max_x - steps + 1, window.min_y, window.max_x, window.max_y)
            } else {
                Bounds::new(window.min_x, window.min_y, window.min_x + steps - 1, window.max_y)
            })
        }
        (0, dy) => {
            let steps = shift_y * dy;
            if shift_x != 0 || steps <= 0 || steps >= window.height() {
                return None;
            }
            Some(if dy > 0 {
                Bounds::new(window.min_x, window.max_y - steps + 1, window.max_x, window.max_y)
            } else {
                Bounds::new(window.min_x, window.min_y, window.max_x, window.min_y + steps - 1)
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal() -> SlopeSet {
        SlopeSet::new([Slope::new(1, 0).unwrap()])
    }

    fn vertical() -> SlopeSet {
        SlopeSet::new([Slope::new(0, 1).unwrap()])
    }

    fn is_restricted(candidate: Cell, markers: &[Cell], slopes: &SlopeSet) -> bool {
        !blockers(candidate, markers, slopes).is_empty()
    }

    #[test]
    fn test_slope_normalizes_to_primitive() {
        assert_eq!(Slope::new(2, 4).unwrap(), Slope::new(1, 2).unwrap());
        assert_eq!(Slope::new(-1, -2).unwrap(), Slope::new(1, 2).unwrap());
        assert_eq!(Slope::new(0, -3).unwrap(), Slope::new(0, 1).unwrap());
        assert_eq!(Slope::new(0, 0), Err(InvalidSlope(0, 0)));
    }

    #[test]
    fn test_slope_set_deserializes_from_pairs() {
        let set: SlopeSet = serde_json::from_str("[[1,0],[2,0],[1,1]]").unwrap();
        assert_eq!(set.len(), 2);
        assert!(serde_json::from_str::<SlopeSet>("[[0,0]]").is_err());
    }

    #[test]
    fn test_presets() {
        assert_eq!(SlopeSet::standard().len(), 8);
        assert_eq!(SlopeSet::extended().len(), 14);
    }

    #[test]
    fn test_horizontal_line_from_corner_marker() {
        let window = Bounds::new(0, 0, 10, 10);
        let origin = Cell::new(5, 0);
        let cells = restricted_points(origin, &[Cell::new(0, 0)], &window, &horizontal());

        for x in 1..=10 {
            if x != 5 {
                assert!(cells.contains(&Cell::new(x, 0)), "missing ({}, 0)", x);
            }
        }
        assert!(!cells.contains(&origin));
        assert!(cells.iter().all(|cell| cell.y == 0));
    }

    #[test]
    fn test_same_column_markers_both_block() {
        let markers = [Cell::new(2, 2), Cell::new(2, 5)];
        let found = blockers(Cell::new(2, 8), &markers, &SlopeSet::standard());
        assert_eq!(found, markers.to_vec());
        assert!(is_restricted(Cell::new(2, 8), &markers, &vertical()));
    }

    #[test]
    fn test_knight_line_blocks_far_cells() {
        let markers = [Cell::new(0, 0)];
        let slopes = SlopeSet::standard();
        assert!(is_restricted(Cell::new(3, 6), &markers, &slopes));
        assert!(is_restricted(Cell::new(-4, 2), &markers, &slopes));
        assert!(!is_restricted(Cell::new(3, 1), &markers, &slopes));
        // a marker's own cell is not on its own lines
        assert!(!is_restricted(Cell::new(0, 0), &markers, &slopes));
    }

    #[test]
    fn test_origin_never_restricted() {
        let window = Bounds::new(-8, -8, 8, 8);
        let slopes = SlopeSet::extended();
        let markers = [Cell::new(0, 0), Cell::new(3, 3), Cell::new(-2, 4), Cell::new(1, 0)];
        for origin in window.cells() {
            let cells = restricted_points(origin, &markers, &window, &slopes);
            assert!(!cells.contains(&origin));
        }
    }

    #[test]
    fn test_order_independent() {
        let window = Bounds::new(-10, -10, 10, 10);
        let slopes = SlopeSet::standard();
        let mut markers = vec![Cell::new(1, 1), Cell::new(-5, 7), Cell::new(9, -3), Cell::new(0, 4)];
        let forward = restricted_cells(Cell::new(2, -1), &markers, &window, &slopes);
        markers.reverse();
        markers.swap(0, 2);
        let shuffled = restricted_cells(Cell::new(2, -1), &markers, &window, &slopes);
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn test_markers_outside_window_project_into_it() {
        let window = Bounds::new(10, 10, 12, 12);
        let cells = restricted_points(Cell::new(100, 100), &[Cell::new(0, 11)], &window, &horizontal());
        let expected: HashSet<Cell> = [Cell::new(10, 11), Cell::new(11, 11), Cell::new(12, 11)].into();
        assert_eq!(cells, expected);
    }

    #[test]
    fn test_empty_markers_only_origin_lines() {
        let window = Bounds::new(0, 0, 4, 4);
        let cells = restricted_points(Cell::new(20, 20), &[], &window, &SlopeSet::standard());
        // origin far away on the main diagonal
        let expected: HashSet<Cell> = (0..=4).map(|i| Cell::new(i, i)).collect();
        assert_eq!(cells, expected);
    }

    #[test]
    fn test_restricted_points_agree_with_blockers() {
        let window = Bounds::new(-6, -6, 6, 6);
        let slopes = SlopeSet::standard();
        let markers = [Cell::new(-3, 2), Cell::new(4, 4)];
        let origin = Cell::new(50, -50);
        let cells = restricted_points(origin, &[], &window, &slopes);
        let from_markers = restricted_points(origin, &markers, &window, &slopes);
        for cell in window.cells() {
            let expected = is_restricted(cell, &markers, &slopes) || cells.contains(&cell);
            assert_eq!(from_markers.contains(&cell), expected, "cell {:?}", cell);
        }
    }

    #[test]
    fn test_restricted_cells_use_window_indices() {
        let window = Bounds::new(0, 0, 3, 3);
        let cells = restricted_cells(Cell::new(0, 3), &[], &window, &horizontal());
        let expected: HashSet<CellIndex> = [13, 14, 15].into();
        assert_eq!(cells, expected);
    }

    #[test]
    fn test_viewport_scroll_matches_full_scan() {
        let slopes = SlopeSet::standard();
        let markers = [Cell::new(3, -7), Cell::new(-12, 5), Cell::new(20, 20)];
        let mut tracker = ViewportTracker::new(6);

        let (_, scan) = tracker.update(Cell::new(0, 0), Direction::None, &markers, &slopes, 1);
        assert_eq!(scan, Scan::Full);

        let path = [
            (Cell::new(1, 0), Direction::Right),
            (Cell::new(3, 0), Direction::Right),
            (Cell::new(3, -1), Direction::Up),
            (Cell::new(2, -1), Direction::Left),
            (Cell::new(2, 4), Direction::Down),
        ];
        for (origin, direction) in path {
            let (cells, scan) = tracker.update(origin, direction, &markers, &slopes, 1);
            assert!(matches!(scan, Scan::Strip { .. }));
            let window = tracker.window_for(origin);
            assert_eq!(cells, restricted_points(origin, &markers, &window, &slopes));
        }
    }

    #[test]
    fn test_viewport_rescans_on_generation_change_or_jump() {
        let slopes = SlopeSet::standard();
        let mut tracker = ViewportTracker::new(4);
        tracker.update(Cell::new(0, 0), Direction::None, &[], &slopes, 1);

        let markers = [Cell::new(1, 3)];
        let (cells, scan) = tracker.update(Cell::new(1, 0), Direction::Right, &markers, &slopes, 2);
        assert_eq!(scan, Scan::Full);
        assert!(cells.contains(&Cell::new(1, 4)));

        let (_, scan) = tracker.update(Cell::new(30, 0), Direction::Right, &markers, &slopes, 2);
        assert_eq!(scan, Scan::Full);

        let (_, scan) = tracker.update(Cell::new(30, 0), Direction::None, &markers, &slopes, 2);
        assert_eq!(scan, Scan::Strip { cells: 0 });
    }
}

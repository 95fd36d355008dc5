// =============================================================================
// Display Index — dense ordinal projection of a calendar-gapped series
// =============================================================================
//
// Charts render bars evenly spaced regardless of weekends, holidays, or feed
// gaps, so the chronological bar sequence is projected onto a gap-free
// zero-based ordinal axis. The projection is a pure function of the ordered
// bar sequence: it holds no incremental state and is recomputed whenever the
// bar count or date range changes.
// =============================================================================

use chrono::{DateTime, Utc};

use crate::market_data::Bar;

/// One projected point: a bar's ordinal position and its calendar timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectedPoint {
    pub ordinal: usize,
    pub timestamp: DateTime<Utc>,
}

/// Dense ordinal coordinate system for the current bar sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayIndex {
    points: Vec<ProjectedPoint>,
}

impl DisplayIndex {
    /// Project `bars` onto ordinals `0..bars.len()`, preserving order.
    pub fn project(bars: &[Bar]) -> Self {
        let points = bars
            .iter()
            .enumerate()
            .map(|(ordinal, bar)| ProjectedPoint {
                ordinal,
                timestamp: bar.timestamp,
            })
            .collect();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[ProjectedPoint] {
        &self.points
    }

    /// Ordinal of the bar at exactly `timestamp`, if present.
    pub fn ordinal_of(&self, timestamp: DateTime<Utc>) -> Option<usize> {
        self.points
            .binary_search_by_key(&timestamp, |p| p.timestamp)
            .ok()
    }

    /// Timestamp of the bar at `ordinal`.
    pub fn timestamp_of(&self, ordinal: usize) -> Option<DateTime<Utc>> {
        self.points.get(ordinal).map(|p| p.timestamp)
    }
}

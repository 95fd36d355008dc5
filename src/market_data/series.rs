// =============================================================================
// SeriesStore — ordered, deduplicated candle series for one (symbol, timeframe)
// =============================================================================
//
// The single source of truth for the chart. Bars are kept strictly increasing
// and unique by timestamp; the last bar is the open bar, the only one that
// may be mutated in place. Every effective mutation bumps `revision` so
// downstream memoized computations (indicators, display index) can cheaply
// tell "nothing changed" from "must recompute", and reports a `SeriesChange`
// so they can tell a right-edge change from an everything-moved change.
//
// Mutations are all-or-nothing: a batch that fails validation leaves the
// store in its last-known-good state.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{ChartError, ChartResult};
use crate::market_data::bar::{Bar, Timeframe};

/// What a mutation did to the bar sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesChange {
    /// Content replaced wholesale (initialize, or a merge that filled gaps).
    Replaced,
    /// `count` bars inserted strictly before the previous earliest bar.
    Prepended { count: usize },
    /// `count` bars appended after the previous latest bar.
    Appended { count: usize },
    /// Only the open (rightmost) bar changed in place.
    OpenUpdated,
}

/// Emitted after every effective mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesEvent {
    pub revision: u64,
    pub change: SeriesChange,
}

/// Ordered candle series for one (symbol, timeframe) session.
pub struct SeriesStore {
    symbol: String,
    timeframe: Timeframe,
    bars: Vec<Bar>,
    revision: u64,
    /// Most recent live trade price; used to open flat bars on rollover when
    /// no tick has arrived since the previous boundary.
    last_tick_price: Option<f64>,
}

impl SeriesStore {
    /// Create an empty store. Populated by the initial historical fetch
    /// before any tick is meaningful.
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bars: Vec::new(),
            revision: 0,
            last_tick_price: None,
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Earliest and latest bar timestamps, used by the backfill path to
    /// decide which range to request next.
    pub fn current_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.bars.first()?.timestamp, self.bars.last()?.timestamp))
    }

    // -------------------------------------------------------------------------
    // Historical data
    // -------------------------------------------------------------------------

    /// Replace the content wholesale. Fails with `InvalidData` (store
    /// untouched) if the batch is invalid or not strictly increasing.
    pub fn initialize(&mut self, bars: Vec<Bar>) -> ChartResult<SeriesEvent> {
        Self::validate_batch(&bars)?;
        self.bars = bars;
        Ok(self.bump(SeriesChange::Replaced))
    }

    /// Merge a historical batch into the series.
    ///
    /// Incoming bars whose timestamp already exists are discarded — existing
    /// wins, so a stale fetched duplicate can never overwrite the
    /// live-updated open bar. Everything else is inserted in timestamp order
    /// (prepend, gap fill, or append behind the latest bar). Idempotent and
    /// commutative over disjoint batches.
    ///
    /// Returns `None` when the batch added nothing (revision unchanged).
    pub fn merge_historical(&mut self, incoming: Vec<Bar>) -> ChartResult<Option<SeriesEvent>> {
        Self::validate_batch(&incoming)?;

        if self.bars.is_empty() {
            if incoming.is_empty() {
                return Ok(None);
            }
            self.bars = incoming;
            return Ok(Some(self.bump(SeriesChange::Replaced)));
        }

        let earliest = self.bars[0].timestamp;
        let latest = self.bars[self.bars.len() - 1].timestamp;

        let mut merged = Vec::with_capacity(self.bars.len() + incoming.len());
        let mut existing = self.bars.iter().cloned().peekable();
        let mut fresh = incoming.into_iter().peekable();

        let (mut before, mut mid, mut after) = (0usize, 0usize, 0usize);

        loop {
            match (existing.peek(), fresh.peek()) {
                (Some(e), Some(f)) => {
                    if e.timestamp < f.timestamp {
                        merged.push(existing.next().unwrap());
                    } else if e.timestamp > f.timestamp {
                        let bar = fresh.next().unwrap();
                        if bar.timestamp < earliest {
                            before += 1;
                        } else {
                            mid += 1;
                        }
                        merged.push(bar);
                    } else {
                        // Timestamp collision: existing wins, duplicate dropped.
                        merged.push(existing.next().unwrap());
                        fresh.next();
                    }
                }
                (Some(_), None) => merged.push(existing.next().unwrap()),
                (None, Some(_)) => {
                    let bar = fresh.next().unwrap();
                    if bar.timestamp > latest {
                        after += 1;
                    } else if bar.timestamp < earliest {
                        before += 1;
                    } else {
                        mid += 1;
                    }
                    merged.push(bar);
                }
                (None, None) => break,
            }
        }

        let inserted = before + mid + after;
        if inserted == 0 {
            debug!(symbol = %self.symbol, "merge added nothing (all duplicates)");
            return Ok(None);
        }

        self.bars = merged;

        let change = if mid == 0 && after == 0 {
            SeriesChange::Prepended { count: before }
        } else if mid == 0 && before == 0 {
            SeriesChange::Appended { count: after }
        } else {
            SeriesChange::Replaced
        };
        debug!(
            symbol = %self.symbol,
            inserted,
            total = self.bars.len(),
            "historical merge applied"
        );
        Ok(Some(self.bump(change)))
    }

    // -------------------------------------------------------------------------
    // Live ticks & rollover
    // -------------------------------------------------------------------------

    /// Fold a live last-traded-price into the series.
    ///
    /// If `at` has passed the open bar's boundary the series is rolled
    /// forward first, so a tick never lands in a bar whose window has
    /// closed. Ticks against an empty store are dropped (there is no open
    /// bar until initial history arrives).
    pub fn apply_tick(&mut self, price: f64, at: DateTime<Utc>) -> Option<SeriesEvent> {
        if self.bars.is_empty() {
            debug!(symbol = %self.symbol, price, "tick dropped: series not initialized");
            return None;
        }

        let rolled = self.roll_forward(at);
        self.last_tick_price = Some(price);

        if let Some(open) = self.bars.last_mut() {
            open.fold_tick(price);
        }

        match rolled {
            Some(SeriesEvent {
                change: SeriesChange::Appended { count },
                ..
            }) => Some(self.bump(SeriesChange::Appended { count })),
            _ => Some(self.bump(SeriesChange::OpenUpdated)),
        }
    }

    /// Seal the open bar and append one flat bar per boundary that has
    /// passed. Triggered by the boundary scheduler (and defensively by
    /// `apply_tick`); idempotent — firing twice for the same boundary adds
    /// nothing.
    ///
    /// Flat bars open at the last known price (most recent tick, falling
    /// back to the open bar's close) with zero volume, so the series stays
    /// contiguous across feed gaps.
    pub fn roll_forward(&mut self, now: DateTime<Utc>) -> Option<SeriesEvent> {
        let last_ts = self.bars.last()?.timestamp;
        let price = self
            .last_tick_price
            .unwrap_or_else(|| self.bars.last().map(|b| b.close).unwrap_or(0.0));

        let step = self.timeframe.duration();
        let mut boundary = last_ts + step;
        let mut appended = 0usize;
        while boundary <= now {
            self.bars.push(Bar::flat(boundary, price));
            appended += 1;
            boundary += step;
        }

        if appended == 0 {
            return None;
        }
        debug!(
            symbol = %self.symbol,
            appended,
            price,
            "rollover: sealed open bar, appended flat bar(s)"
        );
        Some(self.bump(SeriesChange::Appended { count: appended }))
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn bump(&mut self, change: SeriesChange) -> SeriesEvent {
        self.revision += 1;
        SeriesEvent {
            revision: self.revision,
            change,
        }
    }

    fn validate_batch(bars: &[Bar]) -> ChartResult<()> {
        for bar in bars {
            bar.validate()?;
        }
        for pair in bars.windows(2) {
            if pair[0].timestamp >= pair[1].timestamp {
                return Err(ChartError::InvalidData(format!(
                    "timestamps not strictly increasing at {}",
                    pair[1].timestamp
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 8, h, m, 0).unwrap()
    }

    fn bar(h: u32, m: u32, close: f64) -> Bar {
        Bar {
            timestamp: at(h, m),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    fn store_with(bars: Vec<Bar>) -> SeriesStore {
        let mut s = SeriesStore::new("RELIANCE", Timeframe(5));
        s.initialize(bars).unwrap();
        s
    }

    fn timestamps(s: &SeriesStore) -> Vec<DateTime<Utc>> {
        s.bars().iter().map(|b| b.timestamp).collect()
    }

    // ---- initialize -------------------------------------------------------

    #[test]
    fn initialize_rejects_out_of_order() {
        let mut s = SeriesStore::new("RELIANCE", Timeframe(5));
        let err = s.initialize(vec![bar(10, 5, 101.0), bar(10, 0, 100.0)]);
        assert!(err.is_err());
        assert!(s.is_empty());
        assert_eq!(s.revision(), 0);
    }

    #[test]
    fn initialize_rejects_duplicate_timestamps() {
        let mut s = SeriesStore::new("RELIANCE", Timeframe(5));
        assert!(s
            .initialize(vec![bar(10, 0, 100.0), bar(10, 0, 101.0)])
            .is_err());
    }

    // ---- merge ------------------------------------------------------------

    #[test]
    fn merge_is_commutative_over_disjoint_batches() {
        let b1 = vec![bar(9, 50, 99.0), bar(9, 55, 99.5)];
        let b2 = vec![bar(10, 0, 100.0), bar(10, 5, 101.0)];

        let mut s1 = SeriesStore::new("RELIANCE", Timeframe(5));
        s1.merge_historical(b1.clone()).unwrap();
        s1.merge_historical(b2.clone()).unwrap();

        let mut s2 = SeriesStore::new("RELIANCE", Timeframe(5));
        s2.merge_historical(b2).unwrap();
        s2.merge_historical(b1).unwrap();

        assert_eq!(s1.bars(), s2.bars());
        assert_eq!(s1.len(), 4);
        let ts = timestamps(&s1);
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn merge_is_idempotent() {
        let batch = vec![bar(9, 55, 99.5), bar(10, 0, 100.0)];
        let mut s = store_with(vec![bar(10, 0, 100.0), bar(10, 5, 102.0)]);

        let first = s.merge_historical(batch.clone()).unwrap();
        assert!(first.is_some());
        let rev = s.revision();
        let bars_after_first = s.bars().to_vec();

        // Re-merging the same batch adds nothing and leaves the revision alone.
        let second = s.merge_historical(batch).unwrap();
        assert!(second.is_none());
        assert_eq!(s.revision(), rev);
        assert_eq!(s.bars(), bars_after_first.as_slice());
    }

    #[test]
    fn merge_existing_wins_on_open_bar_collision() {
        let mut s = store_with(vec![bar(10, 0, 100.0), bar(10, 5, 102.0)]);
        // Live tick bumps the open bar.
        s.apply_tick(105.0, at(10, 6)).unwrap();
        assert_eq!(s.bars().last().unwrap().close, 105.0);

        // A stale fetched duplicate at the open bar's timestamp is dropped.
        let stale = vec![bar(10, 5, 42.0)];
        let ev = s.merge_historical(stale).unwrap();
        assert!(ev.is_none());
        assert_eq!(s.bars().last().unwrap().close, 105.0);
    }

    #[test]
    fn merge_classifies_pure_prepend() {
        let mut s = store_with(vec![bar(10, 0, 100.0), bar(10, 5, 102.0)]);
        let ev = s
            .merge_historical(vec![bar(9, 50, 98.0), bar(9, 55, 99.0)])
            .unwrap()
            .unwrap();
        assert_eq!(ev.change, SeriesChange::Prepended { count: 2 });
        assert_eq!(s.len(), 4);
        assert_eq!(s.bars()[0].timestamp, at(9, 50));
    }

    #[test]
    fn merge_gap_fill_reports_replaced() {
        let mut s = store_with(vec![bar(10, 0, 100.0), bar(10, 10, 103.0)]);
        let ev = s.merge_historical(vec![bar(10, 5, 101.0)]).unwrap().unwrap();
        assert_eq!(ev.change, SeriesChange::Replaced);
        assert_eq!(timestamps(&s), vec![at(10, 0), at(10, 5), at(10, 10)]);
    }

    #[test]
    fn merge_invalid_batch_leaves_store_untouched() {
        let mut s = store_with(vec![bar(10, 0, 100.0)]);
        let rev = s.revision();
        let res = s.merge_historical(vec![bar(9, 55, 99.0), bar(9, 50, 98.0)]);
        assert!(res.is_err());
        assert_eq!(s.len(), 1);
        assert_eq!(s.revision(), rev);
    }

    // ---- ticks ------------------------------------------------------------

    #[test]
    fn tick_updates_only_the_open_bar() {
        // tf=5m, bars at 10:00 and 10:05, tick 105 arrives at 10:06.
        let mut s = store_with(vec![bar(10, 0, 100.0), bar(10, 5, 102.0)]);
        let before_count = s.len();

        let ev = s.apply_tick(105.0, at(10, 6)).unwrap();
        assert_eq!(ev.change, SeriesChange::OpenUpdated);
        assert_eq!(s.len(), before_count);

        let open = s.bars().last().unwrap();
        assert_eq!(open.timestamp, at(10, 5));
        assert_eq!(open.open, 102.0);
        assert_eq!(open.high, 105.0);
        assert_eq!(open.close, 105.0);
        // The sealed bar is untouched.
        assert_eq!(s.bars()[0].close, 100.0);
    }

    #[test]
    fn tick_on_empty_store_is_dropped() {
        let mut s = SeriesStore::new("RELIANCE", Timeframe(5));
        assert!(s.apply_tick(100.0, at(10, 0)).is_none());
        assert!(s.is_empty());
        assert_eq!(s.revision(), 0);
    }

    #[test]
    fn tick_past_boundary_rolls_first_then_folds() {
        let mut s = store_with(vec![bar(10, 0, 100.0), bar(10, 5, 102.0)]);
        s.apply_tick(105.0, at(10, 6)).unwrap();

        // Next tick arrives after the 10:10 boundary, before the timer fires.
        let ev = s.apply_tick(107.0, at(10, 11)).unwrap();
        assert_eq!(ev.change, SeriesChange::Appended { count: 1 });
        assert_eq!(s.len(), 3);

        // Sealed bar keeps its live-updated values.
        let sealed = &s.bars()[1];
        assert_eq!(sealed.close, 105.0);

        // New open bar opened flat at the prior last price, then folded 107.
        let open = s.bars().last().unwrap();
        assert_eq!(open.timestamp, at(10, 10));
        assert_eq!(open.open, 105.0);
        assert_eq!(open.close, 107.0);
        assert_eq!(open.volume, 0.0);
    }

    // ---- rollover ---------------------------------------------------------

    #[test]
    fn rollover_without_ticks_appends_flat_bar() {
        // Tick 105 at 10:06, then the 10:10 boundary fires with no
        // intervening tick.
        let mut s = store_with(vec![bar(10, 0, 100.0), bar(10, 5, 102.0)]);
        s.apply_tick(105.0, at(10, 6)).unwrap();

        let ev = s.roll_forward(at(10, 10)).unwrap();
        assert_eq!(ev.change, SeriesChange::Appended { count: 1 });

        let open = s.bars().last().unwrap();
        assert_eq!(open.timestamp, at(10, 10));
        assert_eq!(open.open, 105.0);
        assert_eq!(open.high, 105.0);
        assert_eq!(open.low, 105.0);
        assert_eq!(open.close, 105.0);
        assert_eq!(open.volume, 0.0);

        // Previous bar sealed unchanged.
        let sealed = &s.bars()[1];
        assert_eq!(sealed.close, 105.0);
        assert_eq!(sealed.high, 105.0);
    }

    #[test]
    fn rollover_catches_up_across_missed_boundaries() {
        let mut s = store_with(vec![bar(10, 0, 100.0)]);
        s.apply_tick(101.0, at(10, 2)).unwrap();

        // Process resumes after three boundaries have elapsed.
        let ev = s.roll_forward(at(10, 16)).unwrap();
        assert_eq!(ev.change, SeriesChange::Appended { count: 3 });
        assert_eq!(
            timestamps(&s),
            vec![at(10, 0), at(10, 5), at(10, 10), at(10, 15)]
        );
        for b in &s.bars()[1..] {
            assert_eq!(b.open, 101.0);
            assert_eq!(b.close, 101.0);
            assert_eq!(b.volume, 0.0);
        }
    }

    #[test]
    fn rollover_is_idempotent_per_boundary() {
        let mut s = store_with(vec![bar(10, 0, 100.0), bar(10, 5, 102.0)]);
        s.apply_tick(105.0, at(10, 6)).unwrap();

        assert!(s.roll_forward(at(10, 10)).is_some());
        let rev = s.revision();
        // Second fire for the same boundary: no new bar, revision unchanged.
        assert!(s.roll_forward(at(10, 10)).is_none());
        assert_eq!(s.revision(), rev);
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn rollover_without_any_tick_uses_last_close() {
        let mut s = store_with(vec![bar(10, 0, 100.0)]);
        let ev = s.roll_forward(at(10, 5)).unwrap();
        assert_eq!(ev.change, SeriesChange::Appended { count: 1 });
        assert_eq!(s.bars().last().unwrap().open, 100.0);
    }

    #[test]
    fn rollover_on_empty_store_is_noop() {
        let mut s = SeriesStore::new("RELIANCE", Timeframe(5));
        assert!(s.roll_forward(at(10, 0)).is_none());
    }

    // ---- range ------------------------------------------------------------

    #[test]
    fn current_range_reports_edges() {
        let s = store_with(vec![bar(10, 0, 100.0), bar(10, 5, 101.0)]);
        assert_eq!(s.current_range(), Some((at(10, 0), at(10, 5))));
        assert_eq!(SeriesStore::new("X", Timeframe(5)).current_range(), None);
    }
}

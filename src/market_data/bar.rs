// =============================================================================
// Bar & Timeframe — the primitive units of the candle series
// =============================================================================
//
// A `Bar` is one OHLCV record for a fixed time window. Once a later bar
// exists it is sealed and must never be mutated; only the rightmost (open)
// bar accumulates ticks in place.
//
// A `Timeframe` is an integer number of minutes. Boundaries fall on
// wall-clock minute marks divisible by the timeframe (10:00, 10:05, ... for
// a 5-minute frame).
// =============================================================================

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ChartError;

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Build a flat bar (open == high == low == close) at `timestamp`.
    ///
    /// Used by the rollover path when a boundary passes without any trade:
    /// the new open bar starts at the last known price with zero volume.
    pub fn flat(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// Validate OHLC consistency: finite fields, non-negative volume, and
    /// `low <= min(open, close) <= max(open, close) <= high`.
    pub fn validate(&self) -> Result<(), ChartError> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(ChartError::InvalidData(format!(
                "non-finite field in bar at {}",
                self.timestamp
            )));
        }
        if self.volume < 0.0 {
            return Err(ChartError::InvalidData(format!(
                "negative volume in bar at {}",
                self.timestamp
            )));
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(ChartError::InvalidData(format!(
                "inconsistent OHLC in bar at {} (o={} h={} l={} c={})",
                self.timestamp, self.open, self.high, self.low, self.close
            )));
        }
        Ok(())
    }

    /// Fold a last-traded-price tick into this bar: `close = p`,
    /// `high = max(high, p)`, `low = min(low, p)`. `open`, `timestamp`, and
    /// `volume` are never touched by a tick.
    pub fn fold_tick(&mut self, price: f64) {
        self.close = price;
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Candle width in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeframe(pub u32);

impl Timeframe {
    pub fn duration(self) -> Duration {
        Duration::minutes(i64::from(self.0))
    }

    /// The boundary at or before `at`: seconds truncated, minute-of-hour
    /// rounded down to a multiple of the timeframe.
    pub fn floor(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let tf = self.0.max(1).min(60);
        let minute = (at.minute() / tf) * tf;
        at.with_minute(minute)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(at)
    }

    /// The first boundary strictly after `at`.
    pub fn next_boundary(self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.floor(at) + self.duration()
    }

    /// Parse the wire form used by the history endpoint, e.g. `"5minute"`.
    pub fn parse(s: &str) -> Option<Self> {
        let n: u32 = s.trim().strip_suffix("minute")?.parse().ok()?;
        (n > 0).then_some(Self(n))
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}minute", self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 8, h, m, s).unwrap()
    }

    #[test]
    fn flat_bar_is_valid() {
        let b = Bar::flat(at(10, 5, 0), 101.5);
        assert!(b.validate().is_ok());
        assert_eq!(b.open, b.close);
        assert_eq!(b.volume, 0.0);
    }

    #[test]
    fn validate_rejects_inconsistent_ohlc() {
        let mut b = Bar::flat(at(10, 0, 0), 100.0);
        b.high = 99.0; // high below the body
        assert!(b.validate().is_err());

        let mut b = Bar::flat(at(10, 0, 0), 100.0);
        b.volume = -1.0;
        assert!(b.validate().is_err());

        let mut b = Bar::flat(at(10, 0, 0), 100.0);
        b.close = f64::NAN;
        assert!(b.validate().is_err());
    }

    #[test]
    fn fold_tick_updates_close_and_extremes_only() {
        let mut b = Bar {
            timestamp: at(10, 5, 0),
            open: 102.0,
            high: 102.0,
            low: 102.0,
            close: 102.0,
            volume: 7.0,
        };
        b.fold_tick(105.0);
        assert_eq!(b.open, 102.0);
        assert_eq!(b.high, 105.0);
        assert_eq!(b.low, 102.0);
        assert_eq!(b.close, 105.0);
        assert_eq!(b.volume, 7.0);

        b.fold_tick(101.0);
        assert_eq!(b.high, 105.0);
        assert_eq!(b.low, 101.0);
        assert_eq!(b.close, 101.0);
    }

    #[test]
    fn floor_and_next_boundary() {
        let tf = Timeframe(5);
        assert_eq!(tf.floor(at(10, 6, 30)), at(10, 5, 0));
        assert_eq!(tf.floor(at(10, 5, 0)), at(10, 5, 0));
        assert_eq!(tf.next_boundary(at(10, 6, 30)), at(10, 10, 0));
        // Exactly on a boundary: the next one is a full frame away.
        assert_eq!(tf.next_boundary(at(10, 5, 0)), at(10, 10, 0));
        // Hour crossing.
        assert_eq!(tf.next_boundary(at(10, 57, 12)), at(11, 0, 0));
    }

    #[test]
    fn timeframe_wire_form_roundtrip() {
        assert_eq!(Timeframe(5).to_string(), "5minute");
        assert_eq!(Timeframe::parse("15minute"), Some(Timeframe(15)));
        assert_eq!(Timeframe::parse("0minute"), None);
        assert_eq!(Timeframe::parse("5m"), None);
    }
}

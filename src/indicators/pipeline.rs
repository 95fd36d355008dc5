// =============================================================================
// Indicator Pipeline — memoized, suffix-incremental recomputation
// =============================================================================
//
// The active ladder mirrors the chart overlays: EMA(12), EMA(26),
// MACD(12, 26, 9) with signal and divergence, and SMA(50) over volume. All
// series are computed over the identical bar sequence and stay index-aligned
// with it.
//
// Recompute policy, keyed off the store's `SeriesEvent`:
//   - same revision      -> nothing to do
//   - OpenUpdated        -> recompute only the last index
//   - Appended { count } -> extend each series by `count` indices
//   - Prepended/Replaced -> full recompute (a prepend shifts every EMA seed,
//                           so the whole-series fallback is the correct one)
//
// Indicator state is derived, never authoritative: every value here is
// reproducible by replaying the raw closes/volumes through the same math.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::ema::{calculate_ema, ema_step};
use crate::indicators::macd::{calculate_macd, signal_step};
use crate::indicators::sma::{calculate_sma, sma_at};
use crate::market_data::{Bar, SeriesChange, SeriesEvent};

/// Window lengths for the active indicator ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub macd_signal: usize,
    pub volume_sma: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_fast: 12,
            ema_slow: 26,
            macd_signal: 9,
            volume_sma: 50,
        }
    }
}

impl IndicatorConfig {
    /// Overall run-up requirement: the maximum bar count any active
    /// indicator needs before producing a defined value.
    pub fn run_up(&self) -> usize {
        let macd_chain = self.ema_slow + self.macd_signal.saturating_sub(1);
        macd_chain
            .max(self.ema_fast)
            .max(self.ema_slow)
            .max(self.volume_sma)
    }
}

/// Per-bar derived values, index-aligned with the bar sequence. `None` marks
/// a bar inside the indicator's run-up window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorFrame {
    pub ema_fast: Vec<Option<f64>>,
    pub ema_slow: Vec<Option<f64>>,
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub divergence: Vec<Option<f64>>,
    pub volume_sma: Vec<Option<f64>>,
}

impl IndicatorFrame {
    pub fn len(&self) -> usize {
        self.macd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macd.is_empty()
    }
}

/// The pipeline itself: owns the memoized frame and the raw source columns.
pub struct IndicatorPipeline {
    config: IndicatorConfig,
    closes: Vec<f64>,
    volumes: Vec<f64>,
    frame: IndicatorFrame,
    memo_revision: Option<u64>,
}

impl IndicatorPipeline {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            config,
            closes: Vec::new(),
            volumes: Vec::new(),
            frame: IndicatorFrame::default(),
            memo_revision: None,
        }
    }

    pub fn frame(&self) -> &IndicatorFrame {
        &self.frame
    }

    /// Bring the frame up to date with `bars` after the given store event.
    /// Returns `false` when the memoized frame was already current.
    pub fn recompute(&mut self, bars: &[Bar], event: SeriesEvent) -> bool {
        if self.memo_revision == Some(event.revision) {
            return false;
        }

        match event.change {
            SeriesChange::OpenUpdated
                if !bars.is_empty() && self.closes.len() == bars.len() =>
            {
                self.update_last(bars);
            }
            SeriesChange::Appended { count }
                if self.closes.len() + count == bars.len() =>
            {
                self.extend(bars, count);
            }
            _ => self.full(bars),
        }

        self.memo_revision = Some(event.revision);
        true
    }

    // -------------------------------------------------------------------------
    // Recompute strategies
    // -------------------------------------------------------------------------

    /// Whole-series recompute — always correct, used for prepends, wholesale
    /// replacement, and any shape mismatch.
    fn full(&mut self, bars: &[Bar]) {
        self.closes = bars.iter().map(|b| b.close).collect();
        self.volumes = bars.iter().map(|b| b.volume).collect();

        let cfg = self.config;
        self.frame.ema_fast = calculate_ema(&self.closes, cfg.ema_fast);
        self.frame.ema_slow = calculate_ema(&self.closes, cfg.ema_slow);

        let out = calculate_macd(&self.closes, cfg.ema_fast, cfg.ema_slow, cfg.macd_signal);
        self.frame.macd = out.macd;
        self.frame.signal = out.signal;
        self.frame.divergence = out.divergence;

        self.frame.volume_sma = calculate_sma(&self.volumes, cfg.volume_sma);
    }

    /// Extend every series by `count` freshly appended bars. Each new index
    /// is produced by the same per-index recurrences the full pass uses.
    fn extend(&mut self, bars: &[Bar], count: usize) {
        let cfg = self.config;
        let start = bars.len() - count;
        for (i, bar) in bars.iter().enumerate().skip(start) {
            self.closes.push(bar.close);
            self.volumes.push(bar.volume);

            let prev_fast = self.value_before(&self.frame.ema_fast, i);
            let fast = ema_step(&self.closes, cfg.ema_fast, i, prev_fast);
            self.frame.ema_fast.push(fast);

            let prev_slow = self.value_before(&self.frame.ema_slow, i);
            let slow = ema_step(&self.closes, cfg.ema_slow, i, prev_slow);
            self.frame.ema_slow.push(slow);

            let macd = match (fast, slow) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            };
            self.frame.macd.push(macd);

            let prev_signal = self.value_before(&self.frame.signal, i);
            let signal = signal_step(&self.frame.macd, cfg.macd_signal, i, prev_signal);
            self.frame.signal.push(signal);

            self.frame.divergence.push(match (macd, signal) {
                (Some(m), Some(s)) => Some(m - s),
                _ => None,
            });

            self.frame
                .volume_sma
                .push(sma_at(&self.volumes, cfg.volume_sma, i));
        }
    }

    /// The open bar changed in place: only the last index of each series can
    /// have moved (the prefix values are fixed by sealed bars).
    fn update_last(&mut self, bars: &[Bar]) {
        let cfg = self.config;
        let i = bars.len() - 1;
        self.closes[i] = bars[i].close;
        self.volumes[i] = bars[i].volume;

        let prev_fast = self.value_before(&self.frame.ema_fast, i);
        let fast = ema_step(&self.closes, cfg.ema_fast, i, prev_fast);
        self.frame.ema_fast[i] = fast;

        let prev_slow = self.value_before(&self.frame.ema_slow, i);
        let slow = ema_step(&self.closes, cfg.ema_slow, i, prev_slow);
        self.frame.ema_slow[i] = slow;

        let macd = match (fast, slow) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        };
        self.frame.macd[i] = macd;

        let prev_signal = self.value_before(&self.frame.signal, i);
        self.frame.signal[i] = signal_step(&self.frame.macd, cfg.macd_signal, i, prev_signal);

        self.frame.divergence[i] = match (macd, self.frame.signal[i]) {
            (Some(m), Some(s)) => Some(m - s),
            _ => None,
        };

        self.frame.volume_sma[i] = sma_at(&self.volumes, cfg.volume_sma, i);
    }

    fn value_before(&self, series: &[Option<f64>], i: usize) -> Option<f64> {
        if i == 0 {
            None
        } else {
            series.get(i - 1).copied().flatten()
        }
    }
}

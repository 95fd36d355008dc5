// =============================================================================
// MACD — Moving Average Convergence / Divergence
// =============================================================================
//
//   macd       = EMA(fast) - EMA(slow)
//   signal     = EMA(signal_period) of the macd line
//   divergence = macd - signal
//
// All three series are computed over the identical input sequence and stay
// index-aligned with it. The macd line is only defined where both EMAs are
// (from index `slow - 1`); the signal line needs a further `signal_period`
// defined macd values, seeded with their simple average — the same seeding
// rule the component EMAs use.
// =============================================================================

use crate::indicators::ema::{calculate_ema, multiplier};

/// Index-aligned MACD output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacdOutput {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub divergence: Vec<Option<f64>>,
}

/// macd value at index `i` from the two component EMA series.
pub fn macd_at(ema_fast: &[Option<f64>], ema_slow: &[Option<f64>], i: usize) -> Option<f64> {
    Some(ema_fast.get(i).copied()?? - ema_slow.get(i).copied()??)
}

/// Signal value at index `i`: an EMA over the (None-prefixed) macd line.
///
/// Seeded with the simple average of the first `period` defined macd values;
/// before that point the signal is undefined.
pub fn signal_step(
    macd_line: &[Option<f64>],
    period: usize,
    i: usize,
    prev: Option<f64>,
) -> Option<f64> {
    if period == 0 || i >= macd_line.len() {
        return None;
    }
    let current = macd_line[i]?;
    let start = macd_line.iter().position(Option::is_some)?;
    let defined = i.checked_sub(start)? + 1;
    if defined < period {
        return None;
    }
    if defined == period {
        let mut sum = 0.0;
        for v in &macd_line[start..=i] {
            sum += (*v)?;
        }
        let seed = sum / period as f64;
        return seed.is_finite().then_some(seed);
    }
    let prev = prev?;
    let m = multiplier(period);
    let v = current * m + prev * (1.0 - m);
    v.is_finite().then_some(v)
}

/// Compute the full MACD output for `values` (typically closes).
pub fn calculate_macd(
    values: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> MacdOutput {
    let ema_fast = calculate_ema(values, fast);
    let ema_slow = calculate_ema(values, slow);

    let macd: Vec<Option<f64>> = (0..values.len())
        .map(|i| macd_at(&ema_fast, &ema_slow, i))
        .collect();

    let mut signal = Vec::with_capacity(values.len());
    let mut prev = None;
    for i in 0..values.len() {
        let v = signal_step(&macd, signal_period, i, prev);
        signal.push(v);
        prev = v;
    }

    let divergence: Vec<Option<f64>> = macd
        .iter()
        .zip(&signal)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();

    MacdOutput {
        macd,
        signal,
        divergence,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn macd_defined_from_slow_minus_one() {
        let out = calculate_macd(&ramp(40), 3, 6, 4);
        for i in 0..5 {
            assert_eq!(out.macd[i], None, "macd should be undefined at {i}");
        }
        assert!(out.macd[5].is_some());
    }

    #[test]
    fn signal_needs_signal_period_defined_macd_values() {
        let out = calculate_macd(&ramp(40), 3, 6, 4);
        // macd defined from index 5; signal needs 4 defined values -> index 8.
        for i in 0..8 {
            assert_eq!(out.signal[i], None, "signal should be undefined at {i}");
        }
        assert!(out.signal[8].is_some());

        // Seed is the simple average of macd[5..=8].
        let seed: f64 = (5..=8).map(|i| out.macd[i].unwrap()).sum::<f64>() / 4.0;
        assert!((out.signal[8].unwrap() - seed).abs() < 1e-12);
    }

    #[test]
    fn divergence_is_macd_minus_signal() {
        let out = calculate_macd(&ramp(40), 3, 6, 4);
        for i in 0..40 {
            match (out.macd[i], out.signal[i]) {
                (Some(m), Some(s)) => {
                    assert!((out.divergence[i].unwrap() - (m - s)).abs() < 1e-12)
                }
                _ => assert_eq!(out.divergence[i], None),
            }
        }
    }

    #[test]
    fn all_series_stay_index_aligned() {
        let out = calculate_macd(&ramp(30), 12, 26, 9);
        assert_eq!(out.macd.len(), 30);
        assert_eq!(out.signal.len(), 30);
        assert_eq!(out.divergence.len(), 30);
        // 30 bars is enough for macd (26) but not signal (26 + 9 - 1 = 34).
        assert!(out.macd[29].is_some());
        assert!(out.signal[29].is_none());
    }

    #[test]
    fn flat_series_produces_zero_macd() {
        let out = calculate_macd(&vec![100.0; 50], 12, 26, 9);
        assert!((out.macd[49].unwrap()).abs() < 1e-12);
        assert!((out.signal[49].unwrap()).abs() < 1e-12);
        assert!((out.divergence[49].unwrap()).abs() < 1e-12);
    }
}

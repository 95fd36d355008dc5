// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = value_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The first EMA value is seeded with the SMA of the first `period` inputs.
// Output is index-aligned with the input: bars inside the run-up window carry
// an explicit `None`, never zero, so consumers can tell "undefined" from
// "flat at zero".
// =============================================================================

/// Smoothing factor for a given look-back `period`.
pub fn multiplier(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

/// EMA value at index `i`, given the raw inputs and the value at `i - 1`.
///
/// Defined from index `period - 1` onward; the seed index recomputes the SMA
/// of the first `period` inputs, so calling this again after the last input
/// changed yields the corrected value.
pub fn ema_step(values: &[f64], period: usize, i: usize, prev: Option<f64>) -> Option<f64> {
    if period == 0 || i >= values.len() || i + 1 < period {
        return None;
    }
    if i + 1 == period {
        let seed = values[..period].iter().sum::<f64>() / period as f64;
        return seed.is_finite().then_some(seed);
    }
    let prev = prev?;
    let m = multiplier(period);
    let ema = values[i] * m + prev * (1.0 - m);
    ema.is_finite().then_some(ema)
}

/// Compute the full EMA series, index-aligned with `values`.
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev = None;
    for i in 0..values.len() {
        let v = ema_step(values, period, i, prev);
        out.push(v);
        prev = v;
    }
    out
}

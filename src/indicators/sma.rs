// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Arithmetic mean of the trailing `period` inputs. The source field is chosen
// by the caller (closes for price overlays, volume for the volume average).
// Index-aligned output with explicit `None` inside the run-up window.
// =============================================================================

/// SMA value at index `i`: mean of `values[i + 1 - period ..= i]`.
pub fn sma_at(values: &[f64], period: usize, i: usize) -> Option<f64> {
    if period == 0 || i >= values.len() || i + 1 < period {
        return None;
    }
    let window = &values[i + 1 - period..=i];
    let mean = window.iter().sum::<f64>() / period as f64;
    mean.is_finite().then_some(mean)
}

/// Compute the full SMA series, index-aligned with `values`.
pub fn calculate_sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..values.len()).map(|i| sma_at(values, period, i)).collect()
}

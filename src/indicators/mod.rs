// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator math (SMA, EMA, MACD) plus the pipeline
// that keeps a memoized, index-aligned frame of derived values in sync with
// the candle series. Undefined values (inside an indicator's run-up window)
// are explicit `None`s, never zero.

pub mod ema;
pub mod macd;
pub mod pipeline;
pub mod sma;

pub use pipeline::{IndicatorConfig, IndicatorFrame, IndicatorPipeline};

// =============================================================================
// Error taxonomy for the chart core
// =============================================================================
//
// Four failure classes, matching how they propagate:
//   - InvalidData:    rejected before any store mutation (all-or-nothing)
//   - MalformedTick:  dropped and counted, the open bar is never touched
//   - Fetch:          surfaced to the session as an event, existing data kept
//   - ConnectionLost: the feed task reconnects; the series survives untouched
// =============================================================================

use thiserror::Error;

/// Errors produced by the candle series core.
#[derive(Debug, Error)]
pub enum ChartError {
    /// Malformed or out-of-order historical data. The store is left in its
    /// last-known-good state.
    #[error("invalid historical data: {0}")]
    InvalidData(String),

    /// A live tick payload that could not be parsed. Dropped; never mutates
    /// the open bar.
    #[error("malformed tick: {0}")]
    MalformedTick(String),

    /// Historical fetch failed (transport, HTTP status, or non-ok payload
    /// status). Existing data is never cleared on fetch failure.
    #[error("history fetch failed: {0}")]
    Fetch(String),

    /// The tick subscription dropped. The feed task reconnects and
    /// resubscribes; accumulated series state is retained.
    #[error("tick feed connection lost: {0}")]
    ConnectionLost(String),
}

pub type ChartResult<T> = Result<T, ChartError>;

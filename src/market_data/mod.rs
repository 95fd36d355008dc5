// =============================================================================
// Market Data Module
// =============================================================================
//
// The candle series core and its two edge adapters: the websocket tick feed
// and the HTTP history client.

pub mod bar;
pub mod history;
pub mod series;
pub mod tick_stream;

pub use bar::{Bar, Timeframe};
pub use history::HistoryClient;
pub use series::{SeriesChange, SeriesEvent, SeriesStore};
pub use tick_stream::{FeedStats, LiveTick};

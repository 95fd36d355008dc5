// =============================================================================
// Runtime Configuration — chart session settings
// =============================================================================
//
// Everything a session needs to come up: instrument, timeframe, the two feed
// endpoints, and the backfill window sizes. All fields carry serde defaults
// so that an older config file missing new fields still loads.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::indicators::IndicatorConfig;
use crate::market_data::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "RELIANCE".to_string()
}

fn default_timeframe_minutes() -> u32 {
    5
}

fn default_data_url() -> String {
    "http://localhost:8000/candles".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8001/ticks".to_string()
}

fn default_lookback_days() -> i64 {
    7
}

fn default_extension_days() -> i64 {
    7
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

// =============================================================================
// ChartConfig
// =============================================================================

/// Top-level runtime configuration for one chart session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Instrument the session tracks and subscribes to.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Candle width in minutes.
    #[serde(default = "default_timeframe_minutes")]
    pub timeframe_minutes: u32,

    /// Historical candle endpoint (POST).
    #[serde(default = "default_data_url")]
    pub data_url: String,

    /// Live tick websocket endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Days of history fetched on the initial load.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    /// Days fetched per pan-to-load-more left extension.
    #[serde(default = "default_extension_days")]
    pub extension_days: i64,

    /// Delay before reconnecting a dropped tick feed.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Indicator ladder window lengths.
    #[serde(default)]
    pub indicators: IndicatorConfig,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe_minutes: default_timeframe_minutes(),
            data_url: default_data_url(),
            ws_url: default_ws_url(),
            lookback_days: default_lookback_days(),
            extension_days: default_extension_days(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            indicators: IndicatorConfig::default(),
        }
    }
}

impl ChartConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read chart config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse chart config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            timeframe = %config.timeframe(),
            "chart config loaded"
        );

        Ok(config)
    }

    pub fn timeframe(&self) -> Timeframe {
        Timeframe(self.timeframe_minutes.max(1))
    }
}

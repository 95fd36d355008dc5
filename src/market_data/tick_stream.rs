// =============================================================================
// Live tick stream — websocket subscription for last-traded-price events
// =============================================================================
//
// On connect the feed expects a plain-text subscribe directive naming the
// instrument ("subscribe:<SYMBOL>"). Inbound frames are delimited strings of
// the form "[<token>-...-<price>]": brackets stripped, the price is whatever
// follows the last hyphen. Unparseable frames are counted and dropped — they
// must never corrupt the open bar or kill the read loop.
//
// Runs until the stream disconnects or errors, then returns so the caller
// can reconnect and resubscribe without losing accumulated series state.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::errors::{ChartError, ChartResult};

/// One parsed last-traded-price event, stamped at arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveTick {
    pub price: f64,
    pub at: DateTime<Utc>,
}

/// Feed health counters shared with the session owner.
#[derive(Debug, Default)]
pub struct FeedStats {
    /// Frames that failed to parse and were dropped.
    pub malformed_ticks: AtomicU64,
    /// Completed connect attempts (first connect counts as 1).
    pub connects: AtomicU64,
}

/// Parse a tick frame: strip brackets, take the token after the last hyphen.
///
/// `"[NSE:RELIANCE-2857.5]"` -> `2857.5`
pub fn parse_tick_message(text: &str) -> ChartResult<f64> {
    let cleaned: String = text.chars().filter(|c| *c != '[' && *c != ']').collect();
    let idx = cleaned
        .rfind('-')
        .ok_or_else(|| ChartError::MalformedTick(format!("no price separator in {text:?}")))?;
    let token = cleaned[idx + 1..].trim();
    let price: f64 = token
        .parse()
        .map_err(|_| ChartError::MalformedTick(format!("unparseable price {token:?}")))?;
    if !price.is_finite() {
        return Err(ChartError::MalformedTick(format!(
            "non-finite price {token:?}"
        )));
    }
    Ok(price)
}

/// Connect to the tick websocket, subscribe to `symbol`, and forward parsed
/// ticks into `ticks` until the stream ends.
///
/// Returns `Ok(())` on a clean server-side close and an error on transport
/// failure; either way the caller owns the reconnect policy.
pub async fn run_tick_stream(
    ws_url: &str,
    symbol: &str,
    ticks: &UnboundedSender<LiveTick>,
    stats: &Arc<FeedStats>,
) -> Result<()> {
    info!(url = %ws_url, symbol = %symbol, "connecting to tick WebSocket");

    let (ws_stream, _response) = connect_async(ws_url)
        .await
        .context("failed to connect to tick WebSocket")?;
    stats.connects.fetch_add(1, Ordering::Relaxed);

    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Text(format!("subscribe:{symbol}")))
        .await
        .context("failed to send subscribe directive")?;
    info!(symbol = %symbol, "tick WebSocket connected and subscribed");

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match parse_tick_message(&text) {
                Ok(price) => {
                    let tick = LiveTick {
                        price,
                        at: Utc::now(),
                    };
                    if ticks.send(tick).is_err() {
                        // Session gone — stop cleanly.
                        return Ok(());
                    }
                }
                Err(e) => {
                    stats.malformed_ticks.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "dropping malformed tick frame");
                }
            },
            // Ping/pong/binary frames carry no ticks; tungstenite answers
            // pings automatically.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "tick WebSocket read error");
                return Err(ChartError::ConnectionLost(e.to_string()).into());
            }
            None => {
                warn!(symbol = %symbol, "tick WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

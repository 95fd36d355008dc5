// =============================================================================
// tickchart — streaming candle aggregation & incremental indicator engine
// =============================================================================
//
// Maintains a continuously-correct, chronologically-ordered candle series for
// one (symbol, timeframe) session: historical backfill merged on the left
// edge, live ticks folded into the open bar on the right edge, timer-driven
// rollovers in between, and an indicator frame (EMA/MACD/volume SMA) plus a
// dense display index kept in sync with every change.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod errors;
mod indicators;
mod market_data;
mod projection;
mod runtime_config;
mod session;

use std::sync::atomic::Ordering;

use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::runtime_config::ChartConfig;
use crate::session::ChartSession;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = ChartConfig::load("chart_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        ChartConfig::default()
    });

    // Env overrides for the common knobs.
    if let Ok(symbol) = std::env::var("TICKCHART_SYMBOL") {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() {
            config.symbol = symbol;
        }
    }
    if let Ok(tf) = std::env::var("TICKCHART_TIMEFRAME") {
        // Accepts the wire form ("5minute") or a bare minute count.
        let parsed = market_data::Timeframe::parse(&tf)
            .map(|t| t.0)
            .or_else(|| tf.trim().parse::<u32>().ok().filter(|m| *m > 0));
        match parsed {
            Some(minutes) => config.timeframe_minutes = minutes,
            None => warn!(value = %tf, "ignoring invalid TICKCHART_TIMEFRAME"),
        }
    }
    if let Ok(url) = std::env::var("TICKCHART_DATA_URL") {
        config.data_url = url;
    }
    if let Ok(url) = std::env::var("TICKCHART_WS_URL") {
        config.ws_url = url;
    }

    info!(
        symbol = %config.symbol,
        timeframe = %config.timeframe(),
        data_url = %config.data_url,
        ws_url = %config.ws_url,
        "starting chart session"
    );

    // ── 2. Start the session ─────────────────────────────────────────────
    let session = ChartSession::start(config)?;
    let mut revisions = session.revision_watch();

    // ── 3. Observe published frames until shutdown ───────────────────────
    // "more" on stdin extends the series leftward, standing in for the
    // pan-past-the-left-edge gesture of an attached chart.
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(cmd)) if cmd.trim().eq_ignore_ascii_case("more") => {
                        info!("extend-left requested");
                        session.request_extend_left();
                    }
                    Ok(Some(_)) => {}
                    // stdin closed; keep observing frames
                    _ => stdin_open = false,
                }
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    warn!("session event loop ended");
                    break;
                }
                if let Some(frame) = session.frame() {
                    let open = frame.bars.last();
                    info!(
                        revision = frame.revision,
                        bars = frame.bars.len(),
                        open_ts = ?open.map(|b| b.timestamp),
                        open_ordinal = ?open.and_then(|b| frame.display.ordinal_of(b.timestamp)),
                        open_close = ?open.map(|b| b.close),
                        macd = ?frame.indicators.macd.last().copied().flatten(),
                        malformed_ticks = session
                            .feed_stats()
                            .malformed_ticks
                            .load(Ordering::Relaxed),
                        "series updated"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    for err in session.recent_errors() {
        warn!(at = %err.at, message = %err.message, "session error (surfaced)");
    }

    Ok(())
}

// =============================================================================
// ChartSession — single logical owner of one (symbol, timeframe) series
// =============================================================================
//
// All mutations funnel through one sequential event queue: live ticks,
// boundary-timer fires, and backfill completions are handled by a single
// event-loop task that owns the SeriesStore, the IndicatorPipeline, and the
// display projection. There are no concurrent writers, so every mutation is
// observed atomically — readers only ever see a fully-merged frame.
//
// Backfill fetches are spawned, never awaited inline: the tick/rollover path
// is never suspended by a slow endpoint. Completions carry a generation
// number; a completion whose generation is not the one currently in flight
// is stale (superseded or from a stopped session) and is ignored, so two
// overlapping prepends can never double-apply.
//
// Changing symbol or timeframe means stopping this session and starting a
// fresh one: the old channel and generation space die with it, so a late
// event from the old session cannot leak into the new store.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{ChartError, ChartResult};
use crate::indicators::{IndicatorFrame, IndicatorPipeline};
use crate::market_data::tick_stream::{run_tick_stream, FeedStats, LiveTick};
use crate::market_data::{Bar, HistoryClient, SeriesChange, SeriesEvent, SeriesStore, Timeframe};
use crate::projection::DisplayIndex;
use crate::runtime_config::ChartConfig;

/// Maximum number of recent errors retained for the consumer.
const MAX_RECENT_ERRORS: usize = 50;

/// Events serialized through the session's single ordering point.
#[derive(Debug)]
pub enum SessionEvent {
    /// A parsed live tick from the feed.
    Tick(LiveTick),
    /// Timer-driven rollover check (fires whether or not ticks arrive).
    BoundaryCheck(DateTime<Utc>),
    /// A historical fetch completed.
    BackfillLoaded { generation: u64, bars: Vec<Bar> },
    /// A historical fetch failed after its bounded retries.
    BackfillFailed { generation: u64, error: ChartError },
    /// Consumer request: extend the series leftward (pan-to-load-more).
    ExtendLeft,
}

/// Immutable snapshot published after every effective mutation. Downstream
/// consumers detect change by `revision` alone.
#[derive(Debug, Clone)]
pub struct ChartFrame {
    pub revision: u64,
    pub bars: Arc<Vec<Bar>>,
    pub indicators: Arc<IndicatorFrame>,
    pub display: Arc<DisplayIndex>,
}

/// A surfaced (non-fatal) error, e.g. a failed pan-to-load-more fetch the UI
/// can offer a retry for.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub message: String,
    pub at: DateTime<Utc>,
}

// =============================================================================
// SessionCore — owned by the event-loop task
// =============================================================================

struct SessionCore {
    symbol: String,
    timeframe: Timeframe,
    lookback_days: i64,
    extension_days: i64,
    store: SeriesStore,
    pipeline: IndicatorPipeline,
    display: Arc<DisplayIndex>,
    history: HistoryClient,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Generation of the fetch currently in flight, if any. At most one
    /// backfill request runs at a time; completions for any other generation
    /// are stale and dropped.
    inflight: Option<u64>,
    next_generation: u64,
    frame: Arc<RwLock<Option<ChartFrame>>>,
    revision_tx: watch::Sender<u64>,
    errors: Arc<RwLock<Vec<ErrorRecord>>>,
}

impl SessionCore {
    fn new(
        config: &ChartConfig,
        history: HistoryClient,
        events: mpsc::UnboundedSender<SessionEvent>,
        frame: Arc<RwLock<Option<ChartFrame>>>,
        revision_tx: watch::Sender<u64>,
        errors: Arc<RwLock<Vec<ErrorRecord>>>,
    ) -> Self {
        Self {
            symbol: config.symbol.clone(),
            timeframe: config.timeframe(),
            lookback_days: config.lookback_days,
            extension_days: config.extension_days,
            store: SeriesStore::new(config.symbol.clone(), config.timeframe()),
            pipeline: IndicatorPipeline::new(config.indicators),
            display: Arc::new(DisplayIndex::default()),
            history,
            events,
            inflight: None,
            next_generation: 1,
            frame,
            revision_tx,
            errors,
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Tick(tick) => {
                if let Some(ev) = self.store.apply_tick(tick.price, tick.at) {
                    self.publish(ev);
                }
            }
            SessionEvent::BoundaryCheck(now) => {
                if let Some(ev) = self.store.roll_forward(now) {
                    self.publish(ev);
                }
            }
            SessionEvent::BackfillLoaded { generation, bars } => {
                if !self.accept_backfill(generation) {
                    warn!(
                        symbol = %self.symbol,
                        generation,
                        "ignoring stale backfill completion"
                    );
                    return;
                }
                self.apply_backfill(bars);
            }
            SessionEvent::BackfillFailed { generation, error } => {
                if !self.accept_backfill(generation) {
                    debug!(generation, "ignoring stale backfill failure");
                    return;
                }
                error!(symbol = %self.symbol, error = %error, "backfill fetch failed");
                self.push_error(error.to_string());
            }
            SessionEvent::ExtendLeft => self.request_extend_left(),
        }
    }

    /// True when `generation` is the one currently in flight; clears the
    /// in-flight marker so each fetch is applied at most once.
    fn accept_backfill(&mut self, generation: u64) -> bool {
        if self.inflight == Some(generation) {
            self.inflight = None;
            true
        } else {
            false
        }
    }

    fn apply_backfill(&mut self, bars: Vec<Bar>) {
        let result = if self.store.is_empty() {
            self.store.initialize(bars).map(Some)
        } else {
            self.store.merge_historical(bars)
        };
        match result {
            Ok(Some(ev)) => {
                info!(
                    symbol = %self.symbol,
                    total = self.store.len(),
                    revision = self.store.revision(),
                    "historical bars merged"
                );
                self.publish(ev);
            }
            Ok(None) => debug!(symbol = %self.symbol, "backfill contained no new bars"),
            Err(e) => {
                // Store is untouched on validation failure.
                error!(symbol = %self.symbol, error = %e, "rejected historical batch");
                self.push_error(e.to_string());
            }
        }
    }

    /// Issue the initial lookback fetch: `[start-of-day − lookback, end of
    /// today]`, matching the chart's first-load window.
    fn request_initial_load(&mut self) {
        let now = Utc::now();
        let to = day_end(now);
        let from = day_start(now - Duration::days(self.lookback_days));
        self.spawn_fetch(from, to);
    }

    /// Pan-to-load-more: fetch the window just left of the earliest bar.
    /// Ignored while another fetch is in flight (coalescing, not queueing).
    fn request_extend_left(&mut self) {
        if self.inflight.is_some() {
            debug!(symbol = %self.symbol, "extend-left ignored: fetch already in flight");
            return;
        }
        match self.store.current_range() {
            Some((earliest, _latest)) => {
                let from = earliest - Duration::days(self.extension_days);
                self.spawn_fetch(from, earliest);
            }
            // Nothing loaded yet: an extend request degrades to the initial load.
            None => self.request_initial_load(),
        }
    }

    fn spawn_fetch(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.inflight = Some(generation);

        let history = self.history.clone();
        let events = self.events.clone();
        let symbol = self.symbol.clone();
        let timeframe = self.timeframe;
        tokio::spawn(async move {
            let event = match history
                .fetch_range_with_retry(&symbol, timeframe, from, to)
                .await
            {
                Ok(bars) => SessionEvent::BackfillLoaded { generation, bars },
                Err(error) => SessionEvent::BackfillFailed { generation, error },
            };
            // Send failure means the session stopped; nothing to do.
            let _ = events.send(event);
        });
    }

    /// Recompute derived state and expose the new frame. The projection is
    /// reused when only the open bar moved (bar count and range unchanged).
    fn publish(&mut self, ev: SeriesEvent) {
        self.pipeline.recompute(self.store.bars(), ev);

        if !matches!(ev.change, SeriesChange::OpenUpdated) || self.display.is_empty() {
            self.display = Arc::new(DisplayIndex::project(self.store.bars()));
        }

        let frame = ChartFrame {
            revision: ev.revision,
            bars: Arc::new(self.store.bars().to_vec()),
            indicators: Arc::new(self.pipeline.frame().clone()),
            display: self.display.clone(),
        };
        *self.frame.write() = Some(frame);
        self.revision_tx.send_replace(ev.revision);
    }

    fn push_error(&self, message: String) {
        let mut errors = self.errors.write();
        errors.push(ErrorRecord {
            message,
            at: Utc::now(),
        });
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }
}

fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(at)
}

fn day_end(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(23, 59, 59)
        .map(|t| t.and_utc())
        .unwrap_or(at)
}

// =============================================================================
// ChartSession — public handle
// =============================================================================

/// Handle for one running chart session. Dropping (or calling `stop`) aborts
/// every task the session owns: the event loop, the tick feed, the boundary
/// scheduler, and any in-flight backfill becomes a dead letter.
pub struct ChartSession {
    events: mpsc::UnboundedSender<SessionEvent>,
    frame: Arc<RwLock<Option<ChartFrame>>>,
    revision_rx: watch::Receiver<u64>,
    feed_stats: Arc<FeedStats>,
    errors: Arc<RwLock<Vec<ErrorRecord>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChartSession {
    /// Start a session: spawn the event loop, the tick feed (with reconnect),
    /// and the boundary scheduler, then issue the initial historical load.
    pub fn start(config: ChartConfig) -> ChartResult<Self> {
        let history = HistoryClient::new(&config.data_url)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (revision_tx, revision_rx) = watch::channel(0u64);
        let frame = Arc::new(RwLock::new(None));
        let errors = Arc::new(RwLock::new(Vec::new()));
        let feed_stats = Arc::new(FeedStats::default());

        let mut core = SessionCore::new(
            &config,
            history,
            events_tx.clone(),
            frame.clone(),
            revision_tx,
            errors.clone(),
        );

        let mut tasks = Vec::new();

        // 1. Event loop — the single ordering point for all mutations.
        tasks.push(tokio::spawn(async move {
            core.request_initial_load();
            let mut events = events_rx;
            while let Some(event) = events.recv().await {
                core.handle_event(event);
            }
            debug!("session event loop ended");
        }));

        // 2. Tick feed with reconnect-and-resubscribe. The series survives a
        //    dropped connection; rollovers keep running on the last price.
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel::<LiveTick>();
        {
            let ws_url = config.ws_url.clone();
            let symbol = config.symbol.clone();
            let stats = feed_stats.clone();
            let delay = std::time::Duration::from_secs(config.reconnect_delay_secs.max(1));
            tasks.push(tokio::spawn(async move {
                loop {
                    if let Err(e) = run_tick_stream(&ws_url, &symbol, &tick_tx, &stats).await {
                        error!(symbol = %symbol, error = %e, "tick stream error — reconnecting");
                    } else {
                        warn!(symbol = %symbol, "tick stream closed — reconnecting");
                    }
                    tokio::time::sleep(delay).await;
                }
            }));
        }
        {
            let events = events_tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(tick) = tick_rx.recv().await {
                    if events.send(SessionEvent::Tick(tick)).is_err() {
                        break;
                    }
                }
            }));
        }

        // 3. Boundary scheduler — recomputes the delay to the next boundary
        //    on every fire (re-arming, no drift accumulation).
        {
            let events = events_tx.clone();
            let timeframe = config.timeframe();
            tasks.push(tokio::spawn(async move {
                loop {
                    let now = Utc::now();
                    let next = timeframe.next_boundary(now);
                    let delay = (next - now).to_std().unwrap_or_default();
                    tokio::time::sleep(delay).await;
                    if events.send(SessionEvent::BoundaryCheck(Utc::now())).is_err() {
                        break;
                    }
                }
            }));
        }

        info!(
            symbol = %config.symbol,
            timeframe = %config.timeframe(),
            indicator_run_up = config.indicators.run_up(),
            "chart session started"
        );

        Ok(Self {
            events: events_tx,
            frame,
            revision_rx,
            feed_stats,
            errors,
            tasks,
        })
    }

    /// Latest published frame, if the initial load has landed.
    pub fn frame(&self) -> Option<ChartFrame> {
        self.frame.read().clone()
    }

    /// The "series changed" notification: yields the revision after every
    /// effective mutation.
    pub fn revision_watch(&self) -> watch::Receiver<u64> {
        self.revision_rx.clone()
    }

    /// Ask the session to extend the series leftward (pan-to-load-more).
    pub fn request_extend_left(&self) {
        let _ = self.events.send(SessionEvent::ExtendLeft);
    }

    pub fn feed_stats(&self) -> &FeedStats {
        &self.feed_stats
    }

    /// Surfaced non-fatal errors (fetch failures, rejected batches).
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.errors.read().clone()
    }

    /// Stop the session: aborts all owned tasks. In-flight fetches and the
    /// old subscription cannot reach a future session's store.
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ChartSession {
    fn drop(&mut self) {
        self.stop();
    }
}

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::{
    sync::{mpsc, watch},
    time::{interval, sleep, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::{
    config::Config,
    engine::{ChannelKind, DepthEngine, EngineCommand, FeedEvent, FeedStatus},
    errors::FeedError,
    projector::{normalize_grouping, Projection, MAX_DISPLAY_ROWS, MIN_DISPLAY_ROWS},
    snapshot::SnapshotSource,
    trades::TradeView,
    wire,
};

const EVENT_QUEUE_CAPACITY: usize = 1_024;
const CONTROL_QUEUE_CAPACITY: usize = 16;

/// Current session as observed by every actor. Each session switch replaces
/// the value; actors compare generations instead of being aborted.
#[derive(Debug, Clone)]
struct SessionInfo {
    generation: u64,
    symbol: String,
}

#[derive(Debug)]
enum ControlMessage {
    SetSymbol(String),
    SetRows(usize),
    SetGrouping(u32),
    SetPaused(bool),
    ForceResync,
}

/// Caller-facing handle: watch receivers for the projection, status and
/// trade tape, plus the control surface. Dropping every handle shuts the
/// feed down.
#[derive(Clone)]
pub struct FeedHandle {
    projection: watch::Receiver<Arc<Projection>>,
    status: watch::Receiver<FeedStatus>,
    trades: watch::Receiver<Arc<Vec<TradeView>>>,
    control: mpsc::Sender<ControlMessage>,
}

impl FeedHandle {
    pub fn projection(&self) -> watch::Receiver<Arc<Projection>> {
        self.projection.clone()
    }

    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    pub fn trades(&self) -> watch::Receiver<Arc<Vec<TradeView>>> {
        self.trades.clone()
    }

    pub async fn set_symbol(&self, symbol: impl Into<String>) {
        let _ = self
            .control
            .send(ControlMessage::SetSymbol(symbol.into()))
            .await;
    }

    pub async fn set_rows(&self, rows: usize) {
        let _ = self.control.send(ControlMessage::SetRows(rows)).await;
    }

    pub async fn set_grouping(&self, multiplier: u32) {
        let _ = self
            .control
            .send(ControlMessage::SetGrouping(multiplier))
            .await;
    }

    /// Pausing suspends only projection publication; the channels keep
    /// consuming and the store keeps mutating underneath.
    pub async fn set_paused(&self, paused: bool) {
        let _ = self.control.send(ControlMessage::SetPaused(paused)).await;
    }

    pub async fn force_resync(&self) {
        let _ = self.control.send(ControlMessage::ForceResync).await;
    }
}

/// Owns the lifecycle of the three logical channels and the serialized
/// engine task, and routes every payload into the engine event queue.
pub struct StreamManager;

impl StreamManager {
    pub fn spawn(config: Config, source: Arc<dyn SnapshotSource>) -> FeedHandle {
        let config = Arc::new(config);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        let (projection_tx, projection_rx) = watch::channel(Arc::new(Projection::empty()));
        let (status_tx, status_rx) = watch::channel(FeedStatus::default());
        let (trades_tx, trades_rx) = watch::channel(Arc::new(Vec::new()));
        let (session_tx, _session_rx) = watch::channel(SessionInfo {
            generation: 0,
            symbol: config.symbol.clone(),
        });

        tokio::spawn(run_engine_task(
            config,
            source,
            control_rx,
            events_tx,
            events_rx,
            session_tx,
            projection_tx,
            status_tx,
            trades_tx,
        ));

        FeedHandle {
            projection: projection_rx,
            status: status_rx,
            trades: trades_rx,
            control: control_tx,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_engine_task(
    config: Arc<Config>,
    source: Arc<dyn SnapshotSource>,
    mut control_rx: mpsc::Receiver<ControlMessage>,
    events_tx: mpsc::Sender<(u64, FeedEvent)>,
    mut events_rx: mpsc::Receiver<(u64, FeedEvent)>,
    session_tx: watch::Sender<SessionInfo>,
    projection_tx: watch::Sender<Arc<Projection>>,
    status_tx: watch::Sender<FeedStatus>,
    trades_tx: watch::Sender<Arc<Vec<TradeView>>>,
) {
    let mut engine = DepthEngine::new(config.trade_feed_capacity, config.trade_flash_ms);
    let mut symbol = config.symbol.clone();
    let mut rows = config.display_rows;
    let mut grouping = config.grouping_multiplier;
    let mut paused = false;
    let mut dirty = false;

    start_session(&mut engine, &symbol, &config, &source, &session_tx, &events_tx);

    let mut project_tick = interval(Duration::from_millis(config.projection_interval_ms.max(50)));
    project_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            control = control_rx.recv() => {
                let Some(control) = control else {
                    // Every handle is gone; the actors drain out on the
                    // closed session watch.
                    return;
                };
                match control {
                    ControlMessage::SetSymbol(next) => {
                        let next = next.trim().to_ascii_uppercase();
                        if !next.is_empty() && next != symbol {
                            symbol = next;
                            start_session(&mut engine, &symbol, &config, &source, &session_tx, &events_tx);
                            dirty = true;
                        }
                    }
                    ControlMessage::ForceResync => {
                        start_session(&mut engine, &symbol, &config, &source, &session_tx, &events_tx);
                        dirty = true;
                    }
                    ControlMessage::SetRows(next) => {
                        rows = next.clamp(MIN_DISPLAY_ROWS, MAX_DISPLAY_ROWS);
                        dirty = true;
                    }
                    ControlMessage::SetGrouping(next) => {
                        grouping = normalize_grouping(next);
                        dirty = true;
                    }
                    ControlMessage::SetPaused(next) => {
                        paused = next;
                    }
                }
            }
            event = events_rx.recv() => {
                let Some((generation, event)) = event else {
                    return;
                };
                if let Some(EngineCommand::FetchSnapshot) = engine.feed(generation, event, now_ms()) {
                    tokio::spawn(run_snapshot_fetch(
                        generation,
                        symbol.clone(),
                        config.clone(),
                        source.clone(),
                        session_tx.subscribe(),
                        events_tx.clone(),
                    ));
                }
                dirty = true;
            }
            _ = project_tick.tick() => {
                let _ = status_tx.send(engine.status());
                if !paused {
                    trades_tx.send_replace(Arc::new(engine.trade_tape(now_ms())));
                    if dirty {
                        projection_tx.send_replace(Arc::new(engine.project(rows, grouping)));
                        dirty = false;
                    }
                }
            }
        }
    }
}

/// Begins a new session generation: resets the engine and spawns fresh
/// channel actors plus the metadata fetch under the new generation. The
/// first snapshot fetch is commanded by the engine once the diff channel
/// reports open, so no diff can slip between snapshot and stream start.
fn start_session(
    engine: &mut DepthEngine,
    symbol: &str,
    config: &Arc<Config>,
    source: &Arc<dyn SnapshotSource>,
    session_tx: &watch::Sender<SessionInfo>,
    events_tx: &mpsc::Sender<(u64, FeedEvent)>,
) {
    let generation = engine.begin_session();
    session_tx.send_replace(SessionInfo {
        generation,
        symbol: symbol.to_string(),
    });
    tracing::info!(symbol, generation, "session started");

    for channel in ChannelKind::ALL {
        tokio::spawn(run_channel(
            channel,
            generation,
            symbol.to_string(),
            config.clone(),
            session_tx.subscribe(),
            events_tx.clone(),
        ));
    }

    tokio::spawn(run_meta_fetch(
        generation,
        symbol.to_string(),
        config.clone(),
        source.clone(),
        session_tx.subscribe(),
        events_tx.clone(),
    ));
}

/// Fetches the snapshot baseline, retrying on a fixed delay for as long as
/// the owning session is still current; otherwise abandons silently.
async fn run_snapshot_fetch(
    generation: u64,
    symbol: String,
    config: Arc<Config>,
    source: Arc<dyn SnapshotSource>,
    mut session_rx: watch::Receiver<SessionInfo>,
    events_tx: mpsc::Sender<(u64, FeedEvent)>,
) {
    loop {
        if session_rx.borrow().generation != generation {
            return;
        }

        match source
            .fetch_snapshot(&symbol, config.snapshot_depth_limit)
            .await
        {
            Ok(snapshot) => {
                let _ = events_tx
                    .send((generation, FeedEvent::SnapshotLoaded(snapshot)))
                    .await;
                return;
            }
            Err(error) => {
                tracing::warn!(%symbol, %error, "snapshot fetch failed; retrying");
                let _ = events_tx
                    .send((generation, FeedEvent::SnapshotFailed(error)))
                    .await;
                if !sleep_within_session(
                    &mut session_rx,
                    generation,
                    Duration::from_millis(config.snapshot_retry_delay_ms),
                )
                .await
                {
                    return;
                }
            }
        }
    }
}

async fn run_meta_fetch(
    generation: u64,
    symbol: String,
    config: Arc<Config>,
    source: Arc<dyn SnapshotSource>,
    mut session_rx: watch::Receiver<SessionInfo>,
    events_tx: mpsc::Sender<(u64, FeedEvent)>,
) {
    loop {
        if session_rx.borrow().generation != generation {
            return;
        }

        match source.fetch_symbol_meta(&symbol).await {
            Ok(meta) => {
                let _ = events_tx
                    .send((generation, FeedEvent::MetaLoaded(meta)))
                    .await;
                return;
            }
            Err(error) => {
                tracing::warn!(%symbol, %error, "symbol metadata fetch failed; retrying");
                if !sleep_within_session(
                    &mut session_rx,
                    generation,
                    Duration::from_millis(config.snapshot_retry_delay_ms),
                )
                .await
                {
                    return;
                }
            }
        }
    }
}

enum ConnectionOutcome {
    Stop,
    Reconnect { connected: bool },
}

/// One logical channel actor: `Idle -> Connecting -> Open -> Closed(attempt)`
/// and back, with randomized exponential backoff. Fully independent of the
/// other two channels.
async fn run_channel(
    channel: ChannelKind,
    generation: u64,
    symbol: String,
    config: Arc<Config>,
    mut session_rx: watch::Receiver<SessionInfo>,
    events_tx: mpsc::Sender<(u64, FeedEvent)>,
) {
    let url = match channel {
        ChannelKind::Diff => {
            wire::build_diff_stream_url(&config.ws_base_url, &symbol, config.diff_interval_ms)
        }
        ChannelKind::Trade => wire::build_trade_stream_url(&config.ws_base_url, &symbol),
        ChannelKind::BestQuote => wire::build_best_quote_stream_url(&config.ws_base_url, &symbol),
    };

    let mut attempt: u32 = 0;
    loop {
        if session_rx.borrow().generation != generation {
            return;
        }

        match run_connection(channel, generation, &url, &events_tx, &mut session_rx).await {
            ConnectionOutcome::Stop => return,
            ConnectionOutcome::Reconnect { connected } => {
                if connected {
                    attempt = 0;
                }
                let delay = reconnect_delay(
                    config.reconnect_base_delay_ms,
                    attempt,
                    config.reconnect_max_delay_ms,
                );
                tracing::info!(
                    channel = channel.as_str(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                if !sleep_within_session(&mut session_rx, generation, delay).await {
                    return;
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

async fn run_connection(
    channel: ChannelKind,
    generation: u64,
    url: &str,
    events_tx: &mpsc::Sender<(u64, FeedEvent)>,
    session_rx: &mut watch::Receiver<SessionInfo>,
) -> ConnectionOutcome {
    let connected = tokio::select! {
        changed = session_rx.changed() => {
            if changed.is_err() || session_rx.borrow().generation != generation {
                return ConnectionOutcome::Stop;
            }
            return ConnectionOutcome::Reconnect { connected: false };
        }
        connected = connect_async(url) => connected,
    };

    let (mut stream, _response) = match connected {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(channel = channel.as_str(), url, error = %err, "failed to connect channel");
            let _ = events_tx
                .send((
                    generation,
                    FeedEvent::ChannelIssue {
                        channel,
                        error: FeedError::network(err),
                    },
                ))
                .await;
            return ConnectionOutcome::Reconnect { connected: false };
        }
    };

    tracing::info!(channel = channel.as_str(), "channel connected");
    let _ = events_tx
        .send((generation, FeedEvent::ChannelOpen(channel)))
        .await;

    loop {
        tokio::select! {
            changed = session_rx.changed() => {
                if changed.is_err() || session_rx.borrow().generation != generation {
                    let _ = stream.close(None).await;
                    return ConnectionOutcome::Stop;
                }
            }
            message = stream.next() => {
                let Some(message) = message else {
                    report_closed(channel, generation, "stream ended", events_tx).await;
                    return ConnectionOutcome::Reconnect { connected: true };
                };

                let message = match message {
                    Ok(message) => message,
                    Err(err) => {
                        report_closed(channel, generation, &err.to_string(), events_tx).await;
                        return ConnectionOutcome::Reconnect { connected: true };
                    }
                };

                match message {
                    Message::Ping(payload) => {
                        if stream.send(Message::Pong(payload)).await.is_err() {
                            report_closed(channel, generation, "failed to answer ping", events_tx).await;
                            return ConnectionOutcome::Reconnect { connected: true };
                        }
                    }
                    Message::Close(_) => {
                        report_closed(channel, generation, "closed by peer", events_tx).await;
                        return ConnectionOutcome::Reconnect { connected: true };
                    }
                    Message::Text(text) => {
                        dispatch_payload(channel, generation, &text, events_tx).await;
                    }
                    Message::Binary(binary) => {
                        if let Ok(text) = String::from_utf8(binary) {
                            dispatch_payload(channel, generation, &text, events_tx).await;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Parses one payload for its channel and forwards the resulting event. A
/// malformed message is dropped and reported; the stream continues.
async fn dispatch_payload(
    channel: ChannelKind,
    generation: u64,
    payload: &str,
    events_tx: &mpsc::Sender<(u64, FeedEvent)>,
) {
    let parsed = match channel {
        ChannelKind::Diff => wire::parse_diff_message(payload).map(|diff| diff.map(FeedEvent::Diff)),
        ChannelKind::Trade => {
            wire::parse_trade_message(payload).map(|trade| trade.map(FeedEvent::Trade))
        }
        ChannelKind::BestQuote => {
            wire::parse_best_quote_message(payload).map(|quote| quote.map(FeedEvent::Quote))
        }
    };

    match parsed {
        Ok(Some(event)) => {
            let _ = events_tx.send((generation, event)).await;
        }
        Ok(None) => {}
        Err(error) => {
            tracing::warn!(channel = channel.as_str(), %error, "dropping malformed message");
            let _ = events_tx
                .send((generation, FeedEvent::ChannelIssue { channel, error }))
                .await;
        }
    }
}

async fn report_closed(
    channel: ChannelKind,
    generation: u64,
    reason: &str,
    events_tx: &mpsc::Sender<(u64, FeedEvent)>,
) {
    tracing::warn!(channel = channel.as_str(), reason, "channel closed");
    let _ = events_tx
        .send((
            generation,
            FeedEvent::ChannelClosed {
                channel,
                reason: reason.to_string(),
            },
        ))
        .await;
}

/// Sleeps for `delay` unless the session moves on first. Returns false when
/// the caller should stop because its generation is no longer current.
async fn sleep_within_session(
    session_rx: &mut watch::Receiver<SessionInfo>,
    generation: u64,
    delay: Duration,
) -> bool {
    tokio::select! {
        changed = session_rx.changed() => {
            changed.is_ok() && session_rx.borrow().generation == generation
        }
        _ = sleep(delay) => true,
    }
}

/// Randomized exponential backoff: `base * 2^attempt` capped at the
/// configured maximum, jittered into the upper half of the window.
fn reconnect_delay(base_ms: u64, attempt: u32, max_ms: u64) -> Duration {
    let exponent = attempt.min(16);
    let grown = base_ms.saturating_mul(1u64 << exponent);
    let capped = grown.min(max_ms).max(1);
    let jittered = rand::thread_rng().gen_range(capped / 2..=capped);
    Duration::from_millis(jittered)
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_grows_and_stays_capped() {
        for attempt in 0..12 {
            let delay = reconnect_delay(500, attempt, 30_000).as_millis() as u64;
            let expected_cap = (500u64 << attempt.min(16)).min(30_000);
            assert!(delay <= expected_cap);
            assert!(delay >= expected_cap / 2);
        }
    }

    #[test]
    fn reconnect_delay_caps_extreme_attempts() {
        let delay = reconnect_delay(500, 40, 30_000).as_millis() as u64;
        assert!(delay <= 30_000);
        assert!(delay >= 15_000);
    }
}

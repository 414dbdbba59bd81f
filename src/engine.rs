use rust_decimal::Decimal;

use crate::{
    book::OrderBookStore,
    errors::FeedError,
    projector::{self, Projection, ProjectionSettings},
    sequencer::{ApplyOutcome, DiffEvent, DiffSequencer, ReconcileOutcome},
    snapshot::{DepthSnapshot, SymbolMeta},
    trades::{TradeEvent, TradeFeed, TradeView},
    wire::BestQuote,
};

/// Display tick used until the symbol metadata arrives.
const DEFAULT_TICK_SIZE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Diff,
    Trade,
    BestQuote,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Diff, ChannelKind::Trade, ChannelKind::BestQuote];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Diff => "diff",
            Self::Trade => "trade",
            Self::BestQuote => "best-quote",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Diff => 0,
            Self::Trade => 1,
            Self::BestQuote => 2,
        }
    }
}

/// Everything the async driver can hand the engine. Each carries the session
/// generation it was issued under; stale completions are dropped on arrival.
#[derive(Debug)]
pub enum FeedEvent {
    SnapshotLoaded(DepthSnapshot),
    SnapshotFailed(FeedError),
    MetaLoaded(SymbolMeta),
    Diff(DiffEvent),
    Trade(TradeEvent),
    Quote(BestQuote),
    ChannelOpen(ChannelKind),
    ChannelClosed { channel: ChannelKind, reason: String },
    ChannelIssue { channel: ChannelKind, error: FeedError },
}

/// Side effects the engine asks its driver to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    FetchSnapshot,
}

/// Connection/health surface exposed to the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedStatus {
    pub connected: bool,
    pub ready: bool,
    pub generation: u64,
    pub last_error: Option<String>,
    pub last_update_ms: Option<u64>,
    pub messages_per_second: f64,
    pub reconnects: u64,
    pub pending_buffer_len: usize,
}

/// The reconstruction engine: owns the store, the sequencer, the trade feed
/// and the cached best quote, and exposes `feed` / `project` / `status` as
/// its only interface. Synchronous and single-owner; the driver serializes
/// every mutation through one task.
pub struct DepthEngine {
    generation: u64,
    store: OrderBookStore,
    sequencer: DiffSequencer,
    trades: TradeFeed,
    best_quote: Option<BestQuote>,
    meta: Option<SymbolMeta>,
    channel_open: [bool; 3],
    snapshot_inflight: bool,
    last_error: Option<String>,
    last_update_ms: Option<u64>,
    reconnects: u64,
    window_started_ms: u64,
    window_count: u64,
    messages_per_second: f64,
}

impl DepthEngine {
    pub fn new(trade_capacity: usize, trade_flash_ms: u64) -> Self {
        Self {
            generation: 0,
            store: OrderBookStore::new(),
            sequencer: DiffSequencer::new(),
            trades: TradeFeed::new(trade_capacity, trade_flash_ms),
            best_quote: None,
            meta: None,
            channel_open: [false; 3],
            snapshot_inflight: false,
            last_error: None,
            last_update_ms: None,
            reconnects: 0,
            window_started_ms: 0,
            window_count: 0,
            messages_per_second: 0.0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Starts a fresh session (symbol change or forced resync): bumps the
    /// generation and resets every piece of per-session state. In-flight
    /// completions from the old generation become no-ops by comparison.
    pub fn begin_session(&mut self) -> u64 {
        self.generation += 1;
        self.store.clear();
        self.sequencer.reset();
        self.trades.clear();
        self.best_quote = None;
        self.meta = None;
        self.channel_open = [false; 3];
        self.snapshot_inflight = false;
        self.last_error = None;
        self.last_update_ms = None;
        self.window_started_ms = 0;
        self.window_count = 0;
        self.messages_per_second = 0.0;
        self.generation
    }

    /// Applies one event issued under `generation`. Returns a command when
    /// the driver must fetch a snapshot.
    pub fn feed(
        &mut self,
        generation: u64,
        event: FeedEvent,
        now_ms: u64,
    ) -> Option<EngineCommand> {
        if generation != self.generation {
            tracing::debug!(
                stale_generation = generation,
                current_generation = self.generation,
                "dropped completion from a stale session"
            );
            return None;
        }

        match event {
            FeedEvent::SnapshotLoaded(snapshot) => {
                self.snapshot_inflight = false;
                match self.sequencer.reconcile(&mut self.store, &snapshot) {
                    ReconcileOutcome::Synced { replayed } => {
                        tracing::info!(
                            sequence_id = snapshot.sequence_id,
                            replayed,
                            "snapshot reconciled"
                        );
                        self.last_update_ms = Some(now_ms);
                        None
                    }
                    ReconcileOutcome::ResyncRequired => {
                        tracing::warn!(
                            sequence_id = snapshot.sequence_id,
                            "buffered replay discontinuous; resyncing"
                        );
                        self.request_snapshot()
                    }
                }
            }
            FeedEvent::SnapshotFailed(error) => {
                self.last_error = Some(error.to_string());
                None
            }
            FeedEvent::MetaLoaded(meta) => {
                self.meta = Some(meta);
                None
            }
            FeedEvent::Diff(diff) => {
                self.note_message(now_ms);
                let next_expected = self.sequencer.last_applied_update_id() + 1;
                let first_update_id = diff.first_update_id;
                match self.sequencer.apply(&mut self.store, diff) {
                    ApplyOutcome::Applied => {
                        self.last_update_ms = Some(now_ms);
                        None
                    }
                    ApplyOutcome::Buffered | ApplyOutcome::Discarded => None,
                    ApplyOutcome::ResyncRequired => {
                        self.last_error = Some(
                            FeedError::SequenceGap {
                                expected: next_expected,
                                got: first_update_id,
                            }
                            .to_string(),
                        );
                        self.request_snapshot()
                    }
                }
            }
            FeedEvent::Trade(trade) => {
                self.note_message(now_ms);
                self.trades.push(trade, now_ms);
                self.last_update_ms = Some(now_ms);
                None
            }
            FeedEvent::Quote(quote) => {
                self.note_message(now_ms);
                self.best_quote = Some(quote);
                None
            }
            FeedEvent::ChannelOpen(channel) => {
                self.channel_open[channel.index()] = true;
                if channel == ChannelKind::Diff && !self.sequencer.is_ready() {
                    self.request_snapshot()
                } else {
                    None
                }
            }
            FeedEvent::ChannelClosed { channel, reason } => {
                self.channel_open[channel.index()] = false;
                self.reconnects += 1;
                self.last_error = Some(
                    FeedError::TransportClosed(format!("{} stream: {reason}", channel.as_str()))
                        .to_string(),
                );
                None
            }
            FeedEvent::ChannelIssue { channel, error } => {
                self.last_error = Some(format!("{} stream: {error}", channel.as_str()));
                None
            }
        }
    }

    /// Point-in-time display projection; pure read, safe to call at any
    /// cadence.
    pub fn project(&self, rows: usize, grouping_multiplier: u32) -> Projection {
        let settings = ProjectionSettings::new(rows, grouping_multiplier, self.tick_size());
        projector::project(&self.store, self.best_quote.as_ref(), &settings)
    }

    /// Recent trades, newest first, flash flags resolved at `now_ms`.
    pub fn trade_tape(&self, now_ms: u64) -> Vec<TradeView> {
        self.trades.entries(now_ms)
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            connected: self.channel_open.iter().all(|open| *open),
            ready: self.sequencer.is_ready(),
            generation: self.generation,
            last_error: self.last_error.clone(),
            last_update_ms: self.last_update_ms,
            messages_per_second: self.messages_per_second,
            reconnects: self.reconnects,
            pending_buffer_len: self.sequencer.pending_len(),
        }
    }

    pub fn tick_size(&self) -> Decimal {
        self.meta
            .as_ref()
            .map(|meta| meta.tick_size)
            .unwrap_or(DEFAULT_TICK_SIZE)
    }

    fn request_snapshot(&mut self) -> Option<EngineCommand> {
        if self.snapshot_inflight {
            return None;
        }
        self.snapshot_inflight = true;
        Some(EngineCommand::FetchSnapshot)
    }

    fn note_message(&mut self, now_ms: u64) {
        if self.window_started_ms == 0 {
            self.window_started_ms = now_ms;
        }
        self.window_count += 1;

        let elapsed = now_ms.saturating_sub(self.window_started_ms);
        if elapsed >= 1_000 {
            self.messages_per_second = self.window_count as f64 * 1_000.0 / elapsed as f64;
            self.window_started_ms = now_ms;
            self.window_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn snapshot() -> DepthSnapshot {
        DepthSnapshot {
            sequence_id: 100,
            bids: vec![(dec!(100.00), dec!(1))],
            asks: vec![(dec!(100.02), dec!(1))],
        }
    }

    fn diff(first: u64, last: u64) -> DiffEvent {
        DiffEvent {
            first_update_id: first,
            final_update_id: last,
            bid_changes: vec![(dec!(99.99), dec!(2))],
            ask_changes: Vec::new(),
        }
    }

    fn started_engine() -> (DepthEngine, u64) {
        let mut engine = DepthEngine::new(50, 300);
        let generation = engine.begin_session();
        let command = engine.feed(generation, FeedEvent::ChannelOpen(ChannelKind::Diff), 1_000);
        assert_eq!(command, Some(EngineCommand::FetchSnapshot));
        (engine, generation)
    }

    #[test]
    fn diff_channel_open_requests_exactly_one_snapshot() {
        let (mut engine, generation) = started_engine();

        // A reconnect while the fetch is still in flight must not stack a
        // second one.
        let command = engine.feed(generation, FeedEvent::ChannelOpen(ChannelKind::Diff), 1_001);
        assert_eq!(command, None);
    }

    #[test]
    fn stale_generation_completions_are_dropped() {
        let (mut engine, generation) = started_engine();
        engine.feed(generation, FeedEvent::SnapshotLoaded(snapshot()), 1_002);

        let stale = generation;
        let generation = engine.begin_session();
        assert_ne!(stale, generation);

        engine.feed(stale, FeedEvent::Diff(diff(101, 102)), 1_003);
        assert!(!engine.status().ready);
        assert_eq!(engine.status().pending_buffer_len, 0);
    }

    #[test]
    fn gap_triggers_resync_and_not_ready() {
        let (mut engine, generation) = started_engine();
        engine.feed(generation, FeedEvent::SnapshotLoaded(snapshot()), 1_002);
        assert!(engine.status().ready);

        let command = engine.feed(generation, FeedEvent::Diff(diff(105, 110)), 1_003);
        assert_eq!(command, Some(EngineCommand::FetchSnapshot));
        assert!(!engine.status().ready);
        assert!(engine
            .status()
            .last_error
            .is_some_and(|reason| reason.contains("sequence gap")));
    }

    #[test]
    fn projection_reflects_applied_diffs() {
        let (mut engine, generation) = started_engine();
        engine.feed(generation, FeedEvent::SnapshotLoaded(snapshot()), 1_002);
        engine.feed(generation, FeedEvent::Diff(diff(101, 102)), 1_003);

        let projection = engine.project(20, 1);
        assert_eq!(projection.bid_rows.len(), 2);
        assert_eq!(projection.spread, dec!(0.02));
    }

    #[test]
    fn session_change_resets_book_trades_and_quote() {
        let (mut engine, generation) = started_engine();
        engine.feed(generation, FeedEvent::SnapshotLoaded(snapshot()), 1_002);
        engine.feed(
            generation,
            FeedEvent::Trade(TradeEvent {
                id: 1,
                price: dec!(100.01),
                quantity: dec!(0.5),
                timestamp: 1_002,
                aggressive_buy: true,
            }),
            1_002,
        );
        engine.feed(
            generation,
            FeedEvent::Quote(BestQuote {
                bid_price: dec!(100.00),
                bid_qty: dec!(1),
                ask_price: dec!(100.02),
                ask_qty: dec!(1),
            }),
            1_002,
        );

        engine.begin_session();
        assert!(engine.project(20, 1).is_empty());
        assert!(engine.trade_tape(1_003).is_empty());
        assert!(!engine.status().ready);
    }

    #[test]
    fn channel_close_counts_reconnects_and_keeps_others_independent() {
        let (mut engine, generation) = started_engine();
        engine.feed(generation, FeedEvent::ChannelOpen(ChannelKind::Trade), 1_001);
        engine.feed(
            generation,
            FeedEvent::ChannelOpen(ChannelKind::BestQuote),
            1_001,
        );

        engine.feed(
            generation,
            FeedEvent::ChannelClosed {
                channel: ChannelKind::Trade,
                reason: "peer closed".to_string(),
            },
            1_002,
        );

        let status = engine.status();
        assert_eq!(status.reconnects, 1);
        assert!(!status.connected);
        // The diff channel was untouched; readiness flows from it alone.
        let _ = engine.feed(generation, FeedEvent::SnapshotLoaded(snapshot()), 1_003);
        assert!(engine.status().ready);
    }

    #[test]
    fn message_rate_tracks_a_sliding_window() {
        let (mut engine, generation) = started_engine();
        engine.feed(generation, FeedEvent::SnapshotLoaded(snapshot()), 1_000);

        for index in 0..12u64 {
            engine.feed(
                generation,
                FeedEvent::Diff(diff(101 + index, 101 + index)),
                1_000 + index * 100,
            );
        }
        // Window closed at the event crossing the 1 s boundary.
        assert!(engine.status().messages_per_second > 0.0);
    }
}

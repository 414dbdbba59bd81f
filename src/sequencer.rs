use rust_decimal::Decimal;

use crate::{
    book::{OrderBookStore, Side},
    snapshot::DepthSnapshot,
};

/// Buffered diffs are only held while the session is not ready; the cap
/// bounds memory if the snapshot endpoint stays unreachable.
const MAX_PENDING_DIFFS: usize = 4096;

/// One incremental update from the diff channel, spanning update ids
/// `first_update_id..=final_update_id`. Quantities are absolute: zero means
/// the level is gone.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEvent {
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bid_changes: Vec<(Decimal, Decimal)>,
    pub ask_changes: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Session not ready yet; the diff went to the pending buffer.
    Buffered,
    /// Valid continuation; the store was mutated.
    Applied,
    /// Stale or duplicate delivery; idempotent no-op.
    Discarded,
    /// Gap ahead of the expected id; caller must refetch a snapshot.
    ResyncRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Synced { replayed: usize },
    ResyncRequired,
}

/// Validates and applies incremental updates against the snapshot baseline,
/// detecting gaps and driving resynchronization.
#[derive(Debug, Default)]
pub struct DiffSequencer {
    last_applied_update_id: u64,
    ready: bool,
    pending: Vec<DiffEvent>,
}

impl DiffSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn last_applied_update_id(&self) -> u64 {
        self.last_applied_update_id
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Back to the pre-snapshot state for a fresh session.
    pub fn reset(&mut self) {
        self.last_applied_update_id = 0;
        self.ready = false;
        self.pending.clear();
    }

    /// Applies one diff against the current baseline.
    ///
    /// A diff is a valid continuation iff
    /// `first_update_id <= last_applied + 1 <= final_update_id`.
    pub fn apply(&mut self, store: &mut OrderBookStore, diff: DiffEvent) -> ApplyOutcome {
        if !self.ready {
            if self.pending.len() >= MAX_PENDING_DIFFS {
                self.pending.remove(0);
            }
            self.pending.push(diff);
            return ApplyOutcome::Buffered;
        }

        if diff.final_update_id <= self.last_applied_update_id {
            return ApplyOutcome::Discarded;
        }

        if diff.first_update_id > self.last_applied_update_id + 1 {
            self.ready = false;
            self.pending.clear();
            return ApplyOutcome::ResyncRequired;
        }

        self.apply_changes(store, &diff);
        self.last_applied_update_id = diff.final_update_id;
        ApplyOutcome::Applied
    }

    /// Loads a snapshot baseline and replays the pending buffer over it.
    ///
    /// The replay starts from a bridging event (`U <= seq+1 <= u`) when one
    /// exists. Without one it falls back to the first buffered event whose
    /// `final_update_id >= seq` without proving continuity from the baseline
    /// to that event's start; once replay is underway, any event-to-event
    /// discontinuity forces a fresh resync. With nothing to replay the
    /// snapshot alone is trusted until new stream events arrive.
    pub fn reconcile(
        &mut self,
        store: &mut OrderBookStore,
        snapshot: &DepthSnapshot,
    ) -> ReconcileOutcome {
        store.replace_all(Side::Bid, snapshot.bids.clone());
        store.replace_all(Side::Ask, snapshot.asks.clone());
        self.last_applied_update_id = snapshot.sequence_id;

        let mut buffered = std::mem::take(&mut self.pending);
        buffered.sort_by_key(|event| event.first_update_id);

        let bridge = buffered.iter().position(|event| {
            event.first_update_id <= snapshot.sequence_id + 1
                && snapshot.sequence_id + 1 <= event.final_update_id
        });
        let start = bridge.or_else(|| {
            buffered
                .iter()
                .position(|event| event.final_update_id >= snapshot.sequence_id)
        });

        let Some(start) = start else {
            self.ready = true;
            return ReconcileOutcome::Synced { replayed: 0 };
        };

        let mut replayed = 0usize;
        for event in buffered.into_iter().skip(start) {
            if event.final_update_id <= self.last_applied_update_id {
                continue;
            }

            if replayed > 0 && event.first_update_id > self.last_applied_update_id + 1 {
                self.ready = false;
                return ReconcileOutcome::ResyncRequired;
            }

            self.apply_changes(store, &event);
            self.last_applied_update_id = event.final_update_id;
            replayed += 1;
        }

        self.ready = true;
        ReconcileOutcome::Synced { replayed }
    }

    fn apply_changes(&self, store: &mut OrderBookStore, diff: &DiffEvent) {
        for (price, qty) in &diff.bid_changes {
            store.upsert_or_delete(Side::Bid, *price, *qty);
        }
        for (price, qty) in &diff.ask_changes {
            store.upsert_or_delete(Side::Ask, *price, *qty);
        }
    }
}

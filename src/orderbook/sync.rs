//! Snapshot/delta synchronizer.
//!
//! [`BookSync`] owns one symbol's [`OrderBook`] and decides, message by
//! message, whether an update is applied, buffered, ignored, or forces a
//! resynchronization.
//!
//! # State machine
//!
//! ```text
//! AwaitingSnapshot --snapshot--> Syncing --replay ok--> Live
//!        ^                                               |
//!        |                      gap / checksum mismatch  |
//!        +------------------ Resyncing <-----------------+
//! ```
//!
//! Deltas that arrive before a snapshot are buffered in arrival order. When
//! the snapshot lands, buffered deltas at or below its nonce are dropped and
//! the rest are replayed through the same sequence checks as live deltas.
//! A snapshot sent on the stream itself supersedes everything buffered
//! before it, so nothing is replayed in that case.

use std::collections::VecDeque;
use std::mem;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::Error;
use crate::types::{BookUpdate, Nonce};

use super::book::OrderBook;
use super::checksum::ChecksumFormat;

/// Synchronization state of one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not tracked; updates are ignored
    Unsubscribed,
    /// Subscribed, no snapshot yet; deltas are buffered
    AwaitingSnapshot,
    /// Snapshot applied, replaying buffered deltas
    Syncing,
    /// In sync; deltas are applied as they arrive
    Live,
    /// Book discarded after a desync; waiting for a fresh snapshot
    Resyncing,
}

impl SyncState {
    /// Whether the book can be handed to consumers
    pub fn is_live(self) -> bool {
        self == SyncState::Live
    }

    /// Whether a snapshot is outstanding
    pub fn needs_snapshot(self) -> bool {
        matches!(self, SyncState::AwaitingSnapshot | SyncState::Resyncing)
    }
}

/// Where snapshots come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// The stream itself sends a full-book message after subscribing
    Stream,
    /// Deltas only on the stream; snapshots are fetched separately (REST)
    Fetch,
}

/// How consecutive deltas are checked for gaps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePolicy {
    /// No sequence numbers; every delta is accepted
    None,
    /// Each delta's first id must be exactly `nonce + 1`
    Strict,
    /// Batched ids `[first, last]`: the first delta after a snapshot must
    /// straddle `nonce + 1`, later ones must start at `nonce + 1`
    Ranged,
    /// Each delta names its predecessor, which must equal `nonce`
    Linked,
}

/// Per-protocol synchronization capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProfile {
    /// Where snapshots come from
    pub snapshot_source: SnapshotSource,
    /// Gap detection rule
    pub sequence_policy: SequencePolicy,
    /// Checksum rendering, if the exchange publishes one
    pub checksum: Option<ChecksumFormat>,
}

impl SyncProfile {
    /// Snapshot on the stream, no sequence numbers, no checksum
    pub const fn stream() -> Self {
        Self {
            snapshot_source: SnapshotSource::Stream,
            sequence_policy: SequencePolicy::None,
            checksum: None,
        }
    }

    /// Snapshot fetched separately with the given gap rule
    pub const fn fetch(sequence_policy: SequencePolicy) -> Self {
        Self {
            snapshot_source: SnapshotSource::Fetch,
            sequence_policy,
            checksum: None,
        }
    }

    /// Set the gap rule
    #[must_use]
    pub const fn with_sequence(mut self, sequence_policy: SequencePolicy) -> Self {
        self.sequence_policy = sequence_policy;
        self
    }

    /// Set the checksum format
    #[must_use]
    pub const fn with_checksum(mut self, checksum: Option<ChecksumFormat>) -> Self {
        self.checksum = checksum;
        self
    }
}

/// Why a book was discarded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResyncReason {
    /// Missing or out-of-order sequence
    #[error("sequence gap: expected {expected}, got {got}")]
    Gap {
        /// Sequence the book expected
        expected: Nonce,
        /// Sequence the delta carried
        got: Nonce,
    },
    /// Local book disagrees with the exchange checksum
    #[error("checksum mismatch: local {local}, remote {remote}")]
    Checksum {
        /// Checksum over the local book
        local: i64,
        /// Checksum sent by the exchange
        remote: i64,
    },
    /// Too many deltas without a snapshot
    #[error("{0} deltas buffered without a snapshot")]
    Overflow(usize),
}

impl ResyncReason {
    /// Convert into the crate error for a symbol
    pub fn into_error(self, symbol: &str) -> Error {
        match self {
            ResyncReason::Gap { expected, got } => Error::SequenceGap {
                symbol: symbol.to_string(),
                expected,
                got,
            },
            ResyncReason::Checksum { local, remote } => Error::ChecksumMismatch {
                symbol: symbol.to_string(),
                local,
                remote,
            },
            ResyncReason::Overflow(n) => {
                Error::Malformed(format!("{symbol}: {n} deltas buffered without a snapshot"))
            }
        }
    }
}

/// Result of feeding one message to a [`BookSync`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The book changed and is live; publish it
    Updated,
    /// Held until a snapshot arrives
    Buffered,
    /// Stale, duplicate, or not tracked; book untouched
    Ignored,
    /// Book discarded; a fresh snapshot is required
    Resync(ResyncReason),
}

/// Synchronizer for one symbol's book
#[derive(Debug, Clone)]
pub struct BookSync {
    book: OrderBook,
    state: SyncState,
    profile: SyncProfile,
    buffer: VecDeque<BookUpdate>,
    max_buffered: usize,
    /// Deltas applied since the last snapshot
    applied: u64,
}

impl BookSync {
    /// Create a synchronizer awaiting its first snapshot
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        depth: Option<usize>,
        profile: SyncProfile,
        max_buffered: usize,
    ) -> Self {
        Self {
            book: OrderBook::with_depth(symbol, depth),
            state: SyncState::AwaitingSnapshot,
            profile,
            buffer: VecDeque::new(),
            max_buffered,
            applied: 0,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    /// The book, whatever its state
    #[must_use]
    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Synchronization profile
    #[must_use]
    pub const fn profile(&self) -> &SyncProfile {
        &self.profile
    }

    /// Number of deltas waiting for a snapshot
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Apply a full snapshot and replay buffered deltas
    pub fn on_snapshot(&mut self, snapshot: &BookUpdate) -> SyncOutcome {
        if self.state == SyncState::Unsubscribed {
            return SyncOutcome::Ignored;
        }
        if self.state == SyncState::Live && self.is_stale(snapshot) {
            debug!(
                symbol = %self.book.symbol(),
                nonce = ?snapshot.nonce,
                current = ?self.book.nonce(),
                "dropping stale snapshot"
            );
            return SyncOutcome::Ignored;
        }

        self.state = SyncState::Syncing;
        self.applied = 0;
        let rejected = self.book.reset(snapshot);
        if rejected > 0 {
            warn!(symbol = %snapshot.symbol, rejected, "snapshot contained malformed levels");
        }
        if let Err(reason) = self.verify_checksum(snapshot) {
            return self.resync(reason);
        }

        let pending = mem::take(&mut self.buffer);
        let total = pending.len();
        // an in-band snapshot already covers every delta queued ahead of it
        let pending = match self.profile.snapshot_source {
            SnapshotSource::Stream => VecDeque::new(),
            SnapshotSource::Fetch => pending,
        };
        let mut replayed = 0;
        for delta in &pending {
            if self.is_stale(delta) {
                continue;
            }
            if let Err(reason) = self.apply(delta) {
                return self.resync(reason);
            }
            replayed += 1;
        }

        debug!(
            symbol = %self.book.symbol(),
            nonce = ?self.book.nonce(),
            buffered = total,
            replayed,
            "order book synchronized"
        );
        self.state = SyncState::Live;
        SyncOutcome::Updated
    }

    /// Handle an incremental update
    pub fn on_delta(&mut self, delta: &BookUpdate) -> SyncOutcome {
        match self.state {
            SyncState::Unsubscribed => SyncOutcome::Ignored,
            SyncState::AwaitingSnapshot | SyncState::Syncing | SyncState::Resyncing => {
                if self.buffer.len() >= self.max_buffered {
                    let n = self.buffer.len();
                    return self.resync(ResyncReason::Overflow(n));
                }
                self.buffer.push_back(delta.clone());
                SyncOutcome::Buffered
            }
            SyncState::Live => {
                if self.is_stale(delta) {
                    debug!(
                        symbol = %self.book.symbol(),
                        nonce = ?delta.nonce,
                        current = ?self.book.nonce(),
                        "dropping stale delta"
                    );
                    return SyncOutcome::Ignored;
                }
                match self.apply(delta) {
                    Ok(()) => SyncOutcome::Updated,
                    Err(reason) => self.resync(reason),
                }
            }
        }
    }

    /// Discard the book and wait for a fresh snapshot
    pub fn invalidate(&mut self) {
        if self.state != SyncState::Unsubscribed {
            self.book.clear();
            self.buffer.clear();
            self.applied = 0;
            self.state = SyncState::Resyncing;
        }
    }

    /// Stop tracking; later messages are ignored
    pub fn close(&mut self) {
        self.book.clear();
        self.buffer.clear();
        self.state = SyncState::Unsubscribed;
    }

    fn resync(&mut self, reason: ResyncReason) -> SyncOutcome {
        let error = reason.clone().into_error(self.book.symbol());
        warn!(%error, "order book desynchronized, resyncing");
        self.invalidate();
        SyncOutcome::Resync(reason)
    }

    /// An update at or below the current nonce has already been applied
    fn is_stale(&self, update: &BookUpdate) -> bool {
        match (update.nonce, self.book.nonce()) {
            (Some(nonce), Some(current)) => nonce <= current,
            _ => false,
        }
    }

    fn apply(&mut self, delta: &BookUpdate) -> Result<(), ResyncReason> {
        self.check_sequence(delta)?;
        self.book.apply_levels(delta);
        self.applied += 1;
        self.verify_checksum(delta)
    }

    fn check_sequence(&self, delta: &BookUpdate) -> Result<(), ResyncReason> {
        let Some(current) = self.book.nonce() else {
            return Ok(());
        };
        let expected = current + 1;

        match self.profile.sequence_policy {
            SequencePolicy::None => Ok(()),
            SequencePolicy::Strict => match delta.first_sequence() {
                Some(got) if got != expected => Err(ResyncReason::Gap { expected, got }),
                _ => Ok(()),
            },
            SequencePolicy::Ranged => {
                let (Some(first), Some(last)) = (delta.first_sequence(), delta.nonce) else {
                    return Ok(());
                };
                let in_range = if self.applied == 0 {
                    first <= expected && last >= expected
                } else {
                    first == expected
                };
                if in_range {
                    Ok(())
                } else {
                    Err(ResyncReason::Gap {
                        expected,
                        got: first,
                    })
                }
            }
            SequencePolicy::Linked => match delta.prev_nonce {
                Some(prev) if prev != current => Err(ResyncReason::Gap {
                    expected: current,
                    got: prev,
                }),
                _ => Ok(()),
            },
        }
    }

    fn verify_checksum(&self, update: &BookUpdate) -> Result<(), ResyncReason> {
        match (self.profile.checksum, update.checksum) {
            (Some(format), Some(remote)) => format
                .verify(&self.book, remote)
                .map_err(|local| ResyncReason::Checksum { local, remote }),
            _ => Ok(()),
        }
    }
}

//! `ReceivingMessage`: the per-message state machine driven by the Receiver
//! and ReceivedWaitingProcessor/ReceivedCompletedCleaner workers.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::constants::{MAX_CHUNK_WAITS, WAITING_AFTER_COMPLETE_TIMEOUT};
use crate::identity::{ClusterIdentity, Uuid};
use crate::sending::RetryOutcome;
use crate::waiting_queue::CancelHandle;
use crate::wire::FrameHeader;

/// Where a `ReceivingMessage` is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivingStatus {
    /// Still missing at least one chunk.
    WaitingForChunks {
        /// Number of missing-chunks-request retries issued so far.
        chunk_waits: u32,
    },
    /// Every chunk has arrived.
    SuccessfullyReceived {
        /// When the last chunk arrived.
        at: Instant,
    },
}

struct State {
    chunks: HashMap<u32, Vec<u8>>,
    total_chunks: u32,
    status: ReceivingStatus,
    /// Latched the first time the reassembled message is handed to the
    /// application, so a duplicate chunk arriving after completion can't
    /// trigger a second dispatch.
    processed: bool,
    cancel_handle: Option<CancelHandle>,
}

/// A message being reassembled from chunks, plus bookkeeping for
/// missing-chunk retries and post-completion retention.
pub struct ReceivingMessage {
    /// Identity of this message.
    pub uuid: Uuid,
    /// Cluster identity of the peer that sent this message, if known at
    /// construction time (it may not be, for the very first chunk of a
    /// broadcast from an unseen peer).
    pub source: Option<ClusterIdentity>,
    /// Header carried by the chunk that created this entry.
    pub header: FrameHeader,
    state: Mutex<State>,
}

impl ReceivingMessage {
    /// Start reassembly given the header of the first chunk seen.
    pub fn new(uuid: Uuid, source: Option<ClusterIdentity>, header: FrameHeader) -> Self {
        Self {
            uuid,
            source,
            header,
            state: Mutex::new(State {
                chunks: HashMap::new(),
                total_chunks: header.total_chunks(),
                status: ReceivingStatus::WaitingForChunks { chunk_waits: 0 },
                processed: false,
                cancel_handle: None,
            }),
        }
    }

    /// Record an arriving chunk. Returns `true` if this call completed the
    /// message (i.e. every chunk has now arrived); idempotent for chunks
    /// already recorded.
    pub fn add_chunk(&self, index: u32, payload: Vec<u8>) -> bool {
        let mut state = self.state.lock();
        if matches!(state.status, ReceivingStatus::SuccessfullyReceived { .. }) {
            return false;
        }
        state.chunks.insert(index, payload);
        let complete = state.chunks.len() as u32 >= state.total_chunks;
        if complete {
            state.status = ReceivingStatus::SuccessfullyReceived { at: Instant::now() };
            if let Some(handle) = state.cancel_handle.take() {
                handle.cancel();
            }
        }
        complete
    }

    /// Indices of chunks not yet received, in ascending order.
    pub fn missing_indices(&self) -> Vec<u32> {
        let state = self.state.lock();
        (0..state.total_chunks).filter(|i| !state.chunks.contains_key(i)).collect()
    }

    /// Whether every chunk has arrived.
    pub fn is_complete(&self) -> bool {
        matches!(self.state.lock().status, ReceivingStatus::SuccessfullyReceived { .. })
    }

    /// Concatenate all chunks in order. `None` if incomplete.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        let state = self.state.lock();
        if state.chunks.len() as u32 != state.total_chunks {
            return None;
        }
        let mut out = Vec::with_capacity(self.header.total_size as usize);
        for i in 0..state.total_chunks {
            out.extend_from_slice(state.chunks.get(&i)?);
        }
        Some(out)
    }

    /// Latch marking the reassembled message as having been handed to the
    /// application. Returns `true` the first time, `false` on every
    /// subsequent call.
    pub fn mark_processed(&self) -> bool {
        let mut state = self.state.lock();
        if state.processed {
            return false;
        }
        state.processed = true;
        true
    }

    /// Called by the ReceivedWaitingProcessor when a chunk-wait timer
    /// fires. Checks the retry count against the cap *before* incrementing,
    /// so the `MAX_CHUNK_WAITS`-th retry is actually sent and only the tick
    /// after that gives up (spec §4.5: "if `waitRepeatedCount < 3`,
    /// increment ...").
    pub fn note_chunk_wait_timeout(&self) -> RetryOutcome {
        let mut state = self.state.lock();
        match &mut state.status {
            ReceivingStatus::WaitingForChunks { chunk_waits } => {
                if *chunk_waits < MAX_CHUNK_WAITS {
                    *chunk_waits += 1;
                    RetryOutcome::Retry
                } else {
                    RetryOutcome::GiveUp
                }
            }
            ReceivingStatus::SuccessfullyReceived { .. } => RetryOutcome::GiveUp,
        }
    }

    /// Store the waiting-queue handle scheduling the next chunk-wait check.
    pub fn set_chunk_wait_handle(&self, handle: CancelHandle) {
        let mut state = self.state.lock();
        if let Some(old) = state.cancel_handle.replace(handle) {
            old.cancel();
        }
    }

    /// Whether this message completed long enough ago to be garbage
    /// collected.
    pub fn is_stale(&self, now: Instant) -> bool {
        matches!(self.state.lock().status, ReceivingStatus::SuccessfullyReceived { at } if now.duration_since(at) >= WAITING_AFTER_COMPLETE_TIMEOUT)
    }
}

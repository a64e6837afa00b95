//! `SendingMessage`: the per-message state machine driven by the Sender and
//! SentWaitingProcessor/SentCompletedCleaner workers.
//!
//! A message is chunked exactly once at construction time; everything after
//! that is bookkeeping for retries and eventual garbage collection.

use std::time::Instant;

use parking_lot::Mutex;

use crate::constants::{MAX_RECEIPT_WAITS, SENDING_CHUNK_SIZE, WAITING_AFTER_RECEIPT_TIMEOUT};
use crate::identity::{ClusterIdentity, Uuid};
use crate::waiting_queue::CancelHandle;
use crate::wire::{Frame, FrameHeader};

/// Where a `SendingMessage` is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendingStatus {
    /// Constructed but no chunk has gone out on the wire yet.
    NotSent,
    /// All chunks sent, waiting on a receipt; tracks how many times the
    /// receipt request has been retried.
    WaitingForReceipt {
        /// Number of receipt-request retries issued so far.
        receipt_waits: u32,
    },
    /// Receipt received; kept around briefly to absorb duplicate traffic.
    SuccessfullySent {
        /// When the receipt arrived.
        at: Instant,
    },
}

/// Outcome of a receipt-wait timeout, decided by [`SendingMessage::note_receipt_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Still under the retry cap; re-send the receipt request.
    Retry,
    /// Retry cap exhausted; the message should be abandoned.
    GiveUp,
}

struct State {
    status: SendingStatus,
    cancel_handle: Option<CancelHandle>,
}

/// A message being sent, plus everything needed to retransmit chunks on
/// demand and know when a receipt is overdue.
pub struct SendingMessage {
    /// Identity of this message.
    pub uuid: Uuid,
    /// `None` means broadcast to the whole cluster.
    pub destination: Option<ClusterIdentity>,
    /// Header shared by every frame belonging to this message.
    pub header: FrameHeader,
    /// Pre-split chunk payloads, indexed by chunk index.
    chunks: Vec<Vec<u8>>,
    state: Mutex<State>,
}

impl SendingMessage {
    /// Build a new message, splitting `payload` into `chunk_size`-sized
    /// chunks (the last one may be shorter).
    pub fn new(
        uuid: Uuid,
        destination: Option<ClusterIdentity>,
        payload: &[u8],
        chunk_size: u16,
    ) -> Self {
        let chunks = payload
            .chunks(chunk_size.max(1) as usize)
            .map(|c| c.to_vec())
            .collect::<Vec<_>>();
        let header = FrameHeader {
            uuid,
            destination,
            total_size: payload.len() as u32,
            chunk_size,
        };
        Self {
            uuid,
            destination,
            header,
            chunks,
            state: Mutex::new(State { status: SendingStatus::NotSent, cancel_handle: None }),
        }
    }

    /// Convenience constructor using the default chunk size.
    pub fn with_default_chunk_size(uuid: Uuid, destination: Option<ClusterIdentity>, payload: &[u8]) -> Self {
        Self::new(uuid, destination, payload, SENDING_CHUNK_SIZE)
    }

    /// Total number of chunks this message was split into.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Build every chunk frame, in order, for the initial send.
    pub fn all_chunk_frames(&self) -> Vec<Frame> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(index, payload)| Frame::Chunk {
                header: self.header,
                index: index as u32,
                payload: payload.clone(),
            })
            .collect()
    }

    /// Build the frames needed to satisfy a `MessageChunksNeeded` request.
    pub fn frames_for_indices(&self, indices: &[u32]) -> Vec<Frame> {
        indices
            .iter()
            .filter_map(|&i| self.chunks.get(i as usize).map(|payload| (i, payload)))
            .map(|(index, payload)| Frame::Chunk { header: self.header, index, payload: payload.clone() })
            .collect()
    }

    /// Build the frames needed to satisfy a `MessageChunkRangesNeeded` request.
    pub fn frames_for_ranges(&self, ranges: &[(u32, u32)]) -> Vec<Frame> {
        let indices: Vec<u32> = ranges.iter().flat_map(|&(lo, hi)| lo..=hi).collect();
        self.frames_for_indices(&indices)
    }

    /// Build the `MessageReceiptRequest` frame for this message.
    pub fn receipt_request_frame(&self) -> Frame {
        Frame::ReceiptRequest { header: self.header }
    }

    /// Record that every chunk has gone out and a receipt is now awaited;
    /// stores the waiting-queue handle so a later receipt can cancel it.
    pub fn mark_waiting_for_receipt(&self, handle: CancelHandle) {
        let mut state = self.state.lock();
        state.status = SendingStatus::WaitingForReceipt { receipt_waits: 0 };
        state.cancel_handle = Some(handle);
    }

    /// Swap in a new waiting-queue handle after a retry, without resetting
    /// the retry count tracked by [`Self::note_receipt_timeout`].
    pub fn reschedule_receipt_wait(&self, handle: CancelHandle) {
        let mut state = self.state.lock();
        if let Some(old) = state.cancel_handle.replace(handle) {
            old.cancel();
        }
    }

    /// Record a receipt. Returns `true` the first time this is called for
    /// this message (callers should only act on that first transition);
    /// subsequent calls (duplicate receipts) are no-ops.
    pub fn record_receipt(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(state.status, SendingStatus::SuccessfullySent { .. }) {
            return false;
        }
        if let Some(handle) = state.cancel_handle.take() {
            handle.cancel();
        }
        state.status = SendingStatus::SuccessfullySent { at: Instant::now() };
        true
    }

    /// Called by the SentWaitingProcessor when a receipt-wait timer fires.
    /// Checks the retry count against the cap *before* incrementing, so the
    /// `MAX_RECEIPT_WAITS`-th retry is actually sent and only the tick after
    /// that gives up (spec §4.3: "if `waitRepeatedCount < 3`, increment ...").
    pub fn note_receipt_timeout(&self) -> RetryOutcome {
        let mut state = self.state.lock();
        match &mut state.status {
            SendingStatus::WaitingForReceipt { receipt_waits } => {
                if *receipt_waits < MAX_RECEIPT_WAITS {
                    *receipt_waits += 1;
                    RetryOutcome::Retry
                } else {
                    RetryOutcome::GiveUp
                }
            }
            _ => RetryOutcome::GiveUp,
        }
    }

    /// Current lifecycle status, for inspection by the cleaner worker.
    pub fn status(&self) -> SendingStatus {
        self.state.lock().status.clone()
    }

    /// Whether this message has been fully acknowledged and has sat in the
    /// completed state longer than the retention window, making it eligible
    /// for garbage collection.
    pub fn is_stale(&self, now: Instant) -> bool {
        matches!(self.state.lock().status, SendingStatus::SuccessfullySent { at } if now.duration_since(at) >= WAITING_AFTER_RECEIPT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SendingMessage {
        let cid = ClusterIdentity::generate();
        let uuid = Uuid::generate(cid);
        SendingMessage::new(uuid, None, &vec![7u8; 2500], 1024)
    }

    #[test]
    fn payload_is_split_into_ceil_div_chunks() {
        let msg = sample();
        assert_eq!(msg.chunk_count(), 3);
        let frames = msg.all_chunk_frames();
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn starts_not_sent_then_transitions_to_waiting_then_sent() {
        let msg = sample();
        assert_eq!(msg.status(), SendingStatus::NotSent);

        let queue = crate::waiting_queue::WaitingQueue::new();
        let handle = queue.insert(Instant::now(), ());
        msg.mark_waiting_for_receipt(handle);
        assert!(matches!(msg.status(), SendingStatus::WaitingForReceipt { receipt_waits: 0 }));

        assert!(msg.record_receipt());
        assert!(matches!(msg.status(), SendingStatus::SuccessfullySent { .. }));
    }

    #[test]
    fn duplicate_receipts_are_ignored_after_the_first() {
        let msg = sample();
        let queue = crate::waiting_queue::WaitingQueue::new();
        msg.mark_waiting_for_receipt(queue.insert(Instant::now(), ()));
        assert!(msg.record_receipt());
        assert!(!msg.record_receipt());
    }

    #[test]
    fn receipt_timeout_retries_up_to_the_cap_then_gives_up() {
        let msg = sample();
        let queue = crate::waiting_queue::WaitingQueue::new();
        msg.mark_waiting_for_receipt(queue.insert(Instant::now(), ()));

        // MAX_RECEIPT_WAITS retries are actually sent; only the tick after
        // the cap is reached gives up.
        assert_eq!(msg.note_receipt_timeout(), RetryOutcome::Retry);
        assert_eq!(msg.note_receipt_timeout(), RetryOutcome::Retry);
        assert_eq!(msg.note_receipt_timeout(), RetryOutcome::Retry);
        assert_eq!(msg.note_receipt_timeout(), RetryOutcome::GiveUp);
    }

    #[test]
    fn frames_for_indices_skips_out_of_range() {
        let msg = sample();
        let frames = msg.frames_for_indices(&[0, 2, 99]);
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn frames_for_ranges_expands_inclusive_range() {
        let msg = sample();
        let frames = msg.frames_for_ranges(&[(0, 2)]);
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn not_stale_until_retention_window_elapses() {
        let msg = sample();
        let queue = crate::waiting_queue::WaitingQueue::new();
        msg.mark_waiting_for_receipt(queue.insert(Instant::now(), ()));
        msg.record_receipt();
        assert!(!msg.is_stale(Instant::now()));
        assert!(msg.is_stale(Instant::now() + WAITING_AFTER_RECEIPT_TIMEOUT));
    }
}

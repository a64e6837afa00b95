//! ReceivedWaitingProcessor: wakes on per-message completion deadlines,
//! requests missing chunks, and enforces the retry cap.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::constants::WAITING_FOR_ALL_CHUNKS_TIMEOUT;
use crate::sending::RetryOutcome;
use crate::transport::TransportContext;
use crate::wire::Frame;

pub(crate) fn spawn(ctx: Arc<TransportContext>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("cluster-received-waiting".into())
        .spawn(move || run(ctx))
        .expect("failed to spawn received-waiting thread")
}

fn run(ctx: Arc<TransportContext>) {
    let _span = tracing::info_span!("received_waiting").entered();
    tracing::debug!("received-waiting worker started");

    while ctx.running.load(Ordering::Acquire) {
        let now = Instant::now();
        match ctx.received_waiting_queue.pop_ready(now) {
            Some(uuid) => act(&ctx, uuid),
            None => {
                let sleep = crate::workers::next_sleep(
                    ctx.received_waiting_queue.next_deadline(),
                    crate::constants::POLL_TIMEOUT,
                );
                thread::sleep(sleep);
            }
        }
    }

    tracing::debug!("received-waiting worker stopped");
}

fn act(ctx: &Arc<TransportContext>, uuid: crate::identity::Uuid) {
    let message = match ctx.receiving.read().get(&uuid).cloned() {
        Some(m) => m,
        None => return,
    };

    match message.note_chunk_wait_timeout() {
        RetryOutcome::Retry => {
            let handle = ctx.received_waiting_queue.insert(Instant::now() + WAITING_FOR_ALL_CHUNKS_TIMEOUT, uuid);
            message.set_chunk_wait_handle(handle);

            let missing = message.missing_indices();
            match ctx.resolve_route(uuid.cluster_id) {
                Some((addr, socket)) => {
                    for window in crate::wire::missing_index_windows(&missing) {
                        let frame = Frame::ChunksNeeded { header: message.header, indices: window.to_vec() };
                        let bytes = frame.encode();
                        if let Err(error) = socket.send_to(&bytes, addr) {
                            tracing::warn!(%error, %addr, "failed to send missing-chunks request");
                        }
                    }
                    tracing::debug!(?uuid, missing = missing.len(), "requested missing chunks");
                }
                None => {
                    tracing::trace!(?uuid, "no known route back to sender yet, skipping chunk request");
                }
            }
        }
        RetryOutcome::GiveUp => {
            ctx.receiving.write().remove(&uuid);
            tracing::warn!(?uuid, "chunk-wait retries exhausted, partial message abandoned");
        }
    }
}

//! Sender: pops newly enqueued outbound messages, transmits every chunk
//! once, then arms either the receipt timer (unicast) or the retention
//! timer (broadcast, which is never acknowledged).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::constants::WAITING_FOR_RECEIPT_TIMEOUT;
use crate::identity::Uuid;
use crate::sending::SendingMessage;
use crate::transport::{SendJob, TransportContext};

pub(crate) fn spawn(ctx: Arc<TransportContext>, inbox: Receiver<SendJob>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("cluster-sender".into())
        .spawn(move || run(ctx, inbox))
        .expect("failed to spawn sender thread")
}

fn run(ctx: Arc<TransportContext>, inbox: Receiver<SendJob>) {
    let _span = tracing::info_span!("sender").entered();
    tracing::debug!("sender worker started");

    while ctx.running.load(Ordering::Acquire) {
        match inbox.recv_timeout(crate::constants::POLL_TIMEOUT) {
            Ok(job) => handle_job(&ctx, job),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!("sender worker stopped");
}

fn handle_job(ctx: &Arc<TransportContext>, job: SendJob) {
    let uuid = Uuid::generate(ctx.cluster_id);
    let message = Arc::new(SendingMessage::new(uuid, job.destination, &job.payload, ctx.chunk_size));

    ctx.sending.write().insert(uuid, message.clone());
    tracing::trace!(?uuid, destination = ?job.destination, chunks = message.chunk_count(), "enqueued for send");

    for frame in message.all_chunk_frames() {
        ctx.route_frame(job.destination, &frame);
    }

    match job.destination {
        None => {
            // Broadcast messages are never acknowledged: go straight to the
            // terminal state and let the cleaner reap it after retention.
            message.record_receipt();
            tracing::debug!(?uuid, "broadcast message marked successfully sent");
        }
        Some(_) => {
            let handle = ctx.sent_waiting_queue.insert(Instant::now() + WAITING_FOR_RECEIPT_TIMEOUT, uuid);
            message.mark_waiting_for_receipt(handle);
            tracing::debug!(?uuid, "unicast message waiting for receipt");
        }
    }
}

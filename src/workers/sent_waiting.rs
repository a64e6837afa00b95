//! SentWaitingProcessor: wakes on per-message receipt deadlines, issues
//! receipt requests, and enforces the retry cap.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::constants::WAITING_FOR_RECEIPT_TIMEOUT;
use crate::sending::RetryOutcome;
use crate::transport::TransportContext;

pub(crate) fn spawn(ctx: Arc<TransportContext>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("cluster-sent-waiting".into())
        .spawn(move || run(ctx))
        .expect("failed to spawn sent-waiting thread")
}

fn run(ctx: Arc<TransportContext>) {
    let _span = tracing::info_span!("sent_waiting").entered();
    tracing::debug!("sent-waiting worker started");

    while ctx.running.load(Ordering::Acquire) {
        let now = Instant::now();
        match ctx.sent_waiting_queue.pop_ready(now) {
            Some(uuid) => act(&ctx, uuid),
            None => {
                let sleep = crate::workers::next_sleep(
                    ctx.sent_waiting_queue.next_deadline(),
                    crate::constants::POLL_TIMEOUT,
                );
                thread::sleep(sleep);
            }
        }
    }

    tracing::debug!("sent-waiting worker stopped");
}

fn act(ctx: &Arc<TransportContext>, uuid: crate::identity::Uuid) {
    let message = match ctx.sending.read().get(&uuid).cloned() {
        Some(m) => m,
        None => return, // already removed (receipt + cleaner race)
    };

    match message.note_receipt_timeout() {
        RetryOutcome::Retry => {
            let handle = ctx.sent_waiting_queue.insert(Instant::now() + WAITING_FOR_RECEIPT_TIMEOUT, uuid);
            message.reschedule_receipt_wait(handle);
            ctx.route_frame(message.destination, &message.receipt_request_frame());
            tracing::debug!(?uuid, "retrying receipt request");
        }
        RetryOutcome::GiveUp => {
            ctx.sending.write().remove(&uuid);
            tracing::warn!(?uuid, "receipt retries exhausted, message deemed lost");
        }
    }
}

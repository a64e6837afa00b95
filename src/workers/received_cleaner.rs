//! ReceivedCompletedCleaner: removes fully-reassembled `ReceivingMessage`s
//! once they have sat in the retention window long enough.
//! Mirrors [`crate::workers::sent_cleaner`]; see its module docs for why
//! this is a periodic scan rather than a dedicated completed-queue.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::transport::TransportContext;

pub(crate) fn spawn(ctx: Arc<TransportContext>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("cluster-received-cleaner".into())
        .spawn(move || run(ctx))
        .expect("failed to spawn received-cleaner thread")
}

fn run(ctx: Arc<TransportContext>) {
    let _span = tracing::info_span!("received_cleaner").entered();
    tracing::debug!("received-cleaner worker started");

    while ctx.running.load(Ordering::Acquire) {
        thread::sleep(crate::constants::POLL_TIMEOUT);
        sweep(&ctx);
    }

    tracing::debug!("received-cleaner worker stopped");
}

fn sweep(ctx: &Arc<TransportContext>) {
    let now = Instant::now();
    let mut receiving = ctx.receiving.write();
    let before = receiving.len();
    receiving.retain(|_, message| !message.is_stale(now));
    let removed = before - receiving.len();
    if removed > 0 {
        tracing::trace!(removed, "garbage collected completed receives");
    }
}

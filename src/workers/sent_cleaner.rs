//! SentCompletedCleaner: removes acknowledged `SendingMessage`s once they
//! have sat in the retention window long enough to absorb late duplicate
//! traffic.
//!
//! The protocol describes this as popping a dedicated completed-queue; here
//! it is a periodic retention-scan over `sending` instead (see DESIGN.md)
//! since every terminal-state message already knows its own deadline via
//! [`crate::sending::SendingMessage::is_stale`].

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::transport::TransportContext;

pub(crate) fn spawn(ctx: Arc<TransportContext>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("cluster-sent-cleaner".into())
        .spawn(move || run(ctx))
        .expect("failed to spawn sent-cleaner thread")
}

fn run(ctx: Arc<TransportContext>) {
    let _span = tracing::info_span!("sent_cleaner").entered();
    tracing::debug!("sent-cleaner worker started");

    while ctx.running.load(Ordering::Acquire) {
        thread::sleep(crate::constants::POLL_TIMEOUT);
        sweep(&ctx);
    }

    tracing::debug!("sent-cleaner worker stopped");
}

fn sweep(ctx: &Arc<TransportContext>) {
    let now = Instant::now();
    let mut sending = ctx.sending.write();
    let before = sending.len();
    sending.retain(|_, message| !message.is_stale(now));
    let removed = before - sending.len();
    if removed > 0 {
        tracing::trace!(removed, "garbage collected acknowledged sends");
    }
}

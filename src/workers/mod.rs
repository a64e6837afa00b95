//! The six long-running workers that drive message lifecycle.
//!
//! Every worker is spawned once by [`crate::transport::ClusterTransport::start`]
//! and runs until [`crate::transport::TransportContext::running`] flips to
//! `false`. None of them propagate errors outward: a failed send or a
//! malformed datagram is logged and the loop continues, per the
//! error-handling policy.

pub mod receiver;
pub mod received_cleaner;
pub mod received_waiting;
pub mod sender;
pub mod sent_cleaner;
pub mod sent_waiting;

use std::time::{Duration, Instant};

/// Sleep duration for a waiting-processor tick: wake at the next known
/// deadline if one exists and it's sooner than the poll timeout, otherwise
/// fall back to the poll timeout so shutdown is still observed promptly.
pub(crate) fn next_sleep(next_deadline: Option<Instant>, poll_timeout: Duration) -> Duration {
    match next_deadline {
        Some(deadline) => {
            let now = Instant::now();
            if deadline <= now {
                Duration::ZERO
            } else {
                (deadline - now).min(poll_timeout)
            }
        }
        None => poll_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_poll_timeout_with_no_deadline() {
        assert_eq!(next_sleep(None, Duration::from_millis(200)), Duration::from_millis(200));
    }

    #[test]
    fn caps_at_poll_timeout_for_a_far_deadline() {
        let far = Instant::now() + Duration::from_secs(10);
        assert_eq!(next_sleep(Some(far), Duration::from_millis(200)), Duration::from_millis(200));
    }

    #[test]
    fn returns_zero_for_an_already_passed_deadline() {
        let past = Instant::now() - Duration::from_millis(5);
        assert_eq!(next_sleep(Some(past), Duration::from_millis(200)), Duration::ZERO);
    }
}

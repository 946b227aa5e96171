//! Keepalive scheduling with ping RTT measurement.
//!
//! A ping is due once nothing has been sent for half the read timeout. Ping
//! replies carry no correlation data beyond the reserved xid, so only the
//! most recent ping is timed.

use crate::packet::Request;
use std::time::Duration;
use tokio::time::Instant;
use zk_wire::OpCode;

/// Time left until the next ping, or `None` if a ping is due now
pub fn time_to_next_ping(read_timeout: Duration, idle_send: Duration) -> Option<Duration> {
    let interval = read_timeout / 2;
    interval.checked_sub(idle_send).filter(|left| !left.is_zero())
}

/// Ping request, queued at the tail like normal traffic
pub fn ping_request() -> Request {
    Request::new(OpCode::Ping)
}

/// Tracks the last ping sent for RTT reporting
#[derive(Debug, Default)]
pub struct PingTracker {
    last_sent: Option<Instant>,
}

impl PingTracker {
    /// Record a ping being queued
    pub fn record_ping(&mut self) {
        self.last_sent = Some(Instant::now());
    }

    /// Process a ping reply and return the RTT if a ping was outstanding
    pub fn process_ack(&mut self) -> Option<Duration> {
        self.last_sent.take().map(|sent| sent.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_not_due_before_half_read_timeout() {
        let read_timeout = Duration::from_millis(2000);

        assert_eq!(
            time_to_next_ping(read_timeout, Duration::ZERO),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(
            time_to_next_ping(read_timeout, Duration::from_millis(999)),
            Some(Duration::from_millis(1))
        );
        assert_eq!(time_to_next_ping(read_timeout, Duration::from_millis(1000)), None);
        assert_eq!(time_to_next_ping(read_timeout, Duration::from_millis(5000)), None);
    }

    #[test]
    fn test_ping_request_uses_ping_op() {
        assert_eq!(ping_request().op, OpCode::Ping);
    }

    #[tokio::test]
    async fn test_rtt_only_for_outstanding_ping() {
        let mut tracker = PingTracker::default();
        assert!(tracker.process_ack().is_none());

        tracker.record_ping();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let rtt = tracker.process_ack().unwrap();
        assert!(rtt >= Duration::from_millis(5));

        // a second ack without a new ping reports nothing
        assert!(tracker.process_ack().is_none());
    }
}

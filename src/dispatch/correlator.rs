//! Request/response correlation.
//!
//! The wire format carries no request identifier. Outbound sync requests
//! and inbound correlated messages are numbered independently, both
//! starting at 1, and the Nth request is paired with the Nth correlated
//! message. Waiters live in an ordered map keyed by request number and
//! fire at most once.

use std::collections::BTreeMap;

use tokio::sync::oneshot;

use super::classify::Outcome;
use crate::error::{Error, Result};

/// Pairs outbound requests with inbound replies in FIFO order.
#[derive(Debug)]
pub struct Correlator {
    /// Number given to the next sync request or bare listener.
    next_request_no: u64,
    /// Number given to the next correlated inbound message.
    next_response_no: u64,
    /// Pending one-shot waiters by request number.
    waiters: BTreeMap<u64, oneshot::Sender<Outcome>>,
    /// Set once the inbound side is gone; no waiter can be resolved after.
    closed: bool,
}

impl Correlator {
    /// Create a correlator with both counters at 1.
    pub fn new() -> Self {
        Self {
            next_request_no: 1,
            next_response_no: 1,
            waiters: BTreeMap::new(),
            closed: false,
        }
    }

    /// Take the next request number and register a waiter for it.
    ///
    /// Returns the request number and the receiving half of the waiter.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` once [`close`](Self::close) was called.
    pub fn register_next(&mut self) -> Result<(u64, oneshot::Receiver<Outcome>)> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let request_no = self.next_request_no;
        self.next_request_no += 1;

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(request_no, tx);
        Ok((request_no, rx))
    }

    /// Drop the waiter for a request whose frame never reached the wire.
    ///
    /// The request number stays consumed.
    pub fn cancel(&mut self, request_no: u64) -> bool {
        self.waiters.remove(&request_no).is_some()
    }

    /// Take the next response number and resolve its waiter.
    ///
    /// Returns the response number and whether a waiter received the
    /// outcome. A message with no registered waiter is dropped.
    pub fn resolve_next(&mut self, outcome: Outcome) -> (u64, bool) {
        let response_no = self.next_response_no;
        self.next_response_no += 1;

        let delivered = match self.waiters.remove(&response_no) {
            // The caller may have stopped waiting; that is not an error.
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        };
        (response_no, delivered)
    }

    /// Stop accepting waiters and drop every pending one, returning how
    /// many there were.
    ///
    /// Their receivers resolve with a closed-channel error.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let count = self.waiters.len();
        self.waiters.clear();
        count
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number that the next request will receive.
    pub fn next_request_no(&self) -> u64 {
        self.next_request_no
    }

    /// Number that the next correlated message will receive.
    pub fn next_response_no(&self) -> u64 {
        self.next_response_no
    }

    /// Number of waiters still pending.
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::K;

    #[test]
    fn test_counters_start_at_one() {
        let correlator = Correlator::new();
        assert_eq!(correlator.next_request_no(), 1);
        assert_eq!(correlator.next_response_no(), 1);
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn test_fifo_pairing() {
        let mut correlator = Correlator::new();
        let (first_no, first) = correlator.register_next().unwrap();
        let (second_no, second) = correlator.register_next().unwrap();
        assert_eq!((first_no, second_no), (1, 2));

        assert_eq!(correlator.resolve_next(Ok(K::Long(10))), (1, true));
        assert_eq!(correlator.resolve_next(Ok(K::Long(20))), (2, true));

        assert_eq!(first.await.unwrap().unwrap(), K::Long(10));
        assert_eq!(second.await.unwrap().unwrap(), K::Long(20));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn test_error_outcome_delivered() {
        let mut correlator = Correlator::new();
        let (_, rx) = correlator.register_next().unwrap();

        correlator.resolve_next(Err(Error::Server("rank".into())));

        assert!(matches!(rx.await.unwrap(), Err(Error::Server(_))));
    }

    #[test]
    fn test_unexpected_reply_dropped_but_counted() {
        let mut correlator = Correlator::new();

        assert_eq!(correlator.resolve_next(Ok(K::Null)), (1, false));
        assert_eq!(correlator.next_response_no(), 2);

        // The next request pairs with the next reply number, not the dropped one.
        let (request_no, _rx) = correlator.register_next().unwrap();
        assert_eq!(request_no, 1);
        assert_eq!(correlator.resolve_next(Ok(K::Null)), (2, false));
        assert_eq!(correlator.pending(), 1);
    }

    #[test]
    fn test_resolve_after_receiver_dropped() {
        let mut correlator = Correlator::new();
        let (_, rx) = correlator.register_next().unwrap();
        drop(rx);

        assert_eq!(correlator.resolve_next(Ok(K::Null)), (1, false));
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn test_cancel_keeps_number_consumed() {
        let mut correlator = Correlator::new();
        let (request_no, _rx) = correlator.register_next().unwrap();

        assert!(correlator.cancel(request_no));
        assert!(!correlator.cancel(request_no));
        assert_eq!(correlator.next_request_no(), 2);
    }

    #[tokio::test]
    async fn test_close_abandons_receivers() {
        let mut correlator = Correlator::new();
        let (_, first) = correlator.register_next().unwrap();
        let (_, second) = correlator.register_next().unwrap();

        assert_eq!(correlator.close(), 2);
        assert!(correlator.is_closed());
        assert!(first.await.is_err());
        assert!(second.await.is_err());
    }

    #[test]
    fn test_register_after_close_fails() {
        let mut correlator = Correlator::new();
        correlator.close();

        assert!(matches!(
            correlator.register_next(),
            Err(Error::ConnectionClosed)
        ));
        assert_eq!(correlator.next_request_no(), 1);
    }
}

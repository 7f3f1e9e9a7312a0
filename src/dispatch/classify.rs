//! Classification of inbound messages.
//!
//! Replies, unsolicited messages and subscription updates share one
//! channel. Each extracted message is sorted into exactly one bucket:
//!
//! | Header tag | Decoded value          | Bucket         |
//! |------------|------------------------|----------------|
//! | 2          | anything (or error)    | `Reply`        |
//! | 0 / 1 / ?  | list led by `` `upd `` | `Push`         |
//! | 0 / 1 / ?  | anything else or error | `Unclassified` |
//!
//! `Unclassified` messages are correlated exactly like replies: they are
//! assumed to answer the oldest outstanding sync request. A server that
//! interleaves unsolicited non-update messages with replies will see
//! them misattributed.

use crate::codec::K;
use crate::error::Result;
use crate::protocol::Header;

/// Outcome of decoding one message.
pub type Outcome = Result<K>;

/// Bucket an inbound message falls into.
#[derive(Debug)]
pub enum Classified {
    /// Type tag 2: consumes a response sequence number.
    Reply(Outcome),
    /// Subscription update: delivered to push listeners only.
    Push(K),
    /// Not a reply and not an update; correlated as if it were a reply.
    Unclassified(Outcome),
}

impl Classified {
    /// True if this message consumes a response sequence number.
    pub fn is_correlated(&self) -> bool {
        !matches!(self, Classified::Push(_))
    }

    /// Outcome to hand to a pending waiter, or the update value.
    pub fn into_outcome(self) -> Outcome {
        match self {
            Classified::Reply(outcome) | Classified::Unclassified(outcome) => outcome,
            Classified::Push(value) => Ok(value),
        }
    }
}

/// Classify a decoded message by header tag and value.
pub fn classify(header: &Header, outcome: Outcome) -> Classified {
    if header.is_response() {
        return Classified::Reply(outcome);
    }

    match outcome {
        Ok(value) if value.is_push() => Classified::Push(value),
        other => Classified::Unclassified(other),
    }
}

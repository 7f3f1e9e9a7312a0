//! Dispatch module - classification and correlation of inbound messages.
//!
//! - [`classify`] sorts each extracted message into reply, update, or
//!   unclassified
//! - [`Correlator`] pairs correlated messages with pending requests in
//!   send order

mod classify;
mod correlator;

pub use classify::{classify, Classified, Outcome};
pub use correlator::Correlator;

//! Codec module - the database's binary value format.
//!
//! - [`serialize`] - encode a [`K`] value into a complete IPC message
//! - [`deserialize`] - decode a complete IPC message into a [`K`] value
//!
//! # Design
//!
//! The connection treats the codec as a collaborator: it hands whole
//! messages (header included) to [`deserialize`] together with the
//! connection's [`DecodeOptions`], and only looks at the decoded value to
//! recognise subscription updates ([`K::is_push`]).
//!
//! # Example
//!
//! ```
//! use kdb_ipc::codec::{deserialize, serialize, DecodeOptions, K};
//!
//! let call = K::List(vec![K::from("sum"), K::Longs(vec![1, 2, 3])]);
//! let message = serialize(&call).unwrap();
//! assert_eq!(deserialize(&message, &DecodeOptions::raw()).unwrap(), call);
//! ```

mod compress;
mod deserialize;
mod options;
mod serialize;
mod value;

pub use compress::decompress;
pub use deserialize::deserialize;
pub use options::DecodeOptions;
pub use serialize::serialize;
pub use value::{
    instant_from_days, instant_from_nanos, nanos_from_instant, K, KDB_EPOCH_OFFSET_NANOS,
    NULL_INT, NULL_LONG, PUSH_TAG,
};

//! The `K` value model.
//!
//! Covers the value shapes commonly exchanged over IPC: atoms, typed
//! vectors, general lists, dictionaries and tables.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Symbol that marks a subscription update (`(`upd; table; data)`).
pub const PUSH_TAG: &str = "upd";

/// Nanoseconds between the Unix epoch and the kdb+ epoch (2000.01.01).
pub const KDB_EPOCH_OFFSET_NANOS: i64 = 946_684_800_000_000_000;

/// Nanoseconds per day.
pub const NANOS_PER_DAY: i64 = 86_400_000_000_000;

/// Null timestamp / timespan / long.
pub const NULL_LONG: i64 = i64::MIN;

/// Null date / int.
pub const NULL_INT: i32 = i32::MIN;

/// A value in the database's native representation.
#[derive(Debug, Clone, PartialEq)]
pub enum K {
    /// Generic null `::`.
    Null,
    /// Boolean atom.
    Bool(bool),
    /// Byte atom.
    Byte(u8),
    /// Short atom.
    Short(i16),
    /// Int atom.
    Int(i32),
    /// Long atom.
    Long(i64),
    /// Real atom.
    Real(f32),
    /// Float atom.
    Float(f64),
    /// Char atom.
    Char(u8),
    /// Symbol atom.
    Symbol(String),
    /// Timestamp atom, nanoseconds since 2000.01.01.
    Timestamp(i64),
    /// Date atom, days since 2000.01.01.
    Date(i32),
    /// Timespan atom in nanoseconds.
    Timespan(i64),
    /// Wall-clock instant (decoded timestamp or date); `None` is null.
    Instant(Option<SystemTime>),
    /// Boolean vector.
    Bools(Vec<bool>),
    /// Byte vector.
    Bytes(Vec<u8>),
    /// Short vector.
    Shorts(Vec<i16>),
    /// Int vector.
    Ints(Vec<i32>),
    /// Long vector.
    Longs(Vec<i64>),
    /// Real vector.
    Reals(Vec<f32>),
    /// Float vector.
    Floats(Vec<f64>),
    /// Char vector (string).
    Chars(String),
    /// Symbol vector.
    Symbols(Vec<String>),
    /// Timestamp vector.
    Timestamps(Vec<i64>),
    /// Date vector.
    Dates(Vec<i32>),
    /// Timespan vector.
    Timespans(Vec<i64>),
    /// Instant vector.
    Instants(Vec<Option<SystemTime>>),
    /// General list.
    List(Vec<K>),
    /// Dictionary of keys to values.
    Dict(Box<K>, Box<K>),
    /// Table, held as its column dictionary (symbols to column list).
    Table(Box<K>),
}

impl K {
    /// Symbol atom.
    pub fn symbol(s: impl Into<String>) -> Self {
        K::Symbol(s.into())
    }

    /// Wire type code of this value.
    pub fn type_code(&self) -> i8 {
        match self {
            K::Null => 101,
            K::Bool(_) => -1,
            K::Byte(_) => -4,
            K::Short(_) => -5,
            K::Int(_) => -6,
            K::Long(_) => -7,
            K::Real(_) => -8,
            K::Float(_) => -9,
            K::Char(_) => -10,
            K::Symbol(_) => -11,
            K::Timestamp(_) | K::Instant(_) => -12,
            K::Date(_) => -14,
            K::Timespan(_) => -16,
            K::List(_) => 0,
            K::Bools(_) => 1,
            K::Bytes(_) => 4,
            K::Shorts(_) => 5,
            K::Ints(_) => 6,
            K::Longs(_) => 7,
            K::Reals(_) => 8,
            K::Floats(_) => 9,
            K::Chars(_) => 10,
            K::Symbols(_) => 11,
            K::Timestamps(_) | K::Instants(_) => 12,
            K::Dates(_) => 14,
            K::Timespans(_) => 16,
            K::Table(_) => 98,
            K::Dict(_, _) => 99,
        }
    }

    /// Number of elements of a vector or list; `None` for atoms,
    /// dictionaries and tables.
    pub fn len(&self) -> Option<usize> {
        Some(match self {
            K::List(v) => v.len(),
            K::Bools(v) => v.len(),
            K::Bytes(v) => v.len(),
            K::Shorts(v) => v.len(),
            K::Ints(v) => v.len(),
            K::Longs(v) => v.len(),
            K::Reals(v) => v.len(),
            K::Floats(v) => v.len(),
            K::Chars(s) => s.len(),
            K::Symbols(v) => v.len(),
            K::Timestamps(v) | K::Timespans(v) => v.len(),
            K::Dates(v) => v.len(),
            K::Instants(v) => v.len(),
            _ => return None,
        })
    }

    /// True for an empty vector or list.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Element `i` of a vector or list as a standalone value.
    pub fn get(&self, i: usize) -> Option<K> {
        match self {
            K::List(v) => v.get(i).cloned(),
            K::Bools(v) => v.get(i).copied().map(K::Bool),
            K::Bytes(v) => v.get(i).copied().map(K::Byte),
            K::Shorts(v) => v.get(i).copied().map(K::Short),
            K::Ints(v) => v.get(i).copied().map(K::Int),
            K::Longs(v) => v.get(i).copied().map(K::Long),
            K::Reals(v) => v.get(i).copied().map(K::Real),
            K::Floats(v) => v.get(i).copied().map(K::Float),
            K::Chars(s) => s.as_bytes().get(i).copied().map(K::Char),
            K::Symbols(v) => v.get(i).cloned().map(K::Symbol),
            K::Timestamps(v) => v.get(i).copied().map(K::Timestamp),
            K::Dates(v) => v.get(i).copied().map(K::Date),
            K::Timespans(v) => v.get(i).copied().map(K::Timespan),
            K::Instants(v) => v.get(i).copied().map(K::Instant),
            _ => None,
        }
    }

    /// Leading symbol of a list-like value, if it has one.
    ///
    /// Subscription updates are lists whose first element is the
    /// [`PUSH_TAG`] symbol.
    pub fn push_tag(&self) -> Option<&str> {
        match self {
            K::List(items) => match items.first() {
                Some(K::Symbol(s)) => Some(s),
                _ => None,
            },
            K::Symbols(symbols) => symbols.first().map(String::as_str),
            _ => None,
        }
    }

    /// True if this value is a subscription update.
    pub fn is_push(&self) -> bool {
        self.push_tag() == Some(PUSH_TAG)
    }

    /// Integer value of a byte, short, int or long atom.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            K::Byte(v) => Some(v.into()),
            K::Short(v) => Some(v.into()),
            K::Int(v) => Some(v.into()),
            K::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Floating value of a real or float atom.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            K::Real(v) => Some(v.into()),
            K::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Text of a symbol atom or char vector.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            K::Symbol(s) | K::Chars(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for K {
    fn from(s: &str) -> Self {
        K::Chars(s.to_string())
    }
}

impl From<String> for K {
    fn from(s: String) -> Self {
        K::Chars(s)
    }
}

impl From<bool> for K {
    fn from(v: bool) -> Self {
        K::Bool(v)
    }
}

impl From<i32> for K {
    fn from(v: i32) -> Self {
        K::Int(v)
    }
}

impl From<i64> for K {
    fn from(v: i64) -> Self {
        K::Long(v)
    }
}

impl From<f64> for K {
    fn from(v: f64) -> Self {
        K::Float(v)
    }
}

impl From<Vec<K>> for K {
    fn from(items: Vec<K>) -> Self {
        K::List(items)
    }
}

/// Convert kdb+ epoch nanoseconds to an instant; null and out-of-range
/// values map to `None`.
pub fn instant_from_nanos(nanos: i64) -> Option<SystemTime> {
    if nanos == NULL_LONG {
        return None;
    }
    let unix = i128::from(nanos) + i128::from(KDB_EPOCH_OFFSET_NANOS);
    let magnitude = Duration::from_nanos(u64::try_from(unix.unsigned_abs()).ok()?);
    if unix >= 0 {
        UNIX_EPOCH.checked_add(magnitude)
    } else {
        UNIX_EPOCH.checked_sub(magnitude)
    }
}

/// Convert a kdb+ date (days since 2000.01.01) to an instant.
pub fn instant_from_days(days: i32) -> Option<SystemTime> {
    if days == NULL_INT {
        return None;
    }
    instant_from_nanos(i64::from(days).checked_mul(NANOS_PER_DAY)?)
}

/// Convert an instant to kdb+ epoch nanoseconds; `None` encodes as null.
pub fn nanos_from_instant(instant: Option<SystemTime>) -> i64 {
    let Some(instant) = instant else {
        return NULL_LONG;
    };
    let unix = match instant.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_nanos() as i128,
        Err(before) => -(before.duration().as_nanos() as i128),
    };
    let nanos = unix - i128::from(KDB_EPOCH_OFFSET_NANOS);
    i64::try_from(nanos).unwrap_or(NULL_LONG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_tag_on_general_list() {
        let update = K::List(vec![K::symbol("upd"), K::symbol("trade"), K::Long(1)]);
        assert_eq!(update.push_tag(), Some("upd"));
        assert!(update.is_push());

        let other = K::List(vec![K::symbol("ok"), K::Long(1)]);
        assert!(!other.is_push());
    }

    #[test]
    fn test_push_tag_on_symbol_vector() {
        let update = K::Symbols(vec!["upd".into(), "quote".into()]);
        assert!(update.is_push());
    }

    #[test]
    fn test_push_tag_absent() {
        assert!(K::Long(1).push_tag().is_none());
        assert!(K::List(vec![]).push_tag().is_none());
        assert!(K::List(vec![K::Chars("upd".into())]).push_tag().is_none());
        assert!(K::Chars("upd".into()).push_tag().is_none());
    }

    #[test]
    fn test_get_returns_atoms() {
        let longs = K::Longs(vec![10, 20]);
        assert_eq!(longs.get(1), Some(K::Long(20)));
        assert_eq!(longs.get(2), None);

        let chars = K::Chars("ab".into());
        assert_eq!(chars.get(0), Some(K::Char(b'a')));

        assert_eq!(K::Long(1).get(0), None);
    }

    #[test]
    fn test_len_and_type_code() {
        assert_eq!(K::Symbols(vec!["a".into()]).len(), Some(1));
        assert_eq!(K::Long(1).len(), None);
        assert!(K::List(vec![]).is_empty());

        assert_eq!(K::Long(1).type_code(), -7);
        assert_eq!(K::Instants(vec![]).type_code(), 12);
        assert_eq!(K::Null.type_code(), 101);
    }

    #[test]
    fn test_instant_conversions() {
        assert_eq!(
            instant_from_nanos(0),
            UNIX_EPOCH.checked_add(Duration::from_secs(946_684_800))
        );
        assert_eq!(instant_from_nanos(NULL_LONG), None);
        assert_eq!(instant_from_days(NULL_INT), None);
        assert_eq!(instant_from_days(1), instant_from_nanos(NANOS_PER_DAY));

        // Before the kdb+ epoch and before the Unix epoch
        assert_eq!(instant_from_nanos(-KDB_EPOCH_OFFSET_NANOS), Some(UNIX_EPOCH));
        let before_unix = instant_from_nanos(-KDB_EPOCH_OFFSET_NANOS - 1_000).unwrap();
        assert!(before_unix < UNIX_EPOCH);

        assert_eq!(nanos_from_instant(instant_from_nanos(123_456)), 123_456);
        assert_eq!(nanos_from_instant(None), NULL_LONG);
    }

    #[test]
    fn test_conversions_into_k() {
        assert_eq!(K::from("1+1"), K::Chars("1+1".into()));
        assert_eq!(K::from(2i64), K::Long(2));
        assert_eq!(K::from(vec![K::Null]), K::List(vec![K::Null]));
        assert_eq!(K::Long(5).as_i64(), Some(5));
        assert_eq!(K::symbol("x").as_str(), Some("x"));
    }
}

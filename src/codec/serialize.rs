//! Value encoding.
//!
//! Produces complete little-endian, uncompressed messages tagged as
//! async (type 0). Callers that expect a reply overwrite the type tag
//! with [`set_message_type`](crate::protocol::set_message_type).

use super::value::{nanos_from_instant, K};
use crate::error::{Error, Result};
use crate::protocol::{build_message, MessageType, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};

/// Encode a value into a complete IPC message (header + body).
///
/// # Example
///
/// ```
/// use kdb_ipc::codec::{serialize, K};
///
/// let message = serialize(&K::from("1+1")).unwrap();
/// assert_eq!(message.len(), 8 + 6 + 3);
/// assert_eq!(&message[14..], b"1+1");
/// ```
pub fn serialize(value: &K) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    write_value(&mut body, value)?;

    if HEADER_SIZE + body.len() > DEFAULT_MAX_MESSAGE_SIZE as usize {
        return Err(Error::Encode(format!(
            "Message size {} exceeds maximum {}",
            HEADER_SIZE + body.len(),
            DEFAULT_MAX_MESSAGE_SIZE
        )));
    }

    Ok(build_message(MessageType::Async, &body))
}

fn write_value(out: &mut Vec<u8>, value: &K) -> Result<()> {
    out.push(value.type_code() as u8);
    match value {
        K::Null => out.push(0),
        K::Bool(v) => out.push(u8::from(*v)),
        K::Byte(v) | K::Char(v) => out.push(*v),
        K::Short(v) => out.extend_from_slice(&v.to_le_bytes()),
        K::Int(v) | K::Date(v) => out.extend_from_slice(&v.to_le_bytes()),
        K::Long(v) | K::Timestamp(v) | K::Timespan(v) => out.extend_from_slice(&v.to_le_bytes()),
        K::Real(v) => out.extend_from_slice(&v.to_le_bytes()),
        K::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
        K::Symbol(s) => write_symbol(out, s)?,
        K::Instant(v) => out.extend_from_slice(&nanos_from_instant(*v).to_le_bytes()),

        K::Bools(v) => {
            write_vector_prefix(out, v.len())?;
            out.extend(v.iter().map(|b| u8::from(*b)));
        }
        K::Bytes(v) => {
            write_vector_prefix(out, v.len())?;
            out.extend_from_slice(v);
        }
        K::Chars(s) => {
            write_vector_prefix(out, s.len())?;
            out.extend_from_slice(s.as_bytes());
        }
        K::Shorts(v) => {
            write_vector_prefix(out, v.len())?;
            v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes()));
        }
        K::Ints(v) | K::Dates(v) => {
            write_vector_prefix(out, v.len())?;
            v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes()));
        }
        K::Longs(v) | K::Timestamps(v) | K::Timespans(v) => {
            write_vector_prefix(out, v.len())?;
            v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes()));
        }
        K::Reals(v) => {
            write_vector_prefix(out, v.len())?;
            v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes()));
        }
        K::Floats(v) => {
            write_vector_prefix(out, v.len())?;
            v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes()));
        }
        K::Instants(v) => {
            write_vector_prefix(out, v.len())?;
            v.iter()
                .for_each(|x| out.extend_from_slice(&nanos_from_instant(*x).to_le_bytes()));
        }
        K::Symbols(v) => {
            write_vector_prefix(out, v.len())?;
            for s in v {
                write_symbol(out, s)?;
            }
        }
        K::List(items) => {
            write_vector_prefix(out, items.len())?;
            for item in items {
                write_value(out, item)?;
            }
        }

        K::Dict(keys, values) => {
            write_value(out, keys)?;
            write_value(out, values)?;
        }
        K::Table(columns) => {
            if !matches!(**columns, K::Dict(_, _)) {
                return Err(Error::Encode(
                    "Table must wrap a column dictionary".to_string(),
                ));
            }
            // attribute byte
            out.push(0);
            write_value(out, columns)?;
        }
    }
    Ok(())
}

/// Attribute byte plus 32-bit element count.
fn write_vector_prefix(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = i32::try_from(len)
        .map_err(|_| Error::Encode(format!("Vector of {} elements is too long", len)))?;
    out.push(0);
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_symbol(out: &mut Vec<u8>, symbol: &str) -> Result<()> {
    if symbol.as_bytes().contains(&0) {
        return Err(Error::Encode(format!(
            "Symbol {:?} contains a NUL byte",
            symbol
        )));
    }
    out.extend_from_slice(symbol.as_bytes());
    out.push(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(value: &K) -> Vec<u8> {
        serialize(value).unwrap()[HEADER_SIZE..].to_vec()
    }

    #[test]
    fn test_header_is_little_endian_async() {
        let message = serialize(&K::Long(1)).unwrap();
        assert_eq!(&message[..4], &[1, 0, 0, 0]);
        assert_eq!(message.len(), 17);
        assert_eq!(&message[4..8], &17u32.to_le_bytes());
    }

    #[test]
    fn test_long_atom() {
        assert_eq!(body(&K::Long(10)), vec![0xf9, 10, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_char_vector() {
        assert_eq!(body(&K::from("ab")), vec![10, 0, 2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_symbol_atom_is_nul_terminated() {
        assert_eq!(body(&K::symbol("upd")), vec![0xf5, b'u', b'p', b'd', 0]);
    }

    #[test]
    fn test_symbol_with_nul_rejected() {
        let err = serialize(&K::symbol("a\0b")).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
    }

    #[test]
    fn test_general_list_call_payload() {
        let call = K::List(vec![K::from("f"), K::Long(1)]);
        assert_eq!(
            body(&call),
            vec![
                0, 0, 2, 0, 0, 0, // list header
                10, 0, 1, 0, 0, 0, b'f', // "f"
                0xf9, 1, 0, 0, 0, 0, 0, 0, 0, // 1j
            ]
        );
    }

    #[test]
    fn test_generic_null() {
        assert_eq!(body(&K::Null), vec![101, 0]);
    }

    #[test]
    fn test_table_requires_dictionary() {
        let err = serialize(&K::Table(Box::new(K::Long(1)))).unwrap_err();
        assert!(err.to_string().contains("column dictionary"));

        let table = K::Table(Box::new(K::Dict(
            Box::new(K::Symbols(vec!["a".into()])),
            Box::new(K::List(vec![K::Longs(vec![1])])),
        )));
        let encoded = body(&table);
        assert_eq!(&encoded[..3], &[98, 0, 99]);
    }
}

//! Value decoding.

use super::compress::decompress;
use super::options::DecodeOptions;
use super::value::{instant_from_days, instant_from_nanos, K};
use crate::error::{Error, Result};
use crate::protocol::{Header, HEADER_SIZE};

/// Deepest nesting of lists, dictionaries and tables that will decode.
const MAX_DEPTH: usize = 256;

/// Decode a complete IPC message (header + body) into a value.
///
/// Honours the endianness flag and expands compressed messages. A
/// server error object decodes as [`Error::Server`]. Values nested more
/// than 256 levels deep are rejected.
///
/// # Example
///
/// ```
/// use kdb_ipc::codec::{deserialize, serialize, DecodeOptions, K};
///
/// let message = serialize(&K::Long(42)).unwrap();
/// let value = deserialize(&message, &DecodeOptions::default()).unwrap();
/// assert_eq!(value, K::Long(42));
/// ```
pub fn deserialize(message: &[u8], options: &DecodeOptions) -> Result<K> {
    let header = Header::decode(message)
        .ok_or_else(|| Error::Decode("Message shorter than header".to_string()))?;

    let expanded;
    let message = if header.is_compressed() {
        expanded = decompress(message, options.max_message_size)?;
        &expanded[..]
    } else {
        message
    };

    let mut reader = Reader {
        buf: &message[HEADER_SIZE..],
        pos: 0,
        little: header.is_little_endian(),
        depth: 0,
        options,
    };
    reader.value()
}

/// Cursor over a message body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    little: bool,
    depth: usize,
    options: &'a DecodeOptions,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return Err(Error::Decode(format!(
                "Unexpected end of message at offset {}",
                self.pos
            )));
        };
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        if !self.little {
            out.reverse();
        }
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16> {
        self.array().map(i16::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32> {
        self.array().map(i32::from_le_bytes)
    }

    fn i64(&mut self) -> Result<i64> {
        self.array().map(i64::from_le_bytes)
    }

    fn f32(&mut self) -> Result<f32> {
        self.array().map(f32::from_le_bytes)
    }

    fn f64(&mut self) -> Result<f64> {
        self.array().map(f64::from_le_bytes)
    }

    /// NUL-terminated string (symbols, error text).
    fn cstr(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let Some(nul) = rest.iter().position(|b| *b == 0) else {
            return Err(Error::Decode("Unterminated symbol".to_string()));
        };
        let text = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(text)
    }

    /// Attribute byte plus element count of a vector.
    fn vector_len(&mut self, element_size: usize) -> Result<usize> {
        let _attribute = self.u8()?;
        let n = self.i32()?;
        let n = usize::try_from(n)
            .map_err(|_| Error::Decode(format!("Negative vector length {}", n)))?;
        let remaining = self.buf.len() - self.pos;
        if n.saturating_mul(element_size) > remaining {
            return Err(Error::Decode(format!(
                "Vector of {} elements overruns message",
                n
            )));
        }
        Ok(n)
    }

    fn many<T>(
        &mut self,
        element_size: usize,
        mut read: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let n = self.vector_len(element_size)?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(read(self)?);
        }
        Ok(out)
    }

    fn value(&mut self) -> Result<K> {
        if self.depth == MAX_DEPTH {
            return Err(Error::Decode(format!(
                "Nesting too deep at offset {}",
                self.pos
            )));
        }
        self.depth += 1;
        let value = self.item();
        self.depth -= 1;
        value
    }

    fn item(&mut self) -> Result<K> {
        let type_code = self.u8()? as i8;
        let options = *self.options;

        let value = match type_code {
            -128 => return Err(Error::Server(self.cstr()?)),
            -1 => K::Bool(self.u8()? != 0),
            -4 => K::Byte(self.u8()?),
            -5 => K::Short(self.i16()?),
            -6 => K::Int(self.i32()?),
            -7 => {
                let v = self.i64()?;
                if options.long_to_number {
                    K::Float(v as f64)
                } else {
                    K::Long(v)
                }
            }
            -8 => K::Real(self.f32()?),
            -9 => K::Float(self.f64()?),
            -10 => {
                let c = self.u8()?;
                if options.empty_char_to_null && c == b' ' {
                    K::Null
                } else {
                    K::Char(c)
                }
            }
            -11 => K::Symbol(self.cstr()?),
            -12 => {
                let v = self.i64()?;
                if options.nanos_to_date {
                    K::Instant(instant_from_nanos(v))
                } else {
                    K::Timestamp(v)
                }
            }
            -14 => {
                let v = self.i32()?;
                if options.nanos_to_date {
                    K::Instant(instant_from_days(v))
                } else {
                    K::Date(v)
                }
            }
            -16 => K::Timespan(self.i64()?),

            0 => K::List(self.many(1, Self::value)?),
            1 => K::Bools(self.many(1, |r| Ok(r.u8()? != 0))?),
            4 => {
                let n = self.vector_len(1)?;
                K::Bytes(self.take(n)?.to_vec())
            }
            5 => K::Shorts(self.many(2, Self::i16)?),
            6 => K::Ints(self.many(4, Self::i32)?),
            7 => {
                let v = self.many(8, Self::i64)?;
                if options.long_to_number {
                    K::Floats(v.into_iter().map(|x| x as f64).collect())
                } else {
                    K::Longs(v)
                }
            }
            8 => K::Reals(self.many(4, Self::f32)?),
            9 => K::Floats(self.many(8, Self::f64)?),
            10 => {
                let n = self.vector_len(1)?;
                K::Chars(String::from_utf8_lossy(self.take(n)?).into_owned())
            }
            11 => K::Symbols(self.many(1, Self::cstr)?),
            12 => {
                let v = self.many(8, Self::i64)?;
                if options.nanos_to_date {
                    K::Instants(v.into_iter().map(instant_from_nanos).collect())
                } else {
                    K::Timestamps(v)
                }
            }
            14 => {
                let v = self.many(4, Self::i32)?;
                if options.nanos_to_date {
                    K::Instants(v.into_iter().map(instant_from_days).collect())
                } else {
                    K::Dates(v)
                }
            }
            16 => K::Timespans(self.many(8, Self::i64)?),

            98 => {
                let _attribute = self.u8()?;
                let columns = self.value()?;
                table(columns, options.flip_tables)?
            }
            99 | 127 => {
                let keys = self.value()?;
                let values = self.value()?;
                K::Dict(Box::new(keys), Box::new(values))
            }
            101 => match self.u8()? {
                0 => K::Null,
                op => {
                    return Err(Error::Decode(format!(
                        "Unsupported unary primitive {}",
                        op
                    )))
                }
            },
            other => return Err(Error::Decode(format!("Unsupported type {}", other))),
        };

        Ok(value)
    }
}

/// Build a table value from its column dictionary.
fn table(columns: K, flip: bool) -> Result<K> {
    let K::Dict(names, data) = columns else {
        return Err(Error::Decode("Table without column dictionary".to_string()));
    };
    if !flip {
        return Ok(K::Table(Box::new(K::Dict(names, data))));
    }

    let (K::Symbols(names), K::List(data)) = (*names, *data) else {
        return Err(Error::Decode("Malformed table columns".to_string()));
    };
    let rows = data.first().and_then(K::len).unwrap_or(0);
    let keys = K::Symbols(names);

    let mut out = Vec::with_capacity(rows);
    for i in 0..rows {
        let row = data
            .iter()
            .map(|column| {
                column
                    .get(i)
                    .ok_or_else(|| Error::Decode("Ragged table column".to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        out.push(K::Dict(Box::new(keys.clone()), Box::new(K::List(row))));
    }
    Ok(K::List(out))
}

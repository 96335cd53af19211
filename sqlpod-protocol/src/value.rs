//! Bencode values.
//!
//! ```text
//! byte-string  <length>:<bytes>     4:spam
//! integer      i<digits>e           i-42e
//! list         l<items>e            l4:spami1ee
//! dictionary   d<key><value>...e    d2:op8:describee
//! ```
//!
//! Dictionary keys are byte-strings and are always emitted in sorted order,
//! which makes the encoding canonical.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// A bencode dictionary, ordered by raw key bytes.
pub type Dict = BTreeMap<Bytes, Value>;

/// A single bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Bytes),
    Integer(i64),
    List(Vec<Value>),
    Dict(Dict),
}

impl Value {
    /// Creates a byte-string value from UTF-8 text.
    pub fn string(text: impl Into<String>) -> Self {
        Value::Bytes(Bytes::from(text.into()))
    }

    /// Creates a byte-string value from raw bytes.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Value::Bytes(data.into())
    }

    /// Creates a list of byte-strings.
    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(Value::string).collect())
    }

    /// Creates a dictionary from key/value pairs. Later duplicates win.
    pub fn dict<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Bytes>,
    {
        Value::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Creates an empty dictionary.
    pub fn empty_dict() -> Self {
        Value::Dict(Dict::new())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the byte-string as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up a key when this value is a dictionary.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key.as_bytes()))
    }

    /// Short name of the value's kind, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "byte-string",
            Value::Integer(_) => "integer",
            Value::List(_) => "list",
            Value::Dict(_) => "dictionary",
        }
    }

    /// Appends the canonical encoding of this value to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Value::Bytes(b) => encode_bytes(b, buf),
            Value::Integer(i) => {
                buf.put_u8(b'i');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_u8(b'e');
            }
            Value::List(items) => {
                buf.put_u8(b'l');
                for item in items {
                    item.encode_into(buf);
                }
                buf.put_u8(b'e');
            }
            Value::Dict(entries) => {
                buf.put_u8(b'd');
                for (key, value) in entries {
                    encode_bytes(key, buf);
                    value.encode_into(buf);
                }
                buf.put_u8(b'e');
            }
        }
    }

    /// Returns the number of bytes `encode_into` will append.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::Bytes(b) => bytes_len(b),
            Value::Integer(i) => 2 + i.to_string().len(),
            Value::List(items) => 2 + items.iter().map(Value::encoded_len).sum::<usize>(),
            Value::Dict(entries) => {
                2 + entries
                    .iter()
                    .map(|(k, v)| bytes_len(k) + v.encoded_len())
                    .sum::<usize>()
            }
        }
    }
}

fn encode_bytes(data: &[u8], buf: &mut BytesMut) {
    buf.put_slice(data.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(data);
}

fn bytes_len(data: &[u8]) -> usize {
    data.len().to_string().len() + 1 + data.len()
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::string(text)
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::string(text)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Dict> for Value {
    fn from(entries: Dict) -> Self {
        Value::Dict(entries)
    }
}

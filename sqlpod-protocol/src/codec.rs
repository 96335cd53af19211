//! Encoder and incremental decoder for bencode envelopes.

use crate::error::ProtocolError;
use crate::message::Response;
use crate::value::{Dict, Value};
use crate::{MAX_DEPTH, MAX_MESSAGE_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use std::ops::Range;

/// Longest digit run accepted for an integer or a byte-string length.
const MAX_DIGITS: usize = 20;

/// Encodes values and responses into bytes.
pub struct Encoder;

impl Encoder {
    /// Encodes a single value.
    pub fn encode(value: &Value) -> BytesMut {
        let mut buf = BytesMut::with_capacity(value.encoded_len());
        value.encode_into(&mut buf);
        buf
    }

    /// Encodes a response envelope.
    pub fn encode_response(response: &Response) -> BytesMut {
        Self::encode(&response.to_value())
    }
}

/// Decodes bencode values from bytes that may arrive in arbitrary chunks.
///
/// Incoming bytes are first walked by a resumable scan that only checks
/// structure and remembers where it stopped, so each byte is scanned once no
/// matter how many chunks a message arrives in. Values are built in a
/// single pass once the scan has seen a complete top-level value.
pub struct Decoder {
    buffer: BytesMut,
    max_message_size: usize,
    scan: ScanState,
}

/// Progress of the structural scan over `buffer`.
#[derive(Debug, Default)]
struct ScanState {
    /// Offset of the first byte not yet scanned; always a token boundary.
    pos: usize,
    /// Containers opened and not yet closed.
    open: Vec<Container>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    List,
    Dict { expect_key: bool },
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    /// Creates a decoder that rejects messages larger than `max` bytes.
    pub fn with_max_message_size(max: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_message_size: max,
            scan: ScanState::default(),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next top-level value from the buffer.
    ///
    /// Returns `Ok(Some(value))` and consumes exactly its bytes when a
    /// complete value is buffered, `Ok(None)` if more data is needed, or `Err`
    /// when the buffered bytes can never form a valid value.
    pub fn decode_value(&mut self) -> Result<Option<Value>, ProtocolError> {
        let end = match self.scan_value() {
            Ok(Some(end)) => end,
            Ok(None) => {
                if self.buffer.len() > self.max_message_size {
                    return Err(ProtocolError::MessageTooLarge {
                        size: self.buffer.len(),
                        max: self.max_message_size,
                    });
                }
                return Ok(None);
            }
            Err(e) => {
                self.scan = ScanState::default();
                return Err(e);
            }
        };
        self.scan = ScanState::default();

        let mut parser = Parser::new(&self.buffer[..end], self.max_message_size);
        // The scan saw a complete value, so the parser cannot run short.
        let value = parser
            .parse_value()?
            .ok_or(ProtocolError::InvalidLength { offset: 0 })?;
        self.buffer.advance(end);
        Ok(Some(value))
    }

    /// Attempts to decode the next message, which must be a dictionary.
    pub fn decode_message(&mut self) -> Result<Option<Dict>, ProtocolError> {
        match self.decode_value()? {
            Some(Value::Dict(dict)) => Ok(Some(dict)),
            Some(other) => Err(ProtocolError::NotADict {
                found: other.type_name(),
            }),
            None => Ok(None),
        }
    }

    /// Returns the error describing input that ended at the current position.
    pub fn end_of_input(&self) -> ProtocolError {
        ProtocolError::UnexpectedEof {
            buffered: self.buffer.len(),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan = ScanState::default();
    }

    /// Skips past undecodable input to the next byte that can start a
    /// message (a `d` followed by a length digit), or clears the buffer when
    /// there is none. The first buffered byte is always dropped.
    ///
    /// Returns the number of bytes dropped.
    pub fn resync(&mut self) -> usize {
        let buf = &self.buffer;
        let skip = (1..buf.len())
            .find(|&i| buf[i] == b'd' && buf.get(i + 1).map_or(true, u8::is_ascii_digit))
            .unwrap_or(buf.len());
        self.buffer.advance(skip);
        self.scan = ScanState::default();
        skip
    }

    /// Advances the structural scan as far as the buffered bytes allow.
    ///
    /// Returns the end offset of the first complete top-level value, or
    /// `Ok(None)` after recording where to resume.
    fn scan_value(&mut self) -> Result<Option<usize>, ProtocolError> {
        let mut parser = Parser::new(&self.buffer, self.max_message_size);
        parser.pos = self.scan.pos;
        let open = &mut self.scan.open;

        loop {
            let offset = parser.pos;
            let Some(byte) = parser.peek() else {
                self.scan.pos = offset;
                return Ok(None);
            };

            match (open.last().copied(), byte) {
                (Some(Container::Dict { expect_key: false }), b'e') => {
                    return Err(ProtocolError::UnexpectedByte { byte, offset });
                }
                (Some(_), b'e') => {
                    parser.pos += 1;
                    open.pop();
                }
                (Some(Container::Dict { expect_key: true }), b) if !b.is_ascii_digit() => {
                    return Err(ProtocolError::NonStringKey { offset });
                }
                (_, b'l' | b'd') => {
                    if open.len() >= MAX_DEPTH {
                        return Err(ProtocolError::TooDeep { max: MAX_DEPTH });
                    }
                    parser.pos += 1;
                    open.push(if byte == b'l' {
                        Container::List
                    } else {
                        Container::Dict { expect_key: true }
                    });
                    continue;
                }
                (_, b'i') => {
                    if parser.parse_integer()?.is_none() {
                        self.scan.pos = offset;
                        return Ok(None);
                    }
                }
                (_, b'0'..=b'9') => {
                    if parser.bytes_range()?.is_none() {
                        self.scan.pos = offset;
                        return Ok(None);
                    }
                }
                _ => return Err(ProtocolError::UnexpectedByte { byte, offset }),
            }

            // A value just ended: a scalar, or the container closed above.
            match open.last_mut() {
                None => return Ok(Some(parser.pos)),
                Some(Container::Dict { expect_key }) => *expect_key = !*expect_key,
                Some(Container::List) => {}
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursive-descent parser over a borrowed buffer.
///
/// Every `parse_*` method returns `Ok(None)` when the buffer ends before the
/// value does, so callers can retry once more bytes arrive.
struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
    max_len: usize,
}

impl<'a> Parser<'a> {
    fn new(buf: &'a [u8], max_len: usize) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
            max_len,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn parse_value(&mut self) -> Result<Option<Value>, ProtocolError> {
        let Some(byte) = self.peek() else {
            return Ok(None);
        };
        match byte {
            b'i' => Ok(self.parse_integer()?.map(Value::Integer)),
            b'0'..=b'9' => Ok(self.parse_bytes()?.map(Value::Bytes)),
            b'l' => self.parse_list(),
            b'd' => self.parse_dict(),
            _ => Err(ProtocolError::UnexpectedByte {
                byte,
                offset: self.pos,
            }),
        }
    }

    fn enter(&mut self) -> Result<(), ProtocolError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ProtocolError::TooDeep { max: MAX_DEPTH });
        }
        self.pos += 1;
        Ok(())
    }

    fn parse_list(&mut self) -> Result<Option<Value>, ProtocolError> {
        self.enter()?;
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Ok(None),
                Some(b'e') => {
                    self.pos += 1;
                    self.depth -= 1;
                    return Ok(Some(Value::List(items)));
                }
                Some(_) => {
                    let Some(item) = self.parse_value()? else {
                        return Ok(None);
                    };
                    items.push(item);
                }
            }
        }
    }

    fn parse_dict(&mut self) -> Result<Option<Value>, ProtocolError> {
        self.enter()?;
        let mut entries = Dict::new();
        loop {
            match self.peek() {
                None => return Ok(None),
                Some(b'e') => {
                    self.pos += 1;
                    self.depth -= 1;
                    return Ok(Some(Value::Dict(entries)));
                }
                Some(b'0'..=b'9') => {
                    let Some(key) = self.parse_bytes()? else {
                        return Ok(None);
                    };
                    let Some(value) = self.parse_value()? else {
                        return Ok(None);
                    };
                    if entries.contains_key(&key) {
                        return Err(ProtocolError::DuplicateKey {
                            key: String::from_utf8_lossy(&key).into_owned(),
                        });
                    }
                    entries.insert(key, value);
                }
                Some(_) => return Err(ProtocolError::NonStringKey { offset: self.pos }),
            }
        }
    }

    fn parse_integer(&mut self) -> Result<Option<i64>, ProtocolError> {
        let start = self.pos;
        let digits_start = start + 1;
        let rest = &self.buf[digits_start..];

        // A sign, MAX_DIGITS digits and the terminator at most.
        let window = &rest[..rest.len().min(MAX_DIGITS + 2)];
        let Some(end) = window.iter().position(|&b| b == b'e') else {
            // Fail early on garbage instead of waiting for an 'e' forever.
            check_integer_prefix(window, start)?;
            return Ok(None);
        };

        let digits = &rest[..end];
        let invalid = |reason| ProtocolError::InvalidInteger {
            offset: start,
            reason,
        };
        check_integer_prefix(digits, start)?;
        match digits {
            [] => return Err(invalid("empty")),
            [b'-'] => return Err(invalid("missing digits")),
            [b'-', b'0', ..] => return Err(invalid("negative zero or leading zero")),
            [b'0', _, ..] => return Err(invalid("leading zero")),
            _ => {}
        }

        // Only ASCII digits and a leading '-' remain at this point.
        let text = std::str::from_utf8(digits).map_err(|_| invalid("not ASCII"))?;
        let value = text.parse::<i64>().map_err(|_| invalid("out of range"))?;
        self.pos = digits_start + end + 1;
        Ok(Some(value))
    }

    fn parse_bytes(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        Ok(self
            .bytes_range()?
            .map(|range| Bytes::copy_from_slice(&self.buf[range])))
    }

    /// Reads a byte-string header and returns where its data lies, without
    /// copying it.
    fn bytes_range(&mut self) -> Result<Option<Range<usize>>, ProtocolError> {
        let start = self.pos;
        let rest = &self.buf[start..];
        let invalid = ProtocolError::InvalidLength { offset: start };

        let window = &rest[..rest.len().min(MAX_DIGITS + 1)];
        let Some(colon) = window.iter().position(|&b| b == b':') else {
            if rest.len() > MAX_DIGITS || !rest.iter().all(u8::is_ascii_digit) {
                return Err(invalid);
            }
            return Ok(None);
        };

        let digits = &rest[..colon];
        if digits.is_empty()
            || digits.len() > MAX_DIGITS
            || !digits.iter().all(u8::is_ascii_digit)
            || (digits.len() > 1 && digits[0] == b'0')
        {
            return Err(invalid);
        }

        let len: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(invalid)?;
        if len > self.max_len {
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: self.max_len,
            });
        }

        let data_start = start + colon + 1;
        let data_end = data_start + len;
        if self.buf.len() < data_end {
            return Ok(None);
        }

        self.pos = data_end;
        Ok(Some(data_start..data_end))
    }
}

fn check_integer_prefix(digits: &[u8], offset: usize) -> Result<(), ProtocolError> {
    let body = digits.strip_prefix(b"-").unwrap_or(digits);
    if digits.len() > MAX_DIGITS {
        return Err(ProtocolError::InvalidInteger {
            offset,
            reason: "too many digits",
        });
    }
    if !body.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::InvalidInteger {
            offset,
            reason: "not a number",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_all(data: &[u8]) -> Result<Option<Value>, ProtocolError> {
        let mut decoder = Decoder::new();
        decoder.extend(data);
        decoder.decode_value()
    }

    #[test]
    fn test_decode_message() {
        let mut decoder = Decoder::new();
        decoder.extend(b"d2:op8:describee");

        let msg = decoder.decode_message().unwrap().unwrap();
        assert_eq!(
            msg.get(&b"op"[..]).and_then(Value::as_str),
            Some("describe")
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_decoding() {
        let encoded = Encoder::encode(&Value::dict([
            ("op", Value::string("invoke")),
            ("id", Value::string("1")),
            ("args", Value::string("[{\"sql\":\"select 1\"}]")),
        ]));

        let mut decoder = Decoder::new();
        for chunk in encoded.chunks(3) {
            assert!(decoder.decode_value().unwrap().is_none());
            decoder.extend(chunk);
        }

        let decoded = decoder.decode_value().unwrap().unwrap();
        assert_eq!(decoded.get("id").and_then(Value::as_str), Some("1"));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_values_in_buffer() {
        let mut decoder = Decoder::new();
        decoder.extend(b"d2:op8:describeed2:op8:shutdownei7e");

        let first = decoder.decode_value().unwrap().unwrap();
        assert_eq!(first.get("op").and_then(Value::as_str), Some("describe"));

        let second = decoder.decode_value().unwrap().unwrap();
        assert_eq!(second.get("op").and_then(Value::as_str), Some("shutdown"));

        assert_eq!(decoder.decode_value().unwrap(), Some(Value::Integer(7)));
        assert!(decoder.decode_value().unwrap().is_none());
    }

    #[test]
    fn test_truncated_inputs_need_more() {
        for input in [
            &b"d"[..],
            b"d2:op",
            b"d2:op8:desc",
            b"l4:spam",
            b"i-12",
            b"12",
            b"3:ab",
        ] {
            assert!(decode_all(input).unwrap().is_none(), "{:?}", input);
        }
    }

    #[test]
    fn test_end_of_input_is_distinguishable() {
        let mut decoder = Decoder::new();
        decoder.extend(b"d2:op8:desc");
        assert!(decoder.decode_value().unwrap().is_none());

        let err = decoder.end_of_input();
        assert!(err.is_end_of_stream());
        assert!(matches!(err, ProtocolError::UnexpectedEof { buffered: 11 }));
    }

    #[test]
    fn test_invalid_integers() {
        for input in [&b"ie"[..], b"i-e", b"i-0e", b"i03e", b"i1x2e", b"i99999999999999999999e"] {
            let result = decode_all(input);
            assert!(
                matches!(result, Err(ProtocolError::InvalidInteger { .. })),
                "{:?} -> {:?}",
                input,
                result
            );
        }
        assert_eq!(decode_all(b"i0e").unwrap(), Some(Value::Integer(0)));
        assert_eq!(decode_all(b"i-10e").unwrap(), Some(Value::Integer(-10)));
    }

    #[test]
    fn test_garbage_fails_without_terminator() {
        assert!(matches!(
            decode_all(b"iabc"),
            Err(ProtocolError::InvalidInteger { .. })
        ));
        assert!(matches!(
            decode_all(b"12x"),
            Err(ProtocolError::InvalidLength { .. })
        ));
        assert!(matches!(
            decode_all(b"x"),
            Err(ProtocolError::UnexpectedByte { byte: b'x', offset: 0 })
        ));
    }

    #[test]
    fn test_invalid_lengths() {
        assert!(matches!(
            decode_all(b"05:hello"),
            Err(ProtocolError::InvalidLength { .. })
        ));
        assert!(matches!(
            decode_all(b"d:e"),
            Err(ProtocolError::NonStringKey { .. })
        ));
    }

    #[test]
    fn test_dict_key_rules() {
        assert!(matches!(
            decode_all(b"di1ei2ee"),
            Err(ProtocolError::NonStringKey { offset: 1 })
        ));
        assert!(matches!(
            decode_all(b"d1:ai1e1:ai2ee"),
            Err(ProtocolError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_depth_limit() {
        let mut nested = vec![b'l'; MAX_DEPTH + 1];
        nested.extend(vec![b'e'; MAX_DEPTH + 1]);
        assert!(matches!(
            decode_all(&nested),
            Err(ProtocolError::TooDeep { .. })
        ));

        let mut ok = vec![b'l'; MAX_DEPTH];
        ok.extend(vec![b'e'; MAX_DEPTH]);
        assert!(decode_all(&ok).unwrap().is_some());
    }

    #[test]
    fn test_message_size_limit() {
        let mut decoder = Decoder::with_max_message_size(16);
        decoder.extend(b"100:");
        assert!(matches!(
            decoder.decode_value(),
            Err(ProtocolError::MessageTooLarge { size: 100, max: 16 })
        ));

        let mut decoder = Decoder::with_max_message_size(8);
        decoder.extend(b"l1:a1:b1:c1:d");
        assert!(matches!(
            decoder.decode_value(),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_non_dict_message() {
        let mut decoder = Decoder::new();
        decoder.extend(b"l2:ope");
        assert!(matches!(
            decoder.decode_message(),
            Err(ProtocolError::NotADict { found: "list" })
        ));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_clear() {
        let mut decoder = Decoder::default();
        decoder.extend(b"some data");
        assert_eq!(decoder.buffered(), 9);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_scan_resumes_where_it_stopped() {
        let mut decoder = Decoder::new();
        decoder.extend(b"li0ei1");
        assert!(decoder.decode_value().unwrap().is_none());
        // The complete integer is not scanned again; the partial one is.
        assert_eq!(decoder.scan.pos, 4);
        assert_eq!(decoder.scan.open, vec![Container::List]);

        decoder.extend(b"2ee");
        assert_eq!(
            decoder.decode_value().unwrap(),
            Some(Value::List(vec![Value::Integer(0), Value::Integer(12)]))
        );
        assert_eq!(decoder.scan.pos, 0);
        assert!(decoder.scan.open.is_empty());
    }

    #[test]
    fn test_large_message_in_small_chunks() {
        let mut decoder = Decoder::new();
        decoder.extend(b"l");
        for _ in 0..1000 {
            decoder.extend(b"i0e");
            assert!(decoder.decode_value().unwrap().is_none());
            assert_eq!(decoder.scan.pos, decoder.buffered());
        }

        decoder.extend(b"e");
        match decoder.decode_value().unwrap() {
            Some(Value::List(items)) => assert_eq!(items.len(), 1000),
            other => panic!("expected a list, got {:?}", other),
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_dict_value_cannot_be_missing() {
        assert!(matches!(
            decode_all(b"d1:ae"),
            Err(ProtocolError::UnexpectedByte { byte: b'e', offset: 4 })
        ));
    }

    #[test]
    fn test_error_resets_scan() {
        let mut decoder = Decoder::new();
        decoder.extend(b"l1:a");
        assert!(decoder.decode_value().unwrap().is_none());
        decoder.extend(b"x");
        assert!(decoder.decode_value().is_err());
        assert_eq!(decoder.scan.pos, 0);
        assert!(decoder.scan.open.is_empty());
    }

    #[test]
    fn test_resync_skips_to_next_message() {
        let mut decoder = Decoder::new();
        decoder.extend(b"x123d2:op8:describee");
        assert!(decoder.decode_value().is_err());

        assert_eq!(decoder.resync(), 4);
        let msg = decoder.decode_value().unwrap().unwrap();
        assert_eq!(msg.get("op").and_then(Value::as_str), Some("describe"));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_resync_without_candidate_clears() {
        let mut decoder = Decoder::new();
        decoder.extend(b"garbage dx");
        assert_eq!(decoder.resync(), 10);
        assert_eq!(decoder.buffered(), 0);

        // A trailing 'd' may still start a message once its key arrives.
        decoder.extend(b"??d");
        assert_eq!(decoder.resync(), 2);
        assert_eq!(decoder.buffered(), 1);
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Value::Integer),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(Value::bytes),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::List),
                proptest::collection::btree_map(
                    proptest::collection::vec(any::<u8>(), 0..8).prop_map(Bytes::from),
                    inner,
                    0..8
                )
                .prop_map(Value::Dict),
            ]
        })
    }

    proptest! {
        #[test]
        fn test_roundtrip(value in arb_value()) {
            let encoded = Encoder::encode(&value);
            let mut decoder = Decoder::new();
            decoder.extend(&encoded);
            prop_assert_eq!(decoder.decode_value().unwrap(), Some(value));
            prop_assert_eq!(decoder.buffered(), 0);
        }

        #[test]
        fn test_chunked_decoding_matches_whole(value in arb_value(), chunk in 1usize..16) {
            let encoded = Encoder::encode(&value);
            let mut decoder = Decoder::new();
            let mut decoded = None;
            for part in encoded.chunks(chunk) {
                prop_assert!(decoded.is_none());
                decoder.extend(part);
                decoded = decoder.decode_value().unwrap();
            }
            prop_assert_eq!(decoded, Some(value));
            prop_assert_eq!(decoder.buffered(), 0);
        }

        #[test]
        fn test_arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut decoder = Decoder::new();
            decoder.extend(&data);
            let _ = decoder.decode_value();
        }
    }
}

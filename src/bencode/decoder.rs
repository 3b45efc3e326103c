//! Strict bencode decoding.
//!
//! The decoder walks a byte slice rather than a generic `Read`, so that
//! callers (notably metainfo parsing) can capture exact byte spans of
//! sub-values — this is what lets info-hash derivation hash the original
//! wire bytes of the `info` dictionary instead of a re-encoding of it.
use super::{BencodeError, BencodeResult, BencodeValue};
use std::collections::BTreeMap;
use std::ops::Range;

pub struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Decoder { input, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> BencodeResult<u8> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::Unterminated { pos: self.pos })
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    /// Decodes the next value and reports the byte range it spanned.
    pub fn decode_value_with_span(&mut self) -> BencodeResult<(BencodeValue, Range<usize>)> {
        let start = self.pos;
        let value = self.decode_value()?;
        Ok((value, start..self.pos))
    }

    pub fn decode_value(&mut self) -> BencodeResult<BencodeValue> {
        match self.peek()? {
            b'0'..=b'9' => self.decode_string().map(BencodeValue::String),
            b'i' => self.decode_integer().map(BencodeValue::Integer),
            b'l' => self.decode_list().map(BencodeValue::List),
            b'd' => self.decode_dict().map(BencodeValue::Dict),
            byte => Err(BencodeError::BadType {
                pos: self.pos,
                byte,
            }),
        }
    }

    fn decode_string(&mut self) -> BencodeResult<Vec<u8>> {
        let len_start = self.pos;
        let colon = self.input[self.pos..]
            .iter()
            .position(|&b| b == b':')
            .ok_or(BencodeError::Unterminated { pos: len_start })?;
        let len_bytes = &self.input[self.pos..self.pos + colon];
        if len_bytes.is_empty() {
            return Err(BencodeError::InvalidLength { pos: len_start });
        }
        if len_bytes[0] == b'-' {
            return Err(BencodeError::InvalidLength { pos: len_start });
        }
        if len_bytes.len() > 1 && len_bytes[0] == b'0' {
            return Err(BencodeError::LeadingZero { pos: len_start });
        }
        let len_str = std::str::from_utf8(len_bytes)
            .map_err(|_| BencodeError::InvalidLength { pos: len_start })?;
        let len: usize = len_str
            .parse()
            .map_err(|_| BencodeError::InvalidLength { pos: len_start })?;
        self.advance(colon + 1);
        if self.pos + len > self.input.len() {
            return Err(BencodeError::Unterminated { pos: len_start });
        }
        let bytes = self.input[self.pos..self.pos + len].to_vec();
        self.advance(len);
        Ok(bytes)
    }

    fn decode_integer(&mut self) -> BencodeResult<i64> {
        let start = self.pos;
        debug_assert_eq!(self.peek()?, b'i');
        self.advance(1);
        let e = self.input[self.pos..]
            .iter()
            .position(|&b| b == b'e')
            .ok_or(BencodeError::Unterminated { pos: start })?;
        let digits = &self.input[self.pos..self.pos + e];
        if digits.is_empty() {
            return Err(BencodeError::InvalidLength { pos: start });
        }
        let (neg, unsigned) = match digits[0] {
            b'-' => (true, &digits[1..]),
            _ => (false, digits),
        };
        if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
            return Err(BencodeError::InvalidLength { pos: start });
        }
        if unsigned.len() > 1 && unsigned[0] == b'0' {
            return Err(BencodeError::LeadingZero { pos: start });
        }
        if neg && unsigned == b"0" {
            return Err(BencodeError::NegativeZero { pos: start });
        }
        let text = std::str::from_utf8(digits).expect("ascii digits checked above");
        let value: i64 = text
            .parse()
            .map_err(|_| BencodeError::IntegerOverflow { pos: start })?;
        self.advance(e + 1);
        Ok(value)
    }

    fn decode_list(&mut self) -> BencodeResult<Vec<BencodeValue>> {
        debug_assert_eq!(self.peek()?, b'l');
        self.advance(1);
        let mut items = Vec::new();
        loop {
            if self.peek()? == b'e' {
                self.advance(1);
                return Ok(items);
            }
            items.push(self.decode_value()?);
        }
    }

    fn decode_dict(&mut self) -> BencodeResult<BTreeMap<Vec<u8>, BencodeValue>> {
        debug_assert_eq!(self.peek()?, b'd');
        self.advance(1);
        let mut dict = BTreeMap::new();
        loop {
            if self.peek()? == b'e' {
                self.advance(1);
                return Ok(dict);
            }
            let key_pos = self.pos;
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::DictKeyNotString { pos: key_pos });
            }
            let key = self.decode_string()?;
            let value = self.decode_value()?;
            dict.insert(key, value);
        }
    }
}

/// A single key/value pair from a top-level dictionary, with the exact byte
/// range the value occupied in the source buffer.
pub struct DictEntry {
    pub key: Vec<u8>,
    pub value: BencodeValue,
    pub span: Range<usize>,
}

/// Decodes a top-level bencode dictionary, returning each entry's value
/// together with the byte span it came from.
///
/// Metainfo parsing uses this to capture the exact on-wire bytes of the
/// `info` sub-dictionary: info-hash derivation must hash those bytes
/// verbatim rather than a re-encoding, since a torrent produced by another
/// client may not use canonical key ordering or integer formatting.
pub fn decode_dict_with_spans(bytes: &[u8]) -> BencodeResult<Vec<DictEntry>> {
    let mut d = Decoder::new(bytes);
    match d.peek()? {
        b'd' => d.advance(1),
        byte => {
            return Err(BencodeError::BadType { pos: d.pos, byte });
        }
    }
    let mut entries = Vec::new();
    loop {
        if d.peek()? == b'e' {
            d.advance(1);
            break;
        }
        let key_pos = d.pos;
        if !d.peek()?.is_ascii_digit() {
            return Err(BencodeError::DictKeyNotString { pos: key_pos });
        }
        let key = d.decode_string()?;
        let (value, span) = d.decode_value_with_span()?;
        entries.push(DictEntry { key, value, span });
    }
    if d.position() != bytes.len() {
        return Err(BencodeError::TrailingGarbage { pos: d.position() });
    }
    Ok(entries)
}

/// Decodes exactly one top-level value, rejecting any trailing bytes.
pub fn decode_top_level(bytes: &[u8]) -> BencodeResult<BencodeValue> {
    let mut decoder = Decoder::new(bytes);
    let value = decoder.decode_value()?;
    if decoder.position() != bytes.len() {
        return Err(BencodeError::TrailingGarbage {
            pos: decoder.position(),
        });
    }
    Ok(value)
}

//! Bencode codec.
//!
//! Bencode is the encoding BitTorrent metainfo files and tracker responses
//! use. It has exactly four value types: byte strings, integers, lists and
//! dictionaries. Dictionary keys are sorted lexicographically on encode so
//! that the same logical value always produces the same bytes — this is
//! what makes info-hash derivation reproducible.
use std::collections::BTreeMap;
use thiserror::Error;

pub mod decoder;
pub mod encoder;

/// A decoded bencode value.
///
/// Byte strings are kept as raw bytes rather than decoded as UTF-8 text,
/// since bencode byte strings are not guaranteed (or required) to be text.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_str_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// The position and kind of a decode failure, as required by the codec's
/// strictness contract: callers can report exactly where parsing went wrong.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad type at byte {pos}: unexpected character {byte:?}")]
    BadType { pos: usize, byte: u8 },

    #[error("leading zero in length/integer at byte {pos}")]
    LeadingZero { pos: usize },

    #[error("negative zero integer at byte {pos}")]
    NegativeZero { pos: usize },

    #[error("unterminated value starting at byte {pos}")]
    Unterminated { pos: usize },

    #[error("trailing garbage after top-level value at byte {pos}")]
    TrailingGarbage { pos: usize },

    #[error("dictionary keys must be byte strings (at byte {pos})")]
    DictKeyNotString { pos: usize },

    #[error("integer overflow at byte {pos}")]
    IntegerOverflow { pos: usize },

    #[error("invalid length prefix at byte {pos}")]
    InvalidLength { pos: usize },
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;

/// Decodes a single top-level bencode value, rejecting trailing bytes.
pub fn decode(bytes: &[u8]) -> BencodeResult<BencodeValue> {
    decoder::decode_top_level(bytes)
}

/// Encodes a value into canonical bencode bytes (dict keys sorted).
pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut buf = Vec::new();
    encoder::encode_value(&mut buf, value);
    buf
}

//! Canonical bencode encoding.
//!
//! Dictionary keys are always emitted in sorted order (guaranteed here by
//! `BencodeValue::Dict` being a `BTreeMap`), so encoding is deterministic:
//! the same logical value always produces the same bytes.
use super::BencodeValue;

pub fn encode_value(out: &mut Vec<u8>, value: &BencodeValue) {
    match value {
        BencodeValue::String(s) => encode_string(out, s),
        BencodeValue::Integer(i) => encode_integer(out, *i),
        BencodeValue::List(items) => encode_list(out, items),
        BencodeValue::Dict(map) => encode_dict(out, map),
    }
}

fn encode_string(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(s.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(s);
}

fn encode_integer(out: &mut Vec<u8>, i: i64) {
    out.push(b'i');
    out.extend_from_slice(i.to_string().as_bytes());
    out.push(b'e');
}

fn encode_list(out: &mut Vec<u8>, items: &[BencodeValue]) {
    out.push(b'l');
    for item in items {
        encode_value(out, item);
    }
    out.push(b'e');
}

fn encode_dict(out: &mut Vec<u8>, map: &std::collections::BTreeMap<Vec<u8>, BencodeValue>) {
    out.push(b'd');
    for (key, value) in map {
        encode_string(out, key);
        encode_value(out, value);
    }
    out.push(b'e');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn encodes_integer_and_string() {
        let mut out = Vec::new();
        encode_value(&mut out, &BencodeValue::Integer(-7));
        assert_eq!(out, b"i-7e");

        let mut out = Vec::new();
        encode_value(&mut out, &BencodeValue::String(b"abc".to_vec()));
        assert_eq!(out, b"3:abc");
    }

    #[test]
    fn decode_encode_round_trips_any_value() {
        let samples: &[&[u8]] = &[
            b"i0e",
            b"i-123e",
            b"4:spam",
            b"le",
            b"li1ei2ei3ee",
            b"de",
            b"d3:bar4:spam3:fooi42ee",
        ];
        for sample in samples {
            let value = decode(sample).unwrap();
            let mut out = Vec::new();
            encode_value(&mut out, &value);
            assert_eq!(&out, sample, "round trip mismatch for {:?}", sample);
        }
    }
}

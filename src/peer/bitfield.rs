//! MSB-first piece bitmap, as sent once per peer in a BITFIELD message and
//! updated incrementally by HAVE messages.
use super::{PeerError, PeerResult};

#[derive(Debug, Clone)]
pub struct Bitfield {
    bits: Vec<bool>,
}

impl Bitfield {
    pub fn new(number_of_pieces: usize) -> Self {
        Bitfield {
            bits: vec![false; number_of_pieces],
        }
    }

    /// Parses a BITFIELD payload. `bytes` must be at least long enough to
    /// cover `number_of_pieces` bits; trailing bits beyond that count must
    /// be zero, but per §4.6 a violation is logged rather than fatal.
    pub fn from_bytes(bytes: &[u8], number_of_pieces: usize) -> PeerResult<Self> {
        let min_bytes = (number_of_pieces + 7) / 8;
        if bytes.len() < min_bytes {
            return Err(PeerError::MalformedMessage(
                "bitfield shorter than piece count requires",
            ));
        }
        let mut bits = vec![false; number_of_pieces];
        for index in 0..number_of_pieces {
            let byte = bytes[index / 8];
            let mask = 0x80 >> (index % 8);
            bits[index] = byte & mask != 0;
        }
        if let Some(extra) = trailing_bits_nonzero(bytes, number_of_pieces) {
            tracing::debug!(extra_bits = extra, "bitfield has nonzero spare bits");
        }
        Ok(Bitfield { bits })
    }

    pub fn has(&self, index: usize) -> bool {
        self.bits.get(index).copied().unwrap_or(false)
    }

    pub fn set(&mut self, index: usize) {
        if let Some(bit) = self.bits.get_mut(index) {
            *bit = true;
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

fn trailing_bits_nonzero(bytes: &[u8], number_of_pieces: usize) -> Option<u32> {
    let used_bits = number_of_pieces;
    let total_bits = bytes.len() * 8;
    if total_bits <= used_bits {
        return None;
    }
    let mut count = 0;
    for index in used_bits..total_bits {
        let byte = bytes[index / 8];
        let mask = 0x80 >> (index % 8);
        if byte & mask != 0 {
            count += 1;
        }
    }
    (count > 0).then_some(count)
}

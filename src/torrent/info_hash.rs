//! Info-hash: the 20-byte SHA-1 identity of a torrent.
use sha1::{Digest, Sha1};
use std::fmt;

/// SHA-1 of the exact bencoded `info` dictionary, bit-exact with the bytes
/// as they appeared in the source `.torrent` file.
///
/// Deriving it from a raw byte slice (rather than re-encoding a parsed
/// `info` dict) matters: a torrent produced by another client may not use
/// canonical bencode formatting, and the hash must match what every other
/// client on the swarm computed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn from_raw_info_bytes(info_bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest);
        InfoHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

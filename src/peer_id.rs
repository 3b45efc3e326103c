//! Local client peer-id generation.
//!
//! Format: `-<client2><ver4>-<12 random alnum>`, Azureus-style, chosen once
//! per process and reused for every tracker announce and peer handshake.
use rand::Rng;

const CLIENT_TAG: &[u8; 2] = b"RT";
const CLIENT_VERSION: &[u8; 4] = b"0100";
const ALNUM: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[0] = b'-';
        id[1..3].copy_from_slice(CLIENT_TAG);
        id[3..7].copy_from_slice(CLIENT_VERSION);
        id[7] = b'-';
        let mut rng = rand::rng();
        for slot in &mut id[8..20] {
            *slot = ALNUM[rng.random_range(0..ALNUM.len())];
        }
        PeerId(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "PeerId({:?})", s),
            Err(_) => write!(f, "PeerId({:?})", self.0),
        }
    }
}

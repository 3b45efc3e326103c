//! Piece/block ledger (§4.4): what has been requested, what has arrived,
//! and when a piece is ready for hash verification.
use crate::peer::Bitfield;
use crate::torrent::Metainfo;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Identifies a single REQUEST/PIECE exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub piece_index: usize,
    pub begin: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceStatus {
    Missing,
    InFlight,
    Complete,
    Verified,
}

struct PieceState {
    requested: HashSet<u32>,
    received: HashSet<u32>,
    buffer: Option<Vec<u8>>,
    status: PieceStatus,
    fully_requested: bool,
}

impl PieceState {
    fn new() -> Self {
        PieceState {
            requested: HashSet::new(),
            received: HashSet::new(),
            buffer: None,
            status: PieceStatus::Missing,
            fully_requested: false,
        }
    }

    fn reset(&mut self) {
        self.requested.clear();
        self.received.clear();
        self.buffer = None;
        self.status = PieceStatus::Missing;
        self.fully_requested = false;
    }
}

struct Inner {
    metainfo: Arc<Metainfo>,
    pieces: Vec<PieceState>,
    fully_requested_pieces: usize,
    endgame: bool,
}

/// Owns all piece state. Shared as `Arc<Ledger>` between the engine and
/// every peer session; every mutating method takes the single internal
/// lock for its whole body so "choose a block and mark it requested" is
/// one uninterruptible step — no suspension point separates the check
/// from the mark, so two sessions can never double-claim a block.
pub struct Ledger {
    inner: Mutex<Inner>,
}

impl Ledger {
    pub fn new(metainfo: Arc<Metainfo>) -> Self {
        let pieces = (0..metainfo.number_of_pieces())
            .map(|_| PieceState::new())
            .collect();
        Ledger {
            inner: Mutex::new(Inner {
                metainfo,
                pieces,
                fully_requested_pieces: 0,
                endgame: false,
            }),
        }
    }

    /// Picks a block the peer has that this ledger wants requested,
    /// preferring to finish InFlight pieces before starting new ones, and
    /// marks it requested before returning. Dedup is skipped once the
    /// ledger has entered endgame.
    pub async fn next_block(&self, remote: &Bitfield) -> Option<BlockId> {
        let mut inner = self.inner.lock().await;
        let endgame = inner.endgame;
        let metainfo = Arc::clone(&inner.metainfo);

        let mut in_flight_order: Vec<usize> = Vec::new();
        let mut missing_order: Vec<usize> = Vec::new();
        for (index, piece) in inner.pieces.iter().enumerate() {
            if !remote.has(index) {
                continue;
            }
            match piece.status {
                PieceStatus::InFlight => in_flight_order.push(index),
                PieceStatus::Missing => missing_order.push(index),
                PieceStatus::Complete | PieceStatus::Verified => {}
            }
        }

        for piece_index in in_flight_order.into_iter().chain(missing_order) {
            let blocks_per_piece = metainfo.blocks_per_piece(piece_index);
            let piece = &mut inner.pieces[piece_index];
            for block_index in 0..blocks_per_piece {
                let begin = block_index as u32 * crate::config::BLOCK_SIZE;
                if piece.received.contains(&begin) {
                    continue;
                }
                if !endgame && piece.requested.contains(&begin) {
                    continue;
                }
                piece.requested.insert(begin);
                if piece.status == PieceStatus::Missing {
                    piece.status = PieceStatus::InFlight;
                }
                if !piece.fully_requested && piece.requested.len() == blocks_per_piece {
                    piece.fully_requested = true;
                    inner.fully_requested_pieces += 1;
                }
                let length = metainfo.block_length(piece_index, block_index);
                if inner.fully_requested_pieces >= inner.pieces.len() && inner.pieces.len() > 0 {
                    inner.endgame = true;
                }
                return Some(BlockId {
                    piece_index,
                    begin,
                    length,
                });
            }
        }
        None
    }

    /// Copies a received block into its piece buffer. Returns the
    /// assembled piece once every block has arrived; duplicate blocks
    /// (endgame re-requests, or a retransmit) are discarded silently.
    pub async fn record_received(
        &self,
        piece_index: usize,
        begin: u32,
        bytes: &[u8],
    ) -> Option<(usize, Vec<u8>)> {
        let mut inner = self.inner.lock().await;
        let piece_length = inner.metainfo.piece_length(piece_index) as usize;
        let blocks_per_piece = inner.metainfo.blocks_per_piece(piece_index);
        let piece = inner.pieces.get_mut(piece_index)?;

        if piece.status == PieceStatus::Verified || piece.received.contains(&begin) {
            return None;
        }

        let buffer = piece.buffer.get_or_insert_with(|| vec![0u8; piece_length]);
        let begin_usize = begin as usize;
        let end = begin_usize + bytes.len();
        if end > buffer.len() {
            return None;
        }
        buffer[begin_usize..end].copy_from_slice(bytes);
        piece.received.insert(begin);
        if piece.status == PieceStatus::Missing {
            piece.status = PieceStatus::InFlight;
        }

        if piece.received.len() == blocks_per_piece {
            piece.status = PieceStatus::Complete;
            let buffer = piece.buffer.clone().unwrap_or_default();
            return Some((piece_index, buffer));
        }
        None
    }

    /// Applies the result of hashing a Complete piece's buffer against
    /// its expected SHA-1. `ok` moves the piece to Verified (terminal);
    /// otherwise it is reset to Missing so its blocks can be re-requested.
    pub async fn on_verification(&self, piece_index: usize, ok: bool) {
        let mut inner = self.inner.lock().await;
        let Some(piece) = inner.pieces.get_mut(piece_index) else {
            return;
        };
        if ok {
            piece.status = PieceStatus::Verified;
            piece.buffer = None;
        } else {
            let was_fully_requested = piece.fully_requested;
            piece.reset();
            if was_fully_requested {
                inner.fully_requested_pieces = inner.fully_requested_pieces.saturating_sub(1);
            }
        }
    }

    /// Releases a single in-flight block back to "not requested" so other
    /// peers may pick it up. Used when a session closes with outstanding
    /// requests (§4.8): the block is not re-enqueued if it already
    /// arrived or the piece has moved on.
    pub async fn release_block(&self, piece_index: usize, begin: u32) {
        let mut inner = self.inner.lock().await;
        if let Some(piece) = inner.pieces.get_mut(piece_index) {
            if piece.status != PieceStatus::Verified && !piece.received.contains(&begin) {
                piece.requested.remove(&begin);
            }
        }
    }

    pub async fn is_done(&self) -> bool {
        let inner = self.inner.lock().await;
        inner
            .pieces
            .iter()
            .all(|p| p.status == PieceStatus::Verified)
    }

    pub async fn status_of(&self, piece_index: usize) -> Option<PieceStatus> {
        let inner = self.inner.lock().await;
        inner.pieces.get(piece_index).map(|p| p.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{encode, BencodeValue};
    use std::collections::BTreeMap;

    fn metainfo_with(piece_length: i64, total: i64, num_pieces: usize) -> Arc<Metainfo> {
        let mut info = BTreeMap::new();
        info.insert(b"name".to_vec(), BencodeValue::String(b"f".to_vec()));
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(piece_length));
        info.insert(b"length".to_vec(), BencodeValue::Integer(total));
        info.insert(
            b"pieces".to_vec(),
            BencodeValue::String(vec![0u8; 20 * num_pieces]),
        );
        let mut root = BTreeMap::new();
        root.insert(
            b"announce".to_vec(),
            BencodeValue::String(b"http://t".to_vec()),
        );
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));
        let bytes = encode(&BencodeValue::Dict(root));
        Arc::new(Metainfo::parse(&bytes).unwrap())
    }

    fn full_bitfield(n: usize) -> Bitfield {
        let bytes_needed = (n + 7) / 8;
        Bitfield::from_bytes(&vec![0xFFu8; bytes_needed], n).unwrap()
    }

    #[tokio::test]
    async fn completes_a_single_block_piece() {
        let metainfo = metainfo_with(16_384, 16_384, 1);
        let ledger = Ledger::new(metainfo);
        let remote = full_bitfield(1);

        let block = ledger.next_block(&remote).await.unwrap();
        assert_eq!(block, BlockId { piece_index: 0, begin: 0, length: 16_384 });
        assert!(ledger.next_block(&remote).await.is_none());

        let data = vec![7u8; 16_384];
        let completed = ledger.record_received(0, 0, &data).await;
        assert_eq!(completed, Some((0, data)));
    }

    #[tokio::test]
    async fn duplicate_block_after_verification_is_ignored() {
        let metainfo = metainfo_with(16_384, 16_384, 1);
        let ledger = Ledger::new(metainfo);
        let remote = full_bitfield(1);
        ledger.next_block(&remote).await;
        ledger.record_received(0, 0, &[1u8; 16_384]).await;
        ledger.on_verification(0, true).await;
        assert!(ledger.is_done().await);

        let again = ledger.record_received(0, 0, &[2u8; 16_384]).await;
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn failed_verification_resets_piece_for_re_request() {
        let metainfo = metainfo_with(16_384, 16_384, 1);
        let ledger = Ledger::new(metainfo);
        let remote = full_bitfield(1);
        ledger.next_block(&remote).await;
        ledger.record_received(0, 0, &[1u8; 16_384]).await;
        ledger.on_verification(0, false).await;

        assert_eq!(ledger.status_of(0).await, Some(PieceStatus::Missing));
        let block = ledger.next_block(&remote).await;
        assert!(block.is_some());
    }

    #[tokio::test]
    async fn endgame_allows_re_requesting_and_discards_second_arrival() {
        let metainfo = metainfo_with(16_384, 16_384, 1);
        let ledger = Ledger::new(metainfo);
        let remote = full_bitfield(1);

        // Only piece, only block: requesting it once makes the ledger
        // fully-requested and flips on endgame.
        ledger.next_block(&remote).await.unwrap();
        let second = ledger.next_block(&remote).await;
        assert!(second.is_some(), "endgame should allow re-requesting the same block");

        let first_copy = ledger.record_received(0, 0, &[9u8; 16_384]).await;
        assert!(first_copy.is_some());
        ledger.on_verification(0, true).await;

        let second_copy = ledger.record_received(0, 0, &[9u8; 16_384]).await;
        assert!(second_copy.is_none(), "second arrival must be discarded silently");
    }

    #[tokio::test]
    async fn release_block_lets_it_be_requested_again() {
        let metainfo = metainfo_with(16_384, 32_768, 2);
        let ledger = Ledger::new(metainfo);
        let remote = full_bitfield(2);
        let block = ledger.next_block(&remote).await.unwrap();
        ledger.release_block(block.piece_index, block.begin).await;

        let reclaimed = ledger.next_block(&remote).await.unwrap();
        assert_eq!(reclaimed, block);
    }
}

//! Download engine (§4.7): owns the ledger and assembler, announces to the
//! tracker, and drives one task per peer connection until every piece is
//! verified.
use crate::assembler::{Assembler, AssemblerError};
use crate::config::{DEFAULT_PORT, MAX_CONCURRENT_CONNECTS};
use crate::ledger::Ledger;
use crate::peer::{PeerSession, VerifiedPiece};
use crate::peer_id::PeerId;
use crate::torrent::Metainfo;
use crate::tracker::{self, AnnounceEvent, AnnounceParams, TrackerError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("assembler error: {0}")]
    Assembler(#[from] AssemblerError),

    #[error("tracker returned no peers")]
    NoPeers,

    #[error("peer sessions exhausted before every piece verified")]
    Incomplete,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Ties every other component together for one torrent download.
pub struct Engine {
    metainfo: Arc<Metainfo>,
    ledger: Arc<Ledger>,
    assembler: Arc<Assembler>,
    peer_id: PeerId,
    port: u16,
}

impl Engine {
    /// `force` controls whether an already-existing destination file is
    /// overwritten (§4.5); it is an external flag the core only forwards.
    pub fn new(metainfo: Metainfo, destination_dir: PathBuf, force: bool) -> EngineResult<Self> {
        let metainfo = Arc::new(metainfo);
        let ledger = Arc::new(Ledger::new(Arc::clone(&metainfo)));
        let assembler = Arc::new(Assembler::new(destination_dir, &metainfo, force)?);
        Ok(Engine {
            metainfo,
            ledger,
            assembler,
            peer_id: PeerId::generate(),
            port: DEFAULT_PORT,
        })
    }

    /// Runs the whole download: announce, fan out peer sessions bounded to
    /// `MAX_CONCURRENT_CONNECTS`, and write verified pieces as they arrive.
    /// Returns once every piece is verified or every peer session has
    /// ended without completing the torrent.
    #[tracing::instrument(skip(self), fields(info_hash = %self.metainfo.info_hash))]
    pub async fn run(&self) -> EngineResult<()> {
        let params = AnnounceParams {
            info_hash: self.metainfo.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: 0,
            downloaded: 0,
            left: self.metainfo.total_length,
            event: AnnounceEvent::Started,
        };
        let announce_result = tracker::announce(&self.metainfo.announce, &params).await?;
        if announce_result.peers.is_empty() {
            return Err(EngineError::NoPeers);
        }
        tracing::info!(
            peer_count = announce_result.peers.len(),
            interval = ?announce_result.interval,
            "tracker announce complete"
        );

        let (verified_tx, mut verified_rx) = mpsc::channel::<VerifiedPiece>(64);
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CONNECTS));
        let mut sessions = JoinSet::new();

        for addr in announce_result.peers {
            let metainfo = Arc::clone(&self.metainfo);
            let ledger = Arc::clone(&self.ledger);
            let verified_tx = verified_tx.clone();
            let info_hash = self.metainfo.info_hash;
            let peer_id = self.peer_id;
            let semaphore = Arc::clone(&semaphore);
            sessions.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                if let Err(error) =
                    PeerSession::connect(addr, info_hash, peer_id, metainfo, ledger, verified_tx)
                        .await
                {
                    tracing::debug!(%addr, %error, "peer session ended");
                }
            });
        }
        // Drop our own sender so the channel closes once every spawned
        // session (each holding a clone) has exited.
        drop(verified_tx);

        while let Some(piece) = verified_rx.recv().await {
            self.assembler
                .write_piece(piece.piece_index, piece.data)
                .await?;
            if self.ledger.is_done().await {
                break;
            }
        }

        sessions.shutdown().await;
        self.assembler.finalize().await?;

        if self.ledger.is_done().await {
            Ok(())
        } else {
            Err(EngineError::Incomplete)
        }
    }

    pub fn metainfo(&self) -> &Metainfo {
        &self.metainfo
    }
}

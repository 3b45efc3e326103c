//! The per-peer session: one TCP connection, one request pipeline, driven
//! by the message table in §4.6.
//!
//! State machine: `Connecting` (TCP dial) -> `AwaitHandshake` -> `Active`,
//! where `Active` toggles between choked and unchoked as CHOKE/UNCHOKE
//! arrive, -> `Closed` on error, idle timeout, or torrent completion.
use super::bitfield::Bitfield;
use super::handshake;
use super::message::{read_message_default, write_message, Message};
use super::{PeerError, PeerResult};
use crate::config::{IDLE_TIMEOUT, KEEPALIVE_INTERVAL, MAX_IN_FLIGHT_PER_PEER};
use crate::ledger::{BlockId, Ledger};
use crate::peer_id::PeerId;
use crate::torrent::{InfoHash, Metainfo};
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitHandshake,
    Active,
    Closed,
}

/// A verified piece ready for the engine to hand to the assembler.
pub struct VerifiedPiece {
    pub piece_index: usize,
    pub data: Vec<u8>,
}

/// Drives one peer connection from dial through teardown. Multiple
/// sessions share the same `Ledger` and coordinate purely through it.
pub struct PeerSession {
    addr: SocketAddr,
    metainfo: Arc<Metainfo>,
    ledger: Arc<Ledger>,
    verified_tx: mpsc::Sender<VerifiedPiece>,
    state: SessionState,
    am_interested: bool,
    peer_choking: bool,
    peer_interested: bool,
    remote_bitfield: Bitfield,
    in_flight: HashSet<BlockId>,
    /// Last time any byte was received from / sent to the remote (§3's
    /// `last_rx`/`last_tx`). Drives the idle-timeout and keep-alive
    /// deadlines independently of each other so a frequent keep-alive
    /// can never mask a remote that has gone silent.
    last_rx: tokio::time::Instant,
    last_tx: tokio::time::Instant,
}

impl PeerSession {
    fn new(
        addr: SocketAddr,
        metainfo: Arc<Metainfo>,
        ledger: Arc<Ledger>,
        verified_tx: mpsc::Sender<VerifiedPiece>,
    ) -> Self {
        let number_of_pieces = metainfo.number_of_pieces();
        let now = tokio::time::Instant::now();
        PeerSession {
            addr,
            metainfo,
            ledger,
            verified_tx,
            state: SessionState::AwaitHandshake,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            remote_bitfield: Bitfield::new(number_of_pieces),
            in_flight: HashSet::new(),
            last_rx: now,
            last_tx: now,
        }
    }

    /// Dials `addr`, performs the handshake, and runs the session to
    /// completion. Returns once the connection closes for any reason.
    #[tracing::instrument(skip(metainfo, ledger, verified_tx), fields(%addr))]
    pub async fn connect(
        addr: SocketAddr,
        info_hash: InfoHash,
        our_peer_id: PeerId,
        metainfo: Arc<Metainfo>,
        ledger: Arc<Ledger>,
        verified_tx: mpsc::Sender<VerifiedPiece>,
    ) -> PeerResult<()> {
        let mut stream = TcpStream::connect(addr).await?;
        handshake::perform(&mut stream, info_hash, our_peer_id).await?;
        tracing::debug!("handshake complete");

        let mut session = PeerSession::new(addr, metainfo, ledger, verified_tx);
        session.state = SessionState::Active;
        session.run(stream).await
    }

    async fn run(&mut self, stream: TcpStream) -> PeerResult<()> {
        let (mut reader, mut writer) = stream.into_split();

        self.send(&mut writer, &Message::Interested).await?;
        self.am_interested = true;

        // Idle and keep-alive deadlines are each recomputed from their own
        // timestamp every iteration, so one never resets the other: a
        // keep-alive every 90s does not keep extending the 120s idle
        // deadline, and a steady stream of inbound data does not need a
        // keep-alive at all.
        let result = loop {
            let idle_deadline = self.last_rx + IDLE_TIMEOUT;
            let keepalive_deadline = self.last_tx + KEEPALIVE_INTERVAL;

            tokio::select! {
                _ = tokio::time::sleep_until(keepalive_deadline) => {
                    if let Err(e) = self.send(&mut writer, &Message::KeepAlive).await {
                        break Err(e);
                    }
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    break Err(PeerError::IdleTimeout);
                }
                read = read_message_default(&mut reader) => {
                    let message = match read {
                        Err(e) => break Err(e),
                        Ok(m) => m,
                    };
                    self.last_rx = tokio::time::Instant::now();
                    if let Err(e) = self.handle_message(message).await {
                        break Err(e);
                    }
                }
            }

            if let Err(e) = self.pump_requests(&mut writer).await {
                break Err(e);
            }
            if self.ledger.is_done().await {
                break Ok(());
            }
        };

        self.state = SessionState::Closed;
        self.release_in_flight().await;
        result
    }

    async fn handle_message(&mut self, message: Message) -> PeerResult<()> {
        match message {
            Message::KeepAlive => {}
            Message::Choke => self.peer_choking = true,
            Message::Unchoke => self.peer_choking = false,
            Message::Interested => self.peer_interested = true,
            Message::NotInterested => self.peer_interested = false,
            Message::Have { index } => self.remote_bitfield.set(index as usize),
            Message::Bitfield { bits } => {
                self.remote_bitfield =
                    Bitfield::from_bytes(&bits, self.metainfo.number_of_pieces())?;
            }
            // This client never seeds (§ non-goals exclude uploading), so
            // REQUEST/CANCEL from the remote are acknowledged only by our
            // permanent choke and otherwise ignored.
            Message::Request { .. } | Message::Cancel { .. } => {}
            Message::Piece { index, begin, block } => {
                self.on_piece(index as usize, begin, block).await?;
            }
        }
        Ok(())
    }

    async fn on_piece(&mut self, piece_index: usize, begin: u32, block: Vec<u8>) -> PeerResult<()> {
        self.in_flight.remove(&BlockId {
            piece_index,
            begin,
            length: block.len() as u32,
        });

        let Some((index, data)) = self
            .ledger
            .record_received(piece_index, begin, &block)
            .await
        else {
            return Ok(());
        };

        let expected = self.metainfo.piece_hashes.get(index).copied();
        let ok = expected.is_some_and(|expected| Sha1::digest(&data).as_slice() == expected.as_slice());
        self.ledger.on_verification(index, ok).await;
        if ok {
            tracing::debug!(piece_index = index, "piece verified");
            let _ = self
                .verified_tx
                .send(VerifiedPiece { piece_index: index, data })
                .await;
        } else {
            tracing::warn!(piece_index = index, "piece failed verification, re-queued");
        }
        Ok(())
    }

    async fn pump_requests<W: tokio::io::AsyncWrite + Unpin>(&mut self, writer: &mut W) -> PeerResult<()> {
        if self.peer_choking || !self.am_interested {
            return Ok(());
        }
        while self.in_flight.len() < MAX_IN_FLIGHT_PER_PEER {
            let Some(block) = self.ledger.next_block(&self.remote_bitfield).await else {
                break;
            };
            self.send(
                writer,
                &Message::Request {
                    index: block.piece_index as u32,
                    begin: block.begin,
                    length: block.length,
                },
            )
            .await?;
            self.in_flight.insert(block);
        }
        Ok(())
    }

    async fn release_in_flight(&mut self) {
        for block in self.in_flight.drain() {
            self.ledger.release_block(block.piece_index, block.begin).await;
        }
    }

    /// Writes one message and records the send as `last_tx`, so the
    /// keep-alive deadline only fires after a genuine span of silence.
    async fn send<W: tokio::io::AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        message: &Message,
    ) -> PeerResult<()> {
        write_message(writer, message).await?;
        self.last_tx = tokio::time::Instant::now();
        Ok(())
    }
}

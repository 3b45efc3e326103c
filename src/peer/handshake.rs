//! The BitTorrent peer handshake: the first 68 bytes exchanged on every
//! connection, verifying both sides are talking about the same torrent.
use super::{PeerError, PeerResult};
use crate::config::HANDSHAKE_TIMEOUT;
use crate::peer_id::PeerId;
use crate::torrent::InfoHash;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Handshake {
            reserved: [0u8; 8],
            info_hash: *info_hash.as_bytes(),
            peer_id: *peer_id.as_bytes(),
        }
    }

    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    pub fn parse(buf: &[u8; 68]) -> PeerResult<Self> {
        if buf[0] != 19 || &buf[1..20] != PROTOCOL.as_slice() {
            return Err(PeerError::InvalidProtocol);
        }
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Handshake {
            reserved,
            info_hash,
            peer_id,
        })
    }
}

/// Performs the outbound handshake over an already-connected socket:
/// sends ours, reads theirs, and validates the info-hash matches. Bounded
/// by `HANDSHAKE_TIMEOUT` end to end.
pub async fn perform(
    stream: &mut TcpStream,
    info_hash: InfoHash,
    peer_id: PeerId,
) -> PeerResult<Handshake> {
    tokio::time::timeout(HANDSHAKE_TIMEOUT, perform_inner(stream, info_hash, peer_id))
        .await
        .map_err(|_| PeerError::HandshakeTimeout)?
}

async fn perform_inner(
    stream: &mut TcpStream,
    info_hash: InfoHash,
    peer_id: PeerId,
) -> PeerResult<Handshake> {
    let ours = Handshake::new(info_hash, peer_id);
    stream.write_all(&ours.serialize()).await?;

    let mut buf = [0u8; 68];
    stream.read_exact(&mut buf).await?;
    let theirs = Handshake::parse(&buf)?;

    if theirs.info_hash != *info_hash.as_bytes() {
        return Err(PeerError::InfoHashMismatch);
    }
    Ok(theirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_serialize_parse() {
        let info_hash = InfoHash::from_raw_info_bytes(b"torrent");
        let peer_id = PeerId::generate();
        let handshake = Handshake::new(info_hash, peer_id);
        let bytes = handshake.serialize();
        let parsed = Handshake::parse(&bytes).unwrap();
        assert_eq!(parsed, handshake);
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut bytes = Handshake::new(
            InfoHash::from_raw_info_bytes(b"x"),
            PeerId::generate(),
        )
        .serialize();
        bytes[1] = b'Z';
        assert!(matches!(
            Handshake::parse(&bytes),
            Err(PeerError::InvalidProtocol)
        ));
    }

    #[tokio::test]
    async fn detects_info_hash_mismatch_over_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 68];
            sock.read_exact(&mut buf).await.unwrap();
            let fake = Handshake {
                reserved: [0; 8],
                info_hash: [0u8; 20],
                peer_id: [1u8; 20],
            };
            sock.write_all(&fake.serialize()).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let info_hash = InfoHash::from_raw_info_bytes(b"real torrent");
        let result = perform(&mut client, info_hash, PeerId::generate()).await;
        assert!(matches!(result, Err(PeerError::InfoHashMismatch)));
        server.await.unwrap();
    }
}

//! End-to-end tests driving `Ledger` + `Assembler` + `PeerSession` together
//! against a scripted loopback peer, bypassing the tracker (the engine's
//! announce step is exercised separately by `tracker::http`/`tracker::udp`
//! unit tests). Covers the happy path and bad-piece re-request scenarios
//! the specification calls out by name.
use rs_torrent_client::assembler::Assembler;
use rs_torrent_client::bencode::{encode, BencodeValue};
use rs_torrent_client::ledger::Ledger;
use rs_torrent_client::peer::handshake::Handshake;
use rs_torrent_client::peer::message::{read_message_default, write_message};
use rs_torrent_client::peer::{Message, PeerSession};
use rs_torrent_client::peer_id::PeerId;
use rs_torrent_client::torrent::Metainfo;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const PIECE_LENGTH: usize = 32_768;

/// Three pieces: two full-length ones and a short final piece, matching
/// the specification's boundary scenario (last piece shorter than a
/// single block boundary multiple).
fn sample_data() -> Vec<u8> {
    let total = PIECE_LENGTH * 2 + 10_000;
    (0..total).map(|i| (i % 251) as u8).collect()
}

fn metainfo_for(data: &[u8], piece_length: usize, name: &str) -> Arc<Metainfo> {
    let piece_hashes: Vec<u8> = data
        .chunks(piece_length)
        .flat_map(|chunk| Sha1::digest(chunk).to_vec())
        .collect();

    let mut info = BTreeMap::new();
    info.insert(b"name".to_vec(), BencodeValue::String(name.as_bytes().to_vec()));
    info.insert(
        b"piece length".to_vec(),
        BencodeValue::Integer(piece_length as i64),
    );
    info.insert(b"length".to_vec(), BencodeValue::Integer(data.len() as i64));
    info.insert(b"pieces".to_vec(), BencodeValue::String(piece_hashes));

    let mut root = BTreeMap::new();
    root.insert(
        b"announce".to_vec(),
        BencodeValue::String(b"http://tracker.example/announce".to_vec()),
    );
    root.insert(b"info".to_vec(), BencodeValue::Dict(info));

    Arc::new(Metainfo::parse(&encode(&BencodeValue::Dict(root))).unwrap())
}

async fn read_handshake(sock: &mut TcpStream) -> Handshake {
    let mut buf = [0u8; 68];
    sock.read_exact(&mut buf).await.unwrap();
    Handshake::parse(&buf).unwrap()
}

async fn reply_handshake(sock: &mut TcpStream, info_hash: [u8; 20]) {
    let reply = Handshake {
        reserved: [0; 8],
        info_hash,
        peer_id: *PeerId::generate().as_bytes(),
    };
    sock.write_all(&reply.serialize()).await.unwrap();
}

async fn expect_interested(sock: &mut TcpStream) {
    let message = read_message_default(sock).await.unwrap();
    assert_eq!(message, Message::Interested);
}

/// Runs the engine-equivalent drain loop directly: collects verified
/// pieces off the channel and writes them through the assembler, the way
/// `Engine::run` does, without needing a live tracker.
async fn drain_to_disk(
    assembler: &Assembler,
    ledger: &Ledger,
    mut verified_rx: mpsc::Receiver<rs_torrent_client::peer::VerifiedPiece>,
) {
    while let Some(piece) = verified_rx.recv().await {
        assembler.write_piece(piece.piece_index, piece.data).await.unwrap();
        if ledger.is_done().await {
            break;
        }
    }
    assembler.finalize().await.unwrap();
}

#[tokio::test]
async fn happy_path_three_pieces_round_trip_to_disk() {
    let data = sample_data();
    let metainfo = metainfo_for(&data, PIECE_LENGTH, "movie.bin");
    let info_hash = *metainfo.info_hash.as_bytes();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peer_data = data.clone();

    let fake_peer = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let theirs = read_handshake(&mut sock).await;
        reply_handshake(&mut sock, theirs.info_hash).await;

        // Full bitfield: three pieces, MSB-first -> 0b1110_0000.
        write_message(&mut sock, &Message::Bitfield { bits: vec![0b1110_0000] })
            .await
            .unwrap();
        expect_interested(&mut sock).await;
        write_message(&mut sock, &Message::Unchoke).await.unwrap();

        // Five blocks total: 2 + 2 + 1.
        for _ in 0..5 {
            let message = read_message_default(&mut sock).await.unwrap();
            let Message::Request { index, begin, length } = message else {
                panic!("expected REQUEST, got {message:?}");
            };
            let start = index as usize * PIECE_LENGTH + begin as usize;
            let block = peer_data[start..start + length as usize].to_vec();
            write_message(
                &mut sock,
                &Message::Piece { index, begin, block },
            )
            .await
            .unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    });

    let ledger = Arc::new(Ledger::new(Arc::clone(&metainfo)));
    let dir = tempfile::tempdir().unwrap();
    let assembler = Arc::new(Assembler::new(dir.path().to_path_buf(), &metainfo, false).unwrap());
    let (verified_tx, verified_rx) = mpsc::channel(8);

    let drain = tokio::spawn({
        let assembler = Arc::clone(&assembler);
        let ledger = Arc::clone(&ledger);
        async move { drain_to_disk(&assembler, &ledger, verified_rx).await }
    });

    let our_peer_id = PeerId::generate();
    let run = PeerSession::connect(
        addr,
        rs_torrent_client::torrent::InfoHash(info_hash),
        our_peer_id,
        Arc::clone(&metainfo),
        Arc::clone(&ledger),
        verified_tx,
    );
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), run).await;
    drain.await.unwrap();
    fake_peer.await.unwrap();

    assert!(ledger.is_done().await);
    let written = std::fs::read(dir.path().join("movie.bin")).unwrap();
    assert_eq!(written, data, "assembled output must be byte-identical to the source");
}

#[tokio::test]
async fn corrupted_block_is_reset_and_re_requested_until_it_verifies() {
    // Single piece, single block, so the only way it can ever verify is
    // via a re-request after the first (corrupted) delivery fails the
    // hash check.
    let data: Vec<u8> = (0..16_384u32).map(|i| (i % 256) as u8).collect();
    let metainfo = metainfo_for(&data, data.len(), "clip.bin");
    let info_hash = *metainfo.info_hash.as_bytes();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let good_data = data.clone();

    let fake_peer = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let theirs = read_handshake(&mut sock).await;
        reply_handshake(&mut sock, theirs.info_hash).await;

        write_message(&mut sock, &Message::Bitfield { bits: vec![0x80] })
            .await
            .unwrap();
        expect_interested(&mut sock).await;
        write_message(&mut sock, &Message::Unchoke).await.unwrap();

        // First attempt: corrupt a single byte so the SHA-1 check fails.
        let message = read_message_default(&mut sock).await.unwrap();
        let Message::Request { index, begin, length } = message else {
            panic!("expected REQUEST");
        };
        let mut corrupted = good_data.clone();
        corrupted[0] ^= 0xFF;
        write_message(
            &mut sock,
            &Message::Piece { index, begin, block: corrupted },
        )
        .await
        .unwrap();
        assert_eq!(length as usize, good_data.len());

        // Second attempt, after the ledger resets the piece to Missing:
        // reply with the genuine bytes.
        let message = read_message_default(&mut sock).await.unwrap();
        let Message::Request { index, begin, .. } = message else {
            panic!("expected second REQUEST after verification failure");
        };
        write_message(
            &mut sock,
            &Message::Piece { index, begin, block: good_data },
        )
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    });

    let ledger = Arc::new(Ledger::new(Arc::clone(&metainfo)));
    let dir = tempfile::tempdir().unwrap();
    let assembler = Arc::new(Assembler::new(dir.path().to_path_buf(), &metainfo, false).unwrap());
    let (verified_tx, verified_rx) = mpsc::channel(8);

    let drain = tokio::spawn({
        let assembler = Arc::clone(&assembler);
        let ledger = Arc::clone(&ledger);
        async move { drain_to_disk(&assembler, &ledger, verified_rx).await }
    });

    let our_peer_id = PeerId::generate();
    let run = PeerSession::connect(
        addr,
        rs_torrent_client::torrent::InfoHash(info_hash),
        our_peer_id,
        Arc::clone(&metainfo),
        Arc::clone(&ledger),
        verified_tx,
    );
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), run).await;
    drain.await.unwrap();
    fake_peer.await.unwrap();

    assert!(ledger.is_done().await);
    let written = std::fs::read(dir.path().join("clip.bin")).unwrap();
    assert_eq!(written, data);
}

//! UDP tracker announce per BEP-15: connect, then announce, each with the
//! doubling retry schedule (15s, 30s, ... up to 3840s) BEP-15 specifies.
use super::{AnnounceEvent, AnnounceParams, AnnounceResult, TrackerError, TrackerResult};
use crate::config::{UDP_INITIAL_TIMEOUT, UDP_MAX_TIMEOUT, UDP_TRACKER_MAGIC};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;
use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const EVENT_STARTED: u32 = 2;

#[tracing::instrument(skip(url, params))]
pub async fn announce(url: &url::Url, params: &AnnounceParams) -> TrackerResult<AnnounceResult> {
    let host = url
        .host_str()
        .ok_or(TrackerError::Malformed("udp tracker url has no host"))?;
    let port = url
        .port()
        .ok_or(TrackerError::Malformed("udp tracker url has no port"))?;
    let remote: SocketAddr = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or(TrackerError::Malformed("udp tracker host did not resolve"))?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(remote).await?;

    let connection_id = connect(&socket).await?;
    let response = send_announce(&socket, connection_id, params).await?;
    Ok(response)
}

/// Sends `request` and retries with exponential backoff (doubling from
/// `UDP_INITIAL_TIMEOUT`, stopping once the next wait would exceed
/// `UDP_MAX_TIMEOUT`) until `validate` accepts a reply.
async fn request_with_backoff<T>(
    socket: &UdpSocket,
    request: &[u8],
    mut validate: impl FnMut(&[u8]) -> Option<T>,
) -> TrackerResult<T> {
    let mut timeout = UDP_INITIAL_TIMEOUT;
    let mut buf = vec![0u8; 2048];
    loop {
        socket.send(request).await?;
        match tokio::time::timeout(timeout, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => {
                if let Some(value) = validate(&buf[..len]) {
                    return Ok(value);
                }
                // Reply didn't match (wrong transaction id, wrong action);
                // treat it like a dropped packet and retry.
            }
            Ok(Err(io_err)) => return Err(TrackerError::Io(io_err)),
            Err(_elapsed) => {}
        }
        if timeout >= UDP_MAX_TIMEOUT {
            return Err(TrackerError::UdpTimedOut);
        }
        timeout = (timeout * 2).min(UDP_MAX_TIMEOUT);
    }
}

async fn connect(socket: &UdpSocket) -> TrackerResult<u64> {
    let transaction_id: u32 = rand::rng().random();
    let mut request = Vec::with_capacity(16);
    request.write_u64::<BigEndian>(UDP_TRACKER_MAGIC).unwrap();
    request.write_u32::<BigEndian>(ACTION_CONNECT).unwrap();
    request.write_u32::<BigEndian>(transaction_id).unwrap();

    request_with_backoff(socket, &request, |reply| {
        if reply.len() < 16 {
            return None;
        }
        let mut cursor = Cursor::new(reply);
        let action = cursor.read_u32::<BigEndian>().ok()?;
        let tid = cursor.read_u32::<BigEndian>().ok()?;
        let connection_id = cursor.read_u64::<BigEndian>().ok()?;
        if action == ACTION_CONNECT && tid == transaction_id {
            Some(connection_id)
        } else {
            None
        }
    })
    .await
}

async fn send_announce(
    socket: &UdpSocket,
    connection_id: u64,
    params: &AnnounceParams,
) -> TrackerResult<AnnounceResult> {
    let transaction_id: u32 = rand::rng().random();
    let key: u32 = rand::rng().random();
    let event = match params.event {
        AnnounceEvent::Started => EVENT_STARTED,
    };

    let mut request = Vec::with_capacity(98);
    request.write_u64::<BigEndian>(connection_id).unwrap();
    request.write_u32::<BigEndian>(ACTION_ANNOUNCE).unwrap();
    request.write_u32::<BigEndian>(transaction_id).unwrap();
    request.extend_from_slice(params.info_hash.as_bytes());
    request.extend_from_slice(params.peer_id.as_bytes());
    request.write_u64::<BigEndian>(params.downloaded).unwrap();
    request.write_u64::<BigEndian>(params.left).unwrap();
    request.write_u64::<BigEndian>(params.uploaded).unwrap();
    request.write_u32::<BigEndian>(event).unwrap();
    request.write_u32::<BigEndian>(0).unwrap(); // ip: 0 = tracker decides
    request.write_u32::<BigEndian>(key).unwrap();
    request.write_i32::<BigEndian>(-1).unwrap(); // num_want: -1 = default
    request.write_u16::<BigEndian>(params.port).unwrap();
    debug_assert_eq!(request.len(), 98);

    request_with_backoff(socket, &request, |reply| {
        if reply.len() < 20 {
            return None;
        }
        let mut cursor = Cursor::new(reply);
        let action = cursor.read_u32::<BigEndian>().ok()?;
        let tid = cursor.read_u32::<BigEndian>().ok()?;
        if action != ACTION_ANNOUNCE || tid != transaction_id {
            return None;
        }
        let interval = cursor.read_u32::<BigEndian>().ok()?;
        let _leechers = cursor.read_u32::<BigEndian>().ok()?;
        let _seeders = cursor.read_u32::<BigEndian>().ok()?;
        let peer_bytes = &reply[20..];
        let peers = parse_peer_records(peer_bytes)?;
        Some(AnnounceResult {
            interval: Duration::from_secs(interval as u64),
            peers,
        })
    })
    .await
}

fn parse_peer_records(bytes: &[u8]) -> Option<Vec<SocketAddr>> {
    if bytes.len() % 6 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = std::net::Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddr::new(std::net::IpAddr::V4(ip), port)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_id::PeerId;
    use crate::torrent::InfoHash;
    use tokio::net::UdpSocket as TokioUdpSocket;

    #[test]
    fn parses_peer_records() {
        let bytes = vec![127, 0, 0, 1, 0x1A, 0xE1, 10, 0, 0, 1, 0x00, 0x50];
        let peers = parse_peer_records(&bytes).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].port(), 6881);
        assert_eq!(peers[1].port(), 80);
    }

    #[tokio::test]
    async fn connect_retries_on_transaction_id_mismatch() {
        let server = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server_addr).await.unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 32];
            // First reply: wrong transaction id, should be ignored and retried.
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let mut cursor = Cursor::new(&buf[..len]);
            let _action = cursor.read_u32::<BigEndian>().unwrap();
            let _tid = cursor.read_u32::<BigEndian>().unwrap();

            let mut bad = Vec::new();
            bad.write_u32::<BigEndian>(ACTION_CONNECT).unwrap();
            bad.write_u32::<BigEndian>(0xDEAD_BEEF).unwrap();
            bad.write_u64::<BigEndian>(1).unwrap();
            server.send_to(&bad, peer).await.unwrap();

            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let mut cursor = Cursor::new(&buf[..len]);
            let _action = cursor.read_u32::<BigEndian>().unwrap();
            let tid = cursor.read_u32::<BigEndian>().unwrap();

            let mut good = Vec::new();
            good.write_u32::<BigEndian>(ACTION_CONNECT).unwrap();
            good.write_u32::<BigEndian>(tid).unwrap();
            good.write_u64::<BigEndian>(0xC0FFEE).unwrap();
            server.send_to(&good, peer).await.unwrap();
        });

        let connection_id = connect(&client).await.unwrap();
        assert_eq!(connection_id, 0xC0FFEE);
        responder.await.unwrap();
        let _ = (PeerId::generate(), InfoHash::from_raw_info_bytes(b""));
    }
}

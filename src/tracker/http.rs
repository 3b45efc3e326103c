//! HTTP(S) tracker announce, per BEP-3 / BEP-23 (compact peer lists).
use super::{AnnounceEvent, AnnounceParams, AnnounceResult, TrackerError, TrackerResult};
use crate::bencode::{decode, BencodeValue};
use crate::config::TRACKER_TIMEOUT;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[tracing::instrument(skip(url, params))]
pub async fn announce(url: &url::Url, params: &AnnounceParams) -> TrackerResult<AnnounceResult> {
    let request_url = build_request_url(url, params)?;
    tracing::debug!(%request_url, "announcing to http tracker");

    let client = reqwest::Client::builder()
        .timeout(TRACKER_TIMEOUT)
        .build()?;
    let response = client.get(request_url).send().await?;
    let body = response.bytes().await?;
    parse_response(&body)
}

fn build_request_url(url: &url::Url, params: &AnnounceParams) -> TrackerResult<url::Url> {
    let event = match params.event {
        AnnounceEvent::Started => "started",
    };
    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1&event={}",
        percent_encode_bytes(params.info_hash.as_bytes()),
        percent_encode_bytes(params.peer_id.as_bytes()),
        params.port,
        params.uploaded,
        params.downloaded,
        params.left,
        event,
    );
    let mut url = url.clone();
    let combined_query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
        _ => query,
    };
    url.set_query(Some(&combined_query));
    Ok(url)
}

/// Raw RFC 3986 percent-encoding of arbitrary bytes. `url`'s own query
/// builder re-escapes already-encoded text (and escapes spaces as `+`),
/// so info_hash/peer_id are encoded by hand and spliced into the query
/// string directly instead.
fn percent_encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn parse_response(bytes: &[u8]) -> TrackerResult<AnnounceResult> {
    let value = decode(bytes)?;
    let dict = value
        .as_dict()
        .ok_or(TrackerError::Malformed("response is not a dict"))?;

    if let Some(reason) = dict.get(b"failure reason".as_slice()) {
        let reason = reason
            .as_str_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let interval = dict
            .get(b"interval".as_slice())
            .and_then(BencodeValue::as_integer)
            .map(|s| Duration::from_secs(s.max(0) as u64));
        return Err(TrackerError::Failure { reason, interval });
    }

    let interval = dict
        .get(b"interval".as_slice())
        .and_then(BencodeValue::as_integer)
        .map(|s| Duration::from_secs(s.max(0) as u64))
        .unwrap_or(Duration::from_secs(1800));

    let peers = match dict.get(b"peers".as_slice()) {
        Some(BencodeValue::String(bytes)) => parse_compact_peers(bytes)?,
        Some(BencodeValue::List(list)) => parse_dict_peers(list)?,
        _ => return Err(TrackerError::Malformed("missing peers field")),
    };

    Ok(AnnounceResult { interval, peers })
}

fn parse_compact_peers(bytes: &[u8]) -> TrackerResult<Vec<SocketAddr>> {
    if bytes.len() % 6 != 0 {
        return Err(TrackerError::Malformed("compact peers length not a multiple of 6"));
    }
    Ok(bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect())
}

fn parse_dict_peers(list: &[BencodeValue]) -> TrackerResult<Vec<SocketAddr>> {
    let peers = list
        .iter()
        .filter_map(|entry| {
            let dict = entry.as_dict()?;
            let ip = dict.get(b"ip".as_slice())?.as_str_bytes()?;
            let ip = std::str::from_utf8(ip).ok()?.parse::<IpAddr>().ok()?;
            let port = dict.get(b"port".as_slice())?.as_integer()? as u16;
            Some(SocketAddr::new(ip, port))
        })
        .collect();
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::encode;
    use std::collections::BTreeMap;

    #[test]
    fn parses_compact_peer_list() {
        let mut dict = BTreeMap::new();
        dict.insert(b"interval".to_vec(), BencodeValue::Integer(1800));
        let compact = vec![127, 0, 0, 1, 0x1A, 0xE1]; // 127.0.0.1:6881
        dict.insert(b"peers".to_vec(), BencodeValue::String(compact));
        let bytes = encode(&BencodeValue::Dict(dict));

        let result = parse_response(&bytes).unwrap();
        assert_eq!(result.peers.len(), 1);
        assert_eq!(result.peers[0].port(), 6881);
    }

    #[test]
    fn surfaces_failure_reason() {
        let mut dict = BTreeMap::new();
        dict.insert(
            b"failure reason".to_vec(),
            BencodeValue::String(b"torrent not found".to_vec()),
        );
        dict.insert(b"interval".to_vec(), BencodeValue::Integer(60));
        let bytes = encode(&BencodeValue::Dict(dict));

        let err = parse_response(&bytes).unwrap_err();
        match err {
            TrackerError::Failure { reason, interval } => {
                assert_eq!(reason, "torrent not found");
                assert_eq!(interval, Some(Duration::from_secs(60)));
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[test]
    fn percent_encodes_raw_bytes() {
        let encoded = percent_encode_bytes(&[0x00, b'a', 0xFF]);
        assert_eq!(encoded, "%00a%FF");
    }
}

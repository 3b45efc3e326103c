//! Tunables named by the spec as defaults. Centralized here instead of
//! scattered as magic numbers through the engine, tracker and peer session.
use std::time::Duration;

/// Standard BitTorrent block (sub-piece) size used for REQUEST/PIECE.
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Cap on frame length accepted from a peer before treating it as a
/// protocol violation.
pub const MAX_FRAME_LEN: u32 = 17 * 1024 * 1024;

/// Per-peer in-flight block request cap.
pub const MAX_IN_FLIGHT_PER_PEER: usize = 10;

/// Send a keep-alive if nothing has been sent to a peer for this long.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(90);

/// Close a peer session if nothing has been received for this long.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for the initial handshake exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Initial tracker request timeout.
pub const TRACKER_TIMEOUT: Duration = Duration::from_secs(15);

/// Default listening/announce port advertised to trackers.
pub const DEFAULT_PORT: u16 = 6881;

/// Maximum number of simultaneous outbound connection attempts.
pub const MAX_CONCURRENT_CONNECTS: usize = 50;

/// BEP-15 UDP connect/announce magic constant.
pub const UDP_TRACKER_MAGIC: u64 = 0x41727101980;

/// BEP-15 retry schedule: start at 15s, double each attempt, stop once the
/// next wait would exceed 3840s.
pub const UDP_INITIAL_TIMEOUT: Duration = Duration::from_secs(15);
pub const UDP_MAX_TIMEOUT: Duration = Duration::from_secs(3840);

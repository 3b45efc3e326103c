//! Metainfo (`.torrent` file) parsing and error handling.
//!
//! This module owns the `Metainfo` type: everything the rest of the client
//! needs to know about a torrent once the `.torrent` file has been read and
//! validated (tracker URL, piece layout, file layout, info-hash).
use thiserror::Error;

pub mod info_hash;
pub mod metainfo;

pub use info_hash::InfoHash;
pub use metainfo::{FilePlanEntry, Metainfo};

#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("io error reading metainfo: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {0} has the wrong type")]
    InvalidFieldType(&'static str),

    #[error("info.pieces length {0} is not a multiple of 20")]
    InvalidPiecesLength(usize),

    #[error("exactly one of info.length or info.files must be present")]
    AmbiguousFileLayout,
}

pub type MetainfoResult<T> = std::result::Result<T, MetainfoError>;

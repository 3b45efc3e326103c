//! `.torrent` file parsing, piece/block geometry, and file layout.
use super::info_hash::InfoHash;
use super::{MetainfoError, MetainfoResult};
use crate::bencode::decoder::decode_dict_with_spans;
use crate::bencode::BencodeValue;
use crate::config::BLOCK_SIZE;
use std::path::PathBuf;

/// A single file within the torrent's layout, in metainfo order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub length: u64,
}

/// One entry of the flattened file plan: where a file starts within the
/// concatenation of all pieces, and how long it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlanEntry {
    pub path: PathBuf,
    pub length: u64,
    pub file_offset_start: u64,
}

/// Parsed, validated `.torrent` metadata. Immutable after construction.
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub announce: String,
    pub announce_list: Vec<Vec<String>>,
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u64,
    pub total_length: u64,
    pub piece_hashes: Vec<[u8; 20]>,
    pub files: Vec<FileEntry>,
    file_plan: Vec<FilePlanEntry>,
}

impl Metainfo {
    /// Loads and validates a metainfo file from disk.
    pub fn load(path: &std::path::Path) -> MetainfoResult<Metainfo> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    /// Parses raw `.torrent` bytes into a validated `Metainfo`.
    pub fn parse(bytes: &[u8]) -> MetainfoResult<Metainfo> {
        let entries = decode_dict_with_spans(bytes)?;

        let mut announce = None;
        let mut announce_list = Vec::new();
        let mut info_value = None;
        let mut info_span = None;

        for entry in &entries {
            match entry.key.as_slice() {
                b"announce" => {
                    announce = Some(require_string(&entry.value, "announce")?);
                }
                b"announce-list" => {
                    announce_list = parse_announce_list(&entry.value)?;
                }
                b"info" => {
                    info_value = Some(&entry.value);
                    info_span = Some(entry.span.clone());
                }
                _ => {}
            }
        }

        let announce = announce.ok_or(MetainfoError::MissingField("announce"))?;
        let info_value = info_value.ok_or(MetainfoError::MissingField("info"))?;
        let info_span = info_span.expect("set alongside info_value");
        let info_hash = InfoHash::from_raw_info_bytes(&bytes[info_span]);

        let info_dict = info_value
            .as_dict()
            .ok_or(MetainfoError::InvalidFieldType("info"))?;

        let name = require_string(
            info_dict
                .get(b"name".as_slice())
                .ok_or(MetainfoError::MissingField("info.name"))?,
            "info.name",
        )?;

        let piece_length = info_dict
            .get(b"piece length".as_slice())
            .and_then(BencodeValue::as_integer)
            .ok_or(MetainfoError::MissingField("info.piece length"))?;
        if piece_length <= 0 {
            return Err(MetainfoError::InvalidFieldType("info.piece length"));
        }
        let piece_length = piece_length as u64;

        let pieces_bytes = info_dict
            .get(b"pieces".as_slice())
            .and_then(BencodeValue::as_str_bytes)
            .ok_or(MetainfoError::MissingField("info.pieces"))?;
        if pieces_bytes.len() % 20 != 0 {
            return Err(MetainfoError::InvalidPiecesLength(pieces_bytes.len()));
        }
        let piece_hashes: Vec<[u8; 20]> = pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut h = [0u8; 20];
                h.copy_from_slice(chunk);
                h
            })
            .collect();

        let single_length = info_dict
            .get(b"length".as_slice())
            .and_then(BencodeValue::as_integer);
        let files_list = info_dict.get(b"files".as_slice());

        let (files, total_length) = match (single_length, files_list) {
            (Some(len), None) => {
                if len < 0 {
                    return Err(MetainfoError::InvalidFieldType("info.length"));
                }
                (
                    vec![FileEntry {
                        path: PathBuf::from(&name),
                        length: len as u64,
                    }],
                    len as u64,
                )
            }
            (None, Some(list)) => {
                // Multi-file layout: every path is relative to a top-level
                // directory named after the torrent (§6 persisted state
                // layout), unlike the single-file case where `name` is the
                // file itself.
                let mut files = parse_files_list(list)?;
                for file in &mut files {
                    file.path = PathBuf::from(&name).join(&file.path);
                }
                let total = files.iter().map(|f| f.length).sum();
                (files, total)
            }
            _ => return Err(MetainfoError::AmbiguousFileLayout),
        };

        let file_plan = build_file_plan(&files);

        Ok(Metainfo {
            announce,
            announce_list,
            info_hash,
            name,
            piece_length,
            total_length,
            piece_hashes,
            files,
            file_plan,
        })
    }

    pub fn number_of_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Length in bytes of the piece at `index`, accounting for a shorter
    /// final piece.
    pub fn piece_length(&self, index: usize) -> u64 {
        let n = self.number_of_pieces();
        if index + 1 < n {
            self.piece_length
        } else if index + 1 == n {
            self.total_length - (n as u64 - 1) * self.piece_length
        } else {
            0
        }
    }

    /// Number of 16 KiB blocks composing a piece.
    pub fn blocks_per_piece(&self, index: usize) -> usize {
        let len = self.piece_length(index);
        ((len + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64) as usize
    }

    /// Length of block `block_index` within piece `index`.
    pub fn block_length(&self, index: usize, block_index: usize) -> u32 {
        let piece_len = self.piece_length(index);
        let begin = block_index as u64 * BLOCK_SIZE as u64;
        let remaining = piece_len.saturating_sub(begin);
        remaining.min(BLOCK_SIZE as u64) as u32
    }

    pub fn file_plan(&self) -> &[FilePlanEntry] {
        &self.file_plan
    }
}

fn build_file_plan(files: &[FileEntry]) -> Vec<FilePlanEntry> {
    let mut offset = 0u64;
    files
        .iter()
        .map(|f| {
            let entry = FilePlanEntry {
                path: f.path.clone(),
                length: f.length,
                file_offset_start: offset,
            };
            offset += f.length;
            entry
        })
        .collect()
}

fn require_string(value: &BencodeValue, field: &'static str) -> MetainfoResult<String> {
    let bytes = value
        .as_str_bytes()
        .ok_or(MetainfoError::InvalidFieldType(field))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| MetainfoError::InvalidFieldType(field))
}

fn parse_announce_list(value: &BencodeValue) -> MetainfoResult<Vec<Vec<String>>> {
    let tiers = value
        .as_list()
        .ok_or(MetainfoError::InvalidFieldType("announce-list"))?;
    tiers
        .iter()
        .map(|tier| {
            let trackers = tier
                .as_list()
                .ok_or(MetainfoError::InvalidFieldType("announce-list tier"))?;
            trackers
                .iter()
                .map(|t| require_string(t, "announce-list url"))
                .collect()
        })
        .collect()
}

fn parse_files_list(value: &BencodeValue) -> MetainfoResult<Vec<FileEntry>> {
    let list = value
        .as_list()
        .ok_or(MetainfoError::InvalidFieldType("info.files"))?;
    list.iter()
        .map(|entry| {
            let dict = entry
                .as_dict()
                .ok_or(MetainfoError::InvalidFieldType("info.files[]"))?;
            let length = dict
                .get(b"length".as_slice())
                .and_then(BencodeValue::as_integer)
                .ok_or(MetainfoError::MissingField("info.files[].length"))?;
            if length < 0 {
                return Err(MetainfoError::InvalidFieldType("info.files[].length"));
            }
            let path_list = dict
                .get(b"path".as_slice())
                .and_then(BencodeValue::as_list)
                .ok_or(MetainfoError::MissingField("info.files[].path"))?;
            let mut path = PathBuf::new();
            for component in path_list {
                path.push(require_string(component, "info.files[].path[]")?);
            }
            Ok(FileEntry {
                path,
                length: length as u64,
            })
        })
        .collect()
}

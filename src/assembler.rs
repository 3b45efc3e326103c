//! File assembler (§4.5): writes verified pieces directly to their final
//! on-disk location, no temp file or second copy pass.
use crate::torrent::{FilePlanEntry, Metainfo};
use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum AssemblerError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("blocking write task panicked")]
    JoinError,

    #[error("{path} already exists; pass the force flag to overwrite")]
    AlreadyExists { path: PathBuf },
}

pub type AssemblerResult<T> = std::result::Result<T, AssemblerError>;

/// Maps pieces onto the torrent's file layout and owns the destination
/// files. Files are opened lazily, on first write, and kept open for the
/// assembler's lifetime; each has its own lock so writes to independent
/// files never block one another.
pub struct Assembler {
    destination_dir: PathBuf,
    file_plan: Vec<FilePlanEntry>,
    piece_length: u64,
    files: Mutex<HashMap<PathBuf, Arc<StdMutex<std::fs::File>>>>,
}

impl Assembler {
    /// Creates the directory tree for a multi-file torrent's layout. Files
    /// themselves are opened on demand in `write_piece`. Per §4.5, a file
    /// that already exists aborts construction unless `force` is set; the
    /// flag is external to the core protocol but the interface accepts it.
    pub fn new(destination_dir: PathBuf, metainfo: &Metainfo, force: bool) -> AssemblerResult<Self> {
        for entry in metainfo.file_plan() {
            let full_path = destination_dir.join(&entry.path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| AssemblerError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            if !force && full_path.exists() {
                return Err(AssemblerError::AlreadyExists { path: full_path });
            }
        }
        Ok(Assembler {
            destination_dir,
            file_plan: metainfo.file_plan().to_vec(),
            piece_length: metainfo.piece_length,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Writes a verified piece's bytes to every file it spans, at the
    /// correct byte offset within each.
    #[tracing::instrument(skip(self, data), fields(piece_index, len = data.len()))]
    pub async fn write_piece(&self, piece_index: usize, data: Vec<u8>) -> AssemblerResult<()> {
        let piece_offset = piece_index as u64 * self.piece_length;
        let end = piece_offset + data.len() as u64;

        for entry in &self.file_plan {
            let file_start = entry.file_offset_start;
            let file_end = file_start + entry.length;
            if file_end <= piece_offset || file_start >= end {
                continue;
            }
            let overlap_start = piece_offset.max(file_start);
            let overlap_end = end.min(file_end);
            let slice_start = (overlap_start - piece_offset) as usize;
            let slice_end = (overlap_end - piece_offset) as usize;
            let file_relative_offset = overlap_start - file_start;
            let chunk = data[slice_start..slice_end].to_vec();
            self.write_chunk(&entry.path, file_relative_offset, chunk).await?;
        }
        Ok(())
    }

    async fn write_chunk(
        &self,
        relative_path: &Path,
        offset: u64,
        chunk: Vec<u8>,
    ) -> AssemblerResult<()> {
        let handle = self.file_handle(relative_path).await?;
        let path_for_error = self.destination_dir.join(relative_path);
        tokio::task::spawn_blocking(move || {
            let mut file = handle.lock().expect("file mutex poisoned");
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&chunk)
        })
        .await
        .map_err(|_| AssemblerError::JoinError)?
        .map_err(|source| AssemblerError::Io {
            path: path_for_error,
            source,
        })
    }

    async fn file_handle(
        &self,
        relative_path: &Path,
    ) -> AssemblerResult<Arc<StdMutex<std::fs::File>>> {
        let mut files = self.files.lock().await;
        if let Some(handle) = files.get(relative_path) {
            return Ok(Arc::clone(handle));
        }
        let full_path = self.destination_dir.join(relative_path);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&full_path)
            .map_err(|source| AssemblerError::Io {
                path: full_path,
                source,
            })?;
        let handle = Arc::new(StdMutex::new(file));
        files.insert(relative_path.to_path_buf(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Flushes every open file to disk. Call once the ledger reports all
    /// pieces verified.
    pub async fn finalize(&self) -> AssemblerResult<()> {
        let files = self.files.lock().await;
        for (path, handle) in files.iter() {
            let handle = Arc::clone(handle);
            let path = self.destination_dir.join(path);
            tokio::task::spawn_blocking(move || {
                let file = handle.lock().expect("file mutex poisoned");
                file.sync_all()
            })
            .await
            .map_err(|_| AssemblerError::JoinError)?
            .map_err(|source| AssemblerError::Io { path, source })?;
        }
        Ok(())
    }
}

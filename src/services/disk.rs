//! src/services/disk.rs
//!
//! DiskStore: object payloads on the local filesystem. Paths handed in are
//! relative to the storage root (see `path_resolver`); this type only joins
//! them onto the root and performs the I/O.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Size and checksum of a payload written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenBlob {
    pub size: u64,
    pub etag: String,
}

#[derive(Clone, Debug)]
pub struct DiskStore {
    /// Base directory on disk where object payloads are stored.
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a storage-relative path.
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// True if a regular file exists at `relative`.
    pub async fn file_exists(&self, relative: &Path) -> io::Result<bool> {
        match fs::metadata(self.absolute(relative)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Stream bytes into `relative`, replacing any existing file.
    ///
    /// - Writes to a temporary file next to the destination.
    /// - Computes the MD5 etag and size while streaming.
    /// - Fsyncs, then renames into place.
    ///
    /// The temp file is removed on any error, so a failed write leaves the
    /// previous content (if any) untouched.
    pub async fn write_stream<S>(&self, relative: &Path, stream: S) -> io::Result<WrittenBlob>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let file_path = self.absolute(relative);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size: u64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(err);
                }
            };
            size += chunk.len() as u64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        Ok(WrittenBlob {
            size,
            etag: format!("{:x}", digest.compute()),
        })
    }

    /// Open a stored file for reading, returning it with its length.
    ///
    /// Directories are reported as `NotFound`.
    pub async fn open(&self, relative: &Path) -> io::Result<(File, u64)> {
        let file_path = self.absolute(relative);
        let meta = fs::metadata(&file_path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(ErrorKind::NotFound, "not a regular file"));
        }
        let file = File::open(&file_path).await?;
        Ok((file, meta.len()))
    }

    /// Remove a stored file and prune directories left empty, up to the root.
    ///
    /// `NotFound` is returned as-is so callers can tell "already gone" apart
    /// from real failures.
    pub async fn remove(&self, relative: &Path) -> io::Result<()> {
        let file_path = self.absolute(relative);
        fs::remove_file(&file_path).await?;
        debug!("removed physical file {}", file_path.display());

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Write, read back and delete a scratch file under the root.
    pub async fn probe(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        let tmp_path = self.root.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(io::Error::other("file content mismatch"));
        }
        Ok(())
    }

    /// Recursively remove empty directories up to the storage root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

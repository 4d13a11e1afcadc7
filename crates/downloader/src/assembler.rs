// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Places fetched bytes into the destination file.
//!
//! Chunked downloads share one preallocated file and write at absolute
//! offsets, so no temporary files or merge pass are needed. Single-stream
//! downloads go through a buffered sequential writer.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::ResultExt;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};

use crate::error::{ArtifactSnafu, DownloadError};

const STREAM_BUFFER_CAPACITY: usize = 512 * 1024;

/// Destination for a stream of response bytes.
#[async_trait]
pub trait ByteSink: Send {
    async fn write_bytes(&mut self, bytes: Bytes) -> Result<(), DownloadError>;

    /// Flush anything buffered. Called once after the last write.
    async fn finish(&mut self) -> Result<(), DownloadError> { Ok(()) }
}

/// Destination file preallocated to the full resource size.
#[derive(Debug, Clone)]
pub struct Artifact {
    path: Arc<Path>,
    file: Arc<std::fs::File>,
}

impl Artifact {
    /// Create (or truncate) `path` and extend it to `total_size` bytes.
    pub async fn preallocate(path: &Path, total_size: u64) -> Result<Self, DownloadError> {
        create_parent(path).await?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .context(ArtifactSnafu { path })?;
        file.set_len(total_size)
            .await
            .context(ArtifactSnafu { path })?;

        Ok(Self {
            path: Arc::from(path),
            file: Arc::new(file.into_std().await),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    /// Sink that writes sequentially starting at `offset`.
    #[must_use]
    pub fn writer_at(&self, offset: u64) -> OffsetWriter {
        OffsetWriter {
            path:   Arc::clone(&self.path),
            file:   Arc::clone(&self.file),
            cursor: offset,
        }
    }

    /// Resize the file to `len` bytes, dropping any preallocated tail the
    /// server never filled.
    pub async fn set_len(&self, len: u64) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.set_len(len))
            .await
            .map_err(io::Error::other)
            .and_then(|result| result)
            .context(ArtifactSnafu {
                path: self.path.to_path_buf(),
            })
    }

    /// Flush file contents to disk.
    pub async fn sync(&self) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(io::Error::other)
            .and_then(|result| result)
            .context(ArtifactSnafu {
                path: self.path.to_path_buf(),
            })
    }
}

/// Positional writer over a shared file.
///
/// Each chunk owns one writer and a disjoint byte range, so concurrent writers
/// never need to coordinate.
#[derive(Debug)]
pub struct OffsetWriter {
    path:   Arc<Path>,
    file:   Arc<std::fs::File>,
    cursor: u64,
}

impl OffsetWriter {
    /// Absolute offset of the next write.
    #[must_use]
    pub const fn position(&self) -> u64 { self.cursor }
}

#[async_trait]
impl ByteSink for OffsetWriter {
    async fn write_bytes(&mut self, bytes: Bytes) -> Result<(), DownloadError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let file = Arc::clone(&self.file);
        let offset = self.cursor;
        let len = bytes.len() as u64;

        tokio::task::spawn_blocking(move || write_all_at(&file, &bytes, offset))
            .await
            .map_err(io::Error::other)
            .and_then(|result| result)
            .context(ArtifactSnafu {
                path: self.path.to_path_buf(),
            })?;

        self.cursor += len;
        Ok(())
    }
}

#[cfg(unix)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &std::fs::File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Buffered sequential writer for downloads fetched as one stream.
#[derive(Debug)]
pub struct StreamWriter {
    path:   PathBuf,
    writer: BufWriter<File>,
}

impl StreamWriter {
    /// Create (or truncate) `path`.
    pub async fn create(path: &Path) -> Result<Self, DownloadError> {
        create_parent(path).await?;
        let file = File::create(path).await.context(ArtifactSnafu { path })?;
        Ok(Self {
            path:   path.to_path_buf(),
            writer: BufWriter::with_capacity(STREAM_BUFFER_CAPACITY, file),
        })
    }
}

#[async_trait]
impl ByteSink for StreamWriter {
    async fn write_bytes(&mut self, bytes: Bytes) -> Result<(), DownloadError> {
        self.writer
            .write_all(&bytes)
            .await
            .context(ArtifactSnafu { path: &self.path })
    }

    async fn finish(&mut self) -> Result<(), DownloadError> {
        self.writer
            .flush()
            .await
            .context(ArtifactSnafu { path: &self.path })?;
        self.writer
            .get_mut()
            .sync_all()
            .await
            .context(ArtifactSnafu { path: &self.path })
    }
}

/// Delete a partial artifact. A file that was never created is not an error.
pub async fn remove_artifact(path: &Path) -> Result<(), DownloadError> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e).context(ArtifactSnafu { path }),
        _ => Ok(()),
    }
}

async fn create_parent(path: &Path) -> Result<(), DownloadError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .await
            .context(ArtifactSnafu { path: parent }),
        _ => Ok(()),
    }
}

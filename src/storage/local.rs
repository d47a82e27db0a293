//! Local filesystem picture store.
//!
//! ## Write protocol
//!
//! 1. `reserve` returns `None` if the picture already exists.
//! 2. The destination directory is created recursively.
//! 3. `{file}.part` is opened with `create_new`; if it already exists another
//!    task is downloading the same picture and `reserve` returns `None`.
//!    A part file untouched for longer than `stale_after` was left by a
//!    writer that died; it is removed and the create is retried once.
//! 4. `PendingPicture::write_stream` copies the body, flushes, and renames the
//!    part file to its final name. Any failure removes the part file.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use futures::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::{ByteStream, PictureKey};

/// Suffix of files that are still being written.
const PART_SUFFIX: &str = "part";

/// Age after which an abandoned part file may be reclaimed.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Picture store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalPictureStore {
    root_dir: PathBuf,
    stale_after: Duration,
}

/// A reserved destination, exclusively owned until written or discarded.
#[derive(Debug)]
pub struct PendingPicture {
    file: File,
    part_path: PathBuf,
    final_path: PathBuf,
}

impl LocalPictureStore {
    /// Create a store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Treat part files not modified for `stale_after` as abandoned.
    ///
    /// Must exceed the longest a live download can go without writing.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn root_dir(&self) -> &PathBuf {
        &self.root_dir
    }

    /// Directory holding the picture.
    pub fn destination_dir(&self, key: &PictureKey) -> PathBuf {
        self.root_dir.join(key.relative_dir())
    }

    /// Final path of the picture.
    pub fn destination_file(&self, key: &PictureKey) -> PathBuf {
        self.root_dir.join(key.relative_file())
    }

    /// Whether the finished picture is present.
    pub async fn exists(&self, key: &PictureKey) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.destination_file(key)).await?)
    }

    /// Claim the destination of `key` for writing.
    ///
    /// Returns `None` when the picture is already stored or another writer
    /// holds the reservation. `url` is only used for error context.
    pub async fn reserve(&self, key: &PictureKey, url: &str) -> Result<Option<PendingPicture>> {
        let final_path = self.destination_file(key);
        if tokio::fs::try_exists(&final_path).await? {
            log::trace!("{} already exists. Skipping...", final_path.display());
            return Ok(None);
        }

        let dir = self.destination_dir(key);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::DirectoryCreateFailed {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let part_path = final_path.with_extension(part_extension(&final_path));
        let file = match create_part(&part_path).await? {
            Some(file) => file,
            None if self.reclaim_stale(&part_path).await? => {
                match create_part(&part_path).await? {
                    Some(file) => file,
                    None => return Ok(None),
                }
            }
            None => {
                log::debug!("{} is being written by another task", final_path.display());
                return Ok(None);
            }
        };

        // A concurrent writer may have renamed its part file between our
        // existence check and the exclusive create.
        if tokio::fs::try_exists(&final_path).await? {
            drop(file);
            let _ = tokio::fs::remove_file(&part_path).await;
            return Ok(None);
        }

        Ok(Some(PendingPicture {
            file,
            part_path,
            final_path,
        }))
    }

    /// Remove `part_path` if its writer is gone. Returns whether the
    /// reservation should be retried.
    async fn reclaim_stale(&self, part_path: &Path) -> Result<bool> {
        let modified = match tokio::fs::metadata(part_path).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(AppError::Io(e)),
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age < self.stale_after {
            return Ok(false);
        }

        log::warn!(
            "Reclaiming {} (untouched for {}s)",
            part_path.display(),
            age.as_secs()
        );
        match tokio::fs::remove_file(part_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

/// Create `path` exclusively; `None` if it already exists.
async fn create_part(path: &Path) -> Result<Option<File>> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

impl PendingPicture {
    /// Final location once written.
    pub fn final_path(&self) -> &PathBuf {
        &self.final_path
    }

    /// Copy `stream` into the reserved file and move it into place.
    ///
    /// Returns the number of bytes written.
    pub async fn write_stream(mut self, mut stream: ByteStream) -> Result<u64> {
        let mut written = 0u64;
        let copied: Result<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                self.file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            self.file.flush().await?;
            self.file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = copied {
            self.discard().await;
            return Err(e);
        }

        let PendingPicture {
            file,
            part_path,
            final_path,
        } = self;
        drop(file);

        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(AppError::Io(e));
        }
        Ok(written)
    }

    /// Give up the reservation and remove the part file.
    pub async fn discard(self) {
        let PendingPicture {
            file, part_path, ..
        } = self;
        drop(file);
        if let Err(e) = tokio::fs::remove_file(&part_path).await {
            log::warn!("Could not remove {}: {}", part_path.display(), e);
        }
    }
}

/// `jpg` becomes `jpg.part`; no extension becomes `part`.
fn part_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.{PART_SUFFIX}"),
        None => PART_SUFFIX.to_string(),
    }
}

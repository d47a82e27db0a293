//! Storage for downloaded pictures.
//!
//! Pictures are written below a single root directory:
//!
//! ```text
//! {root}/
//! └── {user}/
//!     └── {path}/               # board, or board/section
//!         ├── 4a69a5....jpg     # finished picture
//!         └── 93749980....jpg.part   # download in progress
//! ```
//!
//! A picture is written to `{file}.part`, opened with create-exclusive
//! semantics, and renamed into place once complete. The `.part` file acts as
//! the per-destination lock between concurrent downloads of the same picture.

pub mod local;

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::{AppError, Result};
use crate::models::Picture;
use crate::utils::parse_filename;

// Re-export for convenience
pub use local::{LocalPictureStore, PendingPicture};

/// Body of a fetched picture.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Location of one picture relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureKey {
    pub user: String,
    pub path: String,
    pub filename: String,
}

impl PictureKey {
    /// Derive the key from a picture message.
    ///
    /// Fails with `InvalidUrl` if the URL has no trailing file name, and with
    /// a validation error if user or path would escape the storage root.
    pub fn from_picture(picture: &Picture) -> Result<Self> {
        let filename = parse_filename(&picture.url)?;
        let key = Self {
            user: picture.user.clone(),
            path: picture.path.clone(),
            filename,
        };
        key.check()?;
        Ok(key)
    }

    /// `{user}/{path}` relative to the root.
    pub fn relative_dir(&self) -> PathBuf {
        Path::new(&self.user).join(&self.path)
    }

    /// `{user}/{path}/{filename}` relative to the root.
    pub fn relative_file(&self) -> PathBuf {
        self.relative_dir().join(&self.filename)
    }

    fn check(&self) -> Result<()> {
        if self.user.is_empty() || self.path.is_empty() {
            return Err(AppError::validation("picture user and path must not be empty"));
        }
        let relative = self.relative_file();
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AppError::validation(format!(
                "picture destination {} leaves the storage root",
                relative.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn picture(url: &str, user: &str, path: &str) -> Picture {
        Picture {
            url: url.to_string(),
            host: "example.com".to_string(),
            user: user.to_string(),
            path: path.to_string(),
            path_segments: path.split('/').map(str::to_string).collect(),
        }
    }

    #[test]
    fn key_from_picture() {
        let key = PictureKey::from_picture(&picture(
            "https://img.example.com/originals/ab/cd/ab12.jpg",
            "alice",
            "travel/japan",
        ))
        .unwrap();
        assert_eq!(key.filename, "ab12.jpg");
        assert_eq!(key.relative_file(), PathBuf::from("alice/travel/japan/ab12.jpg"));
    }

    #[test]
    fn key_rejects_escaping_paths() {
        let url = "https://img.example.com/originals/ab/cd/ab12.jpg";
        assert!(PictureKey::from_picture(&picture(url, "..", "travel")).is_err());
        assert!(PictureKey::from_picture(&picture(url, "alice", "../../etc")).is_err());
        assert!(PictureKey::from_picture(&picture(url, "alice", "/abs")).is_err());
        assert!(PictureKey::from_picture(&picture(url, "", "travel")).is_err());
    }

    #[test]
    fn key_rejects_url_without_filename() {
        let err = PictureKey::from_picture(&picture("https://img.example.com/", "alice", "travel"))
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidUrl { .. }));
    }
}

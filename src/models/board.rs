// src/models/board.rs

//! Board and Picture messages exchanged over the broker.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::utils::url::{authority, parse_path, parse_path_segments, parse_user};

/// A scrape request for one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// URL as submitted by the caller
    #[serde(rename = "url")]
    pub raw_url: String,

    /// Authority of `raw_url` (e.g. "www.example.com")
    pub host: String,

    /// Owner of the board
    pub user: String,

    /// Board path below the user, e.g. "travel" or "travel/japan"
    pub path: String,

    #[serde(rename = "pathsegments", default)]
    pub path_segments: Vec<String>,

    /// Tracing identifier assigned at intake
    #[serde(rename = "uuid", default)]
    pub id: String,
}

impl Board {
    /// Parse a board URL like `https://host/user/board[/section]/`.
    ///
    /// A fresh lowercase v4 UUID is assigned on success.
    pub fn from_raw_url(raw_url: &str) -> Result<Self> {
        let parsed = Url::parse(raw_url)
            .map_err(|_| AppError::validation("EnqueueBoard failed: Invalid URL"))?;

        let host = authority(&parsed)
            .ok_or_else(|| AppError::validation("EnqueueBoard failed: Invalid hostname"))?;

        let url_path = parsed.path();
        if url_path.is_empty() {
            return Err(AppError::validation("EnqueueBoard failed: Invalid path"));
        }

        let user = parse_user(url_path)?;
        let path = parse_path(url_path)?;
        let path_segments = parse_path_segments(&path)?;

        Ok(Self {
            raw_url: raw_url.to_string(),
            host,
            user,
            path,
            path_segments,
            id: Uuid::new_v4().to_string().to_lowercase(),
        })
    }

    /// Page the scraper navigates to.
    pub fn page_url(&self) -> String {
        format!("https://{}/{}/{}", self.host, self.user, self.path)
    }

    /// Login page on the board's host.
    pub fn login_url(&self) -> String {
        format!("https://{}/login/", self.host)
    }

    /// Build the download message for a picture found on this board.
    pub fn picture(&self, url: impl Into<String>) -> Picture {
        Picture {
            url: url.into(),
            host: self.host.clone(),
            user: self.user.clone(),
            path: self.path.clone(),
            path_segments: self.path_segments.clone(),
        }
    }
}

/// A full-resolution picture discovered on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Picture {
    /// "originals" variant of the image
    #[serde(alias = "Url")]
    pub url: String,

    #[serde(default, alias = "Host")]
    pub host: String,

    #[serde(alias = "User")]
    pub user: String,

    #[serde(alias = "Path")]
    pub path: String,

    #[serde(rename = "pathsegments", default, alias = "PathSegments")]
    pub path_segments: Vec<String>,
}

// src/models/user.rs

//! Import-time aggregation of a user's boards.

use std::collections::BTreeMap;

/// A user directory found by the importer, enriched stage by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub username: String,

    /// Board name to file names
    pub boards: BTreeMap<String, Vec<String>>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            boards: BTreeMap::new(),
        }
    }

    /// Total number of files across all boards.
    pub fn file_count(&self) -> usize {
        self.boards.values().map(Vec::len).sum()
    }
}

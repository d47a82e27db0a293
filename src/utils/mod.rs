//! Utility functions and helpers.

pub mod http;
pub mod url;

pub use self::url::{board_key, extract_original, index_key, namespaced, parse_filename};

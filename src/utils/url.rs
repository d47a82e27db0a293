// src/utils/url.rs

//! URL and path manipulation utilities.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{AppError, Result};

/// Matches the "originals" resolution inside a `srcset` attribute.
static ORIGINAL_IMAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https://[-a-zA-Z0-9@:%._+~#=]{2,256}\.[a-z]{2,3}/originals\b[-a-zA-Z0-9@:%_+.~#?&/=]*",
    )
    .expect("original image pattern is valid")
});

/// Captures the last path segment of a request path.
static FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*/([a-zA-Z0-9][^/]*)$").expect("filename pattern is valid")
});

/// Leading number of a pin counter such as "1,291 Pins".
static PINS_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9,]+)").expect("pins count pattern is valid"));

/// Trim one leading and one trailing `/`.
///
/// # Examples
/// ```
/// use pinbackup::utils::url::trim_path;
///
/// assert_eq!(trim_path("/a/b/").unwrap(), "a/b");
/// assert_eq!(trim_path("a/b").unwrap(), "a/b");
/// assert!(trim_path("").is_err());
/// ```
pub fn trim_path(path: &str) -> Result<&str> {
    if path.is_empty() {
        return Err(AppError::validation("path to trim can't be empty"));
    }
    let path = path.strip_prefix('/').unwrap_or(path);
    Ok(path.strip_suffix('/').unwrap_or(path))
}

/// Extract the user (first segment) from a board path like `/user/board`.
pub fn parse_user(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(AppError::validation("Parse user failed: Received empty path"));
    }
    let trimmed = trim_path(path)
        .map_err(|_| AppError::validation(format!("Parse user failed: Trim '{path}' failed")))?;

    let Some((user, _)) = trimmed.split_once('/') else {
        return Err(AppError::validation(
            "Parse user failed: Path doesn't contain at least one /",
        ));
    };
    if user.is_empty() {
        return Err(AppError::validation("Parse user failed: Username missing"));
    }
    Ok(user.to_string())
}

/// Extract the board path (everything after the user) from `/user/board[/section]`.
pub fn parse_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(AppError::validation("Parse path failed: Path received is empty"));
    }
    let trimmed = trim_path(path)
        .map_err(|_| AppError::validation(format!("Parse path failed: Trim '{path}' failed")))?;

    match trimmed.split_once('/') {
        Some((_, rest)) if !rest.is_empty() => Ok(rest.to_string()),
        _ => Err(AppError::validation("Parse path failed: Path too short")),
    }
}

/// Split a board path into its segments (`board` or `board/section`).
pub fn parse_path_segments(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Err(AppError::validation(
            "Parse path segments failed: Path received is empty",
        ));
    }
    let trimmed = trim_path(path).map_err(|_| {
        AppError::validation(format!("Parse path segments failed: Trim '{path}' failed"))
    })?;
    Ok(trimmed.split('/').map(str::to_string).collect())
}

/// Turn `/user/board/` into the index key `user:board`.
///
/// Only the first `/` is replaced, so sections stay part of the board name.
pub fn index_key(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(AppError::validation("prepareKey failed: Received empty path"));
    }
    let trimmed = trim_path(path)?;
    if !trimmed.contains('/') {
        return Err(AppError::validation(
            "prepareKey failed: Path doesn't contain at least one /",
        ));
    }
    Ok(trimmed.replacen('/', ":", 1))
}

/// Build the index key for a user's board.
pub fn board_key(user: &str, board: &str) -> String {
    format!("{user}:{board}")
}

/// Prefix `key` with `namespace`, if one is configured.
pub fn namespaced(namespace: &str, key: String) -> String {
    if namespace.is_empty() {
        key
    } else {
        format!("{namespace}:{key}")
    }
}

/// Return the file name at the end of a picture URL's path.
///
/// # Examples
/// ```
/// use pinbackup::utils::url::parse_filename;
///
/// assert_eq!(
///     parse_filename("https://i.example.com/originals/4a/69/4a69a5.jpg").unwrap(),
///     "4a69a5.jpg"
/// );
/// ```
pub fn parse_filename(picture_url: &str) -> Result<String> {
    let parsed = Url::parse(picture_url).map_err(|e| AppError::invalid_url(picture_url, e))?;
    let path = parsed.path();
    if path.is_empty() || path == "/" {
        return Err(AppError::invalid_url(
            picture_url,
            "Can not parse filename. Request path is empty.",
        ));
    }

    FILENAME
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            AppError::invalid_url(picture_url, "Can not parse filename out of request path.")
        })
}

/// Find the "originals" URL inside a `srcset` attribute.
///
/// Returns `None` unless the match is a secure (`https`) link.
pub fn extract_original(srcset: &str) -> Option<&str> {
    ORIGINAL_IMAGE_LINK
        .find(srcset)
        .map(|m| m.as_str())
        .filter(|link| link.starts_with("https"))
}

/// Parse a pin counter such as "1,291 Pins" into a number.
///
/// Returns 0 when no leading number is present.
pub fn parse_pins_count(raw: &str) -> usize {
    PINS_COUNT
        .captures(raw.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
        .unwrap_or(0)
}

/// Authority (`host[:port]`) of a parsed URL.
pub fn authority(url: &Url) -> Option<String> {
    let host = url.host_str().filter(|h| !h.is_empty())?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_path() {
        let cases = [
            ("/user1/board/", "user1/board"),
            ("/user1/board", "user1/board"),
            ("user1/board/", "user1/board"),
            ("user1/board", "user1/board"),
            ("/user1/", "user1"),
            ("/user1", "user1"),
            ("user1/", "user1"),
            ("user1", "user1"),
        ];
        for (input, expected) in cases {
            assert_eq!(trim_path(input).unwrap(), expected, "input {input}");
        }
        assert!(trim_path("").is_err());
    }

    #[test]
    fn test_parse_user() {
        assert_eq!(parse_user("/user1/board").unwrap(), "user1");
        assert_eq!(parse_user("/user2/board/section1").unwrap(), "user2");
        assert_eq!(
            parse_user("").unwrap_err().to_string(),
            "Parse user failed: Received empty path"
        );
        assert!(parse_user("/user-only/").is_err());
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path("/user1/board").unwrap(), "board");
        assert_eq!(parse_path("/user2/board/section1").unwrap(), "board/section1");
        assert!(parse_path("/user1").is_err());
        assert!(parse_path("").is_err());
    }

    #[test]
    fn test_parse_path_segments() {
        assert_eq!(parse_path_segments("/board").unwrap(), vec!["board"]);
        assert_eq!(
            parse_path_segments("/board/section1").unwrap(),
            vec!["board", "section1"]
        );
        assert!(parse_path_segments("").is_err());
    }

    #[test]
    fn test_index_key() {
        assert_eq!(index_key("/alice/travel/").unwrap(), "alice:travel");
        assert_eq!(index_key("alice/travel/japan").unwrap(), "alice:travel/japan");
        assert!(index_key("").is_err());
        assert!(index_key("/alice/").is_err());
    }

    #[test]
    fn test_namespaced() {
        assert_eq!(namespaced("", "alice:travel".into()), "alice:travel");
        assert_eq!(namespaced("pins", "alice:travel".into()), "pins:alice:travel");
    }

    #[test]
    fn test_parse_filename() {
        assert_eq!(
            parse_filename("https://img.example.com/originals/ab/cd/ab12.jpg").unwrap(),
            "ab12.jpg"
        );
        assert!(parse_filename("https://img.example.com/").is_err());
        assert!(parse_filename("https://img.example.com/originals/").is_err());
        assert!(parse_filename("not a url").is_err());
    }

    #[test]
    fn test_extract_original() {
        let cases = [
            (
                "https://i.pinimg.com/236x/93/74/99/93749980da966aef00c4e18d1000f4e1.jpg 1x, https://i.pinimg.com/474x/93/74/99/93749980da966aef00c4e18d1000f4e1.jpg 2x, https://i.pinimg.com/736x/93/74/99/93749980da966aef00c4e18d1000f4e1.jpg 3x, https://i.pinimg.com/originals/93/74/99/93749980da966aef00c4e18d1000f4e1.jpg 4x",
                "https://i.pinimg.com/originals/93/74/99/93749980da966aef00c4e18d1000f4e1.jpg",
            ),
            (
                "https://i.pinimg.com/236x/49/18/b7/4918b740da399c815f6fdba556a0fb2b.jpg 1x, https://i.pinimg.com/originals/49/18/b7/4918b740da399c815f6fdba556a0fb2b.jpg 4x",
                "https://i.pinimg.com/originals/49/18/b7/4918b740da399c815f6fdba556a0fb2b.jpg",
            ),
        ];
        for (srcset, original) in cases {
            assert_eq!(extract_original(srcset), Some(original));
        }
        assert_eq!(
            extract_original("http://i.pinimg.com/originals/aa/bb/cc.jpg 4x"),
            None
        );
        assert_eq!(extract_original("https://i.pinimg.com/236x/aa/bb.jpg 1x"), None);
    }

    #[test]
    fn test_parse_pins_count() {
        let cases = [
            ("0", 0),
            ("15", 15),
            ("999 Pins", 999),
            ("1,291 Pins", 1291),
            ("15,987", 15987),
            ("Pins", 0),
        ];
        for (raw, expected) in cases {
            assert_eq!(parse_pins_count(raw), expected, "input {raw}");
        }
    }

    #[test]
    fn test_authority() {
        let url = Url::parse("https://example.com/alice").unwrap();
        assert_eq!(authority(&url).as_deref(), Some("example.com"));
        let url = Url::parse("http://localhost:8080/alice").unwrap();
        assert_eq!(authority(&url).as_deref(), Some("localhost:8080"));
    }
}

//! Common utility functions shared across CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use image::DynamicImage;
use tracing::debug;
use snapgate_core::{FsBlobStore, SyncedOps};

/// Open the directory-backed store at `root`.
pub fn open_store(root: &Path) -> SyncedOps {
    debug!(root = %root.display(), "Opening blob store");
    SyncedOps::new(Arc::new(FsBlobStore::new(root)))
}

/// Decode an image file (PNG or JPEG).
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("Failed to read image: {}", path.display()))
}

/// Parse a `key=value` pair.
pub fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

/// Format a Unix timestamp (seconds) as a human-readable UTC string.
pub fn format_timestamp(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        _ => format!("{ts}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("browser=chrome 126").unwrap(),
            ("browser".to_string(), "chrome 126".to_string())
        );
        assert_eq!(
            parse_key_val("url=https://x/?a=b").unwrap().1,
            "https://x/?a=b"
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20 UTC");
    }

    #[test]
    fn test_load_image_missing_file() {
        let err = load_image(Path::new("/nonexistent/shot.png")).unwrap_err();
        assert!(err.to_string().contains("Failed to read image"));
    }
}

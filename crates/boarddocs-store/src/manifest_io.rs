//! Manifest file I/O
//!
//! Every call reads or writes one whole file; nothing is cached in memory.
//! Writes are not atomic and assume a single writer.

use std::io::ErrorKind;
use std::path::Path;

use boarddocs_core::{FieldPath, Result, Schema, ScrapeError, Violations};
use serde_json::Value;
use tokio::fs;
use tracing::debug;

/// Whether `path` exists
///
/// Only a missing path counts as absent; any other lookup failure (for
/// example a permission error on a parent directory) is returned.
pub async fn exists(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Read and check a manifest
///
/// The raw document is checked before decoding so that a missing or
/// mistyped field is reported by its path together with every other
/// violation, rather than as the first serde error.
///
/// # Example
/// ```no_run
/// use std::path::Path;
/// use boarddocs_core::MeetingManifest;
/// use boarddocs_store::manifest_io::read_manifest;
///
/// #[tokio::main]
/// async fn main() -> boarddocs_core::Result<()> {
///     let meeting: MeetingManifest =
///         read_manifest(Path::new("2024-03-05-regular-meeting/meeting.json")).await?;
///     println!("{} items", meeting.item_count());
///     Ok(())
/// }
/// ```
pub async fn read_manifest<M: Schema>(path: &Path) -> Result<M> {
    debug!("Reading {} from {}", M::NAME, path.display());

    let data = fs::read(path).await.map_err(|source| ScrapeError::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_slice(&data).map_err(|e| unparsable(path, e))?;

    let mut violations = Violations::new();
    M::check_value(&value, &FieldPath::root(), &mut violations);
    if !violations.is_empty() {
        return Err(invalid(path, violations));
    }

    let manifest: M = serde_json::from_value(value).map_err(|e| unparsable(path, e))?;

    manifest.check(&FieldPath::root(), &mut violations);
    if !violations.is_empty() {
        return Err(invalid(path, violations));
    }

    Ok(manifest)
}

/// Check and write a manifest as pretty-printed JSON
///
/// Nothing on disk is touched when the check fails. Parent directories are
/// created as needed and an existing file is replaced.
pub async fn write_manifest<M: Schema>(path: &Path, manifest: &M) -> Result<()> {
    // Check before writing
    let violations = manifest.violations();
    if !violations.is_empty() {
        return Err(invalid(path, violations));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let data = serde_json::to_vec_pretty(manifest)?;

    debug!("Writing {} to {}", M::NAME, path.display());
    fs::write(path, data).await?;

    Ok(())
}

fn unparsable(path: &Path, source: serde_json::Error) -> ScrapeError {
    ScrapeError::ManifestParse {
        path: path.to_path_buf(),
        source,
    }
}

fn invalid(path: &Path, violations: Violations) -> ScrapeError {
    ScrapeError::Validation {
        path: path.to_path_buf(),
        violations: violations.into_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boarddocs_core::{MeetingCategory, MeetingItem, MeetingManifest};
    use tempfile::TempDir;

    fn meeting() -> MeetingManifest {
        MeetingManifest {
            date: "2024-03-05".to_string(),
            meeting_slug: "2024-03-05-regular-meeting".to_string(),
            meeting_type: "Regular Meeting".to_string(),
            meeting_url: Some("https://go.boarddocs.com/ca/sfusd/Board.nsf/goto?open&id=D0CQ4A1A1C2B".to_string()),
            categories: vec![MeetingCategory {
                category_id: Some("D0CQ4B1A1C2B".to_string()),
                category_order: Some("1".to_string()),
                category_name: Some("1. Call to Order".to_string()),
                items: vec![MeetingItem {
                    item_id: Some("D0CQ4C1A1C2B".to_string()),
                    item_order: "1.1".to_string(),
                    item_name: "Roll Call".to_string(),
                    item_slug: "1-1-d0cq4c1a1c2b-roll-call".to_string(),
                }],
            }],
        }
    }

    #[tokio::test]
    async fn test_exists() {
        let dir = TempDir::new().unwrap();
        assert!(exists(dir.path()).await.unwrap());
        assert!(!exists(&dir.path().join("missing.json")).await.unwrap());
        assert!(!exists(&dir.path().join("missing/deeper/item.json")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_propagates_other_failures() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("meeting.json");
        std::fs::write(&file, "{}").unwrap();

        // A regular file as a parent directory is ENOTDIR, not NotFound
        let err = exists(&file.join("child")).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Io(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2024-03-05-regular-meeting/meeting.json");

        write_manifest(&path, &meeting()).await.unwrap();
        let read: MeetingManifest = read_manifest(&path).await.unwrap();

        assert_eq!(read, meeting());
    }

    #[tokio::test]
    async fn test_write_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meeting.json");

        write_manifest(&path, &meeting()).await.unwrap();
        let mut updated = meeting();
        updated.categories[0].items.clear();
        write_manifest(&path, &updated).await.unwrap();

        let read: MeetingManifest = read_manifest(&path).await.unwrap();
        assert!(!read.has_items());
    }

    #[tokio::test]
    async fn test_invalid_write_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad/meeting.json");

        let mut bad = meeting();
        bad.date = "March 5".to_string();
        bad.categories[0].items[0].item_slug = String::new();

        let err = write_manifest(&path, &bad).await.unwrap_err();
        match err {
            ScrapeError::Validation { violations, .. } => {
                assert!(violations.iter().any(|v| v.starts_with("date:")));
                assert!(violations
                    .iter()
                    .any(|v| v.starts_with("categories[0].items[0].itemSlug:")));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(!dir.path().join("bad").exists());
    }

    #[tokio::test]
    async fn test_read_reports_every_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meeting.json");
        std::fs::write(
            &path,
            r#"{
                "date": "2024-03-05",
                "meetingSlug": "2024-03-05-regular-meeting",
                "categories": [
                    {"categoryName": 7, "items": [{"itemOrder": "1.1", "itemName": "Roll Call"}]}
                ]
            }"#,
        )
        .unwrap();

        let err = read_manifest::<MeetingManifest>(&path).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("meetingType: missing required field"), "{}", message);
        assert!(message.contains("categories[0].categoryName: expected string or null, found number"));
        assert!(message.contains("categories[0].items[0].itemSlug: missing required field"));
    }

    #[tokio::test]
    async fn test_read_ignores_unknown_and_missing_optional_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meeting.json");
        std::fs::write(
            &path,
            r#"{
                "date": "2024-03-05",
                "meetingSlug": "2024-03-05-regular-meeting",
                "meetingType": "Regular Meeting",
                "scrapedBy": "someone else",
                "categories": [{"items": []}]
            }"#,
        )
        .unwrap();

        let read: MeetingManifest = read_manifest(&path).await.unwrap();
        assert_eq!(read.meeting_url, None);
        assert_eq!(read.categories[0].category_name, None);
    }

    #[tokio::test]
    async fn test_read_malformed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meeting.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = read_manifest::<MeetingManifest>(&path).await.unwrap_err();
        assert!(matches!(err, ScrapeError::ManifestParse { .. }));
        assert!(err
            .to_string()
            .starts_with(&format!("Could not parse {}:", path.display())));
    }

    #[tokio::test]
    async fn test_read_missing_file_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone/meeting.json");

        let err = read_manifest::<MeetingManifest>(&path).await.unwrap_err();
        match err {
            ScrapeError::ManifestRead { path: reported, source } => {
                assert_eq!(reported, path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected read error, got {:?}", other),
        }
    }
}

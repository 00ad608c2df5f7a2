//! Integration tests for the archive layout and resumability checks

use boarddocs_core::{ItemManifest, Link, MeetingCategory, MeetingItem, MeetingManifest, ScrapeError};
use boarddocs_store::ManifestStore;
use tempfile::TempDir;

const MEETING_SLUG: &str = "2024-03-05-regular-meeting";

/// Helper to create a test agenda item
fn create_item(order: &str, id: &str, name: &str) -> MeetingItem {
    MeetingItem {
        item_id: Some(id.to_string()),
        item_order: order.to_string(),
        item_name: name.to_string(),
        item_slug: boarddocs_core::slug::item_slug(order, Some(id), name),
    }
}

/// Helper to create a meeting with the given categories
fn create_meeting(categories: Vec<MeetingCategory>) -> MeetingManifest {
    MeetingManifest {
        date: "2024-03-05".to_string(),
        meeting_slug: MEETING_SLUG.to_string(),
        meeting_type: "Regular Meeting".to_string(),
        meeting_url: None,
        categories,
    }
}

fn category(name: &str, items: Vec<MeetingItem>) -> MeetingCategory {
    MeetingCategory {
        category_id: None,
        category_order: None,
        category_name: Some(name.to_string()),
        items,
    }
}

#[test]
fn test_layout() {
    let store = ManifestStore::new("/archive");

    assert_eq!(
        store.meeting_path(MEETING_SLUG).to_str(),
        Some("/archive/2024-03-05-regular-meeting/meeting.json")
    );
    assert_eq!(
        store.item_path(MEETING_SLUG, "1-1-x-roll-call").to_str(),
        Some("/archive/2024-03-05-regular-meeting/1-1-x-roll-call/item.json")
    );
    assert_eq!(
        store
            .attachment_path(MEETING_SLUG, "1-1-x-roll-call", "Minutes 2024.pdf")
            .to_str(),
        Some("/archive/2024-03-05-regular-meeting/1-1-x-roll-call/Minutes 2024.pdf")
    );
}

#[tokio::test]
async fn test_cached_meeting_missing() {
    let dir = TempDir::new().unwrap();
    let store = ManifestStore::new(dir.path());

    assert!(store.cached_meeting(MEETING_SLUG).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cached_meeting_reused_with_one_nonempty_category() {
    let dir = TempDir::new().unwrap();
    let store = ManifestStore::new(dir.path());

    let meeting = create_meeting(vec![
        category("Opening", vec![]),
        category("Consent", vec![create_item("4.1", "D0CQ", "Minutes")]),
    ]);
    store.write_meeting(&meeting).await.unwrap();

    let cached = store.cached_meeting(MEETING_SLUG).await.unwrap();
    assert_eq!(cached, Some(meeting));
}

#[tokio::test]
async fn test_cached_meeting_discarded_when_all_categories_empty() {
    let dir = TempDir::new().unwrap();
    let store = ManifestStore::new(dir.path());

    let meeting = create_meeting(vec![category("Opening", vec![]), category("Consent", vec![])]);
    store.write_meeting(&meeting).await.unwrap();

    assert!(store.cached_meeting(MEETING_SLUG).await.unwrap().is_none());
    // Discarding is a read-side decision; the file stays until overwritten
    assert!(store.meeting_path(MEETING_SLUG).exists());
}

#[tokio::test]
async fn test_cached_meeting_corrupt_is_an_error() {
    let dir = TempDir::new().unwrap();
    let store = ManifestStore::new(dir.path());

    let path = store.meeting_path(MEETING_SLUG);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{"date": "2024-03-05", "categories": []}"#).unwrap();

    let err = store.cached_meeting(MEETING_SLUG).await.unwrap_err();
    match err {
        ScrapeError::Validation { path: reported, violations } => {
            assert_eq!(reported, path);
            assert_eq!(violations.len(), 2);
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cached_item_requires_body() {
    let dir = TempDir::new().unwrap();
    let store = ManifestStore::new(dir.path());

    let item = create_item("4.1", "D0CQ", "Minutes");
    let mut manifest = ItemManifest {
        item: item.clone(),
        item_url: Some("https://go.boarddocs.com/ca/sfusd/Board.nsf/goto?open&id=D0CQ".to_string()),
        links: vec![Link {
            order: Some("1".to_string()),
            unique: Some("D0CR".to_string()),
            href: "https://go.boarddocs.com/ca/sfusd/Board.nsf/files/D0CR/$file/Minutes%202024.pdf"
                .to_string(),
            text: "Minutes 2024.pdf (120 KB)".to_string(),
            filename: "Minutes 2024.pdf".to_string(),
        }],
        inner_html: None,
    };

    store.write_item(MEETING_SLUG, &manifest).await.unwrap();
    assert!(store
        .cached_item(MEETING_SLUG, &item.item_slug)
        .await
        .unwrap()
        .is_none());

    manifest.inner_html = Some("<p>Approve the minutes.</p>".to_string());
    store.write_item(MEETING_SLUG, &manifest).await.unwrap();
    assert_eq!(
        store.cached_item(MEETING_SLUG, &item.item_slug).await.unwrap(),
        Some(manifest)
    );
}

#[tokio::test]
async fn test_item_link_with_path_in_filename_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = ManifestStore::new(dir.path());

    let manifest = ItemManifest {
        item: create_item("4.1", "D0CQ", "Minutes"),
        item_url: None,
        links: vec![Link {
            order: None,
            unique: None,
            href: "https://go.boarddocs.com/x".to_string(),
            text: "x".to_string(),
            filename: "../escape.pdf".to_string(),
        }],
        inner_html: Some(String::new()),
    };

    let err = store.write_item(MEETING_SLUG, &manifest).await.unwrap_err();
    assert!(err.to_string().contains("links[0].filename"));
    assert!(!store.meeting_dir(MEETING_SLUG).exists());
}

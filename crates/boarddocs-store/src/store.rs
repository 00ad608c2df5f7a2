//! Slug-keyed archive layout

use std::path::{Path, PathBuf};

use boarddocs_core::{ItemManifest, MeetingManifest, Result, Schema};
use tracing::{debug, warn};

use crate::manifest_io::{exists, read_manifest, write_manifest};

pub const MEETING_FILE: &str = "meeting.json";
pub const ITEM_FILE: &str = "item.json";

/// The archive directory tree
///
/// ```text
/// <root>/<meetingSlug>/meeting.json
/// <root>/<meetingSlug>/<itemSlug>/item.json
/// <root>/<meetingSlug>/<itemSlug>/<attachment>
/// ```
#[derive(Debug, Clone)]
pub struct ManifestStore {
    root: PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meeting_dir(&self, meeting_slug: &str) -> PathBuf {
        self.root.join(meeting_slug)
    }

    pub fn meeting_path(&self, meeting_slug: &str) -> PathBuf {
        self.meeting_dir(meeting_slug).join(MEETING_FILE)
    }

    pub fn item_dir(&self, meeting_slug: &str, item_slug: &str) -> PathBuf {
        self.meeting_dir(meeting_slug).join(item_slug)
    }

    pub fn item_path(&self, meeting_slug: &str, item_slug: &str) -> PathBuf {
        self.item_dir(meeting_slug, item_slug).join(ITEM_FILE)
    }

    pub fn attachment_path(&self, meeting_slug: &str, item_slug: &str, filename: &str) -> PathBuf {
        self.item_dir(meeting_slug, item_slug).join(filename)
    }

    pub async fn exists(&self, path: &Path) -> Result<bool> {
        exists(path).await
    }

    pub async fn read<M: Schema>(&self, path: &Path) -> Result<M> {
        read_manifest(path).await
    }

    pub async fn write<M: Schema>(&self, path: &Path, manifest: &M) -> Result<()> {
        write_manifest(path, manifest).await
    }

    pub async fn write_meeting(&self, meeting: &MeetingManifest) -> Result<()> {
        self.write(&self.meeting_path(&meeting.meeting_slug), meeting).await
    }

    pub async fn write_item(&self, meeting_slug: &str, item: &ItemManifest) -> Result<()> {
        self.write(&self.item_path(meeting_slug, &item.item.item_slug), item)
            .await
    }

    /// A previously scraped meeting worth resuming from
    ///
    /// A manifest whose categories are all empty is discarded, so the meeting
    /// is scraped again. A manifest that fails its checks is an error.
    pub async fn cached_meeting(&self, meeting_slug: &str) -> Result<Option<MeetingManifest>> {
        let path = self.meeting_path(meeting_slug);
        if !self.exists(&path).await? {
            return Ok(None);
        }

        let meeting: MeetingManifest = self.read(&path).await?;
        if !meeting.has_items() {
            warn!("Discarding {}: no category lists any item", path.display());
            return Ok(None);
        }

        debug!("Reusing {} ({} items)", path.display(), meeting.item_count());
        Ok(Some(meeting))
    }

    /// A previously scraped item, if its body was captured
    pub async fn cached_item(&self, meeting_slug: &str, item_slug: &str) -> Result<Option<ItemManifest>> {
        let path = self.item_path(meeting_slug, item_slug);
        if !self.exists(&path).await? {
            return Ok(None);
        }

        let item: ItemManifest = self.read(&path).await?;
        if !item.is_complete() {
            debug!("Item manifest {} has no body; scraping again", path.display());
            return Ok(None);
        }

        Ok(Some(item))
    }
}

//! Manifest types persisted as `meeting.json` and `item.json`
//!
//! Field names and optionality follow the on-disk JSON documents written by
//! earlier runs, so existing archives keep resuming. Nullable fields are
//! written as `null`; fields that may be absent are omitted when empty.

use serde::{Deserialize, Serialize};

/// One agenda line entry as listed on the meeting agenda
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingItem {
    /// Twelve character BoardDocs identifier, when the item has one
    #[serde(default)]
    pub item_id: Option<String>,
    pub item_order: String,
    pub item_name: String,
    /// Directory key under the meeting directory
    pub item_slug: String,
}

/// An agenda section and the items listed under it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingCategory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    pub items: Vec<MeetingItem>,
}

/// Everything scraped from one meeting's agenda
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingManifest {
    /// `YYYY-MM-DD`
    pub date: String,
    pub meeting_slug: String,
    pub meeting_type: String,
    /// Share link copied from the meeting page
    #[serde(default)]
    pub meeting_url: Option<String>,
    pub categories: Vec<MeetingCategory>,
}

impl MeetingManifest {
    /// Whether any category lists at least one item
    ///
    /// A manifest without items was written by a run whose item selector
    /// matched nothing; it is not worth resuming from.
    pub fn has_items(&self) -> bool {
        self.categories.iter().any(|c| !c.items.is_empty())
    }

    /// Total number of agenda items across categories
    pub fn item_count(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum()
    }
}

/// Attachment descriptor found on an item page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(default)]
    pub unique: Option<String>,
    pub href: String,
    pub text: String,
    /// Decoded last path segment of `href`, empty when it has none
    pub filename: String,
}

/// A [`MeetingItem`] together with the content of its item page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemManifest {
    #[serde(flatten)]
    pub item: MeetingItem,
    #[serde(default)]
    pub item_url: Option<String>,
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_html: Option<String>,
}

impl ItemManifest {
    /// Whether the item body was captured; incomplete manifests are re-scraped
    pub fn is_complete(&self) -> bool {
        self.inner_html.is_some()
    }
}

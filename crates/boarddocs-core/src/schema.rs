//! Field-level schema checks for manifests
//!
//! `serde` stops at the first decoding error. Manifests are checked before
//! decoding instead, so a corrupt file reports every bad field at once with
//! its full path (`categories[2].items[0].itemSlug`).

use std::fmt;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{ItemManifest, Link, MeetingCategory, MeetingItem, MeetingManifest};

/// Location of a field inside a JSON document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath(String);

impl FieldPath {
    /// The document root
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Path of an object member
    pub fn key(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}.{}", self.0, name))
        }
    }

    /// Path of an array element
    pub fn index(&self, i: usize) -> Self {
        Self(format!("{}[{}]", self.0, i))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Accumulated schema violations, one line per bad field
#[derive(Debug, Default)]
pub struct Violations(Vec<String>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: &FieldPath, message: impl fmt::Display) {
        self.0.push(format!("{}: {}", path, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    /// Expect an object at `path`
    pub fn object<'a>(&mut self, value: &'a Value, path: &FieldPath) -> Option<&'a Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            other => {
                self.push(path, format!("expected object, found {}", kind(other)));
                None
            }
        }
    }

    /// Required string member
    pub fn string(&mut self, obj: &Map<String, Value>, key: &str, path: &FieldPath) {
        let path = path.key(key);
        match obj.get(key) {
            Some(Value::String(_)) => {}
            Some(other) => self.push(&path, format!("expected string, found {}", kind(other))),
            None => self.push(&path, "missing required field"),
        }
    }

    /// String member that may be `null` or absent
    pub fn optional_string(&mut self, obj: &Map<String, Value>, key: &str, path: &FieldPath) {
        match obj.get(key) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(other) => self.push(
                &path.key(key),
                format!("expected string or null, found {}", kind(other)),
            ),
        }
    }

    /// Required array member; `each` checks every element
    pub fn array(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        path: &FieldPath,
        mut each: impl FnMut(&Value, &FieldPath, &mut Violations),
    ) {
        let path = path.key(key);
        match obj.get(key) {
            Some(Value::Array(elements)) => {
                for (i, element) in elements.iter().enumerate() {
                    each(element, &path.index(i), self);
                }
            }
            Some(other) => self.push(&path, format!("expected array, found {}", kind(other))),
            None => self.push(&path, "missing required field"),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether `s` is usable as a directory name: lowercase ASCII words joined by `-`
pub fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// A JSON document with a checkable shape
pub trait Schema: Serialize + DeserializeOwned {
    /// Name used in error messages
    const NAME: &'static str;

    /// Structural check of an undecoded document
    fn check_value(value: &Value, path: &FieldPath, out: &mut Violations);

    /// Invariants of a decoded value that its types cannot express
    fn check(&self, path: &FieldPath, out: &mut Violations);

    /// Run both checks against a decoded value
    fn violations(&self) -> Violations {
        let mut out = Violations::new();
        self.check(&FieldPath::root(), &mut out);
        match serde_json::to_value(self) {
            Ok(value) => Self::check_value(&value, &FieldPath::root(), &mut out),
            Err(e) => out.push(&FieldPath::root(), format!("not serializable: {}", e)),
        }
        out
    }
}

impl Schema for MeetingItem {
    const NAME: &'static str = "MeetingItem";

    fn check_value(value: &Value, path: &FieldPath, out: &mut Violations) {
        let Some(obj) = out.object(value, path) else {
            return;
        };
        out.optional_string(obj, "itemId", path);
        out.string(obj, "itemOrder", path);
        out.string(obj, "itemName", path);
        out.string(obj, "itemSlug", path);
    }

    fn check(&self, path: &FieldPath, out: &mut Violations) {
        if !is_slug(&self.item_slug) {
            out.push(
                &path.key("itemSlug"),
                format!("'{}' is not a valid slug", self.item_slug),
            );
        }
    }
}

impl Schema for MeetingCategory {
    const NAME: &'static str = "MeetingCategory";

    fn check_value(value: &Value, path: &FieldPath, out: &mut Violations) {
        let Some(obj) = out.object(value, path) else {
            return;
        };
        out.optional_string(obj, "categoryId", path);
        out.optional_string(obj, "categoryOrder", path);
        out.optional_string(obj, "categoryName", path);
        out.array(obj, "items", path, MeetingItem::check_value);
    }

    fn check(&self, path: &FieldPath, out: &mut Violations) {
        let items = path.key("items");
        for (i, item) in self.items.iter().enumerate() {
            item.check(&items.index(i), out);
        }
    }
}

impl Schema for MeetingManifest {
    const NAME: &'static str = "MeetingManifest";

    fn check_value(value: &Value, path: &FieldPath, out: &mut Violations) {
        let Some(obj) = out.object(value, path) else {
            return;
        };
        out.string(obj, "date", path);
        out.string(obj, "meetingSlug", path);
        out.string(obj, "meetingType", path);
        out.optional_string(obj, "meetingUrl", path);
        out.array(obj, "categories", path, MeetingCategory::check_value);
    }

    fn check(&self, path: &FieldPath, out: &mut Violations) {
        if NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").is_err() || self.date.len() != 10 {
            out.push(&path.key("date"), format!("'{}' is not YYYY-MM-DD", self.date));
        }
        if !is_slug(&self.meeting_slug) {
            out.push(
                &path.key("meetingSlug"),
                format!("'{}' is not a valid slug", self.meeting_slug),
            );
        } else if !self.meeting_slug.starts_with(&self.date) {
            out.push(
                &path.key("meetingSlug"),
                format!("'{}' does not start with date {}", self.meeting_slug, self.date),
            );
        }
        let categories = path.key("categories");
        for (i, category) in self.categories.iter().enumerate() {
            category.check(&categories.index(i), out);
        }
    }
}

impl Schema for Link {
    const NAME: &'static str = "Link";

    fn check_value(value: &Value, path: &FieldPath, out: &mut Violations) {
        let Some(obj) = out.object(value, path) else {
            return;
        };
        out.optional_string(obj, "order", path);
        out.optional_string(obj, "unique", path);
        out.string(obj, "href", path);
        out.string(obj, "text", path);
        out.string(obj, "filename", path);
    }

    fn check(&self, path: &FieldPath, out: &mut Violations) {
        if self.href.is_empty() {
            out.push(&path.key("href"), "must not be empty");
        }
        // Empty when the href has no usable name; such links are never downloaded
        if self.filename.contains(['/', '\\'])
            || self.filename == "."
            || self.filename == ".."
        {
            out.push(
                &path.key("filename"),
                format!("'{}' must be a bare file name", self.filename),
            );
        }
    }
}

impl Schema for ItemManifest {
    const NAME: &'static str = "ItemManifest";

    fn check_value(value: &Value, path: &FieldPath, out: &mut Violations) {
        MeetingItem::check_value(value, path, out);
        let Some(obj) = value.as_object() else {
            return;
        };
        out.optional_string(obj, "itemUrl", path);
        out.optional_string(obj, "innerHtml", path);
        out.array(obj, "links", path, Link::check_value);
    }

    fn check(&self, path: &FieldPath, out: &mut Violations) {
        self.item.check(path, out);
        let links = path.key("links");
        for (i, link) in self.links.iter().enumerate() {
            link.check(&links.index(i), out);
        }
    }
}

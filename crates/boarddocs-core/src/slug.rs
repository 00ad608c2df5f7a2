//! Deterministic identifiers derived from scraped text
//!
//! Slugs name the directories of the archive, so the same meeting or item must
//! always map to the same slug across runs.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::{Result, ScrapeError};

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Longest prefix of `<order>-<id>-<name>` kept in an item slug
const ITEM_SLUG_CHARS: usize = 64;

fn title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<month>\w{3}) (?P<date>\d{1,2}), (?P<year>\d{4}) \(\w+\)\n?(?P<type>.*)")
            .expect("meeting title pattern is valid")
    })
}

fn separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]+").expect("separator pattern is valid"))
}

/// Replace every run of non-word characters with `-` and lowercase the result
pub fn slugify(text: &str) -> String {
    separator_regex().replace_all(text, "-").to_lowercase()
}

/// Date and type parsed from a meeting link such as
/// `Mar 5, 2024 (Tue)\nRegular Meeting`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingTitle {
    pub date: NaiveDate,
    pub meeting_type: String,
}

impl MeetingTitle {
    pub fn parse(title: &str) -> Result<Self> {
        let caps = title_regex().captures(title).ok_or_else(|| {
            ScrapeError::Parse(format!(
                "Could not parse meeting title {:?} using {}",
                title,
                title_regex().as_str()
            ))
        })?;

        let month_name = &caps["month"];
        let month = MONTH_NAMES
            .iter()
            .position(|m| *m == month_name)
            .map(|i| i as u32 + 1)
            .ok_or_else(|| {
                ScrapeError::Parse(format!("Unknown month {:?} in {:?}", month_name, title))
            })?;
        let day: u32 = caps["date"]
            .parse()
            .map_err(|e| ScrapeError::Parse(format!("Bad day in {:?}: {}", title, e)))?;
        let year: i32 = caps["year"]
            .parse()
            .map_err(|e| ScrapeError::Parse(format!("Bad year in {:?}: {}", title, e)))?;
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| ScrapeError::Parse(format!("No such date in {:?}", title)))?;

        Ok(Self {
            date,
            meeting_type: caps["type"].to_string(),
        })
    }

    /// `YYYY-MM-DD`
    pub fn ymd(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// Directory key for the meeting, e.g. `2024-03-05-regular-meeting`
    pub fn slug(&self) -> String {
        format!("{}-{}", self.ymd(), slugify(&self.meeting_type))
    }
}

/// Directory key for an agenda item
///
/// Built from the first 64 characters of `<order>-<id>-<name>`; items without
/// an id use the literal `null` so older archives keep their layout.
pub fn item_slug(order: &str, id: Option<&str>, name: &str) -> String {
    let full = format!("{}-{}-{}", order, id.unwrap_or("null"), name);
    let prefix: String = full.chars().take(ITEM_SLUG_CHARS).collect();
    slugify(prefix.trim())
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_ymd(text: &str) -> Result<NaiveDate> {
    let text = text.trim();
    if text.len() != 10 {
        return Err(ScrapeError::Parse(format!("{:?} did not match YYYY-mm-dd", text)));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| ScrapeError::Parse(format!("{:?} did not match YYYY-mm-dd", text)))
}

/// Inclusive bounds on meeting dates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(since: Option<NaiveDate>, until: Option<NaiveDate>) -> Self {
        Self { since, until }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.since.map_or(true, |since| date >= since) && self.until.map_or(true, |until| date <= until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(s: &str) -> NaiveDate {
        parse_ymd(s).unwrap()
    }

    #[test]
    fn test_meeting_slug() {
        let title = MeetingTitle::parse("Mar 5, 2024 (Tue)\nRegular Meeting").unwrap();
        assert_eq!(title.date, ymd("2024-03-05"));
        assert_eq!(title.meeting_type, "Regular Meeting");
        assert_eq!(title.ymd(), "2024-03-05");
        assert_eq!(title.slug(), "2024-03-05-regular-meeting");
    }

    #[test]
    fn test_meeting_title_without_newline() {
        let title = MeetingTitle::parse("Dec 12, 2023 (Tue) Special Meeting: Budget/Closed Session")
            .unwrap();
        assert_eq!(title.meeting_type, " Special Meeting: Budget/Closed Session");
        assert_eq!(title.slug(), "2023-12-12--special-meeting-budget-closed-session");
    }

    #[test]
    fn test_meeting_title_errors() {
        assert!(MeetingTitle::parse("Featured").is_err());
        assert!(MeetingTitle::parse("Foo 5, 2024 (Tue)\nRegular Meeting").is_err());
        assert!(MeetingTitle::parse("Feb 30, 2024 (Fri)\nRegular Meeting").is_err());
    }

    #[test]
    fn test_item_slug() {
        assert_eq!(
            item_slug("1.1", Some("BDLAAB25F17C"), "Roll Call"),
            "1-1-bdlaab25f17c-roll-call"
        );
        assert_eq!(item_slug("2.", None, "Approval"), "2-null-approval");

        let long = item_slug(
            "10.4",
            Some("CZXQ8U6B1234"),
            "Resolution No. 2324-12A1 - In Support of Something With a Very Long Title",
        );
        assert_eq!(long, "10-4-czxq8u6b1234-resolution-no-2324-12a1-in-support-of-somet");
    }

    #[test]
    fn test_parse_ymd() {
        assert_eq!(ymd("2024-01-01").to_string(), "2024-01-01");
        assert!(parse_ymd("2024-1-1").is_err());
        assert!(parse_ymd("01/01/2024").is_err());
        let err = parse_ymd("yesterday").unwrap_err();
        assert!(err.to_string().contains("did not match YYYY-mm-dd"));
    }

    #[test]
    fn test_date_range_filter() {
        let range = DateRange::new(Some(ymd("2024-01-01")), Some(ymd("2024-06-30")));
        assert!(!range.contains(ymd("2023-12-31")));
        assert!(range.contains(ymd("2024-03-15")));
        assert!(!range.contains(ymd("2024-07-01")));
        assert!(range.contains(ymd("2024-01-01")));
        assert!(range.contains(ymd("2024-06-30")));

        assert!(DateRange::default().contains(ymd("1999-01-01")));
    }
}

use serde::{Deserialize, Serialize};

/// Stored when a card exposes no deadline or date text.
pub const UNKNOWN_DEADLINE: &str = "unknown";

/// Titles must be longer than this many characters to count as a listing.
pub const MIN_TITLE_CHARS: usize = 3;

/// One listing card observed during a scan. Rebuilt from scratch every run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingRecord {
    pub source: String,
    pub title: String,
    /// Absolute URL of the detail page, empty when the card has no link.
    pub detail_link: String,
    pub raw_deadline_or_text: String,
    /// Visible text of the detail page, only filled for deep-scraped sites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl ListingRecord {
    pub fn new(source: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            detail_link: String::new(),
            raw_deadline_or_text: UNKNOWN_DEADLINE.to_string(),
            detail_text: None,
            annotation: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.detail_link = link.into();
        self
    }

    pub fn with_deadline(mut self, deadline: impl Into<String>) -> Self {
        self.raw_deadline_or_text = deadline.into();
        self
    }

    /// Deadline text, or `None` for the unknown sentinel and blanks.
    pub fn deadline(&self) -> Option<&str> {
        let d = self.raw_deadline_or_text.trim();
        if d.is_empty() || d == UNKNOWN_DEADLINE {
            None
        } else {
            Some(d)
        }
    }

    pub fn has_valid_title(&self) -> bool {
        self.title.trim().chars().count() >= MIN_TITLE_CHARS
    }
}

//! Identity keys and new/seen partitioning of scanned listings.
use crate::archive::Archive;
use crate::model::ListingRecord;
use crate::registry::Site;
use std::collections::HashSet;
use tracing::debug;

/// Derive the archive key for a listing.
///
/// The key is `"{source}-{title}"` with both parts trimmed, extended with
/// `"-{link}"` when a non-empty normalized link is supplied. Other card fields
/// (deadlines, "days left" counters) never participate, so they may change
/// between runs without producing a new notification.
pub fn identity_key(source: &str, title: &str, link: Option<&str>) -> String {
    let base = format!("{}-{}", source.trim(), title.trim());
    match link.map(normalize_link).filter(|l| !l.is_empty()) {
        Some(link) => format!("{base}-{link}"),
        None => base,
    }
}

/// Trim, drop the `#fragment` and any trailing `/`.
pub fn normalize_link(link: &str) -> &str {
    let link = link.trim();
    let link = link.split_once('#').map_or(link, |(head, _)| head);
    link.trim_end_matches('/')
}

/// Key for `record` as scanned from `site`; the link only counts for deep-scraped sites.
pub fn key_for(site: &Site, record: &ListingRecord) -> String {
    let link = site.deep_scrape.then_some(record.detail_link.as_str());
    identity_key(&record.source, &record.title, link)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListing {
    pub key: String,
    pub record: ListingRecord,
}

#[derive(Debug, Default)]
pub struct Partition {
    pub fresh: Vec<NewListing>,
    pub already_seen: Vec<ListingRecord>,
}

/// Splits candidates into new and already-seen, remembering keys staged
/// earlier in the same run so a listing seen twice is reported once.
#[derive(Debug, Default)]
pub struct Deduplicator {
    staged: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys classified as new so far this run.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    pub fn partition(
        &mut self,
        site: &Site,
        candidates: Vec<ListingRecord>,
        archive: &Archive,
    ) -> Partition {
        let mut out = Partition::default();
        for mut record in candidates {
            record.source = record.source.trim().to_string();
            record.title = record.title.trim().to_string();
            if !record.has_valid_title() {
                debug!(source = %record.source, title = %record.title, "dropping short title");
                continue;
            }
            let key = key_for(site, &record);
            if archive.contains(&key) {
                out.already_seen.push(record);
            } else if self.staged.insert(key.clone()) {
                out.fresh.push(NewListing { key, record });
            } else {
                debug!(%key, "duplicate listing within run");
            }
        }
        out
    }
}

//! Monitored sources and the CSS rules used to pull listings out of them.
use serde::{Deserialize, Serialize};

/// One monitored listing page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    /// Name shown in notifications and used as the identity key prefix.
    pub source: String,
    pub entry_url: String,
    /// Selector matching one listing card.
    pub card_rule: String,
    /// Selector, relative to the card, for the listing title.
    pub title_rule: String,
    /// Selector, relative to the card, for the element carrying the `href`.
    #[serde(default)]
    pub link_rule: Option<String>,
    /// Selector, relative to the card, for the deadline/date text.
    #[serde(default)]
    pub date_rule: Option<String>,
    /// Also fetch each listing's detail page.
    #[serde(default)]
    pub deep_scrape: bool,
}

impl Site {
    /// All selector rules configured for this site, in card, title, link, date order.
    pub fn rules(&self) -> impl Iterator<Item = &str> {
        [
            Some(self.card_rule.as_str()),
            Some(self.title_rule.as_str()),
            self.link_rule.as_deref(),
            self.date_rule.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

fn site(source: &str, entry_url: &str, card: &str, title: &str, date: &str) -> Site {
    Site {
        source: source.to_string(),
        entry_url: entry_url.to_string(),
        card_rule: card.to_string(),
        title_rule: title.to_string(),
        link_rule: Some("a".to_string()),
        date_rule: Some(date.to_string()),
        deep_scrape: false,
    }
}

/// Sources monitored when the config file does not list any.
pub fn builtin() -> Vec<Site> {
    vec![
        site(
            "Anbean",
            "https://anbeankampus.co/ilanlar/",
            ".joblistings-jobItem",
            "h6",
            ".mini-eventCard-dateItem",
        ),
        site(
            "Coderspace",
            "https://coderspace.io/etkinlikler",
            ".event-card",
            "h5",
            ".event-card-info",
        ),
        site(
            "Youthall",
            "https://www.youthall.com/tr/jobs/",
            ".jobs",
            "h5",
            ".jobs-content-bottom",
        ),
        site(
            "Boomerang",
            "https://www.boomerang.careers/career-events",
            ".grid > div",
            "h3",
            "p",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_sites_have_unique_sources() {
        let sites = builtin();
        let mut names: Vec<_> = sites.iter().map(|s| s.source.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), sites.len());
    }

    #[test]
    fn rules_skip_missing_selectors() {
        let mut s = builtin().remove(0);
        s.link_rule = None;
        let rules: Vec<_> = s.rules().collect();
        assert_eq!(rules, vec![".joblistings-jobItem", "h6", ".mini-eventCard-dateItem"]);
    }
}

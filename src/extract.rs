//! Turning a site's listing page into candidate records.
use crate::model::{ListingRecord, UNKNOWN_DEADLINE};
use crate::registry::Site;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const HIDDEN_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Yields the listings currently shown on a site.
///
/// Implementations return an empty list when the page has no cards and an
/// error for navigation or parse failures; the caller isolates errors per site.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, site: &Site) -> Result<Vec<ListingRecord>>;
}

/// Static-HTML extractor: one GET for the entry page plus one per detail page
/// when the site is deep-scraped.
#[derive(Clone)]
pub struct HtmlExtractor {
    http: Client,
    max_per_site: usize,
    detail_max_chars: usize,
}

impl fmt::Debug for HtmlExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmlExtractor")
            .field("max_per_site", &self.max_per_site)
            .field("detail_max_chars", &self.detail_max_chars)
            .finish_non_exhaustive()
    }
}

impl HtmlExtractor {
    pub fn new(
        user_agent: &str,
        request_timeout: Duration,
        max_per_site: usize,
        detail_max_chars: usize,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self::with_client(http, max_per_site, detail_max_chars))
    }

    /// Use a preconfigured client, e.g. one with custom proxy settings.
    pub fn with_client(http: Client, max_per_site: usize, detail_max_chars: usize) -> Self {
        Self {
            http,
            max_per_site,
            detail_max_chars,
        }
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        debug!(%url, "fetching page");
        let res = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("{url} returned {status}"));
        }
        res.text()
            .await
            .with_context(|| format!("failed to read body of {url}"))
    }
}

#[async_trait]
impl Extractor for HtmlExtractor {
    #[instrument(skip_all, fields(source = %site.source))]
    async fn extract(&self, site: &Site) -> Result<Vec<ListingRecord>> {
        let base = Url::parse(&site.entry_url)
            .with_context(|| format!("invalid entry url {}", site.entry_url))?;
        let html = self.fetch(&base).await?;
        let mut records = parse_cards(site, &base, &html, self.max_per_site)?;
        debug!(cards = records.len(), "cards parsed");

        if site.deep_scrape {
            for record in records.iter_mut() {
                let Ok(link) = Url::parse(&record.detail_link) else {
                    continue;
                };
                // Each detail page is parsed from its own response; nothing
                // carries over to the next card.
                match self.fetch(&link).await {
                    Ok(body) => {
                        let text = visible_text(&body, self.detail_max_chars);
                        record.detail_text = (!text.is_empty()).then_some(text);
                    }
                    Err(err) => warn!(?err, %link, "detail page failed; keeping card"),
                }
            }
        }
        Ok(records)
    }
}

/// Collapse whitespace runs to single spaces and trim.
pub fn clean_text(raw: &str) -> String {
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

fn parse_rule(rule: &str) -> Result<Selector> {
    Selector::parse(rule).map_err(|e| anyhow!("invalid selector {rule:?}: {e:?}"))
}

fn first_text(card: &ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    let el = card.select(selector?).next()?;
    let text = clean_text(&el.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let url = base.join(href.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn card_link(card: &ElementRef<'_>, selector: Option<&Selector>, base: &Url) -> String {
    let href = match selector {
        Some(sel) => card
            .select(sel)
            .find_map(|el| el.value().attr("href")),
        None if card.value().name() == "a" => card.value().attr("href"),
        None => None,
    };
    href.and_then(|h| resolve_link(base, h)).unwrap_or_default()
}

/// Pull up to `cap` listings from an entry page. Cards without a usable
/// title are skipped and do not count against `cap`; missing links and dates
/// are recorded as absent.
pub fn parse_cards(site: &Site, base: &Url, html: &str, cap: usize) -> Result<Vec<ListingRecord>> {
    let card_sel = parse_rule(&site.card_rule)?;
    let title_sel = parse_rule(&site.title_rule)?;
    let link_sel = site.link_rule.as_deref().map(parse_rule).transpose()?;
    let date_sel = site.date_rule.as_deref().map(parse_rule).transpose()?;

    let doc = Html::parse_document(html);
    let records = doc
        .select(&card_sel)
        .filter_map(|card| {
            let title = first_text(&card, Some(&title_sel))?;
            let deadline =
                first_text(&card, date_sel.as_ref()).unwrap_or_else(|| UNKNOWN_DEADLINE.into());
            Some(
                ListingRecord::new(site.source.clone(), title)
                    .with_link(card_link(&card, link_sel.as_ref(), base))
                    .with_deadline(deadline),
            )
        })
        .filter(ListingRecord::has_valid_title)
        .take(cap)
        .collect();
    Ok(records)
}

/// Readable text of a page body without scripts and styles, truncated to
/// `max_chars` characters.
pub fn visible_text(html: &str, max_chars: usize) -> String {
    let doc = Html::parse_document(html);
    let root = match Selector::parse("body") {
        Ok(body) => doc.select(&body).next().unwrap_or_else(|| doc.root_element()),
        Err(_) => doc.root_element(),
    };

    let mut raw = String::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            raw.push_str(text);
            raw.push(' ');
        }
    }
    clean_text(&raw).chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="card">
            <h5>  Backend
               Intern </h5>
            <a href="/jobs/1">Apply</a>
            <span class="date">Son gün:
              12 Mart</span>
          </div>
          <div class="card"><h5></h5><a href="/jobs/2">x</a></div>
          <div class="card"><h5>Data Analyst</h5></div>
          <div class="card"><h5>Designer</h5><a href="javascript:void(0)">x</a></div>
        </body></html>
    "#;

    fn site() -> Site {
        Site {
            source: "Acme".into(),
            entry_url: "https://acme.io/careers/".into(),
            card_rule: ".card".into(),
            title_rule: "h5".into(),
            link_rule: Some("a".into()),
            date_rule: Some(".date".into()),
            deep_scrape: false,
        }
    }

    fn base() -> Url {
        Url::parse("https://acme.io/careers/").unwrap()
    }

    #[test]
    fn parses_cards_and_normalizes_text() {
        let records = parse_cards(&site(), &base(), PAGE, 10).unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].title, "Backend Intern");
        assert_eq!(records[0].detail_link, "https://acme.io/jobs/1");
        assert_eq!(records[0].raw_deadline_or_text, "Son gün: 12 Mart");

        assert_eq!(records[1].title, "Data Analyst");
        assert_eq!(records[1].detail_link, "");
        assert_eq!(records[1].raw_deadline_or_text, UNKNOWN_DEADLINE);

        assert_eq!(records[2].detail_link, "");
    }

    #[test]
    fn cap_limits_records() {
        let records = parse_cards(&site(), &base(), PAGE, 2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].title, "Data Analyst");
    }

    #[test]
    fn short_titles_do_not_use_up_the_cap() {
        let html = r#"
            <div class="card"><h5>ab</h5></div>
            <div class="card"><h5>QA</h5></div>
            <div class="card"><h5>Backend Intern</h5></div>
            <div class="card"><h5>Data Analyst</h5></div>"#;
        let records = parse_cards(&site(), &base(), html, 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Backend Intern");
    }

    #[test]
    fn no_cards_is_empty_not_error() {
        let records = parse_cards(&site(), &base(), "<html><body></body></html>", 5).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn anchor_cards_use_their_own_href() {
        let mut s = site();
        s.card_rule = "a.job".into();
        s.title_rule = "span".into();
        s.link_rule = None;
        let html = r#"<a class="job" href="https://other.io/x"><span>Mobile Dev</span></a>"#;
        let records = parse_cards(&s, &base(), html, 5).unwrap();
        assert_eq!(records[0].detail_link, "https://other.io/x");
    }

    #[test]
    fn bad_selector_is_an_error() {
        let mut s = site();
        s.title_rule = "h5[".into();
        assert!(parse_cards(&s, &base(), PAGE, 5).is_err());
    }

    #[test]
    fn visible_text_skips_scripts_and_truncates() {
        let html = r#"<html><head><title>T</title></head><body>
            <script>var x = 1;</script><style>p{}</style>
            <p>Apply   before
            Friday.</p><noscript>enable js</noscript></body></html>"#;
        assert_eq!(visible_text(html, 100), "Apply before Friday.");
        assert_eq!(visible_text(html, 5), "Apply");
    }

    type Route = (&'static str, u16, &'static str);

    /// Minimal HTTP/1.1 server on a random local port answering `routes` by
    /// path; unknown paths get a 404. Returns the base URL.
    async fn serve(routes: Vec<Route>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&request);
                    let path = request.split_whitespace().nth(1).unwrap_or("/");
                    let (status, body) = routes
                        .iter()
                        .find(|(p, ..)| *p == path)
                        .map(|(_, status, body)| (*status, *body))
                        .unwrap_or((404, "not found"));
                    let response = format!(
                        "HTTP/1.1 {status} OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn local_extractor() -> HtmlExtractor {
        let http = Client::builder().no_proxy().build().unwrap();
        HtmlExtractor::with_client(http, 10, 200)
    }

    fn local_site(base: &str, path: &str, deep_scrape: bool) -> Site {
        Site {
            entry_url: format!("{base}{path}"),
            date_rule: None,
            deep_scrape,
            ..site()
        }
    }

    const ENTRY: &str = r#"<html><body>
        <div class="card"><h5>Backend Intern</h5><a href="/detail/1">Apply</a></div>
        <div class="card"><h5>Data Analyst</h5><a href="/detail/2">Apply</a></div>
        <div class="card"><h5>Designer</h5><a href="/detail/3">Apply</a></div>
    </body></html>"#;

    #[tokio::test]
    async fn deep_scrape_reads_each_detail_page_and_keeps_failed_cards() {
        let base = serve(vec![
            ("/jobs", 200, ENTRY),
            (
                "/detail/1",
                200,
                "<html><body><script>track()</script><p>Paid internship.</p></body></html>",
            ),
            ("/detail/2", 500, "boom"),
            ("/detail/3", 200, "<html><body><p>Portfolio required.</p></body></html>"),
        ])
        .await;

        let records = local_extractor()
            .extract(&local_site(&base, "/jobs", true))
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].title, "Backend Intern");
        assert_eq!(records[0].detail_link, format!("{base}/detail/1"));
        assert_eq!(records[0].detail_text.as_deref(), Some("Paid internship."));

        assert_eq!(records[1].title, "Data Analyst");
        assert_eq!(records[1].detail_text, None);

        assert_eq!(records[2].detail_text.as_deref(), Some("Portfolio required."));
    }

    #[tokio::test]
    async fn shallow_scrape_skips_detail_pages() {
        let base = serve(vec![("/jobs", 200, ENTRY)]).await;
        let records = local_extractor()
            .extract(&local_site(&base, "/jobs", false))
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.detail_text.is_none()));
    }

    #[tokio::test]
    async fn failed_entry_page_is_an_error() {
        let base = serve(vec![("/jobs", 200, ENTRY)]).await;
        let err = local_extractor()
            .extract(&local_site(&base, "/gone", false))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"), "{err:#}");
    }
}

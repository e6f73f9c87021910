//! One scan: extract every site, keep what is new, enrich, deliver, then
//! mark delivered listings as seen.
use crate::archive::Archive;
use crate::config::Config;
use crate::dedup::{Deduplicator, NewListing};
use crate::extract::Extractor;
use crate::model::ListingRecord;
use crate::notify::{self, Dispatcher, Notifier};
use crate::registry::Site;
use crate::summarize::{self, Summarizer};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Immutable knobs for a run, derived once from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub batch_limit: usize,
    pub site_timeout: Duration,
    pub site_concurrency: usize,
    pub summary_max_chars: usize,
    pub persist_archive: bool,
}

impl Settings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            batch_limit: cfg.app.batch_limit,
            site_timeout: Duration::from_secs(cfg.app.site_timeout_seconds),
            site_concurrency: cfg.app.site_concurrency.max(1),
            summary_max_chars: cfg
                .summarizer
                .as_ref()
                .map(|s| s.max_chars)
                .unwrap_or(3000),
            persist_archive: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sites_total: usize,
    pub sites_failed: usize,
    pub candidates: usize,
    pub new_listings: usize,
    pub batches_delivered: usize,
    pub batches_failed: usize,
}

/// The collaborators a run talks to.
pub struct Collaborators<'a> {
    pub extractor: &'a dyn Extractor,
    pub summarizer: Option<&'a dyn Summarizer>,
    pub notifier: &'a dyn Notifier,
}

/// Extract one site, containing any failure or timeout. A failed site
/// contributes no candidates this run.
async fn extract_site(
    extractor: &dyn Extractor,
    site: &Site,
    timeout: Duration,
) -> Option<Vec<ListingRecord>> {
    match tokio::time::timeout(timeout, extractor.extract(site)).await {
        Ok(Ok(records)) => {
            info!(source = %site.source, found = records.len(), "site scanned");
            Some(records)
        }
        Ok(Err(err)) => {
            warn!(?err, source = %site.source, "site extraction failed");
            None
        }
        Err(_) => {
            warn!(source = %site.source, timeout_secs = timeout.as_secs(), "site extraction timed out");
            None
        }
    }
}

/// Run the pipeline once against `archive`.
///
/// New keys are recorded only after their batches were handed to the
/// notifier, and the archive is flushed last; an abort before that point
/// leaves the file as it was, so listings are re-sent rather than lost.
pub async fn run(
    settings: &Settings,
    sites: &[Site],
    collab: Collaborators<'_>,
    archive: &mut Archive,
) -> Result<RunReport> {
    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id);
    run_inner(run_id, settings, sites, collab, archive)
        .instrument(span)
        .await
}

async fn run_inner(
    run_id: Uuid,
    settings: &Settings,
    sites: &[Site],
    collab: Collaborators<'_>,
    archive: &mut Archive,
) -> Result<RunReport> {
    let started_at = Utc::now();
    let first_run = archive.is_empty();
    info!(sites = sites.len(), archived = archive.len(), "scan started");

    let extractor = collab.extractor;
    let timeout = settings.site_timeout;
    let scans: Vec<Option<Vec<ListingRecord>>> = stream::iter(sites)
        .map(|site| extract_site(extractor, site, timeout))
        .buffered(settings.site_concurrency)
        .collect()
        .await;

    let mut dedup = Deduplicator::new();
    let mut fresh: Vec<NewListing> = Vec::new();
    let mut sites_failed = 0;
    let mut candidates = 0;
    for (site, scan) in sites.iter().zip(scans) {
        let Some(records) = scan else {
            sites_failed += 1;
            continue;
        };
        candidates += records.len();
        let partition = dedup.partition(site, records, archive);
        info!(
            source = %site.source,
            new = partition.fresh.len(),
            seen = partition.already_seen.len(),
            "site partitioned"
        );
        fresh.extend(partition.fresh);
    }

    if let Some(summarizer) = collab.summarizer {
        for item in fresh.iter_mut() {
            let note = summarize::enrich(summarizer, &item.record, settings.summary_max_chars).await;
            item.record.annotation = Some(note);
        }
    }

    let mut report = RunReport {
        run_id,
        started_at,
        finished_at: started_at,
        sites_total: sites.len(),
        sites_failed,
        candidates,
        new_listings: fresh.len(),
        batches_delivered: 0,
        batches_failed: 0,
    };

    if fresh.is_empty() {
        info!("no new listings");
    } else {
        let header = if first_run {
            notify::FIRST_RUN_HEADER
        } else {
            notify::NEW_LISTINGS_HEADER
        };
        let blocks: Vec<String> = fresh.iter().map(|n| notify::format_block(&n.record)).collect();
        let delivery = Dispatcher::new(settings.batch_limit)
            .with_header(header)
            .dispatch(collab.notifier, &blocks)
            .await;
        report.batches_delivered = delivery.delivered;
        report.batches_failed = delivery.failed;

        for item in &fresh {
            archive.record(item.key.clone(), item.record.raw_deadline_or_text.clone());
        }
    }

    if settings.persist_archive {
        archive.flush().await.context("failed to persist archive")?;
    }

    report.finished_at = Utc::now();
    info!(
        new = report.new_listings,
        failed_sites = report.sites_failed,
        delivered = report.batches_delivered,
        failed_batches = report.batches_failed,
        "scan finished"
    );
    Ok(report)
}

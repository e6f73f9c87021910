use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use listing_watchbot::archive::Archive;
use listing_watchbot::config;
use listing_watchbot::extract::HtmlExtractor;
use listing_watchbot::notify::{Notifier, StdoutNotifier, TelegramNotifier};
use listing_watchbot::pipeline::{self, Collaborators, Settings};
use listing_watchbot::summarize::{OpenAiSummarizer, Summarizer};

#[derive(Debug, Parser)]
#[command(author, version, about = "Report new career and event listings to Telegram")]
struct Args {
    /// Path to YAML config file (defaults to ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print messages instead of sending them and leave the archive untouched.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => config::load(Some(path.as_path())),
        None => config::load_or_default(Path::new("config.yaml")),
    };
    let cfg = match cfg {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "configuration rejected; nothing scanned");
            return Err(err.into());
        }
    };
    cfg.ensure_dirs()?;

    let request_timeout = Duration::from_secs(cfg.app.request_timeout_seconds);
    let extractor = HtmlExtractor::new(
        &cfg.app.user_agent,
        request_timeout,
        cfg.app.max_per_site,
        cfg.app.detail_max_chars,
    )?;
    let summarizer = cfg
        .summarizer
        .as_ref()
        .map(|s| OpenAiSummarizer::new(&s.base_url, &s.api_key, &s.model, request_timeout))
        .transpose()?;
    let notifier: Box<dyn Notifier> = if args.dry_run {
        Box::new(StdoutNotifier)
    } else {
        Box::new(TelegramNotifier::new(
            &cfg.telegram.bot_token,
            &cfg.telegram.chat_id,
        ))
    };

    let mut settings = Settings::from_config(&cfg);
    settings.persist_archive = !args.dry_run;

    let archive_path = cfg.app.archive_path();
    let mut archive = Archive::load(&archive_path).await;
    let sites = cfg.sites();

    info!(
        archive = %archive_path.display(),
        sites = sites.len(),
        summaries = summarizer.is_some(),
        dry_run = args.dry_run,
        "starting listing scan"
    );
    let report = pipeline::run(
        &settings,
        &sites,
        Collaborators {
            extractor: &extractor,
            summarizer: summarizer.as_ref().map(|s| s as &dyn Summarizer),
            notifier: notifier.as_ref(),
        },
        &mut archive,
    )
    .await?;

    info!(
        run_id = %report.run_id,
        new = report.new_listings,
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "done"
    );
    Ok(())
}

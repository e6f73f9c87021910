//! Formatting new listings into chat messages and delivering them in
//! size-bounded batches.
use crate::model::ListingRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use teloxide::payloads::SendMessageSetters;
use teloxide::requests::Requester;
use teloxide::types::{ChatId, ParseMode, Recipient};
use teloxide::utils::html;
use teloxide::Bot;
use tracing::{info, instrument, warn};

pub const FIRST_RUN_HEADER: &str = "✅ <b>All active listings</b>";
pub const NEW_LISTINGS_HEADER: &str = "🔔 <b>New listings found!</b>";
pub const HEADER_SEPARATOR: &str = "\n\n";

const SOURCE_MAX_CHARS: usize = 80;
const TITLE_MAX_CHARS: usize = 300;
const DEADLINE_MAX_CHARS: usize = 120;
const NOTE_MAX_CHARS: usize = 400;
const LINK_MAX_CHARS: usize = 600;

/// Characters a header adds on top of a batch, for the longest header.
pub fn header_reserve() -> usize {
    let header = FIRST_RUN_HEADER
        .chars()
        .count()
        .max(NEW_LISTINGS_HEADER.chars().count());
    header + HEADER_SEPARATOR.chars().count()
}

/// Outbound chat channel. Callers log failures and never retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Cut `text` to `max` characters, marking the cut with an ellipsis.
fn clip(text: &str, max: usize) -> Cow<'_, str> {
    if text.chars().count() <= max {
        return Cow::Borrowed(text);
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    Cow::Owned(cut)
}

fn escaped(text: &str, max: usize) -> String {
    html::escape(&clip(text, max))
}

/// Render one listing as an HTML block terminated by a blank line.
///
/// Fields are clipped before escaping, so a block never ends inside an
/// entity or tag because of one oversized field.
pub fn format_block(record: &ListingRecord) -> String {
    let mut block = format!(
        "📌 <b>{}</b>\n📝 {}\n",
        escaped(&record.source, SOURCE_MAX_CHARS),
        escaped(&record.title, TITLE_MAX_CHARS)
    );
    if let Some(deadline) = record.deadline() {
        block.push_str(&format!("⏳ {}\n", escaped(deadline, DEADLINE_MAX_CHARS)));
    }
    if let Some(note) = record.annotation.as_deref().filter(|n| !n.trim().is_empty()) {
        block.push_str(&format!("💡 {}\n", escaped(note.trim(), NOTE_MAX_CHARS)));
    }
    if !record.detail_link.is_empty() {
        block.push_str(&format!("🔗 {}\n", escaped(&record.detail_link, LINK_MAX_CHARS)));
    }
    block.push('\n');
    block
}

/// Cut an escaped HTML block to at most `limit` characters without leaving a
/// partial tag, a partial entity or an unclosed `<b>` behind.
fn truncate_html(block: &str, limit: usize) -> String {
    let mut cut: String = block.chars().take(limit).collect();
    if let Some(open) = cut.rfind('<') {
        if !cut[open..].contains('>') {
            cut.truncate(open);
        }
    }
    if let Some(amp) = cut.rfind('&') {
        if !cut[amp..].contains(';') {
            cut.truncate(amp);
        }
    }
    if cut.matches("<b>").count() > cut.matches("</b>").count() {
        if let Some(open) = cut.rfind("<b>") {
            cut.truncate(open);
        }
    }
    cut
}

/// Pack blocks, in order, into batches of at most `limit` characters.
///
/// A batch is flushed before appending a block that would push it past the
/// limit. A single block longer than `limit` is cut down to fit on its own,
/// at an HTML-safe boundary.
pub fn pack_batches<S: AsRef<str>>(blocks: &[S], limit: usize) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for block in blocks {
        let block = block.as_ref();
        let mut block_len = block.chars().count();
        let owned;
        let block = if block_len > limit {
            owned = truncate_html(block, limit);
            block_len = owned.chars().count();
            owned.as_str()
        } else {
            block
        };

        if current_len + block_len > limit && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(block);
        current_len += block_len;
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Sends packed batches through a [`Notifier`], one best-effort attempt each.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    limit: usize,
    header: Option<String>,
}

impl Dispatcher {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            header: None,
        }
    }

    /// Prefix every message with `header`. The header is not counted against
    /// the limit; see [`header_reserve`].
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    fn compose(&self, batch: &str) -> String {
        match &self.header {
            Some(h) => format!("{h}{HEADER_SEPARATOR}{}", batch.trim_end()),
            None => batch.trim_end().to_string(),
        }
    }

    #[instrument(skip_all, fields(blocks = blocks.len()))]
    pub async fn dispatch<S: AsRef<str> + Sync>(
        &self,
        notifier: &dyn Notifier,
        blocks: &[S],
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let batches = pack_batches(blocks, self.limit);
        let total = batches.len();
        for (idx, batch) in batches.iter().enumerate() {
            let message = self.compose(batch);
            match notifier.send(&message).await {
                Ok(()) => {
                    report.delivered += 1;
                    info!(batch = idx + 1, total, chars = message.chars().count(), "batch delivered");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(?err, batch = idx + 1, total, "batch delivery failed");
                }
            }
        }
        report
    }
}

/// Delivers messages to a Telegram chat through the Bot API.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    chat: Recipient,
}

impl fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("chat", &self.chat)
            .finish_non_exhaustive()
    }
}

/// Numeric ids address users and groups; anything else is a channel username.
pub fn parse_recipient(chat_id: &str) -> Recipient {
    let chat_id = chat_id.trim();
    match chat_id.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if chat_id.starts_with('@') => Recipient::ChannelUsername(chat_id.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{chat_id}")),
    }
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self {
            bot: Bot::new(bot_token),
            chat: parse_recipient(chat_id),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        self.bot
            .send_message(self.chat.clone(), text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true)
            .await
            .context("telegram sendMessage failed")?;
        Ok(())
    }
}

/// Prints messages instead of sending them (`--dry-run`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        println!("{text}\n----");
        Ok(())
    }
}

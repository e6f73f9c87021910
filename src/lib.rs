//! Scrapes career and event listing sites, reports listings not seen before
//! to a Telegram chat, and keeps a JSON archive of what was already sent.

pub mod archive;
pub mod config;
pub mod dedup;
pub mod extract;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod summarize;

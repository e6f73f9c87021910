//! Durable record of listings that were already reported.
//!
//! The archive is a single JSON object mapping identity keys to the last-seen
//! deadline text. It is read once at startup and written once at the end of a
//! run. Reads never fail: a missing or corrupt file is an empty archive, which
//! at worst re-reports old listings once.
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default)]
pub struct Archive {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl Archive {
    /// Archive not backed by a file; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self::default()
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse(&content).unwrap_or_else(|err| {
                warn!(?err, "archive unreadable; starting empty");
                BTreeMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("no archive yet; starting empty");
                BTreeMap::new()
            }
            Err(err) => {
                warn!(?err, "failed to read archive; starting empty");
                BTreeMap::new()
            }
        };
        debug!(keys = entries.len(), "archive loaded");
        Self {
            path: Some(path),
            entries,
            dirty: false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Insert or overwrite `key`. Never removes anything.
    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if self.entries.get(&key) != Some(&value) {
            self.entries.insert(key, value);
            self.dirty = true;
        }
    }

    /// Atomically replace the archive file with the current contents.
    ///
    /// Leaves the file untouched when nothing was recorded since load. The
    /// data is written to a sibling temp file, synced, then renamed into
    /// place, so readers only ever observe the old or the new file.
    #[instrument(skip_all, fields(keys = self.entries.len()))]
    pub async fn flush(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if !self.dirty {
            debug!("archive unchanged; skipping write");
            return Ok(());
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let body = to_pretty_json(&self.entries)?;
        let tmp = tmp_path(&path);
        if let Err(err) = replace_with(&tmp, &path, &body).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err);
        }

        self.dirty = false;
        info!(path = %path.display(), "archive written");
        Ok(())
    }
}

async fn replace_with(tmp: &Path, path: &Path, body: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(tmp)
        .await
        .with_context(|| format!("failed to create {}", tmp.display()))?;
    file.write_all(body)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))
}

/// Values that are not strings are kept as their JSON text so a hand-edited
/// file never loses keys.
fn parse(content: &str) -> Result<BTreeMap<String, String>> {
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<String, Value> = serde_json::from_str(content)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

fn to_pretty_json(entries: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    entries.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "archive.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_is_empty() {
        let td = tempdir().unwrap();
        let archive = Archive::load(td.path().join("nope.json")).await;
        assert!(archive.is_empty());
    }

    #[tokio::test]
    async fn malformed_or_blank_file_is_empty() {
        let td = tempdir().unwrap();
        let p = td.path().join("a.json");
        std::fs::write(&p, "{ not json").unwrap();
        assert!(Archive::load(&p).await.is_empty());

        std::fs::write(&p, "  \n").unwrap();
        assert!(Archive::load(&p).await.is_empty());

        std::fs::write(&p, "[1, 2]").unwrap();
        assert!(Archive::load(&p).await.is_empty());
    }

    #[tokio::test]
    async fn non_string_values_keep_their_keys() {
        let td = tempdir().unwrap();
        let p = td.path().join("a.json");
        std::fs::write(&p, r#"{"Acme-Role": 3, "Acme-Other": "1 May"}"#).unwrap();
        let archive = Archive::load(&p).await;
        assert_eq!(archive.get("Acme-Role"), Some("3"));
        assert_eq!(archive.get("Acme-Other"), Some("1 May"));
    }

    #[tokio::test]
    async fn flush_roundtrips_unicode_with_indentation() {
        let td = tempdir().unwrap();
        let p = td.path().join("nested").join("a.json");
        let mut archive = Archive::load(&p).await;
        archive.record("Youthall-Yazılım Stajyeri", "3 gün kaldı");
        archive.flush().await.unwrap();

        let text = std::fs::read_to_string(&p).unwrap();
        assert!(text.contains("    \"Youthall-Yazılım Stajyeri\": \"3 gün kaldı\""));
        assert!(!tmp_path(&p).exists());

        let reloaded = Archive::load(&p).await;
        assert_eq!(reloaded.get("Youthall-Yazılım Stajyeri"), Some("3 gün kaldı"));
    }

    #[tokio::test]
    async fn unchanged_archive_is_not_rewritten() {
        let td = tempdir().unwrap();
        let p = td.path().join("a.json");
        std::fs::write(&p, "{\"Acme-Role\":\"x\"}").unwrap();
        let mut archive = Archive::load(&p).await;
        archive.record("Acme-Role", "x");
        archive.flush().await.unwrap();
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "{\"Acme-Role\":\"x\"}");
    }

    #[tokio::test]
    async fn failed_flush_leaves_no_temp_file() {
        let td = tempdir().unwrap();
        let p = td.path().join("a.json");
        // A non-empty directory in the way makes the final rename fail.
        std::fs::create_dir(&p).unwrap();
        std::fs::write(p.join("keep"), "x").unwrap();

        let mut archive = Archive::load(&p).await;
        archive.record("Acme-Role", "1 May");
        assert!(archive.flush().await.is_err());
        assert!(!tmp_path(&p).exists());
        assert!(p.join("keep").exists());
    }

    #[test]
    fn record_overwrites_without_removing() {
        let mut archive = Archive::in_memory();
        archive.record("a", "1");
        archive.record("b", "2");
        archive.record("a", "3");
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.get("a"), Some("3"));
        assert_eq!(archive.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}

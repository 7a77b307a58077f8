use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Writes digests and run reports under one output directory.
#[derive(Debug, Clone)]
pub struct MarkdownStore {
    output_dir: PathBuf,
    timestamped: bool,
}

/// Counts and total size of the files in the output directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileStats {
    pub total_files: usize,
    pub markdown_files: usize,
    pub json_files: usize,
    pub total_size_mb: f64,
}

impl MarkdownStore {
    pub fn new(output_dir: impl Into<PathBuf>, timestamped: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            timestamped,
        }
    }

    pub fn from_config(config: &common::OutputConfig) -> Self {
        Self::new(&config.dir, config.timestamped)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `{name}_{YYYY-mm-dd_HH-MM-SS}.{ext}` when timestamping, else `{name}.{ext}`.
    pub fn file_name(&self, name: &str, ext: &str) -> String {
        if self.timestamped {
            format!("{}_{}.{}", name, Local::now().format("%Y-%m-%d_%H-%M-%S"), ext)
        } else {
            format!("{}.{}", name, ext)
        }
    }

    async fn write(&self, name: &str, ext: &str, content: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", self.output_dir.display()))?;

        let path = self.output_dir.join(self.file_name(name, ext));
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "saved {} file", ext);
        Ok(path)
    }

    pub async fn save_markdown(&self, content: &str, name: &str) -> Result<PathBuf> {
        self.write(name, "md", content.as_bytes()).await
    }

    pub async fn save_json<T: Serialize>(&self, value: &T, name: &str) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
        self.write(name, "json", json.as_bytes()).await
    }

    async fn entries(&self) -> Result<Vec<(PathBuf, std::fs::Metadata)>> {
        let mut files = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.output_dir.display()))
            }
        };
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                files.push((entry.path(), metadata));
            }
        }
        Ok(files)
    }

    /// Most recently modified `{name}*.{ext}` file.
    pub async fn latest_file(&self, name: &str, ext: &str) -> Result<Option<PathBuf>> {
        let suffix = format!(".{}", ext.trim_start_matches('.'));
        let latest = self
            .entries()
            .await?
            .into_iter()
            .filter(|(path, _)| {
                path.file_name()
                    .and_then(|f| f.to_str())
                    .map(|f| f.starts_with(name) && f.ends_with(&suffix))
                    .unwrap_or(false)
            })
            .filter_map(|(path, meta)| meta.modified().ok().map(|m| (path, m)))
            .max_by_key(|(_, modified)| *modified)
            .map(|(path, _)| path);
        Ok(latest)
    }

    pub async fn file_stats(&self) -> Result<FileStats> {
        let mut stats = FileStats::default();
        let mut total_bytes = 0u64;
        for (path, meta) in self.entries().await? {
            stats.total_files += 1;
            match path.extension().and_then(|e| e.to_str()) {
                Some("md") => stats.markdown_files += 1,
                Some("json") => stats.json_files += 1,
                _ => {}
            }
            total_bytes += meta.len();
        }
        stats.total_size_mb = total_bytes as f64 / (1024.0 * 1024.0);
        Ok(stats)
    }

    /// Remove files last modified more than `days` days ago. Returns how many were removed.
    pub async fn cleanup_older_than(&self, days: u64) -> Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        for (path, meta) in self.entries().await? {
            let modified = match meta.modified() {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %path.display(), "no modification time: {}", e);
                    continue;
                }
            };
            if modified < cutoff {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        info!(path = %path.display(), "removed old file");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), "failed to remove old file: {}", e),
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_names_without_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MarkdownStore::new(dir.path().join("out"), false);

        let path = store.save_markdown("# hi\n", "astro-ph_GA").await.expect("save");

        assert_eq!(path, dir.path().join("out").join("astro-ph_GA.md"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "# hi\n");
    }

    #[tokio::test]
    async fn timestamped_names_carry_the_run_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MarkdownStore::new(dir.path(), true);

        let path = store.save_markdown("x", "multi_subject_arxiv").await.expect("save");
        let file = path.file_name().and_then(|f| f.to_str()).expect("file name");

        // multi_subject_arxiv_YYYY-mm-dd_HH-MM-SS.md
        assert!(file.starts_with("multi_subject_arxiv_"));
        assert!(file.ends_with(".md"));
        assert_eq!(file.len(), "multi_subject_arxiv_".len() + 19 + 3);
    }

    #[tokio::test]
    async fn stats_count_by_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MarkdownStore::new(dir.path(), false);
        store.save_markdown("abc", "a").await.expect("save md");
        store.save_json(&serde_json::json!({"ok": true}), "a").await.expect("save json");

        let stats = store.file_stats().await.expect("stats");
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.markdown_files, 1);
        assert_eq!(stats.json_files, 1);
        assert!(stats.total_size_mb > 0.0);

        let latest = store.latest_file("a", "json").await.expect("latest");
        assert_eq!(latest, Some(dir.path().join("a.json")));
        assert_eq!(store.latest_file("b", "md").await.expect("latest"), None);
    }

    #[tokio::test]
    async fn missing_directory_has_empty_stats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MarkdownStore::new(dir.path().join("never-created"), true);
        assert_eq!(store.file_stats().await.expect("stats"), FileStats::default());
        assert_eq!(store.cleanup_older_than(30).await.expect("cleanup"), 0);
    }

    #[tokio::test]
    async fn cleanup_keeps_recent_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MarkdownStore::new(dir.path(), false);
        store.save_markdown("fresh", "today").await.expect("save");

        assert_eq!(store.cleanup_older_than(1).await.expect("cleanup"), 0);
        assert!(dir.path().join("today.md").exists());
    }

    #[tokio::test]
    async fn huge_cleanup_window_keeps_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MarkdownStore::new(dir.path(), false);
        store.save_markdown("fresh", "today").await.expect("save");

        assert_eq!(store.cleanup_older_than(u64::MAX).await.expect("cleanup"), 0);
        assert_eq!(store.cleanup_older_than(u64::MAX / 1000).await.expect("cleanup"), 0);
        assert!(dir.path().join("today.md").exists());
    }
}

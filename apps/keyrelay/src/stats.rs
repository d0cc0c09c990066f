use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use keyrelay_common::ShutdownToken;
use keyrelay_config::LoggingConfig;
use keyrelay_core::StatsSink;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

type CounterKey = (String, String, String);

/// Counts completed stream-monitor events per `(provider, model, status)`
/// and flushes one JSON-Lines record per non-zero key to that provider's
/// file every `summary_interval_min`, with size/backup-count rotation
/// mirroring `logging.summary_log_max_size_mb` / `summary_log_backup_count`
/// (§4.15).
pub struct JsonlStatsWriter {
    counters: Mutex<HashMap<CounterKey, u64>>,
    dir: PathBuf,
}

impl JsonlStatsWriter {
    pub fn new(config: &LoggingConfig) -> Self {
        Self { counters: Mutex::new(HashMap::new()), dir: PathBuf::from(&config.summary_log_path) }
    }

    fn drain(&self) -> HashMap<CounterKey, u64> {
        std::mem::take(&mut self.counters.lock().expect("stats counters poisoned"))
    }
}

impl StatsSink for JsonlStatsWriter {
    fn record(&self, provider: &str, model: &str, status: &str) {
        let mut counters = self.counters.lock().expect("stats counters poisoned");
        *counters.entry((provider.to_string(), model.to_string(), status.to_string())).or_insert(0) += 1;
    }
}

/// Spawns the statistics flush loop (§5 item v).
pub fn spawn_stats_flush_loop(writer: Arc<JsonlStatsWriter>, config: LoggingConfig, shutdown: ShutdownToken) -> JoinHandle<()> {
    let interval = Duration::from_secs(config.summary_interval_min.max(1) * 60);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(err) = flush_once(&writer, &config).await {
                        tracing::warn!(error = %err, "statistics flush cycle failed");
                    }
                }
            }
        }
    })
}

async fn flush_once(writer: &JsonlStatsWriter, config: &LoggingConfig) -> anyhow::Result<()> {
    let drained = writer.drain();
    if drained.is_empty() {
        return Ok(());
    }

    let mut by_provider: HashMap<String, Vec<String>> = HashMap::new();
    let timestamp = OffsetDateTime::now_utc();
    for ((provider, model, status), count) in drained {
        let line = serde_json::json!({
            "timestamp": timestamp.format(&time::format_description::well_known::Rfc3339)?,
            "provider": provider,
            "model": model,
            "status": status,
            "count": count,
        })
        .to_string();
        by_provider.entry(provider).or_default().push(line);
    }

    tokio::fs::create_dir_all(&writer.dir).await?;

    for (provider, lines) in by_provider {
        let path = writer.dir.join(format!("{provider}.jsonl"));
        append_with_rotation(&path, &lines, config.summary_log_max_size_mb, config.summary_log_backup_count).await?;
    }

    Ok(())
}

async fn append_with_rotation(path: &Path, lines: &[String], max_size_mb: u64, backup_count: u32) -> anyhow::Result<()> {
    let max_bytes = max_size_mb * 1024 * 1024;
    let existing = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    let incoming: u64 = lines.iter().map(|l| l.len() as u64 + 1).sum();

    if existing > 0 && existing + incoming > max_bytes {
        rotate(path, backup_count).await?;
    }

    let mut contents = lines.join("\n");
    contents.push('\n');
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(contents.as_bytes()).await?;
    Ok(())
}

/// Rotates `path` to `path.1`, shifting existing numbered backups up by one
/// and dropping anything beyond `backup_count`.
async fn rotate(path: &Path, backup_count: u32) -> anyhow::Result<()> {
    if backup_count == 0 {
        tokio::fs::remove_file(path).await.ok();
        return Ok(());
    }

    let oldest = path.with_extension(format!("jsonl.{backup_count}"));
    tokio::fs::remove_file(&oldest).await.ok();

    let mut n = backup_count;
    while n > 1 {
        let from = path.with_extension(format!("jsonl.{}", n - 1));
        let to = path.with_extension(format!("jsonl.{n}"));
        if tokio::fs::metadata(&from).await.is_ok() {
            tokio::fs::rename(&from, &to).await?;
        }
        n -= 1;
    }

    let first_backup = path.with_extension("jsonl.1");
    tokio::fs::rename(path, &first_backup).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates_counts_per_key_and_drain_clears_them() {
        let config = LoggingConfig::default();
        let writer = JsonlStatsWriter::new(&config);

        writer.record("openai", "gpt-4", "success");
        writer.record("openai", "gpt-4", "success");
        writer.record("openai", "gpt-4", "key_error");

        let drained = writer.drain();
        assert_eq!(drained.get(&("openai".to_string(), "gpt-4".to_string(), "success".to_string())), Some(&2));
        assert_eq!(drained.get(&("openai".to_string(), "gpt-4".to_string(), "key_error".to_string())), Some(&1));
        assert!(writer.drain().is_empty());
    }

    #[tokio::test]
    async fn rotate_shifts_backups_and_drops_the_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openai.jsonl");
        tokio::fs::write(&path, "current\n").await.unwrap();
        tokio::fs::write(path.with_extension("jsonl.1"), "backup-1\n").await.unwrap();
        tokio::fs::write(path.with_extension("jsonl.2"), "backup-2\n").await.unwrap();

        rotate(&path, 2).await.unwrap();

        assert!(tokio::fs::metadata(&path).await.is_err());
        assert_eq!(tokio::fs::read_to_string(path.with_extension("jsonl.1")).await.unwrap(), "current\n");
        assert_eq!(tokio::fs::read_to_string(path.with_extension("jsonl.2")).await.unwrap(), "backup-1\n");
    }

    #[tokio::test]
    async fn rotate_with_zero_backups_just_drops_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openai.jsonl");
        tokio::fs::write(&path, "current\n").await.unwrap();

        rotate(&path, 0).await.unwrap();

        assert!(tokio::fs::metadata(&path).await.is_err());
    }

    #[tokio::test]
    async fn append_with_rotation_rotates_once_the_size_threshold_is_crossed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openai.jsonl");
        tokio::fs::write(&path, "x".repeat(50)).await.unwrap();

        append_with_rotation(&path, &["new-line".to_string()], 0, 1).await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "new-line\n");
        assert!(tokio::fs::metadata(path.with_extension("jsonl.1")).await.is_ok());
    }
}

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use keyrelay_common::ShutdownToken;
use keyrelay_config::{Config, ProxyMode};
use keyrelay_storage::Storage;
use tokio::task::JoinHandle;

const SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Spawns the credential syncer's own long-lived loop (§4.10, §5 item iv):
/// isolates one resource's failure from the rest of the process.
pub fn spawn_credential_syncer(config: Arc<Config>, storage: Arc<dyn Storage>, shutdown: ShutdownToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(SYNC_INTERVAL) => {
                    if let Err(err) = sync_credentials_once(&config, storage.as_ref()).await {
                        tracing::warn!(error = %err, "credential syncer cycle failed");
                    }
                }
            }
        }
    })
}

/// Spawns the proxy syncer's own long-lived loop (§4.10, §5 item iv).
pub fn spawn_proxy_syncer(config: Arc<Config>, storage: Arc<dyn Storage>, shutdown: ShutdownToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(SYNC_INTERVAL) => {
                    if let Err(err) = sync_proxies_once(&config, storage.as_ref()).await {
                        tracing::warn!(error = %err, "proxy syncer cycle failed");
                    }
                }
            }
        }
    })
}

async fn sync_credentials_once(config: &Config, storage: &dyn Storage) -> anyhow::Result<()> {
    let provider_ids = storage.provider_id_map().await?;

    for provider in config.enabled_providers() {
        let Some(keys_path) = &provider.keys_path else { continue };
        let Some(&provider_id) = provider_ids.get(&provider.name) else {
            tracing::warn!(provider = %provider.name, "credential syncer: no durable id for provider, skipping");
            continue;
        };

        let values = match canonicalize_credentials_dir(keys_path).await {
            Ok(values) => values,
            Err(err) => {
                tracing::warn!(error = %err, provider = %provider.name, path = %keys_path, "failed to read keys directory");
                continue;
            }
        };
        if values.is_empty() {
            continue;
        }

        let credential_ids = storage.sync_credentials(provider_id, &values).await?;
        let models: Vec<String> = provider.models.keys().cloned().collect();
        storage.reconcile_credential_model_rows(provider_id, &credential_ids, &models, provider.shared_key_status).await?;
    }

    Ok(())
}

async fn sync_proxies_once(config: &Config, storage: &dyn Storage) -> anyhow::Result<()> {
    let provider_ids = storage.provider_id_map().await?;

    for provider in config.enabled_providers() {
        if provider.proxy.mode != ProxyMode::Stealth {
            continue;
        }
        let Some(pool_list_path) = &provider.proxy.pool_list_path else { continue };
        let Some(&provider_id) = provider_ids.get(&provider.name) else {
            tracing::warn!(provider = %provider.name, "proxy syncer: no durable id for provider, skipping");
            continue;
        };

        let addresses = match canonicalize_proxy_dir(pool_list_path).await {
            Ok(values) => values,
            Err(err) => {
                tracing::warn!(error = %err, provider = %provider.name, path = %pool_list_path, "failed to read proxy list");
                continue;
            }
        };
        if addresses.is_empty() {
            continue;
        }

        let proxy_ids = storage.sync_proxies(provider_id, &addresses).await?;
        storage.reconcile_provider_proxy_status(provider_id, &proxy_ids).await?;
    }

    Ok(())
}

/// Reads every regular file directly under `dir`, drops `#`-prefixed comment
/// lines, splits the remainder on whitespace and commas, dedupes within each
/// file, rewrites the file atomically if the canonical form differs, and
/// returns the union of all tokens found (§6: "lines starting with `#` are
/// comments").
async fn canonicalize_credentials_dir(dir: &str) -> anyhow::Result<HashSet<String>> {
    canonicalize_dir(dir, |raw| {
        raw.lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .flat_map(|line| line.split(|c: char| c.is_whitespace() || c == ','))
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .await
}

/// Reads every regular file directly under `dir`, keeping one entry per
/// non-empty, non-`#`-prefixed line (no further token splitting), dedupes
/// within each file, rewrites the file atomically if the canonical form
/// differs, and returns the union of all entries found (§6).
async fn canonicalize_proxy_dir(dir: &str) -> anyhow::Result<HashSet<String>> {
    canonicalize_dir(dir, |raw| {
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    })
    .await
}

async fn canonicalize_dir(dir: &str, tokenize: impl Fn(&str) -> Vec<String>) -> anyhow::Result<HashSet<String>> {
    let mut union = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let raw = tokio::fs::read_to_string(&path).await?;
        let tokens = tokenize(&raw);

        let mut seen_in_file = HashSet::new();
        let mut canonical = Vec::new();
        for token in tokens {
            if seen_in_file.insert(token.clone()) {
                canonical.push(token);
            }
        }

        let canonical_contents = canonical.join("\n") + if canonical.is_empty() { "" } else { "\n" };
        if canonical_contents != raw {
            rewrite_atomically(&path, &canonical_contents).await?;
        }

        union.extend(canonical);
    }

    Ok(union)
}

async fn rewrite_atomically(path: &Path, contents: &str) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let dir = dir.to_path_buf();
    let contents = contents.to_string();
    let target = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        use std::io::Write;
        tmp.write_all(contents.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&target)?;
        Ok::<_, anyhow::Error>(())
    })
    .await??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn credentials_drop_comment_lines_and_split_on_commas_and_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "# a comment\nkey-one, key-two\n\nkey-three\n").await.unwrap();

        let values = canonicalize_credentials_dir(dir.path().to_str().unwrap()).await.unwrap();

        assert_eq!(values, HashSet::from(["key-one".to_string(), "key-two".to_string(), "key-three".to_string()]));
    }

    #[tokio::test]
    async fn credentials_dedupe_within_a_single_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "dup dup dup\n").await.unwrap();

        let values = canonicalize_credentials_dir(dir.path().to_str().unwrap()).await.unwrap();

        assert_eq!(values, HashSet::from(["dup".to_string()]));
        let rewritten = tokio::fs::read_to_string(dir.path().join("a.txt")).await.unwrap();
        assert_eq!(rewritten, "dup\n");
    }

    #[tokio::test]
    async fn proxies_keep_one_entry_per_line_with_no_token_splitting() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("pool.txt"), "# comment\nhost1:8080\n\nhost2:8080, still-one-entry\n").await.unwrap();

        let values = canonicalize_proxy_dir(dir.path().to_str().unwrap()).await.unwrap();

        assert_eq!(
            values,
            HashSet::from(["host1:8080".to_string(), "host2:8080, still-one-entry".to_string()])
        );
    }

    #[tokio::test]
    async fn leaves_already_canonical_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, "one\ntwo\n").await.unwrap();
        let before = tokio::fs::metadata(&path).await.unwrap().modified().unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        canonicalize_credentials_dir(dir.path().to_str().unwrap()).await.unwrap();

        let after = tokio::fs::metadata(&path).await.unwrap().modified().unwrap();
        assert_eq!(before, after);
    }
}

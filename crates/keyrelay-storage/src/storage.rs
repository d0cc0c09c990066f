use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use keyrelay_common::ErrorReason;

use crate::error::StorageResult;
use crate::types::{KeyStatusCount, PoolRow, ProbeCandidate, ProxyProbeCandidate, StatusUpdate};

/// The durable-store facade. Repositories borrow the connection pool this
/// owns; the gateway and the background worker each hold one `Arc` of it.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Idempotent schema creation.
    async fn sync(&self) -> StorageResult<()>;

    async fn wait_for_schema_ready(&self, timeout: Duration) -> StorageResult<()>;

    /// Add-only: inserts providers not yet present, never deletes.
    /// Returns the full name → id map afterwards.
    async fn sync_providers(&self, names: &[String]) -> StorageResult<HashMap<String, i64>>;

    async fn provider_id_map(&self) -> StorageResult<HashMap<String, i64>>;

    /// Add-only credential insert; returns every credential id now on file
    /// for this provider (pre-existing and newly inserted).
    async fn sync_credentials(&self, provider_id: i64, values: &HashSet<String>) -> StorageResult<Vec<i64>>;

    /// Ensures one `credential_model_status` row per (credential, model)
    /// for every credential currently on file for `provider_id`; prunes
    /// rows for models no longer in `models`.
    async fn reconcile_credential_model_rows(
        &self,
        provider_id: i64,
        credential_ids: &[i64],
        models: &[String],
        shared_key_status: bool,
    ) -> StorageResult<()>;

    /// Add-only proxy insert; returns every proxy id now on file for this
    /// provider.
    async fn sync_proxies(&self, provider_id: i64, addresses: &HashSet<String>) -> StorageResult<Vec<i64>>;

    async fn reconcile_provider_proxy_status(&self, provider_id: i64, proxy_ids: &[i64]) -> StorageResult<()>;

    /// All `(instance, model_or_sentinel, credential_id, credential_value)`
    /// rows with status = valid, for the pool's `refresh()`.
    async fn load_valid_pool_rows(&self) -> StorageResult<Vec<PoolRow>>;

    async fn get_keys_to_check(&self, enabled_providers: &[String]) -> StorageResult<Vec<ProbeCandidate>>;

    async fn get_proxies_to_check(&self, enabled_providers: &[String]) -> StorageResult<Vec<ProxyProbeCandidate>>;

    /// Atomic status update per §4.9's durable-update rule.
    async fn apply_status_update(&self, update: StatusUpdate) -> StorageResult<()>;

    async fn apply_proxy_status_update(
        &self,
        proxy_id: i64,
        provider_id: i64,
        ok: bool,
        reason: Option<ErrorReason>,
        error_message: Option<String>,
        next_check_time: time::OffsetDateTime,
    ) -> StorageResult<()>;

    /// Request-path failure feedback (§4.2/§4.3/§4.4): a near-future
    /// placeholder next-check time, applied without the full health-policy
    /// computation (the probe will recompute a proper one on its next
    /// pass).
    async fn report_request_failure(
        &self,
        credential_id: i64,
        model_name: Option<&str>,
        reason: ErrorReason,
    ) -> StorageResult<()>;

    async fn key_status_counts(&self) -> StorageResult<Vec<KeyStatusCount>>;

    async fn vacuum(&self) -> StorageResult<()>;
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use keyrelay_common::ShutdownToken;
use keyrelay_config::Config;
use keyrelay_provider_core::{ClientFactory, CredentialPool};
use keyrelay_provider_impl::adapter_for;
use keyrelay_storage::Storage;

use crate::auth::build_token_map;
use crate::state::{AppState, ProviderRuntime};
use crate::stats::{NoopStatsSink, StatsSink};

/// How often the pool refreshes its in-memory snapshot from the durable
/// store (§5 item (ii), §9).
const POOL_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

fn to_pool_row(row: keyrelay_storage::PoolRow) -> keyrelay_provider_core::pool::PoolRow {
    keyrelay_provider_core::pool::PoolRow {
        instance: row.instance,
        model: row.model,
        credential_id: row.credential_id,
        token: row.credential_value,
    }
}

/// Builds the gateway's shared state at startup: resolves provider ids,
/// constructs one runtime per enabled instance, and populates the
/// credential pool from the durable store (§4.1, §4.9).
pub async fn build_app_state(
    config: &Config,
    storage: Arc<dyn Storage>,
    clients: Arc<ClientFactory>,
    stats: Option<Arc<dyn StatsSink>>,
) -> anyhow::Result<Arc<AppState>> {
    let tokens = build_token_map(config);

    let names: Vec<String> = config.enabled_providers().map(|p| p.name.clone()).collect();
    let provider_ids = storage.sync_providers(&names).await?;

    let mut providers = HashMap::new();
    for provider in config.enabled_providers() {
        let provider_id = *provider_ids
            .get(&provider.name)
            .ok_or_else(|| anyhow::anyhow!("provider '{}' missing from id map after sync", provider.name))?;
        let runtime = ProviderRuntime {
            name: provider.name.clone(),
            provider_id,
            config: provider.clone(),
            handler_mode: provider.handler_mode(),
            adapter: adapter_for(provider.family),
        };
        providers.insert(provider.name.clone(), Arc::new(runtime));
    }

    let shared_key_status_instances: Vec<String> =
        config.enabled_providers().filter(|p| p.shared_key_status).map(|p| p.name.clone()).collect();

    let mut pool = CredentialPool::new();
    pool.populate_token_map(shared_key_status_instances);
    let pool = Arc::new(pool);

    let rows = storage.load_valid_pool_rows().await?;
    pool.refresh(rows.into_iter().map(to_pool_row).collect()).await;

    Ok(Arc::new(AppState {
        tokens,
        providers,
        pool,
        storage,
        clients,
        stats: stats.unwrap_or_else(|| Arc::new(NoopStatsSink)),
    }))
}

/// Background loop: periodically reloads the credential pool from the
/// durable store, exiting promptly on shutdown (§5, §9).
pub fn spawn_pool_refresh_loop(state: Arc<AppState>, shutdown: ShutdownToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(POOL_REFRESH_INTERVAL) => {
                    match state.storage.load_valid_pool_rows().await {
                        Ok(rows) => state.pool.refresh(rows.into_iter().map(to_pool_row).collect()).await,
                        Err(err) => tracing::warn!(error = %err, "pool refresh failed"),
                    }
                }
            }
        }
    })
}

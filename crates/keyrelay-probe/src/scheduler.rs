use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keyrelay_common::ShutdownToken;
use keyrelay_config::Config;
use keyrelay_provider_core::ClientFactory;
use keyrelay_provider_impl::adapter_for;
use keyrelay_storage::{ProbeCandidate, Storage};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::check::{check_one, fallback_update_for_missing_provider};

const CYCLE_INTERVAL: Duration = Duration::from_secs(60);

/// Tracks providers with a probe task currently in flight, so a new cycle
/// skips rather than queues behind a slow one (§4.9 step 2, §5).
#[derive(Default)]
struct InFlight(Mutex<HashSet<String>>);

impl InFlight {
    fn try_start(&self, provider: &str) -> bool {
        self.0.lock().expect("in-flight set poisoned").insert(provider.to_string())
    }

    fn finish(&self, provider: &str) {
        self.0.lock().expect("in-flight set poisoned").remove(provider);
    }
}

/// Marks `provider` in flight on `in_flight`, returning an RAII guard that
/// removes it again on drop — on normal completion, on the task-level
/// timeout, or if the task panics, so a provider is never stuck "in flight"
/// forever (§4.9 step 3 "clean up ... in `finally`", §9).
fn mark_in_flight(in_flight: &Arc<InFlight>, provider: &str) -> Option<InFlightGuard> {
    in_flight
        .try_start(provider)
        .then(|| InFlightGuard { in_flight: in_flight.clone(), provider: provider.to_string() })
}

/// Removes its provider from the in-flight set when dropped, whichever way
/// the owning task ends: return, timeout cancellation, or panic unwind.
struct InFlightGuard {
    in_flight: Arc<InFlight>,
    provider: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.finish(&self.provider);
    }
}

/// Spawns the scheduler's own long-lived loop: one cycle every minute until
/// shutdown (§5 item iii).
pub fn spawn_probe_loop(
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    clients: Arc<ClientFactory>,
    shutdown: ShutdownToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let in_flight = Arc::new(InFlight::default());
        let semaphore = Arc::new(Semaphore::new(config.worker.max_concurrent_providers.max(1) as usize));

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(CYCLE_INTERVAL) => {
                    run_cycle(config.clone(), storage.clone(), clients.clone(), in_flight.clone(), semaphore.clone()).await;
                }
            }
        }
    })
}

async fn run_cycle(
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    clients: Arc<ClientFactory>,
    in_flight: Arc<InFlight>,
    semaphore: Arc<Semaphore>,
) {
    let enabled_names: Vec<String> = config.enabled_providers().map(|p| p.name.clone()).collect();
    let candidates = match storage.get_keys_to_check(&enabled_names).await {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!(error = %err, "probe cycle: failed to load due credentials");
            return;
        }
    };

    let mut by_provider: HashMap<String, Vec<ProbeCandidate>> = HashMap::new();
    for candidate in candidates {
        by_provider.entry(candidate.provider_name.clone()).or_default().push(candidate);
    }

    for (provider_name, group) in by_provider {
        let Some(guard) = mark_in_flight(&in_flight, &provider_name) else {
            tracing::info!(provider = %provider_name, "probe cycle: previous task still in flight, skipping");
            continue;
        };

        let config = config.clone();
        let storage = storage.clone();
        let clients = clients.clone();
        let semaphore = semaphore.clone();

        tokio::spawn(async move {
            // Held for the lifetime of this task; dropped on every exit
            // path (normal return, timeout, or panic unwind) and removes
            // `provider_name` from the in-flight set as its last act.
            let _guard = guard;

            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let Some(provider_config) = config.providers.get(&provider_name).filter(|p| p.enabled) else {
                for candidate in &group {
                    let update = fallback_update_for_missing_provider(
                        candidate,
                        keyrelay_common::CheckResult::fail(keyrelay_common::ErrorReason::Unknown, "provider unconfigured"),
                    );
                    if let Err(err) = storage.apply_status_update(update).await {
                        tracing::warn!(error = %err, provider = %provider_name, "failed to apply fallback status update");
                    }
                }
                return;
            };

            let timeout = Duration::from_secs(provider_config.health_policy.task_timeout_sec);
            let task = run_provider_task(provider_config.clone(), storage.clone(), clients.clone(), group);
            if tokio::time::timeout(timeout, task).await.is_err() {
                tracing::warn!(provider = %provider_name, "probe task timed out, cancelling");
            }
        });
    }
}

async fn run_provider_task(
    provider_config: keyrelay_config::ProviderConfig,
    storage: Arc<dyn Storage>,
    clients: Arc<ClientFactory>,
    candidates: Vec<ProbeCandidate>,
) {
    let adapter = adapter_for(provider_config.family);
    let client = match clients.get_client_for(provider_config.proxy.static_url.as_deref()) {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, provider = %provider_config.name, "probe task: failed to build HTTP client");
            return;
        }
    };

    let batch_size = provider_config.health_policy.batch_size.max(1);
    let batch_delay = Duration::from_secs(provider_config.health_policy.batch_delay_sec);
    let batches: Vec<&[ProbeCandidate]> = candidates.chunks(batch_size).collect();
    let last = batches.len().saturating_sub(1);

    for (idx, batch) in batches.into_iter().enumerate() {
        let checks = batch.iter().map(|candidate| {
            let adapter = adapter.clone();
            let client = client.clone();
            let storage = storage.clone();
            let provider_config = &provider_config;
            async move {
                let update = check_one(adapter.as_ref(), &client, &provider_config.api_base_url, provider_config, candidate).await;
                if let Err(err) = storage.apply_status_update(update).await {
                    tracing::warn!(error = %err, credential_id = candidate.credential_id, "failed to apply probe status update");
                }
            }
        });
        futures_util::future::join_all(checks).await;

        if idx != last {
            tokio::time::sleep(batch_delay).await;
        }
    }
}

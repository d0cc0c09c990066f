use std::collections::HashMap;
use std::sync::Arc;

use keyrelay_config::{HandlerMode, ProviderConfig};
use keyrelay_provider_core::{ClientFactory, CredentialPool, ProviderAdapter};
use keyrelay_storage::Storage;

use crate::auth::TokenMap;
use crate::stats::StatsSink;

/// Everything the dispatcher needs about one configured instance, resolved
/// once at bootstrap.
pub struct ProviderRuntime {
    pub name: String,
    pub provider_id: i64,
    pub config: ProviderConfig,
    pub handler_mode: HandlerMode,
    pub adapter: Arc<dyn ProviderAdapter>,
}

/// The gateway's shared state: one per process, held behind an `Arc` by the
/// router and every background loop that touches the pool or the store.
pub struct AppState {
    pub tokens: TokenMap,
    pub providers: HashMap<String, Arc<ProviderRuntime>>,
    pub pool: Arc<CredentialPool>,
    pub storage: Arc<dyn Storage>,
    pub clients: Arc<ClientFactory>,
    pub stats: Arc<dyn StatsSink>,
}

impl AppState {
    pub fn provider(&self, instance: &str) -> Option<&Arc<ProviderRuntime>> {
        self.providers.get(instance)
    }
}

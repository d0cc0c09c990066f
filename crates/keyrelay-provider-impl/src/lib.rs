mod google;
mod openai;

use std::sync::Arc;

use keyrelay_config::{ProviderConfig, ProviderFamily};
use keyrelay_provider_core::ProviderAdapter;

pub use google::GoogleAdapter;
pub use openai::OpenAiAdapter;

/// Resolves the capability-set adapter for a provider family. Adapters are
/// stateless, so one instance per family is shared across every provider
/// instance of that family.
pub fn adapter_for(family: ProviderFamily) -> Arc<dyn ProviderAdapter> {
    match family {
        ProviderFamily::Google => Arc::new(GoogleAdapter::new()),
        ProviderFamily::OpenAi => Arc::new(OpenAiAdapter::new()),
    }
}

/// Runs the full three-stage error classification (§4.6) for `config`'s
/// family against a fully buffered failure body.
pub fn classify_buffered(config: &ProviderConfig, status: u16, body: &[u8]) -> keyrelay_common::ErrorReason {
    match config.family {
        ProviderFamily::Google => google::classify_buffered(config, status, body),
        ProviderFamily::OpenAi => openai::classify_buffered(config, status, body),
    }
}

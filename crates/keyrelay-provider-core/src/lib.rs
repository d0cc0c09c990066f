pub mod adapter;
pub mod classify;
pub mod client;
pub mod headers;
pub mod pool;

pub use adapter::{Method, ModelUndeterminedError, ProviderAdapter, ProxyContent, ProxyOutcome};
pub use client::ClientFactory;
pub use pool::{CredentialPool, PoolEntry, PoolRow};

pub mod auth;
pub mod bootstrap;
pub mod classify;
pub mod dispatch;
pub mod error;
pub mod feedback;
pub mod handlers;
pub mod response;
pub mod state;
pub mod stats;
pub mod stream_monitor;

pub use bootstrap::{build_app_state, spawn_pool_refresh_loop};
pub use dispatch::router;
pub use error::GatewayError;
pub use state::{AppState, ProviderRuntime};
pub use stats::{NoopStatsSink, StatsSink};

pub mod db;
pub mod entities;
mod error;
mod seaorm;
mod storage;
mod types;

pub use error::{StorageError, StorageResult};
pub use seaorm::SeaOrmStorage;
pub use storage::Storage;
pub use types::{KeyStatusCount, PoolRow, ProbeCandidate, ProxyProbeCandidate, StatusUpdate};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the JSONL stores (one subdirectory per schema
    /// module: `core`, `agents`, `memory`).
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    /// Bounded in-memory ring size per record kind.
    #[serde(default = "d_ring")]
    pub max_in_memory: usize,
    /// Hard cap applied to `limit` parameters on read paths.
    #[serde(default = "d_read_cap")]
    pub max_read_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: d_data_dir(),
            max_in_memory: d_ring(),
            max_read_limit: d_read_cap(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn d_ring() -> usize {
    5000
}
fn d_read_cap() -> usize {
    200
}

//! Runtime configuration, read-only after startup.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Host directory all guest paths are masked under.
    pub shared_root: PathBuf,
    /// Mirror guest stdout into the call record.
    pub capture_stdout: bool,
    /// Wall-clock time instead of the deterministic fake clock.
    pub real_clock: bool,
    /// Executor threads per worker.
    pub threads: usize,

    pub object_store_endpoint: String,
    pub object_store_bucket: String,
    pub object_store_user: String,
    pub object_store_password: String,
    pub queue_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_root: PathBuf::from("/usr/local/washost/shared"),
            capture_stdout: false,
            real_clock: false,
            threads: 1,
            object_store_endpoint: "localhost:9000".to_string(),
            object_store_bucket: "washost".to_string(),
            object_store_user: "minio".to_string(),
            object_store_password: "minio123".to_string(),
            queue_endpoint: "localhost:6379".to_string(),
        }
    }
}

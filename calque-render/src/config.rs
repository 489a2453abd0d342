use std::path::PathBuf;
use std::time::Duration;

/// Options for configuring a mirror run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Number of worker processes in the download pool.
    pub workers: usize,
    /// Maximum discovery depth; frontier nodes at this depth stay leaves.
    pub max_depth: usize,
    /// How many times a task lost to a worker crash is requeued.
    pub max_retries: u32,
    /// Base delay for the exponential requeue backoff.
    pub backoff_base: Duration,
    /// How long to wait after an advisory SHUTDOWN before killing a worker.
    pub shutdown_grace: Duration,
    /// Spawn a replacement process when a worker crashes.
    pub respawn: bool,
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Root of the mirrored document tree.
    pub output_root: PathBuf,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_depth: 5,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
            respawn: true,
            user_agent: "Calque/0.1 (https://github.com/calque-dev/calque)".to_string(),
            request_timeout: Duration::from_secs(30),
            output_root: PathBuf::from("mirror"),
        }
    }
}

impl MirrorConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_respawn(mut self, respawn: bool) -> Self {
        self.respawn = respawn;
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_output_root(mut self, root: PathBuf) -> Self {
        self.output_root = root;
        self
    }
}

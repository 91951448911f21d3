//! Runtime settings
//!
//! Every flag can also come from the environment (or a `.env` file loaded
//! before parsing); an explicit flag wins.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use agent_loop::{InMemoryStore, LoopConfig, MemoryStore};
use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Role the agent plays
    #[arg(long, env = "AGENT_ROLE", default_value = "Assistant")]
    pub role: String,

    /// Quality score (0-5) a run needs to count as successful
    #[arg(long, env = "AGENT_SUCCESS_THRESHOLD", default_value_t = 3.0)]
    pub success_threshold: f64,

    /// Memory entries recalled into each perception
    #[arg(long, env = "AGENT_RECALL_LIMIT", default_value_t = 3)]
    pub recall_limit: usize,

    /// Bound the memory store, evicting least recently used entries
    #[arg(long, env = "AGENT_MEMORY_CAPACITY")]
    pub memory_capacity: Option<NonZeroUsize>,

    /// Per-invocation tool timeout in seconds
    #[arg(long, env = "AGENT_TOOL_TIMEOUT_SECS")]
    pub tool_timeout_secs: Option<u64>,

    /// Do not store final outputs in memory
    #[arg(long)]
    pub no_remember: bool,
}

impl Settings {
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            role: self.role.clone(),
            success_threshold: self.success_threshold,
            recall_limit: self.recall_limit,
            remember_executions: !self.no_remember,
        }
    }

    pub fn memory(&self) -> Arc<dyn MemoryStore> {
        match self.memory_capacity {
            Some(capacity) => Arc::new(InMemoryStore::bounded(capacity)),
            None => Arc::new(InMemoryStore::new()),
        }
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }
}

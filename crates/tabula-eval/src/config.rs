/// Sizing of one worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub num_threads: usize,
    /// Jobs admitted but not yet started; submission blocks beyond this.
    pub queue_capacity: usize,
    pub thread_name: String,
}

impl PoolConfig {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            ..Self::default()
        }
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: 2,
            queue_capacity: 256,
            thread_name: "tabula-worker".to_string(),
        }
    }
}

/// Configuration for the derivation engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Auto-recalculation setting given to new tables.
    pub auto_recalculate: bool,
    /// Significant digits numeric results are rounded to.
    pub default_precision: u32,
    /// Runs the work of asynchronous operators.
    pub pending_pool: PoolConfig,
    /// Delivers value-change notifications.
    pub listener_pool: PoolConfig,
    /// Upper bound on derived cells planned in one wave.
    pub max_wave_nodes: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_recalculate: true,
            default_precision: 15,
            pending_pool: PoolConfig::new("tabula-pending").with_threads(4),
            listener_pool: PoolConfig::new("tabula-listener").with_threads(1),
            max_wave_nodes: None,
        }
    }
}

impl EngineConfig {
    pub fn with_auto_recalculate(mut self, on: bool) -> Self {
        self.auto_recalculate = on;
        self
    }

    pub fn with_precision(mut self, digits: u32) -> Self {
        self.default_precision = digits;
        self
    }

    pub fn with_max_wave_nodes(mut self, limit: usize) -> Self {
        self.max_wave_nodes = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert!(config.auto_recalculate);
        assert_eq!(config.default_precision, 15);
        assert_eq!(config.pending_pool.thread_name, "tabula-pending");
        assert_eq!(config.listener_pool.num_threads, 1);
        assert!(config.max_wave_nodes.is_none());
        assert_eq!(PoolConfig::default().with_threads(0).num_threads, 1);
    }
}

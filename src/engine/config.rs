// 8.0.1: knobs of one engine instance. module parameters live in crate::config.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// events kept for indexers, oldest dropped first on emit
    pub max_events: usize,
}

impl EngineConfig {
    pub fn with_max_events(max_events: usize) -> Self {
        Self { max_events }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_max_events(100_000)
    }
}

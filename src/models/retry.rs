#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; a call runs at most `retries + 1` times.
    pub retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2,
        }
    }
}

//! VM configuration.

use jacscript_core::format::MAX_PAYLOAD_SIZE;

/// Tunables for a [`crate::Vm`].
///
/// Times are in milliseconds of the environment clock.
///
/// ```
/// use jacscript::VmConfig;
///
/// let config = VmConfig::new().with_step_budget(1000).with_seed(7);
/// assert_eq!(config.cache_capacity, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Instructions a fiber may execute in one resume before it is
    /// considered runaway.
    pub step_budget: usize,
    /// Cached register values kept before eviction kicks in.
    pub cache_capacity: usize,
    /// Validity of a cached register when the script does not give one.
    pub default_validity: u64,
    pub autobind_interval: u64,
    /// First resend interval of an unanswered register query.
    pub resend_initial: u64,
    /// Resend intervals double up to this.
    pub resend_max: u64,
    /// Largest packet buffer a script may build.
    pub payload_limit: usize,
    /// Range of the pause after a cloud upload.
    pub upload_backoff: (u64, u64),
    /// Seed for `Math.random`; `None` seeds from the operating system.
    pub seed: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            step_budget: 128 * 1024,
            cache_capacity: 50,
            default_validity: 15 * 60 * 1000,
            autobind_interval: 500,
            resend_initial: 20,
            resend_max: 1000,
            payload_limit: MAX_PAYLOAD_SIZE,
            upload_backoff: (50, 100),
            seed: None,
        }
    }
}

impl VmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_budget(mut self, steps: usize) -> Self {
        self.step_budget = steps;
        self
    }

    pub fn with_cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = entries;
        self
    }

    pub fn with_default_validity(mut self, ms: u64) -> Self {
        self.default_validity = ms;
        self
    }

    pub fn with_autobind_interval(mut self, ms: u64) -> Self {
        self.autobind_interval = ms;
        self
    }

    /// Resend schedule for unanswered queries: `initial`, doubling up to `max`.
    pub fn with_resend(mut self, initial: u64, max: u64) -> Self {
        self.resend_initial = initial;
        self.resend_max = max.max(initial);
        self
    }

    pub fn with_payload_limit(mut self, bytes: usize) -> Self {
        self.payload_limit = bytes;
        self
    }

    pub fn with_upload_backoff(mut self, min: u64, max: u64) -> Self {
        self.upload_backoff = (min, max.max(min));
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Tunables for a [`crate::Runner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Delay between creating the VM and starting the program, giving
    /// devices time to announce themselves.
    pub start_delay: u64,
    /// Recreate the VM after a panic.
    pub auto_restart: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            start_delay: 1100,
            auto_restart: false,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_delay(mut self, ms: u64) -> Self {
        self.start_delay = ms;
        self
    }

    pub fn with_auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = VmConfig::new();
        assert_eq!(config.step_budget, 131_072);
        assert_eq!(config.default_validity, 900_000);
        assert_eq!(config.payload_limit, 236);
        assert_eq!(RunnerConfig::new().start_delay, 1100);
    }

    #[test]
    fn builders_set_fields() {
        let config = VmConfig::new()
            .with_cache_capacity(8)
            .with_default_validity(1000)
            .with_autobind_interval(250)
            .with_payload_limit(64);
        assert_eq!(config.cache_capacity, 8);
        assert_eq!(config.default_validity, 1000);
        assert_eq!(config.autobind_interval, 250);
        assert_eq!(config.payload_limit, 64);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn ranges_stay_ordered() {
        let config = VmConfig::new().with_resend(100, 10).with_upload_backoff(80, 20);
        assert_eq!((config.resend_initial, config.resend_max), (100, 100));
        assert_eq!(config.upload_backoff, (80, 80));
    }
}

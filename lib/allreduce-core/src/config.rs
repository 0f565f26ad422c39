/// Dispatcher configuration (§4.1.1): a plain struct with a `Default` impl and a constructor,
/// in the teacher's `WorkerConfig`/`WorkerPoolConfig` idiom rather than a layered config-file
/// loader — there is no CLI/environment surface at the core level (§6).
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// Payload element counts strictly below this use recursive doubling; at or above it,
    /// Rabenseifner's reduce-scatter/allgather (§4.1).
    pub threshold: usize,
}

impl DispatcherConfig {
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { threshold: 2048 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_matches_spec() {
        assert_eq!(DispatcherConfig::default().threshold, 2048);
    }
}

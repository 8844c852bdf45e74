//! Run-time configuration, defaulting to the build-time flags of the target.

/// Limits used by the interrupt table and the autoconfiguration walk.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of interrupt sources the dispatch table is sized for.
    pub intr_sources: usize,
    /// Maximum number of handlers chained on one source.
    pub intr_chain_max: usize,
    /// Number of CPUs that may dispatch interrupts.
    pub max_cpus: usize,
    /// Iterations a driver may spin waiting for hardware to settle during attach.
    pub attach_spin_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            intr_sources: ::config::INTR_SOURCES,
            intr_chain_max: ::config::INTR_CHAIN_MAX,
            max_cpus: ::config::MAX_CPUS,
            attach_spin_limit: ::config::ATTACH_SPIN_LIMIT,
        }
    }
}

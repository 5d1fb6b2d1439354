/// Counters for failures that were recovered locally during a fit.
///
/// A fit that completes with non-zero counters still produced every map;
/// the affected texels just carry a lower quality estimate.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FitDiagnostics {
    /// Texels whose last weight solve produced an all-zero vector.
    pub degenerate_weight_texels: usize,
    /// Texels whose normal refinement hit the rejected-step budget, summed
    /// over every refinement pass.
    pub divergent_normal_texels: usize,
    /// Covered texels without any valid observation.
    pub unobserved_texels: usize,
    /// Unobserved texels that received values by hole filling.
    pub filled_texels: usize,
    /// Artifact writes that failed, with file and stage context.
    pub io_failures: Vec<String>,
}

impl FitDiagnostics {
    /// Record an artifact failure and log it.
    pub fn record_io_failure(&mut self, stage: &str, context: String, err: impl std::fmt::Display) {
        log::error!("{stage}: failed to write {context}: {err}");
        self.io_failures.push(format!("{stage}: {context}: {err}"));
    }

    /// Log a one line summary of every counter.
    pub fn log_summary(&self) {
        log::info!(
            "diagnostics: {} degenerate weight texels, {} texels failed normal refinement, \
             {} unobserved texels ({} filled), {} io failures",
            self.degenerate_weight_texels,
            self.divergent_normal_texels,
            self.unobserved_texels,
            self.filled_texels,
            self.io_failures.len()
        );
    }
}

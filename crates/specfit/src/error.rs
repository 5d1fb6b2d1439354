use specfit_image::ImageSize;

/// Errors that stop a fit.
///
/// Per-texel failures never surface here; they are counted in
/// [`crate::diagnostics::FitDiagnostics`] instead.
#[derive(thiserror::Error, Debug)]
pub enum FitError {
    /// No texel has a single valid observation.
    #[error("{stage}: no texel has any valid observation")]
    InsufficientData {
        /// Pipeline stage that detected the condition.
        stage: &'static str,
    },

    /// Two rasters that must share a size disagree.
    #[error("{stage}: {what} has size {actual}, expected {expected}")]
    DimensionMismatch {
        /// Pipeline stage that detected the mismatch.
        stage: &'static str,
        /// The offending input.
        what: String,
        /// The reference size.
        expected: ImageSize,
        /// The size found.
        actual: ImageSize,
    },

    /// A count of inputs disagrees with the view set or basis.
    #[error("{stage}: expected {expected} {what}, found {actual}")]
    CountMismatch {
        /// Pipeline stage that detected the mismatch.
        stage: &'static str,
        /// The kind of input being counted.
        what: &'static str,
        /// The expected count.
        expected: usize,
        /// The count found.
        actual: usize,
    },

    /// The settings are not usable.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// The progress monitor requested a stop.
    #[error("Fit cancelled during {stage}")]
    Cancelled {
        /// Stage at whose iteration boundary the fit stopped.
        stage: &'static str,
    },

    /// Image container error.
    #[error(transparent)]
    Image(#[from] specfit_image::ImageError),

    /// Artifact read or write error.
    #[error(transparent)]
    Io(#[from] specfit_io::IoError),

    /// Settings or artifact metadata could not be (de)serialized.
    #[error("Failed to (de)serialize json. {0}")]
    Json(#[from] serde_json::Error),

    /// Nonnegative least squares failed on malformed input.
    #[error(transparent)]
    Nnls(#[from] specfit_algebra::NnlsError),
}

impl FitError {
    /// Check that `actual` matches `expected`, naming the input on failure.
    pub fn check_size(
        stage: &'static str,
        what: impl Into<String>,
        expected: ImageSize,
        actual: ImageSize,
    ) -> Result<(), FitError> {
        if expected == actual {
            Ok(())
        } else {
            Err(FitError::DimensionMismatch {
                stage,
                what: what.into(),
                expected,
                actual,
            })
        }
    }
}

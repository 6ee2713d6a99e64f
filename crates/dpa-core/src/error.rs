//! Error types for the toolkit.
//!
//! Each subsystem surfaces its own enum; none of them are retryable at
//! this layer. A failed acquisition is discarded by the caller, a failed
//! normalization leaves the output unspecified beyond the offending index.

use std::path::PathBuf;

use thiserror::Error;

/// Rasterization failures.
#[derive(Debug, Error)]
pub enum RasterError {
    /// The acquisition is shorter than the header plus one edge template.
    #[error("acquisition too short: {len} samples, need at least {required}")]
    Shape { len: usize, required: usize },

    /// An inter-edge distance inside an operation region fell outside the
    /// `0.9*(width-5) ..= 1.1*width` tolerance band.
    #[error("inter-edge distance {distance} out of tolerance at sample {at}")]
    Alignment { distance: usize, at: usize },

    /// More pause gaps were seen than the configuration allows.
    #[error("pause count reached {pauses}, configured maximum is {max}")]
    PauseOverrun { pauses: u32, max: u32 },

    /// The scan ended without the expected number of leading pauses.
    #[error("acquisition ended after {pauses} pauses, expected {expected}")]
    Truncated { pauses: u32, expected: u32 },
}

/// Failures of the range-mapping operators.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// A sample lay outside the declared `[min, max]` input range.
    #[error("sample {index} ({value}) outside the declared range")]
    OutOfRange { index: usize, value: f64 },

    /// Recentering on the output type's mid-range would saturate.
    /// The output buffer has not been modified.
    #[error("recentering would saturate (avg {average}, min {min}, max {max})")]
    Saturation { average: f64, min: f64, max: f64 },
}

/// Correlator usage errors.
#[derive(Debug, Error)]
pub enum CorrelatorError {
    /// `update_matrix` was called before `preprocess`.
    #[error("hypothesis statistics missing: preprocess() has not been called")]
    NotPreprocessed,

    /// `update_matrix` was called before any trace was ingested.
    #[error("no traces ingested")]
    NoTraces,

    /// A trace index exceeded the declared trace count.
    #[error("trace index {index} out of range ({traces} traces declared)")]
    TraceIndex { index: usize, traces: usize },

    /// A trace buffer did not match the declared sample count.
    #[error("trace has {len} samples, correlator expects {samples}")]
    Shape { len: usize, samples: usize },
}

/// A buffer file operation failed; carries the path it failed on.
#[derive(Debug, Error)]
#[error("{}: {source}", .path.display())]
pub struct BufIoError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// FFT bandpass failures.
#[cfg(feature = "fft")]
#[derive(Debug, Error)]
pub enum FftFilterError {
    /// Output and input buffers must have the same length.
    #[error("output length {out} does not match input length {input}")]
    Shape { out: usize, input: usize },

    /// The underlying transform rejected its buffers.
    #[error("transform failed: {0}")]
    Transform(#[from] realfft::FftError),
}

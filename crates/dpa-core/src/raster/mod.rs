//! Acquisition rasterization.
//!
//! A long acquisition contains many repeated cryptographic operations
//! separated by idle pause regions. The rasterizer locks onto the start
//! edge of each operation with a matched template, validates the spacing
//! rhythm against the configured thresholds, and resamples every
//! operation window to a fixed width. Afterwards sample index `i` refers
//! to the same logical moment of the operation in every emitted window,
//! which is what makes per-sample statistics across traces meaningful.

mod compare;
mod spline;

pub use compare::compare;
pub use spline::spline;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::Sample;
use crate::error::RasterError;

/// Thresholds governing edge detection and pause recognition.
///
/// Passed explicitly to the rasterizer entry points; there is no global
/// configuration. The defaults match a device emitting its operations at
/// a fixed rhythm after three idle pauses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Squared-error score below which a window counts as an edge match.
    pub trigger: f32,
    /// Inter-edge distance above which the gap is a pause.
    pub pause_trigger: usize,
    /// Leading pauses expected before the first operation.
    pub min_pause: u32,
    /// Pause count at which the acquisition is rejected.
    pub max_pause: u32,
    /// Samples skipped at the start of the acquisition.
    pub header_size: usize,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            trigger: 120.0,
            pause_trigger: 1100,
            min_pause: 3,
            max_pause: 6,
            header_size: 128,
        }
    }
}

/// Outcome of a successful rasterization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSummary {
    /// Operation windows emitted into the output stream.
    pub operations: usize,
    /// Pause gaps seen; equals `min_pause` on success.
    pub pauses: u32,
    /// Largest non-pause inter-edge distance observed. Useful when
    /// calibrating the raster width for an unknown device.
    pub max_distance: usize,
}

/// Resamples one operation window to `width` samples appended to `out`.
///
/// # Panics
///
/// Panics if `window` holds fewer than two samples or `width < 2`.
pub fn raster_write<TOut: Sample, TIn: Sample>(out: &mut Vec<TOut>, window: &[TIn], width: usize) {
    let start = out.len();
    out.resize(start + width, TOut::default());
    spline(&mut out[start..], window);
}

/// Segments a raw acquisition into aligned fixed-width operation windows.
///
/// The scan skips `cfg.header_size` samples, scores every remaining
/// position against the edge template, and walks the score sequence:
/// a score under `cfg.trigger` opens a candidate edge whose position is
/// refined to the best score within half a raster width. Successive
/// refined edges are then classified by their distance: beyond
/// `cfg.pause_trigger` they delimit pauses, and once `cfg.min_pause`
/// pauses have passed, distances under `cfg.pause_trigger / 2` delimit
/// operations. Each operation window is resampled to exactly `width`
/// samples and appended to `out`.
///
/// An operation distance outside `0.9 * (width - 5) ..= 1.1 * width` is a
/// hard [`RasterError::Alignment`] failure, and the acquisition must
/// contain exactly `cfg.min_pause` pauses overall. A window is emitted
/// only once the *next* edge closes it, so the acquisition has to end
/// with a terminating edge (or a further pause) for its final operation
/// to appear in the output.
pub fn raster<TOut: Sample, TIn: Sample>(
    cfg: &RasterConfig,
    out: &mut Vec<TOut>,
    input: &[TIn],
    width: usize,
    edge: &[TIn],
) -> Result<RasterSummary, RasterError> {
    let required = cfg.header_size + edge.len() + 1;
    if input.len() < required {
        return Err(RasterError::Shape {
            len: input.len(),
            required,
        });
    }

    let data = &input[cfg.header_size..];
    let span = data.len() - edge.len();
    let scores: Vec<f32> = (0..span)
        .map(|i| compare(&data[i..i + edge.len()], edge))
        .collect();

    let mut pauses = 0u32;
    let mut operations = 0usize;
    let mut max_distance = 0usize;
    let mut last_pos: Option<usize> = None;

    let mut i = 0usize;
    while i < span {
        if scores[i] >= cfg.trigger {
            i += 1;
            continue;
        }

        // Candidate edge; refine to the best match within half a width.
        let refine_end = (i + width / 2 + 1).min(span);
        let mut pos = i;
        for j in i + 1..refine_end {
            if scores[j] < scores[pos] {
                pos = j;
            }
        }

        if let Some(last) = last_pos {
            let distance = pos - last;
            if pauses >= cfg.min_pause && distance < cfg.pause_trigger / 2 {
                let lo = 0.9 * (width as f64 - 5.0);
                let hi = 1.1 * width as f64;
                if (distance as f64) < lo || (distance as f64) > hi {
                    return Err(RasterError::Alignment { distance, at: last });
                }
                raster_write(out, &data[last..last + distance], width);
                operations += 1;
            }
            if distance < cfg.pause_trigger && distance > max_distance {
                max_distance = distance;
            }
            if distance > cfg.pause_trigger {
                pauses += 1;
                if pauses >= cfg.max_pause {
                    return Err(RasterError::PauseOverrun {
                        pauses,
                        max: cfg.max_pause,
                    });
                }
            }
        }

        last_pos = Some(pos);
        i = refine_end;
    }

    debug!(max_distance, operations, "rasterization sweep complete");

    if pauses != cfg.min_pause {
        return Err(RasterError::Truncated {
            pauses,
            expected: cfg.min_pause,
        });
    }
    Ok(RasterSummary {
        operations,
        pauses,
        max_distance,
    })
}

/// Measures inter-edge distances without emitting windows.
///
/// Calibration mode for an unknown device: runs the same trigger scan as
/// [`raster`] but with no refinement window and no resampling, returning
/// every inter-edge distance (pause gaps included) in scan order. The
/// pause rhythm is still validated, so the configured thresholds must
/// already describe the acquisition.
pub fn raster_distances<TIn: Sample>(
    cfg: &RasterConfig,
    input: &[TIn],
    edge: &[TIn],
) -> Result<Vec<usize>, RasterError> {
    let required = cfg.header_size + edge.len() + 1;
    if input.len() < required {
        return Err(RasterError::Shape {
            len: input.len(),
            required,
        });
    }

    let data = &input[cfg.header_size..];
    let span = data.len() - edge.len();

    let mut distances = Vec::new();
    let mut pauses = 0u32;
    let mut last_pos: Option<usize> = None;

    for i in 0..span {
        if compare(&data[i..i + edge.len()], edge) >= cfg.trigger {
            continue;
        }
        if let Some(last) = last_pos {
            let distance = i - last;
            distances.push(distance);
            if distance > cfg.pause_trigger {
                pauses += 1;
                if pauses >= cfg.max_pause {
                    return Err(RasterError::PauseOverrun {
                        pauses,
                        max: cfg.max_pause,
                    });
                }
            }
        }
        last_pos = Some(i);
    }

    if pauses != cfg.min_pause {
        return Err(RasterError::Truncated {
            pauses,
            expected: cfg.min_pause,
        });
    }
    Ok(distances)
}

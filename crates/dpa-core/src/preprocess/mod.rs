//! Trace preconditioning operators.
//!
//! Stateless functions over aligned sample buffers. Each writes into a
//! caller-provided output slice (many campaigns reuse one scratch buffer
//! across thousands of traces) and operates on the common length of its
//! operands. Composition is up to the caller; a typical chain is
//! `average_filter` -> `normalize` -> rasterize -> correlate.
//!
//! Operators that can re-center their output take the center as an
//! explicit `f64` (0.0 leaves unsigned data untouched, 128.0 treats 8-bit
//! samples as signed around mid-range).

mod peak;

#[cfg(feature = "fft")]
pub mod fft;

pub use peak::peak_extract;

use crate::buffer::{BoundedSample, Sample};
use crate::error::NormalizeError;
use crate::stats::analyze;

/// An `n`-point box average with output stride `skip`.
///
/// Emits one output for every `skip` input steps starting at index
/// `n - 1`, so a full output buffer receives `ceil((len - n + 1) / skip)`
/// samples. Each emitted value is `center + (avg - center) * scale`.
/// Returns the number of samples written.
pub fn average_filter<TOut: Sample, TIn: Sample>(
    out: &mut [TOut],
    input: &[TIn],
    n: usize,
    skip: usize,
    scale: f64,
    center: f64,
) -> usize {
    assert!(n >= 1 && skip >= 1, "filter width and stride must be non-zero");
    if input.len() < n {
        return 0;
    }
    let mut acc: f64 = input[..n - 1].iter().map(|v| v.to_f64()).sum();
    let mut written = 0;
    for (offset, i) in (n - 1..input.len()).enumerate() {
        acc += input[i].to_f64();
        if offset % skip == 0 {
            let idx = offset / skip;
            if idx >= out.len() {
                return written;
            }
            out[idx] = TOut::from_f64(center + (acc / n as f64 - center) * scale);
            written = idx + 1;
        }
        acc -= input[offset].to_f64();
    }
    written
}

/// Squares every sample.
pub fn square_buf<TOut: Sample, TIn: Sample>(out: &mut [TOut], input: &[TIn]) {
    for (slot, v) in out.iter_mut().zip(input.iter()) {
        let x = v.to_f64();
        *slot = TOut::from_f64(x * x);
    }
}

/// Folds one trace into free-standing sum / square-sum buffers.
///
/// The one-shot form of [`crate::stats::OnlineAccumulator`]: useful when
/// only an average (and no correlation) is wanted. `square_sum` may be
/// omitted.
pub fn add_average<T: Sample>(sum: &mut [f64], mut square_sum: Option<&mut [f64]>, input: &[T]) {
    for (i, v) in input.iter().enumerate() {
        if i >= sum.len() {
            return;
        }
        let x = v.to_f64();
        sum[i] += x;
        if let Some(sq) = square_sum.as_deref_mut() {
            if i < sq.len() {
                sq[i] += x * x;
            }
        }
    }
}

/// Folds samples below `middle` upward, mirroring them around it.
pub fn absolute<T: Sample>(out: &mut [T], input: &[T], middle: f64) {
    for (slot, v) in out.iter_mut().zip(input.iter()) {
        let x = v.to_f64();
        *slot = T::from_f64(if x < middle { middle + (middle - x) } else { x });
    }
}

/// Rescales every sample around `center` by `factor`.
pub fn scale<TOut: Sample, TIn: Sample>(out: &mut [TOut], input: &[TIn], center: f64, factor: f64) {
    for (slot, v) in out.iter_mut().zip(input.iter()) {
        *slot = TOut::from_f64(center + (v.to_f64() - center) * factor);
    }
}

/// Per-sample difference `a - b`.
///
/// With `absolute` set the magnitude is emitted; otherwise the signed
/// difference is re-centered on the output type's mid-range so negative
/// excursions survive the unsigned output.
pub fn diff<TOut: BoundedSample, TIn: Sample>(
    out: &mut [TOut],
    a: &[TIn],
    b: &[TIn],
    absolute: bool,
) {
    for ((slot, x), y) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
        let d = x.to_f64() - y.to_f64();
        *slot = TOut::from_f64(if absolute { d.abs() } else { d + TOut::CENTER });
    }
}

/// Sliding-window sum over `window` consecutive samples.
///
/// Emits `len - window + 1` samples (clamped to the output length).
pub fn integrate<TOut: Sample, TIn: Sample>(out: &mut [TOut], input: &[TIn], window: usize) {
    assert!(window >= 1, "integration window must be non-zero");
    if input.len() < window {
        return;
    }
    let mut acc: f64 = input[..window - 1].iter().map(|v| v.to_f64()).sum();
    for i in window - 1..input.len() {
        acc += input[i].to_f64();
        let idx = i + 1 - window;
        if idx >= out.len() {
            return;
        }
        out[idx] = TOut::from_f64(acc);
        acc -= input[idx].to_f64();
    }
}

/// Affine map from `[min, max]` onto the full output type range.
///
/// Any sample outside `[min, max]` aborts with the offending index; the
/// output contents before that index have already been written.
pub fn normalize<TOut: BoundedSample, TIn: Sample>(
    out: &mut [TOut],
    input: &[TIn],
    min: f64,
    max: f64,
) -> Result<(), NormalizeError> {
    let scale = (TOut::MAX_VALUE - TOut::MIN_VALUE) / (max - min);
    for (index, (slot, v)) in out.iter_mut().zip(input.iter()).enumerate() {
        let x = v.to_f64();
        if x > max || x < min {
            return Err(NormalizeError::OutOfRange { index, value: x });
        }
        *slot = TOut::from_f64((x - min) * scale + TOut::MIN_VALUE);
    }
    Ok(())
}

/// Shifts the buffer so its average lands on the output type's mid-range.
///
/// No rescaling is applied; if the shifted extremes would not fit the
/// output type, the buffer is left untouched and the saturation is
/// reported.
pub fn normalize_avg<TOut: BoundedSample, TIn: Sample>(
    out: &mut [TOut],
    input: &[TIn],
) -> Result<(), NormalizeError> {
    let a = analyze(input);
    if a.max - a.average > TOut::MAX_VALUE - TOut::CENTER
        || a.average - a.min > TOut::CENTER - TOut::MIN_VALUE
    {
        return Err(NormalizeError::Saturation {
            average: a.average,
            min: a.min,
            max: a.max,
        });
    }
    for (slot, v) in out.iter_mut().zip(input.iter()) {
        *slot = TOut::from_f64(v.to_f64() - a.average + TOut::CENTER);
    }
    Ok(())
}

/// Full-wave rectification around `avg`: emits `|in - avg|`.
pub fn rectify<TOut: Sample, TIn: Sample>(out: &mut [TOut], input: &[TIn], avg: f64) {
    for (slot, v) in out.iter_mut().zip(input.iter()) {
        *slot = TOut::from_f64((v.to_f64() - avg).abs());
    }
}

/// De-interleaves a buffer of `period`-phase samples into contiguous
/// per-phase runs.
///
/// Sample `i` lands in run `i % period` at position `i / period`; runs are
/// packed back to back. The mapping is a permutation of the first
/// `min(out.len(), input.len())` indices.
pub fn reorder<TOut: Sample, TIn: Sample>(out: &mut [TOut], input: &[TIn], period: usize) {
    assert!(period >= 1, "reorder period must be non-zero");
    let len = input.len().min(out.len());
    let mut run_start = vec![0usize; period];
    for p in 1..period {
        run_start[p] = run_start[p - 1] + (len + period - p) / period;
    }
    for i in 0..len {
        out[run_start[i % period] + i / period] = TOut::from_f64(input[i].to_f64());
    }
}

/// FIR convolution with an 8-bit integer kernel.
///
/// Each output is the kernel-weighted sum normalized by the kernel sum
/// (a zero-sum kernel skips the normalization), then rescaled around
/// `center` by `scale`. Emits `len - filter_len + 1` samples, clamped to
/// the output length; returns the number written.
pub fn apply_filter<TOut: Sample, TIn: Sample>(
    out: &mut [TOut],
    input: &[TIn],
    filter: &[i8],
    scale: f64,
    center: f64,
) -> usize {
    if filter.is_empty() || input.len() < filter.len() {
        return 0;
    }
    let filter_sum: f64 = filter.iter().map(|&c| f64::from(c)).sum();
    let norm = if filter_sum == 0.0 { 1.0 } else { filter_sum };
    let emit = (input.len() - filter.len() + 1).min(out.len());
    for (i, slot) in out[..emit].iter_mut().enumerate() {
        let mut acc = 0.0;
        for (j, &c) in filter.iter().enumerate() {
            acc += f64::from(c) * input[i + j].to_f64();
        }
        *slot = TOut::from_f64(center + (acc / norm - center) * scale);
    }
    emit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_filter_identity() {
        let input: [u8; 5] = [9, 4, 7, 1, 6];
        let mut out = [0u8; 5];
        let written = average_filter(&mut out, &input, 1, 1, 1.0, 0.0);
        assert_eq!(written, 5);
        assert_eq!(out, input);
    }

    #[test]
    fn test_average_filter_window_and_stride() {
        let input: [u8; 10] = [0, 2, 4, 6, 8, 10, 12, 14, 16, 18];
        let mut out = [0u8; 4];
        // n=3: averages of [0,2,4], [4,6,8], [8,10,12], [12,14,16].
        let written = average_filter(&mut out, &input, 3, 2, 1.0, 0.0);
        assert_eq!(written, 4);
        assert_eq!(out, [2, 6, 10, 14]);
    }

    #[test]
    fn test_average_filter_center_scale() {
        let input: [u8; 1] = [200];
        let mut out = [0u8; 1];
        average_filter(&mut out, &input, 1, 1, 0.5, 128.0);
        // 128 + (200 - 128) * 0.5
        assert_eq!(out, [164]);
    }

    #[test]
    fn test_square_buf() {
        let input: [u8; 3] = [0, 3, 12];
        let mut out = [0u16; 3];
        square_buf(&mut out, &input);
        assert_eq!(out, [0, 9, 144]);
    }

    #[test]
    fn test_add_average_optional_square() {
        let mut sum = [0.0; 2];
        let mut sq = [0.0; 2];
        add_average::<u8>(&mut sum, Some(&mut sq), &[3, 4]);
        add_average::<u8>(&mut sum, None, &[1, 1]);
        assert_eq!(sum, [4.0, 5.0]);
        assert_eq!(sq, [9.0, 16.0]);
    }

    #[test]
    fn test_absolute_mirrors_below_middle() {
        let input: [u8; 4] = [100, 128, 156, 60];
        let mut out = [0u8; 4];
        absolute(&mut out, &input, 128.0);
        assert_eq!(out, [156, 128, 156, 196]);
    }

    #[test]
    fn test_scale_around_center() {
        let input: [u8; 2] = [100, 150];
        let mut out = [0u8; 2];
        scale(&mut out, &input, 128.0, 2.0);
        assert_eq!(out, [72, 172]);
    }

    #[test]
    fn test_diff_recenters_signed() {
        let a: [u8; 2] = [10, 30];
        let b: [u8; 2] = [30, 10];
        let mut out = [0u8; 2];
        diff(&mut out, &a, &b, false);
        assert_eq!(out, [108, 148]);
        diff(&mut out, &a, &b, true);
        assert_eq!(out, [20, 20]);
    }

    #[test]
    fn test_integrate_window_sum() {
        let input: [u8; 5] = [1, 2, 3, 4, 5];
        let mut out = [0u16; 3];
        integrate(&mut out, &input, 3);
        assert_eq!(out, [6, 9, 12]);
    }

    #[test]
    fn test_normalize_rejects_out_of_range() {
        let input: [u8; 3] = [10, 99, 20];
        let mut out = [0u8; 3];
        match normalize(&mut out, &input, 0.0, 50.0) {
            Err(NormalizeError::OutOfRange { index: 1, .. }) => {}
            other => panic!("expected OutOfRange at 1, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize_maps_full_range() {
        let input: [u8; 3] = [0, 10, 50];
        let mut out = [0u8; 3];
        normalize(&mut out, &input, 0.0, 50.0).expect("in range");
        assert_eq!(out, [0, 51, 255]);
    }

    #[test]
    fn test_normalize_avg_recenters() {
        let input: [u8; 4] = [10, 20, 30, 40];
        let mut out = [0u8; 4];
        normalize_avg(&mut out, &input).expect("fits");
        assert_eq!(out, [113, 123, 133, 143]);
    }

    #[test]
    fn test_normalize_avg_saturation_leaves_output() {
        let input: [u8; 2] = [10, 245];
        let mut out = [7u8; 2];
        // Average 127.5; both extremes shift within the u8 range.
        normalize_avg(&mut out, &input).expect("fits");
        assert_eq!(out, [11, 246]);
        // A u16 spread wider than the u8 range cannot be recentered.
        let wide: [u16; 2] = [0, 1000];
        let mut out8 = [7u8; 2];
        match normalize_avg(&mut out8, &wide) {
            Err(NormalizeError::Saturation { .. }) => {}
            other => panic!("expected Saturation, got {other:?}"),
        }
        assert_eq!(out8, [7, 7]);
    }

    #[test]
    fn test_rectify() {
        let input: [u8; 3] = [90, 100, 115];
        let mut out = [0u8; 3];
        rectify(&mut out, &input, 100.0);
        assert_eq!(out, [10, 0, 15]);
    }

    #[test]
    fn test_reorder_groups_phases() {
        let input: [u8; 7] = [0, 1, 2, 3, 4, 5, 6];
        let mut out = [0u8; 7];
        reorder(&mut out, &input, 3);
        // Phase runs: [0,3,6], [1,4], [2,5].
        assert_eq!(out, [0, 3, 6, 1, 4, 2, 5]);
    }

    #[test]
    fn test_apply_filter_box_kernel() {
        let input: [u8; 5] = [3, 6, 9, 12, 15];
        let mut out = [0u8; 3];
        let written = apply_filter(&mut out, &input, &[1, 1, 1], 1.0, 0.0);
        assert_eq!(written, 3);
        assert_eq!(out, [6, 9, 12]);
    }

    #[test]
    fn test_apply_filter_zero_sum_kernel() {
        let input: [u8; 4] = [10, 20, 40, 80];
        let mut out = [0u8; 3];
        let written = apply_filter(&mut out, &input, &[-1, 1], 1.0, 0.0);
        assert_eq!(written, 3);
        assert_eq!(out, [10, 20, 40]);
    }
}

//! Frequency-domain bandpass filtering.
//!
//! A thin adapter over the `realfft` real-to-complex transform. The
//! forward and inverse plans are cached by transform length and rebuilt
//! when a buffer of a different length arrives, so a campaign filtering
//! thousands of equally sized traces plans exactly once.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::buffer::Sample;
use crate::error::FftFilterError;

/// Output scaling policy for [`FftFilter::bandpass`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FftScaling {
    /// Derive `scale = 255 / (max - min)` and `offset = min` from the
    /// filtered signal, mapping it onto the 8-bit display range.
    Auto,
    /// Apply the given scale (divided by the transform length, which the
    /// unnormalized inverse transform multiplies in) and offset.
    Fixed { scale: f64, offset: f64 },
}

struct PlanPair {
    len: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
}

/// A bandpass filter with cached transform plans.
pub struct FftFilter {
    planner: RealFftPlanner<f64>,
    plans: Option<PlanPair>,
    // Grow-only scratch reused across calls.
    signal: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
}

impl FftFilter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            planner: RealFftPlanner::new(),
            plans: None,
            signal: Vec::new(),
            spectrum: Vec::new(),
        }
    }

    fn plans_for(
        &mut self,
        len: usize,
    ) -> (Arc<dyn RealToComplex<f64>>, Arc<dyn ComplexToReal<f64>>) {
        match &self.plans {
            Some(p) if p.len == len => (Arc::clone(&p.forward), Arc::clone(&p.inverse)),
            _ => {
                let forward = self.planner.plan_fft_forward(len);
                let inverse = self.planner.plan_fft_inverse(len);
                self.plans = Some(PlanPair {
                    len,
                    forward: Arc::clone(&forward),
                    inverse: Arc::clone(&inverse),
                });
                (forward, inverse)
            }
        }
    }

    /// Keeps only the frequency bins in `start..stop`, inverse-transforms
    /// and rescales per `scaling`. Returns the `(scale, offset)` actually
    /// applied, so an [`FftScaling::Auto`] pass over a reference trace can
    /// be replayed as `Fixed` over the rest of the campaign.
    pub fn bandpass<TOut: Sample, TIn: Sample>(
        &mut self,
        out: &mut [TOut],
        input: &[TIn],
        start: usize,
        stop: usize,
        scaling: FftScaling,
    ) -> Result<(f64, f64), FftFilterError> {
        if out.len() != input.len() {
            return Err(FftFilterError::Shape {
                out: out.len(),
                input: input.len(),
            });
        }
        let len = input.len();
        let (forward, inverse) = self.plans_for(len);

        self.signal.resize(len, 0.0);
        self.spectrum.resize(len / 2 + 1, Complex::new(0.0, 0.0));
        for (slot, v) in self.signal.iter_mut().zip(input.iter()) {
            *slot = v.to_f64();
        }

        forward.process(&mut self.signal, &mut self.spectrum)?;

        let bins = self.spectrum.len();
        for bin in &mut self.spectrum[..start.min(bins)] {
            *bin = Complex::new(0.0, 0.0);
        }
        for bin in &mut self.spectrum[stop.min(bins)..] {
            *bin = Complex::new(0.0, 0.0);
        }

        inverse.process(&mut self.spectrum, &mut self.signal)?;

        let (scale, offset) = match scaling {
            FftScaling::Auto => {
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                for &v in &self.signal {
                    min = min.min(v);
                    max = max.max(v);
                }
                let scale = if max > min { 255.0 / (max - min) } else { 0.0 };
                (scale, min)
            }
            FftScaling::Fixed { scale, offset } => (scale / len as f64, offset),
        };

        for (slot, &v) in out.iter_mut().zip(self.signal.iter()) {
            *slot = TOut::from_f64((v - offset) * scale);
        }
        Ok((scale, offset))
    }
}

impl Default for FftFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_band_is_identity() {
        let input: Vec<f32> = (0..64).map(|i| (i as f32 * 0.3).sin()).collect();
        let mut out = vec![0.0f32; 64];
        let mut filter = FftFilter::new();
        let (scale, offset) = filter
            .bandpass(&mut out, &input, 0, 33, FftScaling::Fixed { scale: 1.0, offset: 0.0 })
            .expect("bandpass");
        assert!((scale - 1.0 / 64.0).abs() < 1e-12);
        assert_eq!(offset, 0.0);
        for (a, b) in out.iter().zip(input.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} != {b}");
        }
    }

    #[test]
    fn test_dc_removal() {
        // Constant signal is pure DC; dropping bin 0 zeroes it.
        let input = vec![10.0f32; 32];
        let mut out = vec![1.0f32; 32];
        let mut filter = FftFilter::new();
        filter
            .bandpass(&mut out, &input, 1, 17, FftScaling::Fixed { scale: 1.0, offset: 0.0 })
            .expect("bandpass");
        for &v in &out {
            assert!(v.abs() < 1e-4, "expected 0, got {v}");
        }
    }

    #[test]
    fn test_autoscale_maps_to_byte_range() {
        let input: Vec<f32> = (0..128).map(|i| (i as f32 * 0.2).sin()).collect();
        let mut out = vec![0u8; 128];
        let mut filter = FftFilter::new();
        let (scale, offset) = filter
            .bandpass(&mut out, &input, 0, 65, FftScaling::Auto)
            .expect("bandpass");
        assert!(scale > 0.0);
        assert!(out.iter().any(|&v| v == 0));
        assert!(out.iter().any(|&v| v == 255));
        // Offset is the minimum of the (length-scaled) filtered signal.
        assert!(offset < 0.0);
    }

    #[test]
    fn test_plan_reuse_across_lengths() {
        let mut filter = FftFilter::new();
        let mut out32 = vec![0.0f32; 32];
        let mut out64 = vec![0.0f32; 64];
        let in32 = vec![1.0f32; 32];
        let in64 = vec![1.0f32; 64];
        filter
            .bandpass(&mut out32, &in32, 0, 17, FftScaling::Fixed { scale: 1.0, offset: 0.0 })
            .expect("len 32");
        filter
            .bandpass(&mut out64, &in64, 0, 33, FftScaling::Fixed { scale: 1.0, offset: 0.0 })
            .expect("len 64 after replan");
        filter
            .bandpass(&mut out32, &in32, 0, 17, FftScaling::Fixed { scale: 1.0, offset: 0.0 })
            .expect("len 32 again");
        for &v in &out32 {
            assert!((v - 1.0).abs() < 1e-4);
        }
    }
}

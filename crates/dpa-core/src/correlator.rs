//! Streaming Pearson correlator.
//!
//! The estimator at the heart of a correlation power analysis campaign.
//! It ingests aligned traces one at a time, in any order and from many
//! worker threads at once, while holding only fixed-size intermediate
//! state: per-sample `sum` / `square_sum`, and per-hypothesis cross-sums
//! `mult_sum[k][i] = sum over t of hypo[k][t] * d[t][i]`. Pearson's r
//! factors through those sums,
//!
//! ```text
//! r = (sum_xy - sum_x * y_mean) / (sigma_x * sigma_y * N)
//! ```
//!
//! so the trace stream never needs to be buffered; the full correlation
//! matrix can be materialized at any moment from the running sums.
//!
//! Contention is sharded per hypothesis: each `mult_sum` row has its own
//! lock, and the scalar shared state sits behind one short data lock.
//! Within `add_trace` the locks are taken in ascending hypothesis order,
//! each released before the next is acquired, with the data lock last.

use std::io::{self, Write};

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::buffer::Sample;
use crate::error::CorrelatorError;
use crate::stats::OnlineAccumulator;

/// Online estimator of the hypothesis-by-sample Pearson matrix.
///
/// Lifecycle: construct with the campaign dimensions, fill the hypothesis
/// table through [`hypo_mut`](Self::hypo_mut), call
/// [`preprocess`](Self::preprocess) once, ingest traces through the
/// `add_trace` family (concurrently if desired), then
/// [`update_matrix`](Self::update_matrix) and read the results.
///
/// `update_matrix` takes `&mut self`: ingestion must be quiesced before
/// the matrix is materialized, and the borrow checker enforces exactly
/// that for scoped-thread callers.
pub struct Correlator {
    samples: usize,
    traces: usize,
    keys: usize,

    /// Hypothesis table, `keys` rows of `traces` entries, row-major.
    hypo: Vec<u8>,

    /// Per-hypothesis running cross-sums, one lock per row.
    mult_sum: Vec<Mutex<Box<[f64]>>>,
    /// Per-sample running sums and the ingested-trace count.
    data: Mutex<OnlineAccumulator>,

    key_avg: Vec<f64>,
    key_stddev: Vec<f64>,
    preprocessed: bool,

    matrix: Vec<f64>,
    byte_matrix: Vec<u8>,
}

impl Correlator {
    /// Creates a correlator for `samples` points per trace, `traces`
    /// expected traces and `keys` hypotheses. All state is allocated and
    /// zeroed here; ingestion allocates nothing.
    ///
    /// # Panics
    ///
    /// Panics if any dimension is zero.
    #[must_use]
    pub fn new(samples: usize, traces: usize, keys: usize) -> Self {
        assert!(
            samples > 0 && traces > 0 && keys > 0,
            "correlator dimensions must be non-zero"
        );
        Self {
            samples,
            traces,
            keys,
            hypo: vec![0; keys * traces],
            mult_sum: (0..keys)
                .map(|_| Mutex::new(vec![0.0; samples].into_boxed_slice()))
                .collect(),
            data: Mutex::new(OnlineAccumulator::new(samples)),
            key_avg: vec![0.0; keys],
            key_stddev: vec![0.0; keys],
            preprocessed: false,
            matrix: vec![0.0; keys * samples],
            byte_matrix: vec![0; keys * samples],
        }
    }

    /// Sample points per trace.
    #[must_use]
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Declared trace count.
    #[must_use]
    pub fn traces(&self) -> usize {
        self.traces
    }

    /// Hypothesis count.
    #[must_use]
    pub fn keys(&self) -> usize {
        self.keys
    }

    /// Traces ingested so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.data.lock().count()
    }

    /// The hypothesis table, `keys` rows of `traces` entries, row-major.
    #[must_use]
    pub fn hypo(&self) -> &[u8] {
        &self.hypo
    }

    /// Writable view of the hypothesis table for bulk fill. The table must
    /// be complete before [`preprocess`](Self::preprocess) is called and
    /// is treated as immutable thereafter.
    pub fn hypo_mut(&mut self) -> &mut [u8] {
        &mut self.hypo
    }

    /// Computes the mean and standard deviation of every hypothesis row.
    ///
    /// Population statistics: the denominator is the declared trace count,
    /// matching the denominator `update_matrix` uses. Call once, after the
    /// hypothesis table is filled and before `update_matrix`; traces may
    /// already have been ingested since the row statistics do not depend
    /// on the incoming samples.
    pub fn preprocess(&mut self) {
        for k in 0..self.keys {
            let row = &self.hypo[k * self.traces..(k + 1) * self.traces];
            let mut sum: i64 = 0;
            let mut sq_sum: i64 = 0;
            for &h in row {
                let v = i64::from(h);
                sum += v;
                sq_sum += v * v;
            }
            let avg = sum as f64 / self.traces as f64;
            let var = (sq_sum as f64 / self.traces as f64 - avg * avg).max(0.0);
            self.key_avg[k] = avg;
            self.key_stddev[k] = var.sqrt();
        }
        self.preprocessed = true;
    }

    /// Folds one trace into the running sums.
    ///
    /// `trace_idx` selects the hypothesis column for this trace; `d` holds
    /// its aligned samples. Safe to call from many threads at once as long
    /// as every thread works on distinct trace indices. A concurrent
    /// `update_matrix` is prevented by the borrow checker, not by the
    /// locks: a single trace is *not* applied atomically across rows.
    pub fn add_trace<T: Sample>(&self, trace_idx: usize, d: &[T]) -> Result<(), CorrelatorError> {
        if trace_idx >= self.traces {
            return Err(CorrelatorError::TraceIndex {
                index: trace_idx,
                traces: self.traces,
            });
        }
        if d.len() != self.samples {
            return Err(CorrelatorError::Shape {
                len: d.len(),
                samples: self.samples,
            });
        }

        for (k, shard) in self.mult_sum.iter().enumerate() {
            let key = f64::from(self.hypo[k * self.traces + trace_idx]);
            let mut row = shard.lock();
            for (slot, v) in row.iter_mut().zip(d.iter()) {
                *slot += key * v.to_f64();
            }
        }
        self.data.lock().add(d);
        Ok(())
    }

    /// [`add_trace`](Self::add_trace) over unsigned 8-bit samples.
    pub fn add_trace_u8(&self, trace_idx: usize, d: &[u8]) -> Result<(), CorrelatorError> {
        self.add_trace(trace_idx, d)
    }

    /// [`add_trace`](Self::add_trace) over unsigned 16-bit samples.
    pub fn add_trace_u16(&self, trace_idx: usize, d: &[u16]) -> Result<(), CorrelatorError> {
        self.add_trace(trace_idx, d)
    }

    /// [`add_trace`](Self::add_trace) over 32-bit float samples.
    pub fn add_trace_float(&self, trace_idx: usize, d: &[f32]) -> Result<(), CorrelatorError> {
        self.add_trace(trace_idx, d)
    }

    /// Materializes the Pearson matrix from the running sums.
    ///
    /// For hypothesis `k` and sample point `i`:
    ///
    /// ```text
    /// cov  = mult_sum[k][i] - sum[i] * key_avg[k]
    /// r    = cov / (sqrt(var_i) * key_stddev[k] * count)
    /// ```
    ///
    /// A constant sample column (zero variance) or a constant hypothesis
    /// row (zero stddev) yields correlation 0 for the affected entries
    /// rather than a division by zero. The byte matrix maps the observed
    /// `[min, max]` correlation range onto `0..=255`; if every entry is
    /// equal it is all zeros.
    ///
    /// Ingesting fewer traces than declared logs a "preliminary" warning,
    /// more than declared logs an error; neither is fatal.
    pub fn update_matrix(&mut self) -> Result<(), CorrelatorError> {
        if !self.preprocessed {
            return Err(CorrelatorError::NotPreprocessed);
        }
        let data = self.data.get_mut();
        let count = data.count();
        if count == 0 {
            return Err(CorrelatorError::NoTraces);
        }
        if (count as usize) < self.traces {
            warn!(count, traces = self.traces, "preliminary result: not all declared traces ingested");
        }
        if (count as usize) > self.traces {
            error!(count, traces = self.traces, "too many traces ingested");
        }

        let countf = count as f64;
        let sum = data.sum();
        let square_sum = data.square_sum();

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for k in 0..self.keys {
            let row = self.mult_sum[k].get_mut();
            let stddev = self.key_stddev[k];
            let avg = self.key_avg[k];
            for i in 0..self.samples {
                let mean = sum[i] / countf;
                let var = square_sum[i] / countf - mean * mean;
                let r = if var <= 0.0 || stddev == 0.0 {
                    0.0
                } else {
                    (row[i] - sum[i] * avg) / (var.sqrt() * stddev * countf)
                };
                self.matrix[k * self.samples + i] = r;
                if r < min {
                    min = r;
                }
                if r > max {
                    max = r;
                }
            }
        }

        let spread = max - min;
        for (byte, &r) in self.byte_matrix.iter_mut().zip(self.matrix.iter()) {
            *byte = if spread > 0.0 {
                ((r - min) * 255.0 / spread).round() as u8
            } else {
                0
            };
        }
        Ok(())
    }

    /// The last materialized Pearson matrix, `keys` rows of `samples`
    /// entries, row-major. All zeros until `update_matrix` succeeds.
    #[must_use]
    pub fn matrix(&self) -> &[f64] {
        &self.matrix
    }

    /// The last materialized matrix rescaled onto `0..=255` for
    /// visualization.
    #[must_use]
    pub fn byte_matrix(&self) -> &[u8] {
        &self.byte_matrix
    }

    /// Snapshot of the shared per-sample sums `(sum, square_sum)`.
    #[must_use]
    pub fn sample_sums(&self) -> (Vec<f64>, Vec<f64>) {
        let data = self.data.lock();
        (data.sum().to_vec(), data.square_sum().to_vec())
    }

    /// Snapshot of one hypothesis row of the running cross-sums.
    ///
    /// # Panics
    ///
    /// Panics if `k` is out of range.
    #[must_use]
    pub fn mult_sum_row(&self, k: usize) -> Vec<f64> {
        self.mult_sum[k].lock().to_vec()
    }

    /// Writes the matrix to `sink` as text: one row per hypothesis,
    /// space-separated fixed six-decimal values, newline-terminated, with
    /// one extra newline at the end. The format loads directly in Octave.
    pub fn dump_matrix(&self, sink: &mut impl Write) -> io::Result<()> {
        for k in 0..self.keys {
            for i in 0..self.samples {
                write!(sink, "{:.6} ", self.matrix[k * self.samples + i])?;
            }
            writeln!(sink)?;
        }
        writeln!(sink)?;
        Ok(())
    }
}

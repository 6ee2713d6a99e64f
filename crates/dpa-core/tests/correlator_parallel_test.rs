//! Parallel and ordering equivalence of the streaming correlator.
//!
//! All accumulator updates are additions of integer-valued doubles, so
//! the final sums depend only on the multiset of ingested traces. The
//! test data stays within exact f64 integer range, making the expected
//! equalities bit-exact rather than tolerance-based.

use std::thread;

use dpa_core::correlator::Correlator;

const SAMPLES: usize = 64;
const TRACES: usize = 40;
const KEYS: usize = 8;
const WORKERS: usize = 4;

fn hypothesis(k: usize, t: usize) -> u8 {
    ((k * 7 + t * 13) % 9) as u8
}

fn trace(t: usize) -> Vec<u8> {
    (0..SAMPLES).map(|i| ((t * 31 + i * 17) % 251) as u8).collect()
}

fn build() -> Correlator {
    let mut c = Correlator::new(SAMPLES, TRACES, KEYS);
    {
        let hypo = c.hypo_mut();
        for k in 0..KEYS {
            for t in 0..TRACES {
                hypo[k * TRACES + t] = hypothesis(k, t);
            }
        }
    }
    c.preprocess();
    c
}

fn ingest_sequential(c: &Correlator, order: impl Iterator<Item = usize>) {
    for t in order {
        c.add_trace_u8(t, &trace(t)).expect("add_trace");
    }
}

#[test]
fn test_parallel_workers_match_sequential() {
    let mut sequential = build();
    ingest_sequential(&sequential, 0..TRACES);
    sequential.update_matrix().expect("sequential matrix");

    let mut parallel = build();
    thread::scope(|scope| {
        let shared = &parallel;
        for w in 0..WORKERS {
            scope.spawn(move || {
                for t in (w..TRACES).step_by(WORKERS) {
                    shared.add_trace_u8(t, &trace(t)).expect("add_trace");
                }
            });
        }
    });
    parallel.update_matrix().expect("parallel matrix");

    assert_eq!(parallel.count(), sequential.count());
    assert_eq!(parallel.sample_sums(), sequential.sample_sums());
    for k in 0..KEYS {
        assert_eq!(
            parallel.mult_sum_row(k),
            sequential.mult_sum_row(k),
            "mult_sum row {k} diverged"
        );
    }
    assert_eq!(parallel.matrix(), sequential.matrix());
}

#[test]
fn test_ingestion_order_is_irrelevant() {
    let mut forward = build();
    ingest_sequential(&forward, 0..TRACES);
    forward.update_matrix().expect("forward matrix");

    let mut backward = build();
    ingest_sequential(&backward, (0..TRACES).rev());
    backward.update_matrix().expect("backward matrix");

    // Deterministic shuffle: traces interleaved from both ends.
    let mut interleaved = build();
    let order = (0..TRACES / 2).flat_map(|t| [t, TRACES - 1 - t]);
    ingest_sequential(&interleaved, order);
    interleaved.update_matrix().expect("interleaved matrix");

    assert_eq!(forward.sample_sums(), backward.sample_sums());
    assert_eq!(forward.sample_sums(), interleaved.sample_sums());
    for k in 0..KEYS {
        assert_eq!(forward.mult_sum_row(k), backward.mult_sum_row(k));
        assert_eq!(forward.mult_sum_row(k), interleaved.mult_sum_row(k));
    }
    assert_eq!(forward.matrix(), backward.matrix());
    assert_eq!(forward.matrix(), interleaved.matrix());
}

//! Peak extraction.

use crate::buffer::Sample;

/// Extracts the maximum of every excursion above `avg + std_dev`.
///
/// The detector arms once the signal first drops below `avg - std_dev`,
/// then tracks the running maximum of each excursion that crosses
/// `avg + std_dev`, emitting it when the signal falls back below the low
/// threshold. An excursion still open at the end of the input is flushed.
///
/// With a non-zero `break_count`, a gap of more than `break_length`
/// samples between consecutive peaks decrements it; when it reaches zero
/// everything collected so far is discarded, so the output restarts at
/// the first operation after the configured number of pauses. This is how
/// a specific operation inside a multi-operation acquisition is isolated.
pub fn peak_extract<T: Sample>(
    input: &[T],
    avg: f64,
    std_dev: f64,
    break_length: usize,
    mut break_count: usize,
) -> Vec<T> {
    let low = avg - std_dev;
    let high = avg + std_dev;

    // 0: idle until the first drop below `low`
    // 1: armed, waiting for a rise above `high`
    // 2: inside an excursion, tracking its maximum
    let mut state = 0u8;
    let mut max = f64::NEG_INFINITY;
    let mut max_sample = T::default();
    let mut last_peak = 0usize;
    let mut out = Vec::new();

    for (i, &v) in input.iter().enumerate() {
        let x = v.to_f64();
        if state == 0 && x < low {
            state = 1;
            max = x;
            max_sample = v;
        }
        if state != 0 && x > max {
            max = x;
            max_sample = v;
        }
        if state == 1 && x > high {
            state = 2;
        }
        if state == 2 && x < low {
            state = 1;
            if break_count > 0 && i - last_peak > break_length {
                break_count -= 1;
                if break_count == 0 {
                    out.clear();
                }
            }
            out.push(max_sample);
            last_peak = i;
            max = x;
            max_sample = v;
        }
    }
    if state == 2 {
        out.push(max_sample);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_excursion() {
        let mut input = vec![50u8; 10];
        input.extend([120, 140, 130]);
        input.extend([50u8; 10]);
        let peaks = peak_extract(&input, 100.0, 10.0, 0, 0);
        assert_eq!(peaks, vec![140]);
    }

    #[test]
    fn test_requires_initial_drop() {
        // Signal that never falls below avg - std_dev never arms.
        let input = [120u8; 20];
        let peaks = peak_extract(&input, 100.0, 10.0, 0, 0);
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_open_excursion_flushed() {
        let mut input = vec![50u8; 5];
        input.extend([150u8; 5]);
        let peaks = peak_extract(&input, 100.0, 10.0, 0, 0);
        assert_eq!(peaks, vec![150]);
    }

    #[test]
    fn test_break_discards_leading_peaks() {
        // Two peaks separated well beyond the break length: the break
        // fires at the second peak, dropping the first; the second and a
        // trailing third survive.
        let mut input = vec![50u8; 100];
        input.extend([150u8; 5]);
        input.extend(vec![50u8; 400]);
        input.extend([150u8; 5]);
        input.extend(vec![50u8; 10]);
        input.extend([150u8; 5]);
        let peaks = peak_extract(&input, 100.0, 10.0, 200, 1);
        assert_eq!(peaks, vec![150, 150]);
    }
}

//! Logarithmically spaced integer lags.

/// `n` integers log-spaced between `start` and `stop` inclusive.
///
/// Points are rounded to the nearest integer and repeated values dropped,
/// so the result may be shorter than `n`. A `start` of zero is treated as 1.
///
/// ```
/// assert_eq!(
///     kpc_trace::logspacei(1, 100, 10),
///     vec![1, 2, 3, 5, 8, 13, 22, 36, 60, 100]
/// );
/// ```
pub fn logspacei(start: usize, stop: usize, n: usize) -> Vec<usize> {
    let start = start.max(1);
    match n {
        0 => return Vec::new(),
        1 => return vec![start],
        _ => {}
    }
    let lo = (start as f64).log10();
    let hi = (stop.max(1) as f64).log10();
    let step = (hi - lo) / (n - 1) as f64;

    let mut lags: Vec<usize> = Vec::with_capacity(n);
    for i in 0..n {
        let lag = 10f64.powf(lo + i as f64 * step).round() as usize;
        if lags.last() != Some(&lag) {
            lags.push(lag);
        }
    }
    lags
}

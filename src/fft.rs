//! Real-signal FFT helpers.
//!
//! Spectra follow the convention `spectrum = rfft(trace) / sampling_rate * √2`
//! so that a spectrum has units of amplitude per GHz and the inverse transform
//! recovers the original trace exactly.
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

/// Forward and inverse plans for real traces of a fixed length.
#[derive(Clone)]
pub struct RealFft {
    n: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for RealFft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealFft").field("n", &self.n).finish()
    }
}

impl RealFft {
    pub fn new(n: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            n,
            forward: planner.plan_fft_forward(n),
            inverse: planner.plan_fft_inverse(n),
        }
    }

    /// Number of time-domain samples.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Number of frequency bins, `n / 2 + 1`.
    pub fn n_frequencies(&self) -> usize {
        self.n / 2 + 1
    }

    /// Forward transform of a real trace. Traces shorter than the plan are
    /// zero padded, longer ones truncated.
    pub fn time_to_freq(&self, trace: &[f64], sampling_rate: f64) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = (0..self.n)
            .map(|i| Complex64::new(trace.get(i).copied().unwrap_or(0.0), 0.0))
            .collect();
        self.forward.process(&mut buffer);

        let scale = std::f64::consts::SQRT_2 / sampling_rate;
        buffer.truncate(self.n_frequencies());
        buffer.iter_mut().for_each(|c| *c *= scale);
        buffer
    }

    /// Inverse of [`RealFft::time_to_freq`].
    pub fn freq_to_time(&self, spectrum: &[Complex64], sampling_rate: f64) -> Vec<f64> {
        let n = self.n;
        if n == 0 {
            return Vec::new();
        }
        let zero = Complex64::new(0.0, 0.0);
        let mut buffer = vec![zero; n];
        for (k, slot) in buffer.iter_mut().enumerate().take(self.n_frequencies()) {
            *slot = spectrum.get(k).copied().unwrap_or(zero);
        }
        // Hermitian completion. The Nyquist bin of an even length trace and the
        // DC bin are their own mirror images and must be real.
        buffer[0].im = 0.0;
        if n % 2 == 0 && n > 0 {
            buffer[n / 2].im = 0.0;
        }
        for k in 1..self.n_frequencies() {
            let mirror = n - k;
            if mirror != k && mirror < n {
                buffer[mirror] = buffer[k].conj();
            }
        }
        self.inverse.process(&mut buffer);

        let scale = sampling_rate / std::f64::consts::SQRT_2 / n as f64;
        buffer.iter().map(|c| c.re * scale).collect()
    }

    /// Amplitude of the analytic signal, i.e. the Hilbert envelope of `trace`.
    pub fn envelope(&self, trace: &[f64]) -> Vec<f64> {
        let n = self.n;
        let mut buffer: Vec<Complex64> = (0..n)
            .map(|i| Complex64::new(trace.get(i).copied().unwrap_or(0.0), 0.0))
            .collect();
        self.forward.process(&mut buffer);
        for (k, c) in buffer.iter_mut().enumerate() {
            let h = if k == 0 || (n % 2 == 0 && k == n / 2) {
                1.0
            } else if k < n.div_ceil(2) {
                2.0
            } else {
                0.0
            };
            *c *= h;
        }
        self.inverse.process(&mut buffer);
        buffer.iter().map(|c| c.norm() / n as f64).collect()
    }
}

/// Frequencies of the bins returned by [`RealFft::time_to_freq`].
///
/// # Examples
///
/// ```
/// use icesim::fft::rfft_frequencies;
/// assert_eq!(rfft_frequencies(4, 0.5), vec![0.0, 0.5, 1.0]);
/// ```
pub fn rfft_frequencies(n: usize, dt: f64) -> Vec<f64> {
    let df = 1.0 / (n as f64 * dt);
    (0..n / 2 + 1).map(|k| k as f64 * df).collect()
}

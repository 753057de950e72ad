use crate::error::{Error, Result};
use rand::Rng;
use rand_distr::{Distribution, Normal};

#[derive(Debug)]
/// Thermal noise source.
///
/// Yields independent samples of zero mean white Gaussian noise with standard
/// deviation `vrms`, and adds them to traces.
pub struct NoiseAdder<R> {
    vrms: f64,
    normal: Normal<f64>,
    rng: R,
}

impl<R> NoiseAdder<R>
where
    R: Rng,
{
    pub fn new(vrms: f64, rng: R) -> Result<Self> {
        let normal = Normal::new(0.0, vrms)
            .map_err(|e| Error::Config(format!("invalid noise vrms {vrms}: {e}")))?;

        Ok(Self { vrms, normal, rng })
    }

    pub fn vrms(&self) -> f64 {
        self.vrms
    }

    pub fn add_to(&mut self, trace: &mut [f64]) {
        for sample in trace.iter_mut() {
            *sample += self.normal.sample(&mut self.rng);
        }
    }
}

impl<R> Iterator for NoiseAdder<R>
where
    R: Rng,
{
    type Item = f64;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.normal.sample(&mut self.rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn noise_has_requested_rms() {
        let noise = NoiseAdder::new(0.01, StdRng::seed_from_u64(1)).unwrap();
        let samples: Vec<f64> = noise.take(100_000).collect();
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let rms = (samples.iter().map(|x| x * x).sum::<f64>() / n).sqrt();
        assert!(mean.abs() < 2e-4);
        assert!((rms - 0.01).abs() < 1e-4);
    }

    #[test]
    fn seeded_noise_is_reproducible() {
        let mut a = NoiseAdder::new(1.0, StdRng::seed_from_u64(42)).unwrap();
        let mut b = NoiseAdder::new(1.0, StdRng::seed_from_u64(42)).unwrap();
        let mut x = vec![0.5; 16];
        let mut y = vec![0.5; 16];
        a.add_to(&mut x);
        b.add_to(&mut y);
        assert_eq!(x, y);
        assert!(x.iter().any(|v| *v != 0.5));
    }

    #[test]
    fn negative_vrms_is_a_config_error() {
        assert!(matches!(
            NoiseAdder::new(-1.0, StdRng::seed_from_u64(0)),
            Err(Error::Config(_))
        ));
    }
}

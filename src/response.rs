//! Antenna and analog signal chain response.
use crate::detector::{AmplifierDescription, Detector};
use crate::error::{Error, Result};
use crate::fft::{rfft_frequencies, RealFft};
use crate::units::{GHZ, M};
use rustfft::num_complex::Complex64;
use std::collections::HashMap;
use std::f64::consts::PI;

/// Electric field spectra in the on-sky `(eTheta, ePhi)` components.
#[derive(Clone, Debug, PartialEq)]
pub struct ElectricField {
    pub theta: Vec<Complex64>,
    pub phi: Vec<Complex64>,
}

impl ElectricField {
    pub fn zeros(n_frequencies: usize) -> Self {
        Self {
            theta: vec![Complex64::new(0.0, 0.0); n_frequencies],
            phi: vec![Complex64::new(0.0, 0.0); n_frequencies],
        }
    }

    /// Largest spectral magnitude of either component.
    pub fn peak(&self) -> f64 {
        self.theta
            .iter()
            .chain(&self.phi)
            .map(|c| c.norm())
            .fold(0.0, f64::max)
    }
}

/// Frequency dependent effective length of an antenna.
pub trait AntennaPattern {
    /// Effective length components `(l_theta, l_phi)` for a signal arriving
    /// from `(zenith, azimuth)`, one value per frequency.
    fn effective_length(
        &self,
        zenith: f64,
        azimuth: f64,
        frequencies: &[f64],
        orientation: f64,
    ) -> Result<(Vec<Complex64>, Vec<Complex64>)>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DipoleAxis {
    Vertical,
    Horizontal,
}

/// Short dipole with a single resonance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dipole {
    pub axis: DipoleAxis,
    pub effective_height: f64,
    pub resonance: f64,
}

impl Dipole {
    pub fn from_name(name: &str) -> Result<Self> {
        let axis = match name {
            "vpol_dipole" => DipoleAxis::Vertical,
            "hpol_dipole" => DipoleAxis::Horizontal,
            _ => {
                return Err(Error::UnknownPreset {
                    kind: "antenna",
                    name: name.to_string(),
                })
            }
        };
        Ok(Self {
            axis,
            effective_height: 0.2 * M,
            resonance: 0.3 * GHZ,
        })
    }

    fn height(&self, frequency: f64) -> f64 {
        let x = frequency / self.resonance;
        self.effective_height * 2.0 * x / (1.0 + x * x)
    }
}

impl AntennaPattern for Dipole {
    fn effective_length(
        &self,
        zenith: f64,
        azimuth: f64,
        frequencies: &[f64],
        orientation: f64,
    ) -> Result<(Vec<Complex64>, Vec<Complex64>)> {
        if !zenith.is_finite() || !azimuth.is_finite() {
            return Err(Error::InvalidInput(format!(
                "no antenna response towards zenith {zenith}, azimuth {azimuth}"
            )));
        }
        let (theta_factor, phi_factor) = match self.axis {
            DipoleAxis::Vertical => (-zenith.sin(), 0.0),
            DipoleAxis::Horizontal => (
                zenith.cos() * (azimuth - orientation).cos(),
                -(azimuth - orientation).sin(),
            ),
        };
        let heights: Vec<f64> = frequencies.iter().map(|&f| self.height(f)).collect();
        Ok((
            heights.iter().map(|h| Complex64::new(h * theta_factor, 0.0)).collect(),
            heights.iter().map(|h| Complex64::new(h * phi_factor, 0.0)).collect(),
        ))
    }
}

/// Butterworth band-pass with linear gain.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalChain {
    high_pass: f64,
    low_pass: f64,
    gain: f64,
    poles: Vec<Complex64>,
}

impl SignalChain {
    pub fn new(amplifier: &AmplifierDescription) -> Self {
        let order = amplifier.order.max(1) as usize;
        // Normalized analog prototype poles on the left half of the unit circle.
        let poles = (0..order)
            .map(|k| {
                Complex64::from_polar(1.0, PI * (2 * k + order + 1) as f64 / (2 * order) as f64)
            })
            .collect();
        Self {
            high_pass: amplifier.high_pass,
            low_pass: amplifier.low_pass,
            gain: amplifier.gain * 10f64.powf(amplifier.extra_gain_db / 20.0),
            poles,
        }
    }

    pub fn transfer(&self, frequency: f64) -> Complex64 {
        if frequency <= 0.0 {
            return Complex64::new(0.0, 0.0);
        }
        let s_low = Complex64::new(0.0, frequency / self.low_pass);
        let s_high = Complex64::new(0.0, -self.high_pass / frequency);
        self.poles.iter().fold(Complex64::new(self.gain, 0.0), |h, p| {
            h / ((s_low - p) * (s_high - p))
        })
    }
}

/// Turns an incident electric field into the voltage trace of one channel.
pub trait DetectorResponse {
    /// Voltage trace for a field arriving from `(zenith, azimuth)`. The
    /// length of the trace is `fft.len()`; the zero frequency bin is dropped.
    fn apply(
        &self,
        field: &ElectricField,
        zenith: f64,
        azimuth: f64,
        station: u32,
        channel: u32,
        fft: &RealFft,
    ) -> Result<Vec<f64>>;
}

struct ChannelResponse {
    antenna: Box<dyn AntennaPattern>,
    orientation: f64,
    sampling_rate: f64,
    chain: SignalChain,
}

/// Antenna projection followed by the channel's analog chain, for every
/// channel of a [`Detector`].
pub struct AntennaChainResponse {
    channels: HashMap<(u32, u32), ChannelResponse>,
}

impl std::fmt::Debug for AntennaChainResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AntennaChainResponse")
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl AntennaChainResponse {
    /// Resolves the antenna of every channel. An antenna model that does not
    /// exist is fatal.
    pub fn new(detector: &Detector) -> Result<Self> {
        let mut channels = HashMap::new();
        for station in &detector.stations {
            for channel in &station.channels {
                let antenna = Dipole::from_name(&channel.antenna_model).map_err(|e| {
                    Error::AntennaResponse {
                        station: station.id,
                        channel: channel.id,
                        reason: e.to_string(),
                    }
                })?;
                channels.insert(
                    (station.id, channel.id),
                    ChannelResponse {
                        antenna: Box::new(antenna),
                        orientation: channel.orientation_azimuth,
                        sampling_rate: channel.sampling_rate,
                        chain: SignalChain::new(&channel.amplifier),
                    },
                );
            }
        }
        Ok(Self { channels })
    }
}

impl DetectorResponse for AntennaChainResponse {
    fn apply(
        &self,
        field: &ElectricField,
        zenith: f64,
        azimuth: f64,
        station: u32,
        channel: u32,
        fft: &RealFft,
    ) -> Result<Vec<f64>> {
        let failure = |reason: String| Error::AntennaResponse {
            station,
            channel,
            reason,
        };
        let response = self
            .channels
            .get(&(station, channel))
            .ok_or_else(|| failure("channel is not part of the detector".to_string()))?;

        let frequencies = rfft_frequencies(fft.len(), 1.0 / response.sampling_rate);
        let (l_theta, l_phi) = response
            .antenna
            .effective_length(zenith, azimuth, &frequencies, response.orientation)
            .map_err(|e| failure(e.to_string()))?;

        let mut voltage: Vec<Complex64> = frequencies
            .iter()
            .enumerate()
            .map(|(i, &f)| {
                let e_theta = field.theta.get(i).copied().unwrap_or_default();
                let e_phi = field.phi.get(i).copied().unwrap_or_default();
                (l_theta[i] * e_theta + l_phi[i] * e_phi) * response.chain.transfer(f)
            })
            .collect();
        if voltage.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
            return Err(failure(format!(
                "non-finite response towards zenith {zenith}, azimuth {azimuth}"
            )));
        }
        if let Some(dc) = voltage.first_mut() {
            *dc = Complex64::new(0.0, 0.0);
        }
        Ok(fft.freq_to_time(&voltage, response.sampling_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::tests::two_channel_station;

    #[test]
    fn butterworth_band_pass() {
        let chain = SignalChain::new(&AmplifierDescription {
            high_pass: 0.1,
            low_pass: 0.5,
            order: 4,
            gain: 2.0,
            extra_gain_db: 0.0,
        });
        let half_power = 2.0 / std::f64::consts::SQRT_2;
        // the cutoffs are far apart, so each -3 dB point is set by one filter
        assert!((chain.transfer(0.5).norm() - half_power).abs() < 0.02);
        assert!((chain.transfer(0.1).norm() - half_power).abs() < 0.02);
        assert!((chain.transfer(0.22).norm() - 2.0).abs() < 0.02);
        assert!(chain.transfer(0.01).norm() < 1e-3);
        assert!(chain.transfer(3.0).norm() < 1e-2);
        assert_eq!(chain.transfer(0.0), Complex64::new(0.0, 0.0));
    }

    #[test]
    fn extra_gain_in_db() {
        let amplifier = AmplifierDescription {
            extra_gain_db: 20.0,
            ..AmplifierDescription::default()
        };
        let a = SignalChain::new(&AmplifierDescription::default()).transfer(0.3);
        let b = SignalChain::new(&amplifier).transfer(0.3);
        assert!((b.norm() / a.norm() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn dipole_polarization() {
        let vpol = Dipole::from_name("vpol_dipole").unwrap();
        let (theta, phi) = vpol.effective_length(PI / 2.0, 0.3, &[0.3], 0.0).unwrap();
        assert!((theta[0].re + 0.2).abs() < 1e-12);
        assert_eq!(phi[0].norm(), 0.0);

        let hpol = Dipole::from_name("hpol_dipole").unwrap();
        let (theta, phi) = hpol.effective_length(PI / 2.0, PI / 2.0, &[0.3], 0.0).unwrap();
        assert!(theta[0].norm() < 1e-12);
        assert!((phi[0].re + 0.2).abs() < 1e-12);

        assert!(vpol.effective_length(f64::NAN, 0.0, &[0.3], 0.0).is_err());
        assert!(matches!(
            Dipole::from_name("lpda_100MHz"),
            Err(Error::UnknownPreset { .. })
        ));
    }

    #[test]
    fn unknown_antenna_is_fatal() {
        let mut station = two_channel_station(3, [0.0; 3]);
        station.channels[1].antenna_model = "bicone_v9".to_string();
        let detector = Detector::new(vec![station]).unwrap();
        assert!(matches!(
            AntennaChainResponse::new(&detector),
            Err(Error::AntennaResponse {
                station: 3,
                channel: 1,
                ..
            })
        ));
    }

    #[test]
    fn trace_has_no_offset() {
        let detector = Detector::new(vec![two_channel_station(3, [0.0; 3])]).unwrap();
        let response = AntennaChainResponse::new(&detector).unwrap();
        let fft = RealFft::new(512);
        let field = ElectricField {
            theta: vec![Complex64::new(1e-3, 0.0); fft.n_frequencies()],
            phi: vec![Complex64::new(0.0, 0.0); fft.n_frequencies()],
        };
        let trace = response.apply(&field, 1.2, 0.0, 3, 0, &fft).unwrap();
        assert_eq!(trace.len(), 512);
        let mean = trace.iter().sum::<f64>() / trace.len() as f64;
        assert!(mean.abs() < 1e-12);
        assert!(trace.iter().any(|v| v.abs() > 0.0));

        assert!(response.apply(&field, f64::NAN, 0.0, 3, 0, &fft).is_err());
        assert!(response.apply(&field, 1.2, 0.0, 3, 9, &fft).is_err());
    }
}

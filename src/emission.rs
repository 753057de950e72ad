//! Askaryan radio emission of particle showers.
use crate::error::{Error, Result};
use crate::fft::{rfft_frequencies, RealFft};
use crate::units::{DEG, EV, GHZ, MHZ, TEV, V};
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, LN_2, TAU};
use std::path::Path;

/// Kind of particle shower.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShowerType {
    /// Electromagnetic.
    Em,
    /// Hadronic.
    Had,
}

/// Everything an emission model needs to produce one spectrum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmissionRequest {
    /// Shower energy.
    pub energy: f64,
    /// Angle between the shower axis and the launch vector.
    pub viewing_angle: f64,
    pub n_samples: usize,
    /// Sampling interval of the trace.
    pub dt: f64,
    pub shower_type: ShowerType,
    /// Refractive index at the vertex.
    pub n_index: f64,
    pub path_length: f64,
}

impl EmissionRequest {
    pub fn cherenkov_angle(&self) -> f64 {
        cherenkov_angle(self.n_index)
    }
}

/// `arccos(1 / n)`.
///
/// # Examples
///
/// ```
/// use icesim::emission::cherenkov_angle;
/// assert!((cherenkov_angle(1.78).to_degrees() - 55.8).abs() < 0.1);
/// ```
pub fn cherenkov_angle(n: f64) -> f64 {
    (1.0 / n).clamp(-1.0, 1.0).acos()
}

/// Produces the frequency domain electric field of a shower, in the
/// convention of [`RealFft::time_to_freq`].
///
/// Implementations never fail: an input far off the Cherenkov cone just
/// yields a vanishing spectrum. The returned spectrum has `n_samples / 2 + 1`
/// bins and a zero DC bin. `fft` is a plan for `request.n_samples` samples,
/// shared by every caller that works on traces of that length.
pub trait EmissionModel {
    fn spectrum(&self, request: &EmissionRequest, fft: &RealFft) -> Vec<Complex64>;
}

/// Closed form frequency domain parametrisations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParametricModel {
    #[serde(rename = "ZHS1992")]
    Zhs1992,
    Alvarez2000,
}

impl ParametricModel {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "ZHS1992" => Ok(Self::Zhs1992),
            "Alvarez2000" => Ok(Self::Alvarez2000),
            _ => Err(Error::UnknownPreset {
                kind: "emission model",
                name: name.to_string(),
            }),
        }
    }

    // Field at 1 m on the cone, in V/m/MHz, for `frequency` in GHz.
    fn form_factor(&self, energy: f64, frequency: f64) -> f64 {
        let e = energy / TEV;
        match self {
            Self::Zhs1992 => {
                let x = frequency / 0.5;
                1.1e-7 * e * x / (1.0 + 0.4 * x * x)
            }
            Self::Alvarez2000 => {
                let x = frequency / 1.15;
                2.53e-7 * e * x / (1.0 + x.powf(1.44))
            }
        }
    }

    // Angular width of the cone at `frequency`.
    fn cone_width(&self, energy: f64, frequency: f64, shower_type: ShowerType) -> f64 {
        let scale = 0.5 * GHZ / frequency;
        match (self, shower_type) {
            (Self::Zhs1992, _) => 2.4 * DEG * scale,
            (Self::Alvarez2000, ShowerType::Em) => {
                let e_lpm = 2e15 * EV;
                2.7 * DEG * scale * (e_lpm / (0.14 * energy + e_lpm)).powf(0.3)
            }
            (Self::Alvarez2000, ShowerType::Had) => {
                let epsilon = (energy / TEV).log10();
                let width = if epsilon < 0.0 {
                    2.07 - 0.33 * epsilon + 7.5e-2 * epsilon * epsilon
                } else if epsilon < 2.0 {
                    1.744 + 1.21e-2 * epsilon
                } else if epsilon < 5.0 {
                    4.23 - 0.785 * epsilon + 5.5e-2 * epsilon * epsilon
                } else {
                    4.23 - 0.785 * 5.0 + 5.5e-2 * 25.0
                };
                width * DEG * scale
            }
        }
    }
}

/// Parametric Askaryan emission.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Askaryan {
    pub model: ParametricModel,
}

impl Askaryan {
    pub fn new(model: ParametricModel) -> Self {
        Self { model }
    }
}

impl EmissionModel for Askaryan {
    fn spectrum(&self, request: &EmissionRequest, _fft: &RealFft) -> Vec<Complex64> {
        let frequencies = rfft_frequencies(request.n_samples, request.dt);
        let theta_c = request.cherenkov_angle();
        let sin_ratio = request.viewing_angle.sin() / theta_c.sin();
        // Place the pulse in the middle of the trace.
        let t_0 = request.n_samples as f64 * request.dt / 2.0;
        let distance = request.path_length.max(f64::MIN_POSITIVE);

        frequencies
            .iter()
            .map(|&f| {
                if f <= 0.0 || !request.energy.is_finite() || request.energy <= 0.0 {
                    return Complex64::new(0.0, 0.0);
                }
                let width = self.model.cone_width(request.energy, f, request.shower_type);
                let offset = (request.viewing_angle - theta_c) / width;
                let amplitude = self.model.form_factor(request.energy, f) * V / MHZ
                    * sin_ratio
                    * (-LN_2 * offset * offset).exp()
                    / distance;
                if !amplitude.is_finite() {
                    return Complex64::new(0.0, 0.0);
                }
                Complex64::from_polar(amplitude, -FRAC_PI_2 - TAU * f * t_0)
            })
            .collect()
    }
}

/// One pre-computed pulse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub distance: f64,
    pub viewing_angle: f64,
    pub energy: f64,
    pub shower_type: ShowerType,
    pub dt: f64,
    pub trace: Vec<f64>,
}

/// Pre-tabulated pulses, looked up by nearest neighbour in distance, then
/// viewing angle, then log energy, and rescaled to the requested energy and
/// distance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateLibrary {
    templates: Vec<Template>,
}

impl TemplateLibrary {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Build a library by evaluating `model` on the grid
    /// `distances × viewing_angles × energies`.
    #[allow(clippy::too_many_arguments)]
    pub fn tabulate(
        model: &dyn EmissionModel,
        distances: &[f64],
        viewing_angles: &[f64],
        energies: &[f64],
        shower_type: ShowerType,
        n_index: f64,
        n_samples: usize,
        dt: f64,
    ) -> Self {
        let fft = RealFft::new(n_samples);
        let mut templates = Vec::with_capacity(distances.len() * viewing_angles.len() * energies.len());
        for &distance in distances {
            for &viewing_angle in viewing_angles {
                for &energy in energies {
                    let request = EmissionRequest {
                        energy,
                        viewing_angle,
                        n_samples,
                        dt,
                        shower_type,
                        n_index,
                        path_length: distance,
                    };
                    let spectrum = model.spectrum(&request, &fft);
                    templates.push(Template {
                        distance,
                        viewing_angle,
                        energy,
                        shower_type,
                        dt,
                        trace: fft.freq_to_time(&spectrum, 1.0 / dt),
                    });
                }
            }
        }
        Self { templates }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Nearest template for `request`, if the library is not empty.
    pub fn nearest(&self, request: &EmissionRequest) -> Option<&Template> {
        let same_type: Vec<&Template> = self
            .templates
            .iter()
            .filter(|t| t.shower_type == request.shower_type)
            .collect();
        let pool = if same_type.is_empty() {
            self.templates.iter().collect()
        } else {
            same_type
        };

        let distance = nearest_value(pool.iter().map(|t| t.distance), request.path_length)?;
        let pool: Vec<&Template> = pool.into_iter().filter(|t| t.distance == distance).collect();
        let angle = nearest_value(pool.iter().map(|t| t.viewing_angle), request.viewing_angle)?;
        let log_energy = request.energy.max(f64::MIN_POSITIVE).log10();
        pool.into_iter()
            .filter(|t| t.viewing_angle == angle)
            .min_by(|a, b| {
                let da = (a.energy.log10() - log_energy).abs();
                let db = (b.energy.log10() - log_energy).abs();
                da.total_cmp(&db)
            })
    }
}

fn nearest_value(values: impl Iterator<Item = f64>, target: f64) -> Option<f64> {
    values.min_by(|a, b| (a - target).abs().total_cmp(&(b - target).abs()))
}

// Linear resampling of `trace` (interval `from_dt`) onto `n` samples of
// interval `to_dt`. Samples outside the template are zero.
fn resample(trace: &[f64], from_dt: f64, to_dt: f64, n: usize) -> Vec<f64> {
    if from_dt == to_dt {
        return (0..n).map(|i| trace.get(i).copied().unwrap_or(0.0)).collect();
    }
    (0..n)
        .map(|i| {
            let x = i as f64 * to_dt / from_dt;
            let j = x.floor() as usize;
            let w = x - j as f64;
            match (trace.get(j), trace.get(j + 1)) {
                (Some(a), Some(b)) => a * (1.0 - w) + b * w,
                (Some(a), None) if w == 0.0 => *a,
                _ => 0.0,
            }
        })
        .collect()
}

impl EmissionModel for TemplateLibrary {
    fn spectrum(&self, request: &EmissionRequest, fft: &RealFft) -> Vec<Complex64> {
        let n_frequencies = request.n_samples / 2 + 1;
        let Some(template) = self.nearest(request) else {
            return vec![Complex64::new(0.0, 0.0); n_frequencies];
        };
        let scale = request.energy / template.energy * template.distance / request.path_length;
        let mut trace = resample(&template.trace, template.dt, request.dt, request.n_samples);
        if scale.is_finite() {
            trace.iter_mut().for_each(|x| *x *= scale);
        } else {
            trace.iter_mut().for_each(|x| *x = 0.0);
        }
        let mut spectrum = fft.time_to_freq(&trace, 1.0 / request.dt);
        if let Some(dc) = spectrum.first_mut() {
            *dc = Complex64::new(0.0, 0.0);
        }
        spectrum
    }
}

/// The emission strategy selected for a run.
#[derive(Clone, Debug, PartialEq)]
pub enum EmissionStrategy {
    Parametric(Askaryan),
    Templates(TemplateLibrary),
}

impl EmissionModel for EmissionStrategy {
    fn spectrum(&self, request: &EmissionRequest, fft: &RealFft) -> Vec<Complex64> {
        match self {
            Self::Parametric(model) => model.spectrum(request, fft),
            Self::Templates(library) => library.spectrum(request, fft),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{EEV, M, NS, PEV};

    fn request(viewing_angle: f64) -> EmissionRequest {
        EmissionRequest {
            energy: 1.0 * EEV,
            viewing_angle,
            n_samples: 256,
            dt: 0.5 * NS,
            shower_type: ShowerType::Had,
            n_index: 1.78,
            path_length: 1000.0 * M,
        }
    }

    fn fft() -> RealFft {
        RealFft::new(256)
    }

    fn peak(spectrum: &[Complex64]) -> f64 {
        spectrum.iter().map(|c| c.norm()).fold(0.0, f64::max)
    }

    #[test]
    fn spectrum_shape() {
        for model in [ParametricModel::Zhs1992, ParametricModel::Alvarez2000] {
            let askaryan = Askaryan::new(model);
            let spectrum = askaryan.spectrum(&request(cherenkov_angle(1.78)), &fft());
            assert_eq!(spectrum.len(), 129);
            assert_eq!(spectrum[0], Complex64::new(0.0, 0.0));
            assert!(peak(&spectrum) > 0.0);
        }
    }

    #[test]
    fn amplitude_peaks_on_the_cone() {
        let askaryan = Askaryan::new(ParametricModel::Alvarez2000);
        let theta_c = cherenkov_angle(1.78);
        let on = peak(&askaryan.spectrum(&request(theta_c), &fft()));
        let near = peak(&askaryan.spectrum(&request(theta_c + 2.0 * DEG), &fft()));
        let far = peak(&askaryan.spectrum(&request(theta_c + 40.0 * DEG), &fft()));
        assert!(on > near);
        assert!(near > far);
        assert!(far < 0.1 * on);
    }

    #[test]
    fn degrades_gracefully() {
        let askaryan = Askaryan::new(ParametricModel::Zhs1992);
        let mut weird = request(0.0);
        weird.path_length = 0.0;
        assert!(askaryan.spectrum(&weird, &fft()).iter().all(|c| c.re.is_finite() && c.im.is_finite()));
        let mut dead = request(1.0);
        dead.energy = 0.0;
        assert!(askaryan.spectrum(&dead, &fft()).iter().all(|c| c.norm() == 0.0));
    }

    #[test]
    fn linear_in_energy_and_inverse_distance() {
        let askaryan = Askaryan::new(ParametricModel::Zhs1992);
        let base = request(cherenkov_angle(1.78) + 1.0 * DEG);
        let mut scaled = base;
        scaled.energy *= 2.0;
        scaled.path_length *= 4.0;
        let a = askaryan.spectrum(&base, &fft());
        let b = askaryan.spectrum(&scaled, &fft());
        for (x, y) in a.iter().zip(&b) {
            assert!((*x * 0.5 - *y).norm() <= 1e-12 * x.norm().max(1e-300));
        }
    }

    #[test]
    fn template_lookup_rescales() {
        let askaryan = Askaryan::new(ParametricModel::Zhs1992);
        let theta_c = cherenkov_angle(1.78);
        let library = TemplateLibrary::tabulate(
            &askaryan,
            &[500.0, 1000.0],
            &[theta_c, theta_c + 5.0 * DEG],
            &[10.0 * PEV, 1.0 * EEV],
            ShowerType::Had,
            1.78,
            256,
            0.5 * NS,
        );
        assert_eq!(library.len(), 8);

        let mut wanted = request(theta_c + 0.2 * DEG);
        wanted.path_length = 2000.0 * M;
        wanted.energy = 2.0 * EEV;
        let template = library.nearest(&wanted).unwrap();
        assert_eq!(template.distance, 1000.0);
        assert_eq!(template.viewing_angle, theta_c);
        assert_eq!(template.energy, 1.0 * EEV);

        // 2x energy and 2x distance cancel out
        let from_library = library.spectrum(&wanted, &fft());
        let mut reference = wanted;
        reference.viewing_angle = theta_c;
        reference.energy = 1.0 * EEV;
        reference.path_length = 1000.0 * M;
        let direct = askaryan.spectrum(&reference, &fft());
        // the Nyquist bin of an even length trace only keeps its real part
        for (x, y) in from_library.iter().zip(&direct).skip(1).take(127) {
            assert!((*x - *y).norm() <= 1e-9 * peak(&direct));
        }
    }

    #[test]
    fn library_json_round_trip() {
        let library = TemplateLibrary::tabulate(
            &Askaryan::new(ParametricModel::Alvarez2000),
            &[1000.0],
            &[0.97],
            &[1.0 * EEV],
            ShowerType::Em,
            1.78,
            64,
            1.0,
        );
        let back = TemplateLibrary::from_json(&library.to_json().unwrap()).unwrap();
        assert_eq!(library, back);
        assert!(TemplateLibrary::default()
            .spectrum(&request(1.0), &fft())
            .iter()
            .all(|c| c.norm() == 0.0));
    }

    #[test]
    fn unknown_model_name() {
        assert!(ParametricModel::from_name("ARZ2099").is_err());
        assert_eq!(ParametricModel::from_name("ZHS1992").unwrap(), ParametricModel::Zhs1992);
    }
}

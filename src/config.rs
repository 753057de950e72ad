//! Run configuration.
//!
//! Every field has a default, so a configuration file only needs the options
//! that differ:
//!
//! ```
//! use icesim::config::{Config, Polarization};
//!
//! let config = Config::from_json(r#"{
//!     "speedup": { "distance_cut": true },
//!     "signal": { "polarization": { "custom": { "e_phi": 0.2 } } }
//! }"#)?;
//! assert!(config.speedup.distance_cut);
//! assert_eq!(config.signal.polarization, Polarization::Custom { e_phi: 0.2 });
//! assert_eq!(config.speedup.minimum_weight_cut, 1e-5);
//! # Ok::<(), icesim::Error>(())
//! ```
use crate::distance_cut::{DistanceCutFilter, PolynomialDistanceCut};
use crate::emission::{Askaryan, EmissionStrategy, ParametricModel, ShowerType, TemplateLibrary};
use crate::error::{Error, Result};
use crate::ice::{AttenuationModel, IceModel};
use crate::raytracing::AnalyticRayTracer;
use crate::trigger::TriggerSettings;
use crate::units::{Positive, DEG, M, NS, UV};
use crate::weight::{CrossSectionType, EarthModel, WeightCalculator, WeightMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub speedup: Speedup,
    pub propagation: Propagation,
    pub signal: Signal,
    pub noise: Noise,
    pub weights: Weights,
    /// Channel traces further apart than this in start time are triggered
    /// as separate sub-events.
    pub split_event_time_diff: Positive<f64>,
    /// Wall clock seconds between two progress lines.
    pub progress_interval: Positive<f64>,
    pub triggers: Vec<TriggerSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            speedup: Speedup::default(),
            propagation: Propagation::default(),
            signal: Signal::default(),
            noise: Noise::default(),
            weights: Weights::default(),
            split_event_time_diff: Positive::new_unchecked(1000.0 * NS),
            progress_interval: Positive::new_unchecked(60.0),
            triggers: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Speedup {
    /// Event groups with a smaller weight are not simulated.
    pub minimum_weight_cut: f64,
    /// Channels whose rays all miss the Cherenkov angle by more than this
    /// are not simulated.
    pub delta_c_cut: f64,
    /// Trace rays again even if the input carries results for this detector.
    pub redo_raytracing: bool,
    /// Stations are only simulated if some field exceeds this many noise rms.
    pub min_efield_amplitude: f64,
    pub amp_per_ray_solution: bool,
    pub distance_cut: bool,
    pub distance_cut_sum_length: f64,
    pub distance_cut_coefficients: Vec<f64>,
    pub distance_cut_margin: f64,
}

impl Default for Speedup {
    fn default() -> Self {
        Self {
            minimum_weight_cut: 1e-5,
            delta_c_cut: 40.0 * DEG,
            redo_raytracing: false,
            min_efield_amplitude: 2.0,
            amp_per_ray_solution: true,
            distance_cut: false,
            distance_cut_sum_length: 100.0 * M,
            distance_cut_coefficients: PolynomialDistanceCut::default().coefficients().to_vec(),
            distance_cut_margin: 100.0 * M,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RayTracerKind {
    #[default]
    Analytic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Propagation {
    pub module: RayTracerKind,
    pub ice_model: String,
    pub attenuation_model: String,
    pub attenuate_ice: bool,
    /// Frequencies at which the attenuation is integrated along a ray.
    pub n_freq: usize,
    /// Upper bound on the ray tracing solutions kept per channel.
    pub max_solutions: usize,
}

impl Default for Propagation {
    fn default() -> Self {
        Self {
            module: RayTracerKind::Analytic,
            ice_model: "southpole_2015".to_string(),
            attenuation_model: "SP1".to_string(),
            attenuate_ice: true,
            n_freq: 25,
            max_solutions: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShowerTypeFilter {
    #[default]
    All,
    Em,
    Had,
}

impl ShowerTypeFilter {
    pub fn accepts(&self, shower_type: ShowerType) -> bool {
        match self {
            Self::All => true,
            Self::Em => shower_type == ShowerType::Em,
            Self::Had => shower_type == ShowerType::Had,
        }
    }
}

/// Polarization of the emitted field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarization {
    /// Radial towards the shower axis, perpendicular to the launch vector.
    #[default]
    Auto,
    /// Fixed ePhi component; eTheta completes a unit vector.
    Custom { e_phi: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Signal {
    /// Name of a [`ParametricModel`].
    pub model: String,
    /// Template library replacing the parametric model, if given.
    pub templates: Option<PathBuf>,
    pub shower_type: ShowerTypeFilter,
    pub polarization: Polarization,
    /// Multiply every trace by zero before triggering.
    pub zerosignal: bool,
}

impl Default for Signal {
    fn default() -> Self {
        Self {
            model: "Alvarez2000".to_string(),
            templates: None,
            shower_type: ShowerTypeFilter::All,
            polarization: Polarization::Auto,
            zerosignal: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Noise {
    pub enabled: bool,
    pub vrms: f64,
    /// Noise equivalent field strength. `speedup.min_efield_amplitude` is
    /// counted in units of it, whether or not noise is added.
    pub efield_vrms: Positive<f64>,
    pub seed: Option<u64>,
}

impl Default for Noise {
    fn default() -> Self {
        Self {
            enabled: false,
            vrms: 10.0 * UV,
            efield_vrms: Positive::new_unchecked(10.0 * UV / M),
            seed: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightModeName {
    Existing,
    Simple,
    CoreMantleCrust,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Weights {
    /// Uniform weights when absent.
    pub weight_mode: Option<WeightModeName>,
    pub cross_section_type: CrossSectionType,
}

impl Config {
    /// Unknown keys and invalid option values are configuration errors.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if let Polarization::Custom { e_phi } = self.signal.polarization {
            if !(-1.0..=1.0).contains(&e_phi) {
                return Err(Error::Config(format!(
                    "custom polarization needs |e_phi| <= 1, got {e_phi}"
                )));
            }
        }
        if self.noise.enabled && !(self.noise.vrms > 0.0) {
            return Err(Error::Config(format!(
                "noise vrms must be positive, got {}",
                self.noise.vrms
            )));
        }
        if self.propagation.n_freq < 2 {
            return Err(Error::Config(
                "attenuation needs at least two frequencies".to_string(),
            ));
        }
        if self.propagation.max_solutions == 0 {
            return Err(Error::Config("max_solutions must be at least 1".to_string()));
        }
        if !(self.speedup.minimum_weight_cut >= 0.0) {
            return Err(Error::Config(
                "minimum_weight_cut must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs_f64(self.progress_interval.get())
    }

    pub fn ray_tracer(&self) -> Result<AnalyticRayTracer> {
        let propagation = &self.propagation;
        let ice = IceModel::from_name(&propagation.ice_model)?;
        let attenuation = if propagation.attenuate_ice {
            AttenuationModel::from_name(&propagation.attenuation_model)?
        } else {
            AttenuationModel::None
        };
        Ok(match propagation.module {
            RayTracerKind::Analytic => AnalyticRayTracer::builder()
                .ice(ice)
                .attenuation(attenuation)
                .n_frequencies(propagation.n_freq)
                .build(),
        })
    }

    pub fn emission(&self) -> Result<EmissionStrategy> {
        match &self.signal.templates {
            Some(path) => Ok(EmissionStrategy::Templates(TemplateLibrary::from_path(path)?)),
            None => Ok(EmissionStrategy::Parametric(Askaryan::new(
                ParametricModel::from_name(&self.signal.model)?,
            ))),
        }
    }

    /// `None` unless the distance cut is enabled.
    pub fn distance_cut(&self) -> Result<Option<DistanceCutFilter>> {
        let speedup = &self.speedup;
        if !speedup.distance_cut {
            return Ok(None);
        }
        let function = PolynomialDistanceCut::new(
            speedup.distance_cut_coefficients.clone(),
            speedup.distance_cut_margin,
        )?;
        Ok(Some(
            DistanceCutFilter::builder()
                .function(Box::new(function))
                .margin(speedup.distance_cut_margin)
                .sum_length(speedup.distance_cut_sum_length)
                .build(),
        ))
    }

    pub fn weight_calculator(&self) -> WeightCalculator {
        let mode = match self.weights.weight_mode {
            None => WeightMode::Uniform,
            Some(WeightModeName::Existing) => WeightMode::Existing,
            Some(WeightModeName::Simple) => WeightMode::CrossSection(EarthModel::Simple),
            Some(WeightModeName::CoreMantleCrust) => {
                WeightMode::CrossSection(EarthModel::CoreMantleCrust)
            }
        };
        WeightCalculator::new(mode, self.weights.cross_section_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raytracing::RayTracer;

    #[test]
    fn defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.split_event_time_diff.get(), 1000.0);
        assert_eq!(config.progress_interval(), Duration::from_secs(60));
        assert!((config.speedup.delta_c_cut.to_degrees() - 40.0).abs() < 1e-12);
        assert!(config.distance_cut().unwrap().is_none());
        assert_eq!(config.weight_calculator().mode, WeightMode::Uniform);
        assert_eq!(config.ray_tracer().unwrap().name(), "analytic");
    }

    #[test]
    fn invalid_options_fail_at_parse_time() {
        for json in [
            r#"{"signal": {"polarization": "sideways"}}"#,
            r#"{"weights": {"weight_mode": "flat_earth"}}"#,
            r#"{"split_event_time_diff": 0.0}"#,
            r#"{"speedup": {"unknown_option": 1}}"#,
            r#"{"signal": {"polarization": {"custom": {"e_phi": 1.5}}}}"#,
            r#"{"noise": {"efield_vrms": 0.0}}"#,
            r#"{"triggers": [{"name": "main", "trigger_type": "simple_threshold", "threshold": 1e-4, "coinc_window": -1.0}]}"#,
            r#"{"triggers": [{"name": "hilo", "trigger_type": "high_low", "threshold_high": 1e-4, "threshold_low": -1e-4, "high_low_window": 0.0}]}"#,
        ] {
            assert!(matches!(Config::from_json(json), Err(Error::Config(_))), "{json}");
        }
    }

    #[test]
    fn unknown_presets_fail_when_building() {
        let config = Config::from_json(r#"{"propagation": {"ice_model": "mars"}}"#).unwrap();
        assert!(matches!(
            config.ray_tracer(),
            Err(Error::UnknownPreset { kind: "ice model", .. })
        ));
        let config = Config::from_json(r#"{"signal": {"model": "nope"}}"#).unwrap();
        assert!(config.emission().is_err());
    }

    #[test]
    fn weight_modes_by_name() {
        let config =
            Config::from_json(r#"{"weights": {"weight_mode": "core_mantle_crust"}}"#).unwrap();
        assert_eq!(
            config.weight_calculator().mode,
            WeightMode::CrossSection(EarthModel::CoreMantleCrust)
        );
        let config = Config::from_json(r#"{"weights": {"weight_mode": "existing"}}"#).unwrap();
        assert_eq!(config.weight_calculator().mode, WeightMode::Existing);
    }

    #[test]
    fn triggers_and_distance_cut() {
        let config = Config::from_json(
            r#"{
                "speedup": {"distance_cut": true, "distance_cut_margin": 50.0},
                "triggers": [{"name": "main", "trigger_type": "simple_threshold", "threshold": 1e-4}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.triggers.len(), 1);
        let cut = config.distance_cut().unwrap().unwrap();
        assert!(cut.max_distance(1e19) > 9000.0);
        assert!(ShowerTypeFilter::Had.accepts(ShowerType::Had));
        assert!(!ShowerTypeFilter::Em.accepts(ShowerType::Had));
    }
}

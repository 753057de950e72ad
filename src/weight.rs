//! Probability that a neutrino reaches the interaction vertex.
use crate::error::{Error, Result};
use crate::geometry::spherical_to_cartesian;
use crate::units::{CM, GEV, KM};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

const EARTH_RADIUS: f64 = 6371.0 * KM;
// Nucleons per gram.
const AVOGADRO: f64 = 6.022_140_76e23;

/// Density profile used for the column depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarthModel {
    /// Uniform sphere of the mean Earth density.
    Simple,
    CoreMantleCrust,
}

impl EarthModel {
    // (outer radius, density in g/cm^3), innermost shell first.
    fn shells(&self) -> &'static [(f64, f64)] {
        match self {
            Self::Simple => &[(EARTH_RADIUS, 5.515)],
            Self::CoreMantleCrust => &[
                (3480.0 * KM, 11.0),
                (6346.0 * KM, 4.5),
                (EARTH_RADIUS, 2.9),
            ],
        }
    }

    /// Column depth in g/cm^2 from the vertex back to where the neutrino
    /// entered the Earth. `zenith` is the arrival direction, `depth` the
    /// vertex height relative to the surface.
    pub fn column_depth(&self, zenith: f64, depth: f64) -> f64 {
        let r_0 = EARTH_RADIUS + depth.min(0.0);
        let cos = zenith.cos();
        let b_squared = r_0 * r_0 * (1.0 - cos * cos);

        // Length of the backwards ray (s >= 0) inside a sphere of radius r.
        let inside = |r: f64| {
            let h = r * r - b_squared;
            if h <= 0.0 {
                return 0.0;
            }
            let (near, far) = (-r_0 * cos - h.sqrt(), -r_0 * cos + h.sqrt());
            (far.max(0.0) - near.max(0.0)).max(0.0)
        };

        let shells = self.shells();
        shells
            .iter()
            .enumerate()
            .map(|(i, &(radius, density))| {
                let outer_density = shells.get(i + 1).map_or(0.0, |s| s.1);
                (density - outer_density) * inside(radius) / CM
            })
            .sum()
    }
}

/// Neutrino-nucleon cross section parametrisation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossSectionType {
    /// Connolly, Thorne & Waters (2011), charged plus neutral current.
    #[default]
    Ctw,
}

impl CrossSectionType {
    /// Total cross section in cm^2. Anti-neutrinos have negative PDG codes.
    pub fn total(&self, energy: f64, flavor: i32) -> f64 {
        match self {
            Self::Ctw => {
                let (cc, nc) = if flavor >= 0 {
                    (
                        [-1.826, -17.31, -6.406, 1.431, -17.91],
                        [-1.826, -17.31, -6.448, 1.431, -18.61],
                    )
                } else {
                    (
                        [-1.033, -15.95, -7.247, 1.569, -17.72],
                        [-1.033, -15.95, -7.296, 1.569, -18.30],
                    )
                };
                let epsilon = (energy / GEV).log10();
                ctw(&cc, epsilon) + ctw(&nc, epsilon)
            }
        }
    }
}

fn ctw(c: &[f64; 5], epsilon: f64) -> f64 {
    let l = (epsilon - c[0]).ln();
    10f64.powf(c[1] + c[2] * l + c[3] * l * l + c[4] / l)
}

/// How event group weights are obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightMode {
    /// Copy the weight column of the input.
    Existing,
    /// Every primary gets weight 1.
    Uniform,
    /// Survival probability through the Earth.
    CrossSection(EarthModel),
}

/// The incident neutrino of an event group.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Primary {
    pub energy: f64,
    /// Direction the neutrino comes from.
    pub zenith: f64,
    pub azimuth: f64,
    /// PDG code.
    pub flavor: i32,
    pub vertex: Vector3<f64>,
}

impl Primary {
    pub fn direction(&self) -> Vector3<f64> {
        spherical_to_cartesian(self.zenith, self.azimuth)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightCalculator {
    pub mode: WeightMode,
    pub cross_section: CrossSectionType,
}

impl WeightCalculator {
    pub fn new(mode: WeightMode, cross_section: CrossSectionType) -> Self {
        Self {
            mode,
            cross_section,
        }
    }

    /// Weight of one primary. `existing` is the input weight of the primary
    /// row, if the input has a weight column. A NaN input weight counts as
    /// missing.
    ///
    /// # Examples
    ///
    /// ```
    /// use icesim::weight::{CrossSectionType, Primary, WeightCalculator, WeightMode};
    /// use nalgebra::Vector3;
    ///
    /// let calculator = WeightCalculator::new(WeightMode::Uniform, CrossSectionType::Ctw);
    /// let primary = Primary {
    ///     energy: 1e18,
    ///     zenith: 2.0,
    ///     azimuth: 0.0,
    ///     flavor: 14,
    ///     vertex: Vector3::new(0.0, 0.0, -500.0),
    /// };
    /// assert_eq!(calculator.weight(&primary, None)?, 1.0);
    /// # Ok::<(), icesim::Error>(())
    /// ```
    pub fn weight(&self, primary: &Primary, existing: Option<f64>) -> Result<f64> {
        match self.mode {
            WeightMode::Existing => existing.filter(|w| !w.is_nan()).ok_or_else(|| {
                Error::MissingData(
                    "weight mode `existing` needs a weight for every shower of the input"
                        .to_string(),
                )
            }),
            WeightMode::Uniform => Ok(1.0),
            WeightMode::CrossSection(earth) => {
                let sigma = self.cross_section.total(primary.energy, primary.flavor);
                let column = earth.column_depth(primary.zenith, primary.vertex.z);
                Ok((-AVOGADRO * sigma * column).exp())
            }
        }
    }
}

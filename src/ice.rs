use crate::error::{Error, Result};
use crate::units::{GHZ, KM, M, MHZ};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Ice with an exponential refractive index profile,
/// `n(z) = n_ice - delta_n * exp(z / z_0)` below the surface (`z <= 0`).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IceModel {
    pub n_ice: f64,
    pub delta_n: f64,
    pub z_0: f64,
}

impl IceModel {
    /// Look up one of the built-in density profiles.
    ///
    /// # Examples
    ///
    /// ```
    /// use icesim::ice::IceModel;
    /// let ice = IceModel::from_name("greenland_simple")?;
    /// assert!(ice.index_of_refraction_at_depth(-2000.0) > 1.77);
    /// # Ok::<(), icesim::Error>(())
    /// ```
    pub fn from_name(name: &str) -> Result<Self> {
        let (n_ice, delta_n, z_0) = match name {
            "greenland_simple" => (1.78, 0.51, 37.25 * M),
            "southpole_simple" => (1.78, 0.426, 71.0 * M),
            "southpole_2015" => (1.78, 0.423, 77.0 * M),
            "mooresbay_simple" => (1.78, 0.46, 34.5 * M),
            "uniform" => (1.78, 0.0, 1.0 * M),
            _ => {
                return Err(Error::UnknownPreset {
                    kind: "ice model",
                    name: name.to_string(),
                })
            }
        };
        Ok(Self {
            n_ice,
            delta_n,
            z_0,
        })
    }

    pub fn uniform(n: f64) -> Self {
        Self {
            n_ice: n,
            delta_n: 0.0,
            z_0: 1.0 * M,
        }
    }

    pub fn is_uniform(&self) -> bool {
        self.delta_n == 0.0
    }

    /// Refractive index at depth `z`. Above the surface this is air.
    pub fn index_of_refraction_at_depth(&self, z: f64) -> f64 {
        if z > 0.0 {
            1.0
        } else {
            self.n_ice - self.delta_n * (z / self.z_0).exp()
        }
    }

    pub fn index_of_refraction(&self, position: &Vector3<f64>) -> f64 {
        self.index_of_refraction_at_depth(position.z)
    }

    /// Refractive index just below the surface.
    pub fn surface_index(&self) -> f64 {
        self.n_ice - self.delta_n
    }
}

/// Frequency and depth dependent field attenuation length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttenuationModel {
    None,
    Constant {
        length: f64,
    },
    /// `L(z, f) = L(z) * (f_ref / f)^exponent` where `L(z)` goes linearly from
    /// `length_at_surface` to `length_at_depth` over `depth_scale`.
    PowerLaw {
        length_at_surface: f64,
        length_at_depth: f64,
        depth_scale: f64,
        reference_frequency: f64,
        exponent: f64,
    },
}

impl AttenuationModel {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(Self::None),
            "GL1" => Ok(Self::PowerLaw {
                length_at_surface: 1.2 * KM,
                length_at_depth: 0.6 * KM,
                depth_scale: 3.0 * KM,
                reference_frequency: 300.0 * MHZ,
                exponent: 0.5,
            }),
            "SP1" => Ok(Self::PowerLaw {
                length_at_surface: 1.6 * KM,
                length_at_depth: 0.8 * KM,
                depth_scale: 2.8 * KM,
                reference_frequency: 300.0 * MHZ,
                exponent: 0.4,
            }),
            "MB1" => Ok(Self::Constant { length: 0.4 * KM }),
            _ => Err(Error::UnknownPreset {
                kind: "attenuation model",
                name: name.to_string(),
            }),
        }
    }

    /// Attenuation length at depth `z` and `frequency`. Infinite when the
    /// model does not attenuate.
    pub fn attenuation_length(&self, z: f64, frequency: f64) -> f64 {
        match *self {
            Self::None => f64::INFINITY,
            Self::Constant { length } => length,
            Self::PowerLaw {
                length_at_surface,
                length_at_depth,
                depth_scale,
                reference_frequency,
                exponent,
            } => {
                let fraction = (-z / depth_scale).clamp(0.0, 1.0);
                let length = length_at_surface + (length_at_depth - length_at_surface) * fraction;
                // Below a few MHz the power law is meaningless; hold it flat.
                let f = frequency.max(1.0 * MHZ).min(10.0 * GHZ);
                length * (reference_frequency / f).powf(exponent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_increases_with_depth() {
        let ice = IceModel::from_name("southpole_simple").unwrap();
        let mut previous = ice.index_of_refraction_at_depth(0.0);
        assert!((previous - (1.78 - 0.426)).abs() < 1e-12);
        for i in 1..100 {
            let n = ice.index_of_refraction_at_depth(-(i as f64) * 10.0);
            assert!(n > previous);
            previous = n;
        }
        assert_eq!(ice.index_of_refraction_at_depth(1.0), 1.0);
    }

    #[test]
    fn unknown_presets_are_errors() {
        assert!(matches!(
            IceModel::from_name("mars"),
            Err(Error::UnknownPreset { .. })
        ));
        assert!(AttenuationModel::from_name("XX").is_err());
    }

    #[test]
    fn attenuation_length_decreases_with_frequency() {
        let model = AttenuationModel::from_name("GL1").unwrap();
        let low = model.attenuation_length(-500.0, 0.1);
        let high = model.attenuation_length(-500.0, 0.8);
        assert!(low > high);
        assert!(model.attenuation_length(-3000.0, 0.3) < model.attenuation_length(0.0, 0.3));
        assert!(AttenuationModel::None.attenuation_length(0.0, 0.3).is_infinite());
    }
}

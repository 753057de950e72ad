//! Internal unit system.
//!
//! Every quantity that crosses a module boundary is a plain `f64` expressed in
//! these units. Multiply by a constant to go into internal units and divide by
//! it to get a value back out:
//!
//! ```
//! use icesim::units::{KM, M};
//! let distance = 1.5 * KM;
//! assert_eq!(distance / M, 1500.0);
//! ```
use num_traits::Zero;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const M: f64 = 1.0;
pub const KM: f64 = 1e3 * M;
pub const CM: f64 = 1e-2 * M;

pub const NS: f64 = 1.0;
pub const S: f64 = 1e9 * NS;

pub const GHZ: f64 = 1.0;
pub const MHZ: f64 = 1e-3 * GHZ;

pub const EV: f64 = 1.0;
pub const GEV: f64 = 1e9 * EV;
pub const TEV: f64 = 1e12 * EV;
pub const PEV: f64 = 1e15 * EV;
pub const EEV: f64 = 1e18 * EV;

pub const V: f64 = 1.0;
pub const MV: f64 = 1e-3 * V;
pub const UV: f64 = 1e-6 * V;

pub const RAD: f64 = 1.0;
pub const DEG: f64 = std::f64::consts::PI / 180.0;

/// Speed of light in vacuum.
pub const SPEED_OF_LIGHT: f64 = 0.299_792_458 * M / NS;

/// A value that is known to be strictly greater than zero.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Positive<T>(T);

impl<T> Positive<T>
where
    T: Zero + PartialOrd,
{
    /// Returns `None` unless `value > 0`.
    ///
    /// # Examples
    ///
    /// ```
    /// use icesim::units::Positive;
    ///
    /// assert!(Positive::new(1.0).is_some());
    /// assert!(Positive::new(0.0).is_none());
    /// assert!(Positive::new(f64::NAN).is_none());
    /// ```
    pub fn new(value: T) -> Option<Self> {
        if value > T::zero() {
            Some(Self(value))
        } else {
            None
        }
    }
}

impl<T> Positive<T> {
    // Only for literals that are known to be positive.
    pub(crate) const fn new_unchecked(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl Positive<f64> {
    pub fn get(&self) -> f64 {
        self.0
    }
}

impl<T: Serialize> Serialize for Positive<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Positive<T>
where
    T: Deserialize<'de> + Zero + PartialOrd,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = T::deserialize(deserializer)?;
        Self::new(value).ok_or_else(|| D::Error::custom("expected a strictly positive value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_rejects_non_positive() {
        assert!(Positive::new(-1).is_none());
        assert!(Positive::new(0u32).is_none());
        assert_eq!(Positive::new(3).unwrap().into_inner(), 3);
        assert_eq!(*Positive::new(2.5).unwrap().inner(), 2.5);
    }

    #[test]
    fn positive_deserialization_checks_sign() {
        let p: Positive<f64> = serde_json::from_str("2.5").unwrap();
        assert_eq!(p.get(), 2.5);
        assert!(serde_json::from_str::<Positive<f64>>("0.0").is_err());
        assert_eq!(serde_json::to_string(&p).unwrap(), "2.5");
    }

    #[test]
    fn unit_conversions() {
        assert_eq!(1.0 * S / NS, 1e9);
        assert!((SPEED_OF_LIGHT * (1.0 * S) / KM - 299_792.458).abs() < 1e-6);
        assert!((180.0 * DEG - std::f64::consts::PI).abs() < 1e-15);
        assert_eq!(500.0 * MHZ, 0.5 * GHZ);
    }
}

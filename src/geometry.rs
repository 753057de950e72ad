use nalgebra::Vector3;

/// Unit vector pointing towards `(zenith, azimuth)`.
///
/// # Examples
///
/// ```
/// use icesim::geometry::spherical_to_cartesian;
/// let up = spherical_to_cartesian(0.0, 0.0);
/// assert!((up.z - 1.0).abs() < 1e-12);
/// ```
pub fn spherical_to_cartesian(zenith: f64, azimuth: f64) -> Vector3<f64> {
    Vector3::new(
        zenith.sin() * azimuth.cos(),
        zenith.sin() * azimuth.sin(),
        zenith.cos(),
    )
}

/// Zenith and azimuth of `v`. The azimuth is in `[0, 2π)`.
pub fn cartesian_to_spherical(v: &Vector3<f64>) -> (f64, f64) {
    let r = v.norm();
    if r == 0.0 {
        return (0.0, 0.0);
    }
    let zenith = (v.z / r).clamp(-1.0, 1.0).acos();
    let azimuth = v.y.atan2(v.x).rem_euclid(std::f64::consts::TAU);
    (zenith, azimuth)
}

/// Angle between two vectors in `[0, π]`.
pub fn angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let denom = a.norm() * b.norm();
    if denom == 0.0 {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos()
}

/// The local `(eR, eTheta, ePhi)` basis of a direction.
#[derive(Clone, Copy, Debug)]
pub struct OnSkyFrame {
    e_r: Vector3<f64>,
    e_theta: Vector3<f64>,
    e_phi: Vector3<f64>,
}

impl OnSkyFrame {
    pub fn new(zenith: f64, azimuth: f64) -> Self {
        let (st, ct) = zenith.sin_cos();
        let (sp, cp) = azimuth.sin_cos();
        Self {
            e_r: Vector3::new(st * cp, st * sp, ct),
            e_theta: Vector3::new(ct * cp, ct * sp, -st),
            e_phi: Vector3::new(-sp, cp, 0.0),
        }
    }

    pub fn from_direction(direction: &Vector3<f64>) -> Self {
        let (zenith, azimuth) = cartesian_to_spherical(direction);
        Self::new(zenith, azimuth)
    }

    /// Cartesian components to `(eR, eTheta, ePhi)` components.
    pub fn ground_to_onsky(&self, v: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(self.e_r.dot(v), self.e_theta.dot(v), self.e_phi.dot(v))
    }

    /// `(eR, eTheta, ePhi)` components to cartesian components.
    pub fn onsky_to_ground(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.e_r * v.x + self.e_theta * v.y + self.e_phi * v.z
    }
}

// Snell's law for the transmitted angle; a total internal reflection leaves the
// cosine imaginary, which only matters through its modulus here.
fn transmitted_cos(zenith: f64, n_1: f64, n_2: f64) -> Option<f64> {
    let sin_t = n_1 / n_2 * zenith.sin();
    if sin_t > 1.0 {
        None
    } else {
        Some((1.0 - sin_t * sin_t).sqrt())
    }
}

/// Fresnel amplitude reflection coefficient for the polarization parallel to
/// the plane of incidence (eTheta).
pub fn fresnel_r_p(zenith: f64, n_1: f64, n_2: f64) -> f64 {
    let cos_i = zenith.cos();
    match transmitted_cos(zenith, n_1, n_2) {
        Some(cos_t) => (n_2 * cos_i - n_1 * cos_t) / (n_2 * cos_i + n_1 * cos_t),
        None => 1.0,
    }
}

/// Fresnel amplitude reflection coefficient for the polarization perpendicular
/// to the plane of incidence (ePhi).
pub fn fresnel_r_s(zenith: f64, n_1: f64, n_2: f64) -> f64 {
    let cos_i = zenith.cos();
    match transmitted_cos(zenith, n_1, n_2) {
        Some(cos_t) => (n_1 * cos_i - n_2 * cos_t) / (n_1 * cos_i + n_2 * cos_t),
        None => 1.0,
    }
}

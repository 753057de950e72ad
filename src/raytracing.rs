//! Ray tracing between two points in the ice.
//!
//! A [`RayTracer`] returns every discrete propagation path between a vertex
//! and an antenna. The [`AnalyticRayTracer`] solves the exponential firn
//! profile of [`IceModel`] in closed form: for a horizontally stratified
//! medium the Snell invariant `beta = n(z) sin(theta)` is conserved along a
//! ray, and horizontal distance, path length and travel time are analytic
//! functions of `beta` and depth. Solutions are the roots of
//! `D(beta) = horizontal distance` on two branches:
//!
//! ```text
//!   z = 0  ─────────────────────────────  surface
//!                 ╭──╮  turning point (refracted)
//!               ╱      ╲   or surface bounce (reflected)
//!      receiver ●        ╲
//!              ╱          ╲
//!            ╱   direct     ╲
//!          ●─────────────────  vertex
//! ```
use crate::error::{Error, Result};
use crate::ice::{AttenuationModel, IceModel};
use crate::units::{GHZ, M, SPEED_OF_LIGHT};
use bon::bon;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Discrete type of a propagation path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SolutionType {
    Direct,
    Refracted,
    Reflected,
}

impl SolutionType {
    /// Integer code stored in output tables.
    pub fn code(&self) -> u8 {
        match self {
            SolutionType::Direct => 1,
            SolutionType::Refracted => 2,
            SolutionType::Reflected => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SolutionType::Direct),
            2 => Some(SolutionType::Refracted),
            3 => Some(SolutionType::Reflected),
            _ => None,
        }
    }
}

/// Field attenuation factor as a function of frequency, sampled at a few
/// frequencies and linearly interpolated in between.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttenuationCurve {
    frequencies: Vec<f64>,
    factors: Vec<f64>,
}

impl AttenuationCurve {
    /// A curve that does not attenuate at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(frequencies: Vec<f64>, factors: Vec<f64>) -> Self {
        debug_assert_eq!(frequencies.len(), factors.len());
        Self {
            frequencies,
            factors,
        }
    }

    pub fn at(&self, frequency: f64) -> f64 {
        let (Some(&first), Some(&last)) = (self.frequencies.first(), self.frequencies.last())
        else {
            return 1.0;
        };
        if frequency <= first {
            return self.factors[0];
        }
        if frequency >= last {
            return self.factors[self.factors.len() - 1];
        }
        let i = self.frequencies.partition_point(|&f| f <= frequency) - 1;
        let (f0, f1) = (self.frequencies[i], self.frequencies[i + 1]);
        let w = (frequency - f0) / (f1 - f0);
        self.factors[i] * (1.0 - w) + self.factors[i + 1] * w
    }

    pub fn sample(&self, frequencies: &[f64]) -> Vec<f64> {
        frequencies.iter().map(|&f| self.at(f)).collect()
    }
}

/// One propagation path between a vertex and an antenna.
#[derive(Clone, Debug, PartialEq)]
pub struct RayTracingSolution {
    /// Position in the list of solutions, ordered by travel time.
    pub index: usize,
    pub solution_type: SolutionType,
    /// Conserved Snell invariant of the ray.
    pub ray_parameter: f64,
    /// Propagation direction at the vertex.
    pub launch_vector: Vector3<f64>,
    /// Direction from the antenna back towards the incoming ray.
    pub receive_vector: Vector3<f64>,
    pub travel_time: f64,
    pub path_length: f64,
    pub attenuation: AttenuationCurve,
    /// Zenith angles (in the ice) of the surface reflections along the path.
    pub reflection_angles: Vec<f64>,
}

/// Finds propagation paths between two points.
///
/// Failing to find a path is not an error: the returned list is simply empty.
#[allow(unused_variables)]
pub trait RayTracer {
    fn name(&self) -> &str;

    /// All solutions between `from` and `to`, ordered by travel time.
    fn find_solutions(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> Vec<RayTracingSolution>;

    /// Upper bound on the number of solutions for any pair of points.
    fn max_solutions(&self) -> usize;

    /// Names of the numeric fields needed to rebuild a solution without
    /// tracing it again.
    fn output_parameters(&self) -> &[&'static str] {
        &[]
    }

    /// Values of [`RayTracer::output_parameters`] for `solution`, in order.
    fn solution_parameters(&self, solution: &RayTracingSolution) -> Vec<f64> {
        Vec::new()
    }

    fn supports_cache(&self) -> bool {
        false
    }

    /// Rebuild solutions from stored parameters, one parameter list per
    /// solution. Lists filled with NaN stand for absent solutions.
    fn set_solutions(
        &self,
        from: &Vector3<f64>,
        to: &Vector3<f64>,
        parameters: &[Vec<f64>],
    ) -> Result<Vec<RayTracingSolution>> {
        Err(Error::CacheUnsupported(self.name().to_string()))
    }
}

const MAX_SOLUTIONS: usize = 3;
const BISECTION_STEPS: usize = 200;
const PATH_SAMPLES: usize = 100;
const OUTPUT_PARAMETERS: [&str; 2] = ["ray_tracing_beta", "ray_tracing_solution_type"];

#[derive(Clone, Copy, Debug, Default)]
struct Integrals {
    x: f64,
    length: f64,
    time: f64,
}

impl Add for Integrals {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            x: self.x + rhs.x,
            length: self.length + rhs.length,
            time: self.time + rhs.time,
        }
    }
}

impl Sub for Integrals {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            x: self.x - rhs.x,
            length: self.length - rhs.length,
            time: self.time - rhs.time,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Branch {
    Direct,
    Turning,
}

impl From<SolutionType> for Branch {
    fn from(solution_type: SolutionType) -> Self {
        match solution_type {
            SolutionType::Direct => Branch::Direct,
            _ => Branch::Turning,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Geometry {
    from: Vector3<f64>,
    to: Vector3<f64>,
    z_lo: f64,
    z_hi: f64,
    horizontal: f64,
    // Unit horizontal direction from `from` to `to`.
    direction: Vector3<f64>,
}

impl Geometry {
    fn new(from: &Vector3<f64>, to: &Vector3<f64>) -> Option<Self> {
        if from.z >= 0.0 || to.z >= 0.0 || (to - from).norm() < 1e-9 * M {
            return None;
        }
        let delta = Vector3::new(to.x - from.x, to.y - from.y, 0.0);
        let horizontal = delta.norm();
        let direction = if horizontal > 0.0 {
            delta / horizontal
        } else {
            Vector3::x()
        };
        Some(Self {
            from: *from,
            to: *to,
            z_lo: from.z.min(to.z),
            z_hi: from.z.max(to.z),
            horizontal,
            direction,
        })
    }
}

/// Closed-form ray tracer for [`IceModel`] profiles.
#[derive(Clone, Debug)]
pub struct AnalyticRayTracer {
    ice: IceModel,
    attenuation: AttenuationModel,
    frequencies: Vec<f64>,
    n_scan: usize,
}

#[bon]
impl AnalyticRayTracer {
    #[builder]
    pub fn new(
        ice: IceModel,
        #[builder(default = AttenuationModel::None)] attenuation: AttenuationModel,
        /// Number of frequencies at which the attenuation is integrated.
        #[builder(default = 25)]
        n_frequencies: usize,
        #[builder(default = 2.5 * GHZ)] max_frequency: f64,
        /// Number of grid points used to bracket solutions.
        #[builder(default = 1000)]
        n_scan: usize,
    ) -> Self {
        let n_frequencies = n_frequencies.max(2);
        let frequencies = (0..n_frequencies)
            .map(|i| max_frequency * i as f64 / (n_frequencies - 1) as f64)
            .collect();
        Self {
            ice,
            attenuation,
            frequencies,
            n_scan: n_scan.max(2),
        }
    }
}

impl AnalyticRayTracer {
    pub fn ice(&self) -> &IceModel {
        &self.ice
    }

    // Antiderivatives in z of dx/dz, ds/dz and dt/dz for a fixed beta. With
    // u = exp(z / z_0) and f = n^2 - beta^2 all three reduce to elementary
    // integrals of 1 / (u sqrt(f)) and 1 / sqrt(f).
    fn antiderivative(&self, beta: f64, z: f64) -> Integrals {
        let IceModel {
            n_ice: a,
            delta_n: b,
            z_0,
        } = self.ice;
        let u = (z / z_0).exp();
        let n = a - b * u;
        let sqrt_f = (n * n - beta * beta).max(0.0).sqrt();
        let c = a * a - beta * beta;
        let sqrt_c = c.sqrt();

        let i1 = -((2.0 * c - 2.0 * a * b * u + 2.0 * sqrt_c * sqrt_f) / u).ln() / sqrt_c;
        let i2 = -(n + sqrt_f).ln() / b;
        let length = z_0 * (a * i1 - b * i2);
        Integrals {
            x: beta * z_0 * i1,
            length,
            time: (a * length + z_0 * sqrt_f) / SPEED_OF_LIGHT,
        }
    }

    // Highest depth reached by a turning ray: the depth where it becomes
    // horizontal, or the surface where it bounces.
    fn top_depth(&self, beta: f64, geometry: &Geometry) -> f64 {
        if beta <= self.ice.surface_index() {
            0.0
        } else {
            let top = self.ice.z_0 * ((self.ice.n_ice - beta) / self.ice.delta_n).ln();
            top.min(0.0).max(geometry.z_hi)
        }
    }

    fn path_integrals(&self, geometry: &Geometry, beta: f64, branch: Branch) -> Integrals {
        let lo = self.antiderivative(beta, geometry.z_lo);
        let hi = self.antiderivative(beta, geometry.z_hi);
        match branch {
            Branch::Direct => hi - lo,
            Branch::Turning => {
                let top = self.antiderivative(beta, self.top_depth(beta, geometry));
                (top - lo) + (top - hi)
            }
        }
    }

    fn find_roots(&self, geometry: &Geometry, branch: Branch) -> Vec<f64> {
        let beta_max = self.ice.index_of_refraction_at_depth(geometry.z_hi);
        let miss = |beta: f64| self.path_integrals(geometry, beta, branch).x - geometry.horizontal;
        let tolerance = 1e-3 * M + 1e-6 * geometry.horizontal;

        let betas: Vec<f64> = (0..=self.n_scan)
            .map(|i| beta_max * i as f64 / self.n_scan as f64)
            .collect();
        let values: Vec<f64> = betas.iter().map(|&beta| miss(beta)).collect();

        let mut roots = Vec::new();
        for i in 0..self.n_scan {
            let (f_lo, f_hi) = (values[i], values[i + 1]);
            if !f_lo.is_finite() || !f_hi.is_finite() {
                continue;
            }
            if f_lo == 0.0 {
                roots.push(betas[i]);
            } else if f_lo * f_hi < 0.0 {
                if let Some(root) = bisect(&miss, betas[i], betas[i + 1], f_lo) {
                    if miss(root).abs() <= tolerance {
                        roots.push(root);
                    }
                }
            }
        }
        if values[self.n_scan] == 0.0 {
            roots.push(betas[self.n_scan]);
        }
        roots
    }

    fn classify(&self, beta: f64, branch: Branch) -> SolutionType {
        match branch {
            Branch::Direct => SolutionType::Direct,
            Branch::Turning if beta < self.ice.surface_index() => SolutionType::Reflected,
            Branch::Turning => SolutionType::Refracted,
        }
    }

    fn layered_solution(
        &self,
        geometry: &Geometry,
        beta: f64,
        solution_type: SolutionType,
    ) -> RayTracingSolution {
        let branch = Branch::from(solution_type);
        let integrals = self.path_integrals(geometry, beta, branch);
        let from_vertex = direction_at(beta, self.ice.index_of_refraction(&geometry.from));
        let at_antenna = direction_at(beta, self.ice.index_of_refraction(&geometry.to));
        let h = geometry.direction;
        let z = Vector3::z();

        let (launch_vector, receive_vector) = match branch {
            Branch::Direct => {
                let up = if geometry.to.z > geometry.from.z {
                    1.0
                } else {
                    -1.0
                };
                (
                    h * from_vertex.0 + z * (up * from_vertex.1),
                    -(h * at_antenna.0 + z * (up * at_antenna.1)),
                )
            }
            Branch::Turning => (
                h * from_vertex.0 + z * from_vertex.1,
                -h * at_antenna.0 + z * at_antenna.1,
            ),
        };
        let reflection_angles = match solution_type {
            SolutionType::Reflected => vec![(beta / self.ice.surface_index()).asin()],
            _ => Vec::new(),
        };
        let samples = self.layered_path_samples(geometry, beta, branch);

        RayTracingSolution {
            index: 0,
            solution_type,
            ray_parameter: beta,
            launch_vector,
            receive_vector,
            travel_time: integrals.time,
            path_length: integrals.length,
            attenuation: self.attenuation_curve(&samples),
            reflection_angles,
        }
    }

    // Midpoint samples (depth, path length element) along the ray. Each rising
    // segment is integrated in t with z = top - t^2, which removes the
    // inverse square root singularity at a turning point.
    fn layered_path_samples(&self, geometry: &Geometry, beta: f64, branch: Branch) -> Vec<(f64, f64)> {
        let segments = match branch {
            Branch::Direct => vec![(geometry.z_lo, geometry.z_hi)],
            Branch::Turning => {
                let top = self.top_depth(beta, geometry);
                vec![(geometry.z_lo, top), (geometry.z_hi, top)]
            }
        };
        let mut samples = Vec::with_capacity(segments.len() * PATH_SAMPLES);
        for (bottom, top) in segments {
            let t_max = (top - bottom).max(0.0).sqrt();
            let dt = t_max / PATH_SAMPLES as f64;
            for k in 0..PATH_SAMPLES {
                let t = (k as f64 + 0.5) * dt;
                let z = top - t * t;
                let n = self.ice.index_of_refraction_at_depth(z);
                let f = (n * n - beta * beta).max(f64::MIN_POSITIVE);
                samples.push((z, n / f.sqrt() * 2.0 * t * dt));
            }
        }
        samples
    }

    fn uniform_solution(&self, geometry: &Geometry, solution_type: SolutionType) -> RayTracingSolution {
        let n = self.ice.n_ice;
        let (from, to) = (geometry.from, geometry.to);
        let (target, reflection_angles) = match solution_type {
            SolutionType::Direct => (to, Vec::new()),
            _ => {
                let image = Vector3::new(to.x, to.y, -to.z);
                let v = image - from;
                (image, vec![(v.z / v.norm()).clamp(-1.0, 1.0).acos()])
            }
        };
        let v = target - from;
        let distance = v.norm();
        let launch_vector = v / distance;
        let receive_vector = match solution_type {
            SolutionType::Direct => -launch_vector,
            _ => -Vector3::new(launch_vector.x, launch_vector.y, -launch_vector.z),
        };

        let mut samples = Vec::with_capacity(2 * PATH_SAMPLES);
        let legs = match solution_type {
            SolutionType::Direct => vec![(from.z, to.z, distance)],
            _ => {
                let first = distance * -from.z / v.z;
                vec![(from.z, 0.0, first), (0.0, to.z, distance - first)]
            }
        };
        for (z_start, z_end, length) in legs {
            let ds = length / PATH_SAMPLES as f64;
            for k in 0..PATH_SAMPLES {
                let w = (k as f64 + 0.5) / PATH_SAMPLES as f64;
                samples.push((z_start + (z_end - z_start) * w, ds));
            }
        }

        RayTracingSolution {
            index: 0,
            solution_type,
            ray_parameter: n * geometry.horizontal.min(distance) / distance,
            launch_vector,
            receive_vector,
            travel_time: n * distance / SPEED_OF_LIGHT,
            path_length: distance,
            attenuation: self.attenuation_curve(&samples),
            reflection_angles,
        }
    }

    fn build(&self, geometry: &Geometry, beta: f64, solution_type: SolutionType) -> RayTracingSolution {
        if self.ice.is_uniform() {
            self.uniform_solution(geometry, solution_type)
        } else {
            self.layered_solution(geometry, beta, solution_type)
        }
    }

    fn attenuation_curve(&self, samples: &[(f64, f64)]) -> AttenuationCurve {
        if self.attenuation == AttenuationModel::None {
            return AttenuationCurve::none();
        }
        let factors = self
            .frequencies
            .iter()
            .map(|&frequency| {
                let exponent: f64 = samples
                    .iter()
                    .map(|&(z, ds)| ds / self.attenuation.attenuation_length(z, frequency))
                    .sum();
                (-exponent).exp()
            })
            .collect();
        AttenuationCurve::new(self.frequencies.clone(), factors)
    }
}

fn direction_at(beta: f64, n: f64) -> (f64, f64) {
    let sin = (beta / n).clamp(0.0, 1.0);
    (sin, (1.0 - sin * sin).sqrt())
}

fn bisect(f: impl Fn(f64) -> f64, mut lo: f64, mut hi: f64, mut f_lo: f64) -> Option<f64> {
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        let f_mid = f(mid);
        if !f_mid.is_finite() {
            return None;
        }
        if f_mid == 0.0 {
            return Some(mid);
        }
        if (f_mid < 0.0) == (f_lo < 0.0) {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }
    Some(0.5 * (lo + hi))
}

fn finalize(mut solutions: Vec<RayTracingSolution>) -> Vec<RayTracingSolution> {
    solutions.sort_by(|a, b| a.travel_time.total_cmp(&b.travel_time));
    solutions.truncate(MAX_SOLUTIONS);
    for (index, solution) in solutions.iter_mut().enumerate() {
        solution.index = index;
    }
    solutions
}

impl RayTracer for AnalyticRayTracer {
    fn name(&self) -> &str {
        "analytic"
    }

    fn find_solutions(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> Vec<RayTracingSolution> {
        let Some(geometry) = Geometry::new(from, to) else {
            return Vec::new();
        };
        if self.ice.is_uniform() {
            return finalize(vec![
                self.uniform_solution(&geometry, SolutionType::Direct),
                self.uniform_solution(&geometry, SolutionType::Reflected),
            ]);
        }

        let beta_max = self.ice.index_of_refraction_at_depth(geometry.z_hi);
        let direct = self.find_roots(&geometry, Branch::Direct);
        let mut candidates: Vec<(f64, SolutionType)> = direct
            .iter()
            .map(|&beta| (beta, SolutionType::Direct))
            .collect();
        for beta in self.find_roots(&geometry, Branch::Turning) {
            // At beta_max the turning ray collapses onto the direct one.
            let degenerate = beta_max - beta <= 1e-12 * beta_max
                && direct.iter().any(|&d| (d - beta).abs() <= 1e-9 * beta_max);
            if !degenerate {
                candidates.push((beta, self.classify(beta, Branch::Turning)));
            }
        }

        finalize(
            candidates
                .into_iter()
                .map(|(beta, solution_type)| self.layered_solution(&geometry, beta, solution_type))
                .collect(),
        )
    }

    fn max_solutions(&self) -> usize {
        MAX_SOLUTIONS
    }

    fn output_parameters(&self) -> &[&'static str] {
        &OUTPUT_PARAMETERS
    }

    fn solution_parameters(&self, solution: &RayTracingSolution) -> Vec<f64> {
        vec![solution.ray_parameter, f64::from(solution.solution_type.code())]
    }

    fn supports_cache(&self) -> bool {
        true
    }

    fn set_solutions(
        &self,
        from: &Vector3<f64>,
        to: &Vector3<f64>,
        parameters: &[Vec<f64>],
    ) -> Result<Vec<RayTracingSolution>> {
        let Some(geometry) = Geometry::new(from, to) else {
            return Ok(Vec::new());
        };
        let mut solutions = Vec::with_capacity(parameters.len());
        for values in parameters {
            let [beta, code] = values.as_slice() else {
                return Err(Error::MissingData(format!(
                    "expected {} ray tracing parameters, found {}",
                    OUTPUT_PARAMETERS.len(),
                    values.len()
                )));
            };
            if beta.is_nan() || code.is_nan() {
                continue;
            }
            let solution_type = SolutionType::from_code(*code as u8).ok_or_else(|| {
                Error::InvalidInput(format!("unknown ray tracing solution type {code}"))
            })?;
            solutions.push(self.build(&geometry, *beta, solution_type));
        }
        Ok(finalize(solutions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greenland() -> AnalyticRayTracer {
        AnalyticRayTracer::builder()
            .ice(IceModel::from_name("greenland_simple").unwrap())
            .attenuation(AttenuationModel::from_name("GL1").unwrap())
            .build()
    }

    #[test]
    fn solution_type_codes() {
        for t in [
            SolutionType::Direct,
            SolutionType::Refracted,
            SolutionType::Reflected,
        ] {
            assert_eq!(SolutionType::from_code(t.code()), Some(t));
        }
        assert_eq!(SolutionType::from_code(0), None);
    }

    #[test]
    fn attenuation_curve_interpolates() {
        let curve = AttenuationCurve::new(vec![0.0, 1.0], vec![1.0, 0.5]);
        assert_eq!(curve.at(0.5), 0.75);
        assert_eq!(curve.at(2.0), 0.5);
        assert_eq!(curve.at(-1.0), 1.0);
        assert_eq!(AttenuationCurve::none().at(0.3), 1.0);
    }

    #[test]
    fn uniform_ice_straight_lines() {
        let tracer = AnalyticRayTracer::builder()
            .ice(IceModel::uniform(1.78))
            .build();
        let from = Vector3::new(0.0, 0.0, -300.0);
        let to = Vector3::new(400.0, 0.0, -100.0);
        let solutions = tracer.find_solutions(&from, &to);
        assert_eq!(solutions.len(), 2);

        let direct = &solutions[0];
        assert_eq!(direct.solution_type, SolutionType::Direct);
        let distance = (to - from).norm();
        assert!((direct.path_length - distance).abs() < 1e-9);
        assert!((direct.travel_time - 1.78 * distance / SPEED_OF_LIGHT).abs() < 1e-9);
        assert!((direct.launch_vector + direct.receive_vector).norm() < 1e-12);

        let reflected = &solutions[1];
        assert_eq!(reflected.solution_type, SolutionType::Reflected);
        let image = Vector3::new(400.0, 0.0, 100.0);
        assert!((reflected.path_length - (image - from).norm()).abs() < 1e-9);
        assert_eq!(reflected.reflection_angles.len(), 1);
        // the reflected ray arrives from above
        assert!(reflected.receive_vector.z > 0.0);
    }

    #[test]
    fn points_above_the_surface_have_no_solution() {
        let tracer = greenland();
        let solutions =
            tracer.find_solutions(&Vector3::new(0.0, 0.0, 10.0), &Vector3::new(100.0, 0.0, -50.0));
        assert!(solutions.is_empty());
        let same = Vector3::new(1.0, 2.0, -3.0);
        assert!(tracer.find_solutions(&same, &same).is_empty());
    }

    #[test]
    fn deep_vertex_has_direct_and_bent_rays() {
        let tracer = greenland();
        let from = Vector3::new(0.0, 0.0, -1000.0);
        let to = Vector3::new(600.0, 0.0, -100.0);
        let solutions = tracer.find_solutions(&from, &to);
        assert!(solutions.len() >= 2, "{solutions:?}");
        assert_eq!(solutions[0].solution_type, SolutionType::Direct);
        assert_ne!(solutions[1].solution_type, SolutionType::Direct);

        let distance = (to - from).norm();
        for (i, s) in solutions.iter().enumerate() {
            assert_eq!(s.index, i);
            assert!(s.path_length >= distance * (1.0 - 1e-9));
            assert!(s.travel_time > 1.27 * distance / SPEED_OF_LIGHT);
            assert!((s.launch_vector.norm() - 1.0).abs() < 1e-9);
            assert!((s.receive_vector.norm() - 1.0).abs() < 1e-9);
        }
        assert!(solutions[0].travel_time < solutions[1].travel_time);
        // the direct ray leaves the deep vertex upwards
        assert!(solutions[0].launch_vector.z > 0.0);
        assert!(solutions[0].launch_vector.x > 0.0);
    }

    #[test]
    fn closed_form_matches_path_integration() {
        let tracer = greenland();
        let from = Vector3::new(0.0, 0.0, -800.0);
        let to = Vector3::new(0.0, 500.0, -80.0);
        let geometry = Geometry::new(&from, &to).unwrap();
        for solution in tracer.find_solutions(&from, &to) {
            let branch = Branch::from(solution.solution_type);
            let beta = solution.ray_parameter;
            let samples = tracer.layered_path_samples(&geometry, beta, branch);
            let length: f64 = samples.iter().map(|&(_, ds)| ds).sum();
            let horizontal: f64 = samples
                .iter()
                .map(|&(z, ds)| ds * beta / tracer.ice.index_of_refraction_at_depth(z))
                .sum();
            assert!((length - solution.path_length).abs() / solution.path_length < 1e-2);
            assert!((horizontal - 500.0).abs() / 500.0 < 1e-2);
        }
    }

    #[test]
    fn attenuation_grows_with_frequency() {
        let tracer = greenland();
        let solutions = tracer.find_solutions(
            &Vector3::new(0.0, 0.0, -1500.0),
            &Vector3::new(1000.0, 0.0, -100.0),
        );
        let curve = &solutions[0].attenuation;
        assert!(curve.at(0.1) <= 1.0);
        assert!(curve.at(0.1) > curve.at(1.0));
        assert!(curve.at(1.0) > 0.0);
    }

    #[test]
    fn cached_parameters_rebuild_identical_solutions() {
        let tracer = greenland();
        let from = Vector3::new(10.0, -20.0, -1200.0);
        let to = Vector3::new(700.0, 300.0, -150.0);
        let fresh = tracer.find_solutions(&from, &to);
        let mut parameters: Vec<Vec<f64>> =
            fresh.iter().map(|s| tracer.solution_parameters(s)).collect();
        parameters.push(vec![f64::NAN, f64::NAN]);
        let cached = tracer.set_solutions(&from, &to, &parameters).unwrap();
        assert_eq!(fresh, cached);
    }

    #[test]
    fn malformed_cache_rows_are_rejected() {
        let tracer = greenland();
        let from = Vector3::new(0.0, 0.0, -500.0);
        let to = Vector3::new(100.0, 0.0, -50.0);
        assert!(matches!(
            tracer.set_solutions(&from, &to, &[vec![1.5]]),
            Err(Error::MissingData(_))
        ));
        assert!(matches!(
            tracer.set_solutions(&from, &to, &[vec![1.5, 9.0]]),
            Err(Error::InvalidInput(_))
        ));
    }
}

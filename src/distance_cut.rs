//! Cheap distance based pre-selection of vertex-station and vertex-channel
//! pairs.
//!
//! Larger showers are detectable farther away, so the largest distance worth
//! simulating is a non-decreasing function of (summed) shower energy.
use crate::error::{Error, Result};
use crate::units::{EV, M};
use bon::bon;
use nalgebra::Vector3;
use std::fmt;
use std::ops::Range;
use winnow::ascii::{float, newline, space0, space1};
use winnow::combinator::{delimited, opt, separated, terminated};
use winnow::error::ContextError;
use winnow::Parser;

/// Largest vertex distance at which a shower of a given energy can still be
/// detected. Must be non-decreasing in energy.
pub trait DistanceCutFunction {
    fn max_distance(&self, energy: f64) -> f64;
}

/// `10^polyval(coefficients, log10(E / eV))` metres, never below `floor`.
#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialDistanceCut {
    coefficients: Vec<f64>,
    floor: f64,
}

impl PolynomialDistanceCut {
    /// Coefficients go from the highest power down to the constant term.
    /// Polynomials that decrease anywhere between 10^10 eV and 10^22 eV are
    /// rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use icesim::distance_cut::{DistanceCutFunction, PolynomialDistanceCut};
    /// use icesim::units::{EV, KM, M};
    ///
    /// let cut = PolynomialDistanceCut::new(vec![1.0 / 3.0, 3.0 - 16.0 / 3.0], 100.0 * M)?;
    /// assert!((cut.max_distance(1e19 * EV) - 10.0 * KM).abs() < 1e-6);
    /// # Ok::<(), icesim::Error>(())
    /// ```
    pub fn new(coefficients: Vec<f64>, floor: f64) -> Result<Self> {
        if coefficients.is_empty() || coefficients.iter().any(|c| !c.is_finite()) {
            return Err(Error::DistanceCut(
                "polynomial needs at least one finite coefficient".to_string(),
            ));
        }
        let cut = Self {
            coefficients,
            floor,
        };
        let mut previous = f64::NEG_INFINITY;
        for i in 0..=120 {
            let value = cut.polyval(10.0 + 0.1 * f64::from(i));
            if value < previous {
                return Err(Error::DistanceCut(
                    "polynomial decreases with energy".to_string(),
                ));
            }
            previous = value;
        }
        Ok(cut)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    fn polyval(&self, x: f64) -> f64 {
        self.coefficients.iter().fold(0.0, |acc, c| acc * x + c)
    }
}

impl Default for PolynomialDistanceCut {
    /// 1 km at 10^16 eV, 10 km at 10^19 eV.
    fn default() -> Self {
        Self {
            coefficients: vec![1.0 / 3.0, 3.0 - 16.0 / 3.0],
            floor: 100.0 * M,
        }
    }
}

impl DistanceCutFunction for PolynomialDistanceCut {
    fn max_distance(&self, energy: f64) -> f64 {
        if !(energy > 0.0) || !energy.is_finite() {
            return self.floor;
        }
        (10f64.powf(self.polyval((energy / EV).log10())) * M).max(self.floor)
    }
}

/// Tabulated energy to distance relation, interpolated linearly in log
/// energy and clamped at both ends.
///
/// The text form has one `<energy> eV <distance> m` entry per line:
///
/// ```text
/// 1e15 eV 300 m
/// 1e17 eV 2500 m
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceCutTable {
    // (log10(E / eV), distance)
    entries: Vec<(f64, f64)>,
}

fn parse_line(input: &mut &str) -> winnow::Result<(f64, f64)> {
    let energy: f64 = delimited(space0, float, (space1, "eV", space1)).parse_next(input)?;
    let distance: f64 = terminated(float, (space1, "m", space0)).parse_next(input)?;

    Ok((energy, distance))
}

/// The error type returned when parsing a [`DistanceCutTable`] fails.
#[derive(Debug)]
pub struct ParseError {
    input: String,
    span: Range<usize>,
    title: String,
}

impl ParseError {
    fn from_parse(error: winnow::error::ParseError<&str, ContextError>) -> Self {
        Self {
            input: error.input().to_string(),
            span: error.char_span(),
            title: "invalid line starting here".to_string(),
        }
    }

    fn at_line(input: &str, line: usize, title: &str) -> Self {
        let start = input.split_inclusive('\n').take(line).map(str::len).sum();
        let length = input
            .split_inclusive('\n')
            .nth(line)
            .map_or(0, |l| l.trim_end().len());
        Self {
            input: input.to_string(),
            span: start..start + length,
            title: title.to_string(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = annotate_snippets::Level::Error.title(&self.title).snippet(
            annotate_snippets::Snippet::source(&self.input)
                .fold(true)
                .annotation(annotate_snippets::Level::Error.span(self.span.clone())),
        );
        let renderer = annotate_snippets::Renderer::plain();
        let rendered = renderer.render(message);
        rendered.fmt(f)
    }
}

impl std::error::Error for ParseError {}

impl std::str::FromStr for DistanceCutTable {
    type Err = Error;

    /// Parse a table. Energies must strictly increase and distances must not
    /// decrease from one line to the next.
    ///
    /// # Examples
    ///
    /// ```
    /// use icesim::distance_cut::{DistanceCutFunction, DistanceCutTable};
    ///
    /// let table: DistanceCutTable = "1e16 eV 1000 m\n1e18 eV 3000 m\n".parse()?;
    /// assert!((table.max_distance(1e17) - 2000.0).abs() < 1e-9);
    /// # Ok::<(), icesim::Error>(())
    /// ```
    fn from_str(input: &str) -> Result<Self> {
        let mut raw: Vec<(f64, f64)> = Vec::new();

        let () = terminated(
            separated(0.., parse_line.map(|entry| raw.push(entry)), newline),
            opt(newline),
        )
        .parse(input)
        .map_err(ParseError::from_parse)?;

        if raw.is_empty() {
            return Err(Error::DistanceCut("table has no entries".to_string()));
        }
        for (i, pair) in raw.windows(2).enumerate() {
            let ((e0, d0), (e1, d1)) = (pair[0], pair[1]);
            if !(e1 > e0) || d1 < d0 {
                return Err(ParseError::at_line(
                    input,
                    i + 1,
                    "energies must increase and distances must not decrease",
                )
                .into());
            }
        }
        if let Some(i) = raw.iter().position(|&(e, _)| !(e > 0.0)) {
            return Err(ParseError::at_line(input, i, "energies must be positive").into());
        }

        Ok(Self {
            entries: raw
                .into_iter()
                .map(|(energy, distance)| ((energy * EV).log10(), distance * M))
                .collect(),
        })
    }
}

impl DistanceCutFunction for DistanceCutTable {
    fn max_distance(&self, energy: f64) -> f64 {
        let first = self.entries[0];
        let last = self.entries[self.entries.len() - 1];
        if !(energy > 0.0) {
            return first.1;
        }
        let x = (energy / EV).log10();
        if x <= first.0 {
            return first.1;
        }
        if x >= last.0 {
            return last.1;
        }
        let i = self.entries.partition_point(|&(e, _)| e <= x) - 1;
        let ((x0, d0), (x1, d1)) = (self.entries[i], self.entries[i + 1]);
        d0 + (d1 - d0) * (x - x0) / (x1 - x0)
    }
}

/// Two-stage distance cut: station and shower stage with a safety margin
/// against the station barycenter, channel stage without margin against the
/// actual channel position.
pub struct DistanceCutFilter {
    function: Box<dyn DistanceCutFunction>,
    margin: f64,
    sum_length: f64,
}

impl fmt::Debug for DistanceCutFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistanceCutFilter")
            .field("margin", &self.margin)
            .field("sum_length", &self.sum_length)
            .finish_non_exhaustive()
    }
}

#[bon]
impl DistanceCutFilter {
    #[builder]
    pub fn new(
        function: Box<dyn DistanceCutFunction>,
        /// Added to the station and shower stage cuts to account for the
        /// extent of a station around its barycenter.
        #[builder(default = 100.0 * M)]
        margin: f64,
        /// Showers whose vertices are closer than this along the event group
        /// add up their energies.
        #[builder(default = 100.0 * M)]
        sum_length: f64,
    ) -> Self {
        Self {
            function,
            margin,
            sum_length,
        }
    }
}

impl DistanceCutFilter {
    pub fn max_distance(&self, energy: f64) -> f64 {
        self.function.max_distance(energy)
    }

    /// Distance of every vertex from the first vertex of the group.
    pub fn vertex_distances(vertices: &[Vector3<f64>]) -> Vec<f64> {
        let Some(first) = vertices.first() else {
            return Vec::new();
        };
        vertices.iter().map(|v| (v - first).norm()).collect()
    }

    /// Keep a station if the closest vertex of the group is within reach of
    /// the total group energy.
    pub fn accept_station(
        &self,
        vertices: &[Vector3<f64>],
        energies: &[f64],
        barycenter: &Vector3<f64>,
    ) -> bool {
        let total: f64 = energies.iter().sum();
        let cut = self.max_distance(total) + self.margin;
        vertices.iter().any(|v| (v - barycenter).norm() <= cut)
    }

    /// Total energy of the showers whose vertex distance is within
    /// `sum_length` of shower `i`, including shower `i` itself.
    pub fn shower_energy_sum(&self, i: usize, vertex_distances: &[f64], energies: &[f64]) -> f64 {
        let Some(&reference) = vertex_distances.get(i) else {
            return 0.0;
        };
        vertex_distances
            .iter()
            .zip(energies)
            .filter(|(d, _)| (*d - reference).abs() < self.sum_length)
            .map(|(_, e)| e)
            .sum()
    }

    pub fn accept_shower(&self, energy_sum: f64, vertex: &Vector3<f64>, barycenter: &Vector3<f64>) -> bool {
        (vertex - barycenter).norm() <= self.max_distance(energy_sum) + self.margin
    }

    pub fn accept_channel(
        &self,
        energy_sum: f64,
        vertex: &Vector3<f64>,
        channel_position: &Vector3<f64>,
    ) -> bool {
        (vertex - channel_position).norm() <= self.max_distance(energy_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{EEV, KM, PEV};
    use rand::{Rng, SeedableRng};

    fn filter() -> DistanceCutFilter {
        DistanceCutFilter::builder()
            .function(Box::new(PolynomialDistanceCut::default()))
            .build()
    }

    #[test]
    fn default_polynomial() {
        let cut = PolynomialDistanceCut::default();
        assert!((cut.max_distance(1e16 * EV) - 1.0 * KM).abs() < 1e-6);
        assert!((cut.max_distance(1e19 * EV) - 10.0 * KM).abs() < 1e-6);
        assert_eq!(cut.max_distance(1e3 * EV), 100.0 * M);
        assert_eq!(cut.max_distance(0.0), 100.0 * M);
        assert_eq!(cut.max_distance(f64::NAN), 100.0 * M);
    }

    #[test]
    fn polynomial_is_monotone() {
        let cut = PolynomialDistanceCut::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let a = 10f64.powf(rng.random_range(12.0..21.0));
            let b = a * rng.random_range(1.0..10.0);
            assert!(cut.max_distance(a) <= cut.max_distance(b));
        }
        assert!(PolynomialDistanceCut::new(vec![-1.0, 0.0], 1.0).is_err());
        assert!(PolynomialDistanceCut::new(vec![], 1.0).is_err());
    }

    #[test]
    fn table_interpolation() {
        let table: DistanceCutTable = "1e15 eV 300 m\n1e17 eV 2500 m\n1e19 eV 9000 m\n"
            .parse()
            .unwrap();
        assert_eq!(table.max_distance(1e13), 300.0);
        assert_eq!(table.max_distance(1e21), 9000.0);
        assert!((table.max_distance(1e16) - 1400.0).abs() < 1e-9);
        assert!((table.max_distance(1e18) - 5750.0).abs() < 1e-9);
    }

    #[test]
    fn table_errors_point_at_the_line() {
        let error = "1e15 eV 300 m\n1e17 eV 250 m\n".parse::<DistanceCutTable>().unwrap_err();
        let rendered = error.to_string();
        assert!(rendered.contains("distances must not decrease"), "{rendered}");
        assert!(rendered.contains("1e17 eV 250 m"), "{rendered}");

        assert!("1e15 eV three m".parse::<DistanceCutTable>().is_err());
        assert!("1e15 300 m".parse::<DistanceCutTable>().is_err());
        assert!(matches!(
            "".parse::<DistanceCutTable>(),
            Err(Error::DistanceCut(_))
        ));
    }

    #[test]
    fn station_cut_uses_closest_vertex_and_total_energy() {
        let filter = filter();
        let barycenter = Vector3::zeros();
        let vertices = [Vector3::new(5000.0, 0.0, 0.0), Vector3::new(1050.0, 0.0, 0.0)];
        // 1 km reach plus margin
        assert!(filter.accept_station(&vertices, &[5.0 * PEV, 5.0 * PEV], &barycenter));
        assert!(!filter.accept_station(&vertices[..1], &[10.0 * PEV], &barycenter));
        assert!(!filter.accept_station(&[], &[], &barycenter));
    }

    #[test]
    fn shower_energy_sum_window() {
        let filter = filter();
        let vertices = [
            Vector3::new(0.0, 0.0, -1000.0),
            Vector3::new(50.0, 0.0, -1000.0),
            Vector3::new(500.0, 0.0, -1000.0),
        ];
        let distances = DistanceCutFilter::vertex_distances(&vertices);
        let energies = [1.0 * EEV, 2.0 * EEV, 4.0 * EEV];
        assert_eq!(filter.shower_energy_sum(0, &distances, &energies), 3.0 * EEV);
        assert_eq!(filter.shower_energy_sum(2, &distances, &energies), 4.0 * EEV);
    }

    #[test]
    fn channel_cut_has_no_margin() {
        let filter = filter();
        let energy = 1e16 * EV;
        let vertex = Vector3::zeros();
        let point = Vector3::new(1050.0, 0.0, 0.0);
        assert!(filter.accept_shower(energy, &vertex, &point));
        assert!(!filter.accept_channel(energy, &vertex, &point));
        assert!(filter.accept_channel(energy, &vertex, &Vector3::new(990.0, 0.0, 0.0)));
    }
}

//! Columnar table of showers read by a simulation run.
use crate::emission::ShowerType;
use crate::error::{Error, Result};
use crate::output::StationGroupTable;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Scalar metadata of an input table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputAttributes {
    /// Number of generated events, triggered or not.
    #[serde(default)]
    pub n_events: u64,
    /// Generation volume.
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub fiducial_rmin: Option<f64>,
    #[serde(default)]
    pub fiducial_rmax: Option<f64>,
    #[serde(default)]
    pub fiducial_zmin: Option<f64>,
    #[serde(default)]
    pub fiducial_zmax: Option<f64>,
    /// `"emitter"` for pulser style inputs; neutrinos otherwise.
    #[serde(default)]
    pub simulation_mode: Option<String>,
    /// Hash of the detector used by the run that produced this table.
    #[serde(default)]
    pub detector_hash: Option<String>,
}

/// Cylindrical shell in `(r, z)` within which vertices are simulated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FiducialVolume {
    pub rmin: f64,
    pub rmax: f64,
    pub zmin: f64,
    pub zmax: f64,
}

impl FiducialVolume {
    /// `None` unless all four bounds are present.
    pub fn from_attributes(attributes: &InputAttributes) -> Option<Self> {
        Some(Self {
            rmin: attributes.fiducial_rmin?,
            rmax: attributes.fiducial_rmax?,
            zmin: attributes.fiducial_zmin?,
            zmax: attributes.fiducial_zmax?,
        })
    }

    /// Bounds are inclusive.
    ///
    /// # Examples
    ///
    /// ```
    /// use icesim::table::FiducialVolume;
    /// use nalgebra::Vector3;
    ///
    /// let volume = FiducialVolume { rmin: 0.0, rmax: 1000.0, zmin: -500.0, zmax: 0.0 };
    /// assert!(volume.contains(&Vector3::new(300.0, 400.0, -250.0)));
    /// assert!(!volume.contains(&Vector3::new(1500.0, 0.0, -250.0)));
    /// ```
    pub fn contains(&self, vertex: &Vector3<f64>) -> bool {
        let r = vertex.x.hypot(vertex.y);
        (self.rmin..=self.rmax).contains(&r) && (self.zmin..=self.zmax).contains(&vertex.z)
    }
}

/// One row of an [`EventTable`].
#[derive(Clone, Debug, PartialEq)]
pub struct ShowerRow {
    pub event_group_id: u64,
    pub shower_id: u64,
    pub vertex: Vector3<f64>,
    pub zenith: f64,
    pub azimuth: f64,
    pub energy: f64,
    pub shower_energy: f64,
    pub shower_type: ShowerType,
    pub flavor: i32,
    pub interaction_type: String,
    pub vertex_time: Option<f64>,
    pub weight: Option<f64>,
}

/// Showers, one per row. Showers of one event group share the primary in
/// `zeniths`, `azimuths`, `energies` and `flavors`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTable {
    pub event_group_ids: Vec<u64>,
    pub shower_ids: Vec<u64>,
    pub xx: Vec<f64>,
    pub yy: Vec<f64>,
    pub zz: Vec<f64>,
    pub zeniths: Vec<f64>,
    pub azimuths: Vec<f64>,
    pub energies: Vec<f64>,
    pub shower_energies: Vec<f64>,
    pub shower_type: Vec<ShowerType>,
    pub flavors: Vec<i32>,
    pub interaction_type: Vec<String>,
    #[serde(default)]
    pub vertex_times: Option<Vec<f64>>,
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
    #[serde(default)]
    pub attributes: InputAttributes,
    /// Station tables of a previous run on the same showers.
    #[serde(default)]
    pub stations: BTreeMap<String, StationGroupTable>,
}

impl EventTable {
    pub fn from_json(json: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn len(&self) -> usize {
        self.shower_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shower_ids.is_empty()
    }

    /// All columns must have one entry per shower and shower ids must be
    /// unique.
    pub fn validate(&self) -> Result<()> {
        let n = self.len();
        let mut lengths = vec![
            ("event_group_ids", self.event_group_ids.len()),
            ("xx", self.xx.len()),
            ("yy", self.yy.len()),
            ("zz", self.zz.len()),
            ("zeniths", self.zeniths.len()),
            ("azimuths", self.azimuths.len()),
            ("energies", self.energies.len()),
            ("shower_energies", self.shower_energies.len()),
            ("shower_type", self.shower_type.len()),
            ("flavors", self.flavors.len()),
            ("interaction_type", self.interaction_type.len()),
        ];
        if let Some(times) = &self.vertex_times {
            lengths.push(("vertex_times", times.len()));
        }
        if let Some(weights) = &self.weights {
            lengths.push(("weights", weights.len()));
        }
        if let Some((name, length)) = lengths.into_iter().find(|(_, length)| *length != n) {
            return Err(Error::InvalidInput(format!(
                "column `{name}` has {length} entries, expected {n}"
            )));
        }

        let mut ids = self.shower_ids.clone();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::InvalidInput("shower ids are not unique".to_string()));
        }
        Ok(())
    }

    pub fn push(&mut self, row: ShowerRow) {
        let n = self.len();
        match (row.vertex_time, &mut self.vertex_times) {
            (Some(t), Some(times)) => times.push(t),
            (Some(t), None) => {
                let mut times = vec![0.0; n];
                times.push(t);
                self.vertex_times = Some(times);
            }
            (None, Some(times)) => times.push(0.0),
            (None, None) => {}
        }
        match (row.weight, &mut self.weights) {
            (Some(w), Some(weights)) => weights.push(w),
            (Some(w), None) => {
                let mut weights = vec![f64::NAN; n];
                weights.push(w);
                self.weights = Some(weights);
            }
            (None, Some(weights)) => weights.push(f64::NAN),
            (None, None) => {}
        }
        self.event_group_ids.push(row.event_group_id);
        self.shower_ids.push(row.shower_id);
        self.xx.push(row.vertex.x);
        self.yy.push(row.vertex.y);
        self.zz.push(row.vertex.z);
        self.zeniths.push(row.zenith);
        self.azimuths.push(row.azimuth);
        self.energies.push(row.energy);
        self.shower_energies.push(row.shower_energy);
        self.shower_type.push(row.shower_type);
        self.flavors.push(row.flavor);
        self.interaction_type.push(row.interaction_type);
    }

    /// Rows of every event group, keyed by ascending group id. Rows keep
    /// table order; the first one is the primary.
    pub fn event_groups(&self) -> BTreeMap<u64, Vec<usize>> {
        let mut groups: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (i, &id) in self.event_group_ids.iter().enumerate() {
            groups.entry(id).or_default().push(i);
        }
        groups
    }

    pub fn shower_index_of(&self, shower_id: u64) -> Option<usize> {
        self.shower_ids.iter().position(|id| *id == shower_id)
    }

    pub fn vertex(&self, i: usize) -> Vector3<f64> {
        Vector3::new(self.xx[i], self.yy[i], self.zz[i])
    }

    /// Interaction time of a shower; zero without a vertex time column.
    pub fn vertex_time(&self, i: usize) -> f64 {
        self.vertex_times.as_ref().map_or(0.0, |times| times[i])
    }

    pub fn is_emitter(&self) -> bool {
        self.attributes.simulation_mode.as_deref() == Some("emitter")
    }

    pub fn fiducial_volume(&self) -> Option<FiducialVolume> {
        FiducialVolume::from_attributes(&self.attributes)
    }

    /// Pre-simulated results of a station, if this table carries any.
    pub fn station(&self, station_id: u32) -> Option<&StationGroupTable> {
        self.stations.get(&station_key(station_id))
    }
}

/// Key of a station in [`EventTable::stations`].
pub fn station_key(station_id: u32) -> String {
    format!("station_{station_id}")
}

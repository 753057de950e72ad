//! Per-station results and the serialized output of a run.
use crate::error::{Error, Result};
use crate::table::{station_key, EventTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;
use std::path::Path;
use tracing::{debug, info};

type PerSolution<T> = Vec<Vec<Vec<Option<T>>>>;
type PerChannel<T> = Vec<Vec<Option<T>>>;

fn per_solution<T: Clone>(rows: usize, channels: usize, solutions: usize) -> PerSolution<T> {
    vec![vec![vec![None; solutions]; channels]; rows]
}

fn per_channel<T: Clone>(rows: usize, channels: usize) -> PerChannel<T> {
    vec![vec![None; channels]; rows]
}

/// Results of one station for the showers of one event group (or, after
/// [`StationGroupTable::extend`], of every triggered event group of a run).
///
/// Channel columns follow the order of [`StationGroupTable::channel_ids`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StationGroupTable {
    pub channel_ids: Vec<u32>,
    pub shower_id: Vec<u64>,
    pub event_group_id: Vec<u64>,
    /// Last triggering sub-event a shower contributed to.
    pub event_id: Vec<Option<u64>>,
    pub triggered: Vec<bool>,
    pub multiple_triggers: Vec<Vec<bool>>,
    pub trigger_times: PerChannel<f64>,
    pub travel_times: PerSolution<f64>,
    pub travel_distances: PerSolution<f64>,
    pub launch_vectors: PerSolution<[f64; 3]>,
    pub receive_vectors: PerSolution<[f64; 3]>,
    pub polarization: PerSolution<[f64; 3]>,
    pub ray_tracing_solution_type: PerSolution<u8>,
    pub ray_tracing_reflection_angle: PerSolution<f64>,
    pub delta_c: PerSolution<f64>,
    pub max_amp_shower_and_ray: PerSolution<f64>,
    pub time_shower_and_ray: PerSolution<f64>,
    pub maximum_amplitudes: PerChannel<f64>,
    pub maximum_amplitudes_envelope: PerChannel<f64>,
    pub ray_tracing_parameters: BTreeMap<String, PerSolution<f64>>,
}

impl StationGroupTable {
    pub fn new(
        shower_ids: &[u64],
        event_group_id: u64,
        channel_ids: &[u32],
        max_solutions: usize,
        n_triggers: usize,
        ray_tracing_parameters: &[&str],
    ) -> Self {
        let rows = shower_ids.len();
        let channels = channel_ids.len();
        Self {
            channel_ids: channel_ids.to_vec(),
            shower_id: shower_ids.to_vec(),
            event_group_id: vec![event_group_id; rows],
            event_id: vec![None; rows],
            triggered: vec![false; rows],
            multiple_triggers: vec![vec![false; n_triggers]; rows],
            trigger_times: per_channel(rows, n_triggers),
            travel_times: per_solution(rows, channels, max_solutions),
            travel_distances: per_solution(rows, channels, max_solutions),
            launch_vectors: per_solution(rows, channels, max_solutions),
            receive_vectors: per_solution(rows, channels, max_solutions),
            polarization: per_solution(rows, channels, max_solutions),
            ray_tracing_solution_type: per_solution(rows, channels, max_solutions),
            ray_tracing_reflection_angle: per_solution(rows, channels, max_solutions),
            delta_c: per_solution(rows, channels, max_solutions),
            max_amp_shower_and_ray: per_solution(rows, channels, max_solutions),
            time_shower_and_ray: per_solution(rows, channels, max_solutions),
            maximum_amplitudes: per_channel(rows, channels),
            maximum_amplitudes_envelope: per_channel(rows, channels),
            ray_tracing_parameters: ray_tracing_parameters
                .iter()
                .map(|name| (name.to_string(), per_solution(rows, channels, max_solutions)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.shower_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shower_id.is_empty()
    }

    pub fn row_of(&self, shower_id: u64) -> Option<usize> {
        self.shower_id.iter().position(|id| *id == shower_id)
    }

    /// Row of every shower id. The first row wins if an id repeats.
    pub fn row_index(&self) -> HashMap<u64, usize> {
        let mut rows = HashMap::with_capacity(self.len());
        for (row, &id) in self.shower_id.iter().enumerate() {
            rows.entry(id).or_insert(row);
        }
        rows
    }

    pub fn column_of(&self, channel_id: u32) -> Option<usize> {
        self.channel_ids.iter().position(|id| *id == channel_id)
    }

    /// Cached ray tracing parameters of one vertex-channel pair, one row per
    /// solution in the order of `names`. Solutions that were never set are
    /// returned as NaN rows.
    pub fn cached_parameters(
        &self,
        shower_id: u64,
        channel_id: u32,
        names: &[&str],
    ) -> Option<Vec<Vec<f64>>> {
        let row = self.row_of(shower_id)?;
        let column = self.column_of(channel_id)?;
        self.parameters_at(row, column, names)
    }

    /// Like [`StationGroupTable::cached_parameters`], for a known row and
    /// column.
    pub fn parameters_at(&self, row: usize, column: usize, names: &[&str]) -> Option<Vec<Vec<f64>>> {
        let columns = names
            .iter()
            .map(|name| self.ray_tracing_parameters.get(*name).map(|grid| &grid[row][column]))
            .collect::<Option<Vec<_>>>()?;
        let n_solutions = columns.first().map_or(0, |c| c.len());
        Some(
            (0..n_solutions)
                .map(|s| columns.iter().map(|c| c[s].unwrap_or(f64::NAN)).collect())
                .collect(),
        )
    }

    /// Appends the rows of `other`. Both tables must describe the same
    /// channels.
    pub fn extend(&mut self, other: StationGroupTable) -> Result<()> {
        if self.is_empty() && self.channel_ids.is_empty() {
            *self = other;
            return Ok(());
        }
        if self.channel_ids != other.channel_ids {
            return Err(Error::InvalidInput(
                "station tables have different channels".to_string(),
            ));
        }
        self.shower_id.extend(other.shower_id);
        self.event_group_id.extend(other.event_group_id);
        self.event_id.extend(other.event_id);
        self.triggered.extend(other.triggered);
        self.multiple_triggers.extend(other.multiple_triggers);
        self.trigger_times.extend(other.trigger_times);
        self.travel_times.extend(other.travel_times);
        self.travel_distances.extend(other.travel_distances);
        self.launch_vectors.extend(other.launch_vectors);
        self.receive_vectors.extend(other.receive_vectors);
        self.polarization.extend(other.polarization);
        self.ray_tracing_solution_type
            .extend(other.ray_tracing_solution_type);
        self.ray_tracing_reflection_angle
            .extend(other.ray_tracing_reflection_angle);
        self.delta_c.extend(other.delta_c);
        self.max_amp_shower_and_ray.extend(other.max_amp_shower_and_ray);
        self.time_shower_and_ray.extend(other.time_shower_and_ray);
        self.maximum_amplitudes.extend(other.maximum_amplitudes);
        self.maximum_amplitudes_envelope
            .extend(other.maximum_amplitudes_envelope);
        for (name, grid) in other.ray_tracing_parameters {
            self.ray_tracing_parameters
                .entry(name)
                .or_default()
                .extend(grid);
        }
        Ok(())
    }
}

/// Run level results, indexed by the global shower index of the input.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputAccumulator {
    trigger_names: Vec<String>,
    weights: Vec<f64>,
    triggered: Vec<bool>,
    multiple_triggers: Vec<Vec<bool>>,
    stations: BTreeMap<u32, StationGroupTable>,
}

impl OutputAccumulator {
    pub fn new(n_showers: usize, trigger_names: Vec<String>) -> Self {
        let n_triggers = trigger_names.len();
        Self {
            trigger_names,
            weights: vec![0.0; n_showers],
            triggered: vec![false; n_showers],
            multiple_triggers: vec![vec![false; n_triggers]; n_showers],
            stations: BTreeMap::new(),
        }
    }

    /// Accumulator for an input without showers.
    pub fn empty(trigger_names: Vec<String>) -> Self {
        Self::new(0, trigger_names)
    }

    pub fn trigger_names(&self) -> &[String] {
        &self.trigger_names
    }

    /// Marks a trigger decision for a shower. Decisions only ever turn flags
    /// on.
    pub fn record_trigger(&mut self, shower_index: usize, trigger_index: usize, triggered: bool) {
        if triggered {
            self.multiple_triggers[shower_index][trigger_index] = true;
            self.triggered[shower_index] = true;
        }
    }

    pub fn set_weights(&mut self, shower_indices: &[usize], weight: f64) {
        for &i in shower_indices {
            self.weights[i] = weight;
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn triggered(&self) -> &[bool] {
        &self.triggered
    }

    pub fn extend_station(&mut self, station_id: u32, table: StationGroupTable) -> Result<()> {
        debug!(station_id, rows = table.len(), "keeping station group");
        self.stations.entry(station_id).or_default().extend(table)
    }

    /// Combines the accumulated results with the columns of the input.
    pub fn finish(self, input: &EventTable, detector_hash: String) -> SimulationOutput {
        let mut table = EventTable {
            weights: Some(self.weights),
            stations: self
                .stations
                .into_iter()
                .map(|(id, station)| (station_key(id), station))
                .collect(),
            ..input.clone()
        };
        table.attributes.detector_hash = Some(detector_hash);

        SimulationOutput {
            table,
            triggered: self.triggered,
            multiple_triggers: self.multiple_triggers,
            trigger_names: self.trigger_names,
        }
    }
}

/// Everything a run writes to disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutput {
    #[serde(flatten)]
    pub table: EventTable,
    pub triggered: Vec<bool>,
    pub multiple_triggers: Vec<Vec<bool>>,
    pub trigger_names: Vec<String>,
}

impl SimulationOutput {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let output: Self = serde_json::from_str(json)?;
        output.table.validate()?;
        if output.triggered.len() != output.table.len() {
            return Err(Error::InvalidInput(
                "trigger flags do not match the number of showers".to_string(),
            ));
        }
        Ok(output)
    }

    /// Writes the output next to `path` first and renames it into place, so
    /// `path` either holds a complete file or is left untouched.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut name = path
            .file_name()
            .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", path.display())))?
            .to_os_string();
        name.push(".tmp");
        let temporary = path.with_file_name(name);

        std::fs::write(&temporary, self.to_json()?)?;
        std::fs::rename(&temporary, path)?;
        info!(path = %path.display(), showers = self.table.len(), "wrote output");
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// The output as the input of another run; its station tables become the
    /// pre-simulated ray tracing results.
    pub fn into_event_table(self) -> EventTable {
        self.table
    }

    pub fn n_triggered(&self) -> usize {
        remove_duplicate_triggers(&self.triggered, &self.table.event_group_ids)
            .into_iter()
            .filter(|t| *t)
            .count()
    }
}

/// Keeps only the first triggered shower of every event group, so merged
/// outputs count each group once.
///
/// # Examples
///
/// ```
/// use icesim::output::remove_duplicate_triggers;
///
/// let triggered = [true, true, false, true];
/// let groups = [1, 1, 2, 2];
/// let once = remove_duplicate_triggers(&triggered, &groups);
/// assert_eq!(once, vec![true, false, false, true]);
/// assert_eq!(remove_duplicate_triggers(&once, &groups), once);
/// ```
pub fn remove_duplicate_triggers(triggered: &[bool], event_group_ids: &[u64]) -> Vec<bool> {
    let mut seen = std::collections::BTreeSet::new();
    triggered
        .iter()
        .zip(event_group_ids)
        .map(|(&t, &group)| t && seen.insert(group))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectiveVolume {
    pub n_triggered: usize,
    pub n_triggered_weighted: f64,
    pub veff: f64,
    /// Effective volume times solid angle.
    pub veff_sr: f64,
}

pub fn effective_volume(output: &SimulationOutput) -> Result<EffectiveVolume> {
    let attributes = &output.table.attributes;
    let volume = attributes.volume.ok_or_else(|| {
        Error::MissingData("effective volume needs the generation volume".to_string())
    })?;
    if attributes.n_events == 0 {
        return Err(Error::MissingData(
            "effective volume needs the number of generated events".to_string(),
        ));
    }
    let weights = output.table.weights.as_deref().unwrap_or_default();

    let once = remove_duplicate_triggers(&output.triggered, &output.table.event_group_ids);
    let n_triggered = once.iter().filter(|t| **t).count();
    let n_triggered_weighted = once
        .iter()
        .zip(weights)
        .filter(|(t, _)| **t)
        .map(|(_, w)| w)
        .sum::<f64>();
    let veff = volume * n_triggered_weighted / attributes.n_events as f64;

    Ok(EffectiveVolume {
        n_triggered,
        n_triggered_weighted,
        veff,
        veff_sr: veff * 4.0 * PI,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::tests::row;

    fn table() -> EventTable {
        let mut table = EventTable::default();
        table.push(row(1, 10, [0.0, 0.0, -100.0]));
        table.push(row(1, 11, [0.0, 0.0, -110.0]));
        table.push(row(2, 20, [0.0, 0.0, -120.0]));
        table.attributes.n_events = 10;
        table.attributes.volume = Some(1.0e9);
        table
    }

    #[test]
    fn new_station_tables_are_unset() {
        let sg = StationGroupTable::new(&[10, 11], 1, &[0, 1, 2], 2, 1, &["beta"]);
        assert_eq!(sg.len(), 2);
        assert_eq!(sg.travel_times[1][2], vec![None, None]);
        assert_eq!(sg.maximum_amplitudes[0], vec![None; 3]);
        assert_eq!(sg.ray_tracing_parameters["beta"].len(), 2);
        assert_eq!(sg.multiple_triggers, vec![vec![false]; 2]);
    }

    #[test]
    fn cached_parameters_of_a_pair() {
        let mut sg = StationGroupTable::new(&[10], 1, &[0, 4], 2, 0, &["beta", "code"]);
        sg.ray_tracing_parameters.get_mut("beta").unwrap()[0][1][0] = Some(0.5);
        sg.ray_tracing_parameters.get_mut("code").unwrap()[0][1][0] = Some(1.0);

        let rows = sg.cached_parameters(10, 4, &["beta", "code"]).unwrap();
        assert_eq!(rows[0], vec![0.5, 1.0]);
        assert!(rows[1].iter().all(|v| v.is_nan()));
        assert!(sg.cached_parameters(99, 4, &["beta"]).is_none());
        assert!(sg.cached_parameters(10, 4, &["missing"]).is_none());
        assert_eq!(sg.parameters_at(0, 1, &["beta", "code"]), Some(rows));
    }

    #[test]
    fn row_index_keeps_first_row() {
        let sg = StationGroupTable::new(&[10, 11, 10], 1, &[0], 1, 0, &[]);
        let rows = sg.row_index();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[&10], 0);
        assert_eq!(rows[&11], 1);
        assert_eq!(rows.get(&12), None);
    }

    #[test]
    fn extend_appends_rows() {
        let mut all = StationGroupTable::default();
        all.extend(StationGroupTable::new(&[10, 11], 1, &[0], 1, 1, &[]))
            .unwrap();
        all.extend(StationGroupTable::new(&[20], 2, &[0], 1, 1, &[]))
            .unwrap();
        assert_eq!(all.shower_id, vec![10, 11, 20]);
        assert_eq!(all.event_group_id, vec![1, 1, 2]);
        assert_eq!(all.travel_times.len(), 3);

        let other = StationGroupTable::new(&[30], 3, &[5], 1, 1, &[]);
        assert!(all.extend(other).is_err());
    }

    #[test]
    fn deduplication_is_idempotent() {
        let groups = [1, 1, 1, 2, 3, 3];
        let triggered = [false, true, true, true, true, true];
        let once = remove_duplicate_triggers(&triggered, &groups);
        assert_eq!(once, vec![false, true, false, true, true, false]);
        assert_eq!(remove_duplicate_triggers(&once, &groups), once);
    }

    #[test]
    fn accumulator_only_turns_flags_on() {
        let mut acc = OutputAccumulator::new(3, vec!["a".to_string(), "b".to_string()]);
        acc.record_trigger(1, 1, true);
        acc.record_trigger(1, 1, false);
        acc.record_trigger(2, 0, false);
        assert_eq!(acc.triggered(), &[false, true, false]);
        acc.set_weights(&[0, 1], 0.5);
        assert_eq!(acc.weights(), &[0.5, 0.5, 0.0]);
    }

    #[test]
    fn effective_volume_counts_groups_once() {
        let mut acc = OutputAccumulator::new(3, vec!["t".to_string()]);
        acc.set_weights(&[0, 1], 0.5);
        acc.set_weights(&[2], 0.25);
        acc.record_trigger(0, 0, true);
        acc.record_trigger(1, 0, true);
        let output = acc.finish(&table(), "hash".to_string());
        assert_eq!(output.n_triggered(), 1);

        let veff = effective_volume(&output).unwrap();
        assert_eq!(veff.n_triggered, 1);
        assert_eq!(veff.n_triggered_weighted, 0.5);
        assert!((veff.veff - 0.5e8).abs() < 1e-3);
        assert!((veff.veff_sr - 0.5e8 * 4.0 * PI).abs() < 1e-2);

        let mut missing = output.clone();
        missing.table.attributes.volume = None;
        assert!(matches!(effective_volume(&missing), Err(Error::MissingData(_))));
    }

    #[test]
    fn empty_output_is_schema_complete() {
        let output = OutputAccumulator::empty(vec!["t".to_string()])
            .finish(&EventTable::default(), "hash".to_string());
        let json = output.to_json().unwrap();
        for key in ["\"weights\":[]", "\"triggered\":[]", "\"stations\":{}", "\"trigger_names\":[\"t\"]"] {
            assert!(json.contains(key), "{key} missing in {json}");
        }
        assert_eq!(SimulationOutput::from_json(&json).unwrap(), output);
    }

    #[test]
    fn write_then_read() {
        let mut acc = OutputAccumulator::new(3, vec!["t".to_string()]);
        let mut sg = StationGroupTable::new(&[10, 11], 1, &[0], 1, 1, &["beta"]);
        sg.travel_times[0][0][0] = Some(123.456_789_012_345_67);
        sg.ray_tracing_parameters.get_mut("beta").unwrap()[0][0][0] = Some(0.1 + 0.2);
        acc.extend_station(101, sg).unwrap();
        let output = acc.finish(&table(), "hash".to_string());

        let path = std::env::temp_dir().join(format!("icesim-output-{}.json", std::process::id()));
        output.write(&path).unwrap();
        let read = SimulationOutput::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(read, output);
        let input = read.into_event_table();
        assert_eq!(input.attributes.detector_hash.as_deref(), Some("hash"));
        let station = input.station(101).unwrap();
        assert_eq!(
            station.cached_parameters(10, 0, &["beta"]).unwrap(),
            vec![vec![0.1 + 0.2]]
        );
    }
}

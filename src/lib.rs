//! Event-by-event simulation of the radio signals that neutrino induced
//! particle showers in ice leave in an array of antenna stations.
//!
//! A [`Simulation`] reads a table of showers, propagates their Askaryan
//! emission to every channel of a [`Detector`](detector::Detector), folds it
//! with the antenna and signal chain response, and records which stations
//! trigger.
use crate::config::{Config, Polarization};
use crate::detector::Detector;
use crate::distance_cut::DistanceCutFilter;
use crate::emission::{cherenkov_angle, EmissionModel, EmissionRequest};
use crate::fft::{rfft_frequencies, RealFft};
use crate::geometry::{
    angle_between, cartesian_to_spherical, fresnel_r_p, fresnel_r_s, spherical_to_cartesian,
    OnSkyFrame,
};
use crate::ice::IceModel;
use crate::noise::NoiseAdder;
use crate::output::{effective_volume, OutputAccumulator, SimulationOutput, StationGroupTable};
use crate::progress::{PhaseTimes, ProgressReporter};
use crate::raytracing::{RayTracer, RayTracingSolution};
use crate::response::{AntennaChainResponse, DetectorResponse, ElectricField};
use crate::station::{combine_channels, split_sub_events, ChannelWaveform, SimulatedChannelTrace};
use crate::table::{EventTable, FiducialVolume};
use crate::trigger::{Trigger, TriggerEvaluator};
use crate::weight::{Primary, WeightCalculator, WeightMode};
use bon::bon;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustfft::num_complex::Complex64;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Run configuration.
pub mod config;
/// Station and channel layout.
pub mod detector;
/// Distance based pre-selection.
pub mod distance_cut;
/// Askaryan emission models.
pub mod emission;
mod error;
/// Real valued FFTs in the crate's spectrum convention.
pub mod fft;
pub mod geometry;
/// Refractive index and attenuation of ice.
pub mod ice;
pub mod noise;
pub mod output;
pub mod progress;
/// Propagation paths through ice.
pub mod raytracing;
/// Antenna and signal chain response.
pub mod response;
pub mod station;
pub mod table;
/// Trigger logic.
pub mod trigger;
pub mod units;
/// Event group weights.
pub mod weight;

pub use error::{Error, Result};

/// Why an event group was not simulated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Not part of the requested event group list.
    NotListed,
    BelowMinimumWeight,
}

/// A trait that defines the interface for an observer of a simulation run.
///
/// The default implementation of all methods is a no-op. Users are expected to
/// override the methods they are interested in.
#[allow(unused_variables)]
pub trait Observer {
    /// Called when an event group is skipped before any station is looked at.
    fn on_event_group_skipped(&mut self, event_group_id: u64, reason: SkipReason) {}
    /// Called when the distance cut rejects a station (`shower_id` and
    /// `channel_id` are `None`), a shower, or a single channel.
    fn on_distance_cut(
        &mut self,
        event_group_id: u64,
        station_id: u32,
        shower_id: Option<u64>,
        channel_id: Option<u32>,
    ) {
    }
    /// Called after the rays between a vertex and a channel are known.
    /// `cached` is set when they were rebuilt from a previous run.
    fn on_ray_tracing(
        &mut self,
        shower_id: u64,
        station_id: u32,
        channel_id: u32,
        solutions: &[RayTracingSolution],
        cached: bool,
    ) {
    }
    /// Called for every emission spectrum requested.
    fn on_emission(&mut self, shower_id: u64, station_id: u32, channel_id: u32, request: &EmissionRequest) {}
    /// Called with the waveforms a sub-event is triggered on.
    fn on_sub_event(&mut self, station_id: u32, event_id: u64, waveforms: &[ChannelWaveform]) {}
    /// Called with every trigger decision.
    fn on_trigger(&mut self, station_id: u32, event_id: u64, trigger: &Trigger) {}
}

impl Observer for () {}

/// Everything a finished run hands back.
#[derive(Debug)]
pub struct RunSummary<O> {
    pub output: SimulationOutput,
    /// Triggered event groups, counted once per group.
    pub n_triggered: usize,
    pub times: PhaseTimes,
    pub observer: O,
}

pub struct Simulation<O> {
    triggers: Vec<Box<dyn TriggerEvaluator>>,
    config: Config,
    detector: Detector,
    ice: IceModel,
    ray_tracer: Box<dyn RayTracer>,
    emission: Box<dyn EmissionModel>,
    response: Box<dyn DetectorResponse>,
    distance_cut: Option<DistanceCutFilter>,
    weight_calculator: WeightCalculator,
    event_group_list: Option<Vec<u64>>,
    output_path: Option<PathBuf>,
    observer: O,
}

#[bon]
impl<O> Simulation<O> {
    /// Collaborators that are not given are built from `config`.
    #[builder]
    pub fn new(
        #[builder(field)] triggers: Vec<Box<dyn TriggerEvaluator>>,
        #[builder(default)] config: Config,
        detector: Detector,
        /// Medium used for the refractive index at the vertex.
        ice: Option<IceModel>,
        ray_tracer: Option<Box<dyn RayTracer>>,
        emission: Option<Box<dyn EmissionModel>>,
        response: Option<Box<dyn DetectorResponse>>,
        distance_cut: Option<DistanceCutFilter>,
        weight_calculator: Option<WeightCalculator>,
        /// Only simulate these event groups.
        event_group_list: Option<Vec<u64>>,
        /// Where the output is written at the end of the run.
        #[builder(into)]
        output_path: Option<PathBuf>,
        observer: O,
    ) -> Result<Self> {
        config.validate()?;
        detector.validate()?;
        let ice = match ice {
            Some(ice) => ice,
            None => IceModel::from_name(&config.propagation.ice_model)?,
        };
        let ray_tracer: Box<dyn RayTracer> = match ray_tracer {
            Some(ray_tracer) => ray_tracer,
            None => Box::new(config.ray_tracer()?),
        };
        let emission: Box<dyn EmissionModel> = match emission {
            Some(emission) => emission,
            None => Box::new(config.emission()?),
        };
        let response: Box<dyn DetectorResponse> = match response {
            Some(response) => response,
            None => Box::new(AntennaChainResponse::new(&detector)?),
        };
        let distance_cut = match distance_cut {
            Some(cut) => Some(cut),
            None => config.distance_cut()?,
        };
        let weight_calculator = weight_calculator.unwrap_or_else(|| config.weight_calculator());

        let mut all_triggers: Vec<Box<dyn TriggerEvaluator>> = config
            .triggers
            .iter()
            .cloned()
            .map(|t| Box::new(t) as Box<dyn TriggerEvaluator>)
            .collect();
        all_triggers.extend(triggers);

        Ok(Self {
            triggers: all_triggers,
            config,
            detector,
            ice,
            ray_tracer,
            emission,
            response,
            distance_cut,
            weight_calculator,
            event_group_list,
            output_path,
            observer,
        })
    }
}

impl<O, S: simulation_builder::State> SimulationBuilder<O, S> {
    /// Add a trigger that is evaluated on every sub-event.
    pub fn add_trigger<T>(mut self, trigger: T) -> Self
    where
        T: TriggerEvaluator + 'static,
    {
        self.triggers.push(Box::new(trigger));
        self
    }
}

// The showers of one event group.
struct EventGroup {
    id: u64,
    indices: Vec<usize>,
    vertices: Vec<Vector3<f64>>,
    energies: Vec<f64>,
    vertex_distances: Vec<f64>,
}

// Mutable state carried across event groups.
struct RunState {
    output: OutputAccumulator,
    times: PhaseTimes,
    event_ids: BTreeMap<u32, u64>,
    ffts: BTreeMap<usize, RealFft>,
    noise: Option<NoiseAdder<StdRng>>,
    fiducial: Option<FiducialVolume>,
    n_triggered_groups: usize,
}

impl RunState {
    fn fft(&mut self, n: usize) -> &RealFft {
        self.ffts.entry(n).or_insert_with(|| RealFft::new(n))
    }
}

// Results of a previous run of one station, indexed by shower id.
struct PresimulatedStation<'a> {
    table: &'a StationGroupTable,
    rows: HashMap<u64, usize>,
}

impl PresimulatedStation<'_> {
    fn parameters(&self, shower_id: u64, channel_id: u32, names: &[&str]) -> Option<Vec<Vec<f64>>> {
        let row = *self.rows.get(&shower_id)?;
        let column = self.table.column_of(channel_id)?;
        self.table.parameters_at(row, column, names)
    }
}

// Field of one ray at one channel, waiting for the detector response.
struct PendingTrace {
    row: usize,
    column: usize,
    shower_index: usize,
    shower_id: u64,
    channel_id: u32,
    solution_index: usize,
    field: ElectricField,
    zenith: f64,
    azimuth: f64,
    start_time: f64,
    sampling_rate: f64,
    n_samples: usize,
}

impl<O: Observer> Simulation<O> {
    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// Simulate every event group of `input`. The output is written (if an
    /// output path was given) before the effective volume is evaluated.
    pub fn run(mut self, input: &EventTable) -> Result<RunSummary<O>> {
        let start = Instant::now();
        input.validate()?;
        let detector_hash = self.detector.description_hash()?;

        let noise = if self.config.noise.enabled {
            let rng = match self.config.noise.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            Some(NoiseAdder::new(self.config.noise.vrms, rng)?)
        } else {
            None
        };
        let fiducial = input.fiducial_volume();
        if fiducial.is_none() {
            info!("no fiducial volume in the input, simulating every vertex");
        }
        if input.vertex_times.is_none() && !input.is_empty() {
            warn!("input has no vertex times, all showers start at t = 0");
        }

        let trigger_names = self.triggers.iter().map(|t| t.name().to_string()).collect();
        let mut state = RunState {
            output: OutputAccumulator::new(input.len(), trigger_names),
            times: PhaseTimes::default(),
            event_ids: BTreeMap::new(),
            ffts: BTreeMap::new(),
            noise,
            fiducial,
            n_triggered_groups: 0,
        };
        let presimulated: BTreeMap<u32, PresimulatedStation<'_>> =
            if self.use_presimulated(input, &detector_hash)? {
                self.detector
                    .station_ids()
                    .into_iter()
                    .filter_map(|id| {
                        input.station(id).map(|table| {
                            let rows = table.row_index();
                            (id, PresimulatedStation { table, rows })
                        })
                    })
                    .collect()
            } else {
                BTreeMap::new()
            };
        let groups = input.event_groups();
        state.times.input += start.elapsed();

        let mut progress = ProgressReporter::new(self.config.progress_interval());
        for (done, (&group_id, indices)) in groups.iter().enumerate() {
            progress.report(done, groups.len(), state.n_triggered_groups, &state.times);
            if self.simulate_event_group(input, group_id, indices, &presimulated, &mut state)? {
                state.n_triggered_groups += 1;
            }
        }

        let t = Instant::now();
        let output = state.output.finish(input, detector_hash);
        if let Some(path) = &self.output_path {
            output.write(path)?;
        }
        state.times.output += t.elapsed();

        match effective_volume(&output) {
            Ok(veff) => info!(
                n_triggered = veff.n_triggered,
                weighted = veff.n_triggered_weighted,
                "effective volume {:.4e} m^3 ({:.4e} m^3 sr)",
                veff.veff,
                veff.veff_sr
            ),
            Err(e) => error!("effective volume could not be calculated: {e}"),
        }

        let n_triggered = output.n_triggered();
        progress.finish(groups.len(), n_triggered, &state.times);
        Ok(RunSummary {
            output,
            n_triggered,
            times: state.times,
            observer: self.observer,
        })
    }

    fn use_presimulated(&self, input: &EventTable, detector_hash: &str) -> Result<bool> {
        if self.config.speedup.redo_raytracing || input.stations.is_empty() {
            return Ok(false);
        }
        if input.attributes.detector_hash.as_deref() != Some(detector_hash) {
            info!("input was simulated with another detector, tracing rays again");
            return Ok(false);
        }
        if !self.ray_tracer.supports_cache() {
            return Err(Error::CacheUnsupported(self.ray_tracer.name().to_string()));
        }
        info!("reusing the ray tracing results stored in the input");
        Ok(true)
    }

    // Returns whether any station triggered.
    fn simulate_event_group(
        &mut self,
        input: &EventTable,
        group_id: u64,
        indices: &[usize],
        presimulated: &BTreeMap<u32, PresimulatedStation<'_>>,
        state: &mut RunState,
    ) -> Result<bool> {
        if let Some(list) = &self.event_group_list {
            if !list.contains(&group_id) {
                self.observer
                    .on_event_group_skipped(group_id, SkipReason::NotListed);
                return Ok(false);
            }
        }

        let t = Instant::now();
        let Some(&primary) = indices.first() else {
            return Ok(false);
        };
        let vertices: Vec<Vector3<f64>> = indices.iter().map(|&i| input.vertex(i)).collect();
        let energies: Vec<f64> = indices.iter().map(|&i| input.shower_energies[i]).collect();
        let vertex_distances = DistanceCutFilter::vertex_distances(&vertices);
        state.times.input += t.elapsed();

        let t = Instant::now();
        let weight = if input.is_emitter() {
            state.output.set_weights(indices, 1.0);
            1.0
        } else {
            let primary_interaction = Primary {
                energy: input.energies[primary],
                zenith: input.zeniths[primary],
                azimuth: input.azimuths[primary],
                flavor: input.flavors[primary],
                vertex: vertices[0],
            };
            let existing = |i: usize| input.weights.as_ref().map(|w| w[i]);
            let weight = self
                .weight_calculator
                .weight(&primary_interaction, existing(primary))?;
            if self.weight_calculator.mode == WeightMode::Existing {
                // every shower keeps its own input weight
                for &i in indices {
                    let own = self.weight_calculator.weight(&primary_interaction, existing(i))?;
                    state.output.set_weights(&[i], own);
                }
            } else {
                state.output.set_weights(indices, weight);
            }
            weight
        };
        state.times.weights += t.elapsed();
        if weight < self.config.speedup.minimum_weight_cut {
            debug!(group_id, weight, "weight below the minimum, skipping");
            self.observer
                .on_event_group_skipped(group_id, SkipReason::BelowMinimumWeight);
            return Ok(false);
        }

        let group = EventGroup {
            id: group_id,
            indices: indices.to_vec(),
            vertices,
            energies,
            vertex_distances,
        };
        let mut triggered = false;
        for station_id in self.detector.station_ids() {
            let cached = presimulated.get(&station_id);
            triggered |= self.simulate_station(input, &group, station_id, cached, state)?;
        }
        Ok(triggered)
    }

    // Returns whether any sub-event of the station triggered.
    fn simulate_station(
        &mut self,
        input: &EventTable,
        group: &EventGroup,
        station_id: u32,
        cached_station: Option<&PresimulatedStation<'_>>,
        state: &mut RunState,
    ) -> Result<bool> {
        let barycenter = self.detector.barycenter(station_id)?;
        if let Some(cut) = &self.distance_cut {
            let t = Instant::now();
            let accepted = cut.accept_station(&group.vertices, &group.energies, &barycenter);
            state.times.distance_cut += t.elapsed();
            if !accepted {
                debug!(group_id = group.id, station_id, "station out of reach");
                self.observer
                    .on_distance_cut(group.id, station_id, None, None);
                return Ok(false);
            }
        }

        let channel_ids = self.detector.channel_ids(station_id)?;
        let max_solutions = self
            .ray_tracer
            .max_solutions()
            .min(self.config.propagation.max_solutions);
        let parameter_names = self.ray_tracer.output_parameters();
        let shower_ids: Vec<u64> = group.indices.iter().map(|&i| input.shower_ids[i]).collect();
        let mut sg = StationGroupTable::new(
            &shower_ids,
            group.id,
            &channel_ids,
            max_solutions,
            self.triggers.len(),
            parameter_names,
        );
        let delta_c_cut = self.config.speedup.delta_c_cut;
        let field_threshold =
            self.config.speedup.min_efield_amplitude * self.config.noise.efield_vrms.get();

        let mut pending = Vec::new();
        let mut candidate = false;
        for (row, &shower_index) in group.indices.iter().enumerate() {
            let vertex = group.vertices[row];
            let shower_id = shower_ids[row];

            let energy_sum = match &self.distance_cut {
                Some(cut) => {
                    let t = Instant::now();
                    let energy_sum = cut.shower_energy_sum(row, &group.vertex_distances, &group.energies);
                    let accepted = cut.accept_shower(energy_sum, &vertex, &barycenter);
                    state.times.distance_cut += t.elapsed();
                    if !accepted {
                        debug!(shower_id, station_id, "shower out of reach");
                        self.observer
                            .on_distance_cut(group.id, station_id, Some(shower_id), None);
                        continue;
                    }
                    energy_sum
                }
                None => group.energies[row],
            };
            if let Some(fiducial) = &state.fiducial {
                if !fiducial.contains(&vertex) {
                    debug!(shower_id, "vertex outside the fiducial volume");
                    continue;
                }
            }
            let shower_type = input.shower_type[shower_index];
            if !self.config.signal.shower_type.accepts(shower_type) {
                continue;
            }

            let shower_axis = -spherical_to_cartesian(input.zeniths[shower_index], input.azimuths[shower_index]);
            let n_index = self.ice.index_of_refraction(&vertex);
            let cherenkov = cherenkov_angle(n_index);
            let vertex_time = input.vertex_time(shower_index);

            for (column, &channel_id) in channel_ids.iter().enumerate() {
                let channel_position = self.detector.channel_position(station_id, channel_id)?;
                if let Some(cut) = &self.distance_cut {
                    let t = Instant::now();
                    let accepted = cut.accept_channel(energy_sum, &vertex, &channel_position);
                    state.times.distance_cut += t.elapsed();
                    if !accepted {
                        self.observer.on_distance_cut(
                            group.id,
                            station_id,
                            Some(shower_id),
                            Some(channel_id),
                        );
                        continue;
                    }
                }

                let t = Instant::now();
                let cached = cached_station
                    .and_then(|station| station.parameters(shower_id, channel_id, parameter_names));
                let mut solutions = match &cached {
                    Some(parameters) => {
                        self.ray_tracer
                            .set_solutions(&vertex, &channel_position, parameters)?
                    }
                    None => self.ray_tracer.find_solutions(&vertex, &channel_position),
                };
                solutions.truncate(max_solutions);
                state.times.ray_tracing += t.elapsed();
                self.observer.on_ray_tracing(
                    shower_id,
                    station_id,
                    channel_id,
                    &solutions,
                    cached.is_some(),
                );
                if solutions.is_empty() {
                    debug!(shower_id, station_id, channel_id, "no ray tracing solution");
                    continue;
                }

                let viewing_angles: Vec<f64> = solutions
                    .iter()
                    .map(|s| angle_between(&s.launch_vector, &shower_axis))
                    .collect();
                for (s, solution) in solutions.iter().enumerate() {
                    sg.travel_times[row][column][s] = Some(solution.travel_time);
                    sg.travel_distances[row][column][s] = Some(solution.path_length);
                    sg.launch_vectors[row][column][s] = Some(solution.launch_vector.into());
                    sg.receive_vectors[row][column][s] = Some(solution.receive_vector.into());
                    sg.ray_tracing_solution_type[row][column][s] = Some(solution.solution_type.code());
                    sg.ray_tracing_reflection_angle[row][column][s] =
                        solution.reflection_angles.first().copied();
                    sg.delta_c[row][column][s] = Some(viewing_angles[s] - cherenkov);
                    let values = self.ray_tracer.solution_parameters(solution);
                    for (name, value) in parameter_names.iter().zip(values) {
                        if let Some(grid) = sg.ray_tracing_parameters.get_mut(*name) {
                            grid[row][column][s] = Some(value);
                        }
                    }
                }

                let closest = viewing_angles
                    .iter()
                    .map(|v| (v - cherenkov).abs())
                    .fold(f64::INFINITY, f64::min);
                if closest > delta_c_cut {
                    debug!(
                        shower_id,
                        channel_id,
                        delta_c = closest.to_degrees(),
                        "all rays far off the Cherenkov cone"
                    );
                    continue;
                }

                let sampling_rate = self.detector.sampling_frequency(station_id, channel_id)?;
                let n_samples = self.detector.number_of_samples(station_id, channel_id)?;
                let cable_delay = self.detector.cable_delay(station_id, channel_id)?;
                let dt = 1.0 / sampling_rate;
                let frequencies = rfft_frequencies(n_samples, dt);

                for (s, solution) in solutions.iter().enumerate() {
                    let request = EmissionRequest {
                        energy: input.shower_energies[shower_index],
                        viewing_angle: viewing_angles[s],
                        n_samples,
                        dt,
                        shower_type,
                        n_index,
                        path_length: solution.path_length,
                    };
                    let t = Instant::now();
                    let mut spectrum = self.emission.spectrum(&request, state.fft(n_samples));
                    for (bin, f) in spectrum.iter_mut().zip(&frequencies) {
                        *bin *= solution.attenuation.at(*f);
                    }
                    state.times.askaryan += t.elapsed();
                    self.observer
                        .on_emission(shower_id, station_id, channel_id, &request);

                    let polarization = self.polarization(&solution.launch_vector, &shower_axis);
                    sg.polarization[row][column][s] = Some(
                        OnSkyFrame::from_direction(&solution.launch_vector)
                            .onsky_to_ground(&polarization)
                            .into(),
                    );
                    let field = self.electric_field(&spectrum, &polarization, solution);

                    let t = Instant::now();
                    let fft = state.fft(n_samples);
                    let peak = fft
                        .freq_to_time(&field.theta, sampling_rate)
                        .into_iter()
                        .chain(fft.freq_to_time(&field.phi, sampling_rate))
                        .fold(0.0, |max: f64, x| max.max(x.abs()));
                    state.times.askaryan += t.elapsed();
                    candidate |= peak > field_threshold;

                    let (zenith, azimuth) = cartesian_to_spherical(&solution.receive_vector);
                    pending.push(PendingTrace {
                        row,
                        column,
                        shower_index,
                        shower_id,
                        channel_id,
                        solution_index: s,
                        field,
                        zenith,
                        azimuth,
                        start_time: vertex_time + solution.travel_time + cable_delay
                            - 0.5 * n_samples as f64 * dt,
                        sampling_rate,
                        n_samples,
                    });
                }
            }
        }

        if !candidate {
            debug!(group_id = group.id, station_id, "no field above threshold, skipping station");
            return Ok(false);
        }

        let mut traces = Vec::with_capacity(pending.len());
        let mut positions = Vec::with_capacity(pending.len());
        for p in pending {
            let t = Instant::now();
            let fft = state.fft(p.n_samples);
            let trace = self.response.apply(
                &p.field,
                p.zenith,
                p.azimuth,
                station_id,
                p.channel_id,
                fft,
            )?;
            state.times.detector_simulation += t.elapsed();

            let trace = SimulatedChannelTrace {
                channel_id: p.channel_id,
                shower_id: p.shower_id,
                shower_index: p.shower_index,
                solution_index: p.solution_index,
                start_time: p.start_time,
                sampling_rate: p.sampling_rate,
                trace,
            };
            if self.config.speedup.amp_per_ray_solution {
                let (amplitude, time) = trace.peak_envelope(state.fft(trace.trace.len()));
                sg.max_amp_shower_and_ray[p.row][p.column][p.solution_index] = Some(amplitude);
                sg.time_shower_and_ray[p.row][p.column][p.solution_index] = Some(time);
            }
            positions.push((p.row, p.column));
            traces.push(trace);
        }

        let start_times: Vec<f64> = traces.iter().map(|t| t.start_time).collect();
        let sub_events = split_sub_events(&start_times, self.config.split_event_time_diff.get());
        if sub_events.len() > 1 {
            info!(
                group_id = group.id,
                station_id,
                n = sub_events.len(),
                "splitting station into sub-events"
            );
        }

        let mut station_triggered = false;
        for members in sub_events {
            let counter = state.event_ids.entry(station_id).or_insert(0);
            let event_id = *counter;
            *counter += 1;

            let t = Instant::now();
            let mut waveforms = combine_channels(members.iter().map(|&i| &traces[i]));
            if self.config.signal.zerosignal {
                for waveform in &mut waveforms {
                    waveform.trace.iter_mut().for_each(|x| *x *= 0.0);
                }
            }
            if let Some(noise) = &mut state.noise {
                for waveform in &mut waveforms {
                    noise.add_to(&mut waveform.trace);
                }
            }
            self.observer.on_sub_event(station_id, event_id, &waveforms);

            let decisions: Vec<Trigger> = self.triggers.iter().map(|t| t.evaluate(&waveforms)).collect();
            state.times.detector_simulation += t.elapsed();
            for decision in &decisions {
                self.observer.on_trigger(station_id, event_id, decision);
            }
            if !decisions.iter().any(|d| d.triggered) {
                continue;
            }
            station_triggered = true;

            for &i in &members {
                let (row, column) = positions[i];
                sg.event_id[row] = Some(event_id);
                sg.triggered[row] = true;
                for (k, decision) in decisions.iter().enumerate() {
                    if decision.triggered {
                        sg.multiple_triggers[row][k] = true;
                        sg.trigger_times[row][k] = decision.trigger_time;
                    }
                    state
                        .output
                        .record_trigger(group.indices[row], k, decision.triggered);
                }
                if let Some(waveform) = waveforms.iter().find(|w| w.channel_id == traces[i].channel_id) {
                    let amplitude = waveform.maximum_amplitude();
                    let (envelope, _) = waveform.peak_envelope(state.fft(waveform.trace.len()));
                    let slot = &mut sg.maximum_amplitudes[row][column];
                    *slot = Some(slot.map_or(amplitude, |a| a.max(amplitude)));
                    let slot = &mut sg.maximum_amplitudes_envelope[row][column];
                    *slot = Some(slot.map_or(envelope, |a| a.max(envelope)));
                }
            }
        }

        if station_triggered {
            state.output.extend_station(station_id, sg)?;
        }
        Ok(station_triggered)
    }

    // Unit polarization in the on-sky frame of the launch vector.
    fn polarization(&self, launch: &Vector3<f64>, shower_axis: &Vector3<f64>) -> Vector3<f64> {
        match self.config.signal.polarization {
            Polarization::Auto => {
                let direction = launch.cross(&shower_axis.cross(launch));
                let norm = direction.norm();
                if norm == 0.0 {
                    return Vector3::zeros();
                }
                OnSkyFrame::from_direction(launch).ground_to_onsky(&(direction / norm))
            }
            Polarization::Custom { e_phi } => Vector3::new(0.0, (1.0 - e_phi * e_phi).sqrt(), e_phi),
        }
    }

    fn electric_field(
        &self,
        spectrum: &[Complex64],
        polarization: &Vector3<f64>,
        solution: &RayTracingSolution,
    ) -> ElectricField {
        let (mut theta_factor, mut phi_factor) = (polarization.y, polarization.z);
        let n_surface = self.ice.surface_index();
        for &angle in &solution.reflection_angles {
            theta_factor *= fresnel_r_p(angle, n_surface, 1.0);
            phi_factor *= fresnel_r_s(angle, n_surface, 1.0);
        }
        ElectricField {
            theta: spectrum.iter().map(|c| *c * theta_factor).collect(),
            phi: spectrum.iter().map(|c| *c * phi_factor).collect(),
        }
    }
}

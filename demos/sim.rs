//! This is a general example of how you would typically set up a simulation:
//! neutrinos interact uniformly in a cylinder of ice around a single station
//! of four antennas, and the station triggers on a two fold coincidence.
//!
//! Run with `RUST_LOG=info` to see the progress lines.
use anyhow::{Context, Result};
use icesim::config::Config;
use icesim::detector::{AmplifierDescription, ChannelDescription, Detector, StationDescription};
use icesim::emission::ShowerType;
use icesim::table::{EventTable, InputAttributes, ShowerRow};
use icesim::trigger::{TriggerKind, TriggerSettings};
use icesim::units::{Positive, EV, GHZ, M, NS, V};
use icesim::Simulation;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::{PI, TAU};
use tracing_subscriber::EnvFilter;
use uom::si::electric_potential::microvolt;
use uom::si::energy::electronvolt;
use uom::si::f64::{ElectricPotential, Energy, Length, Time};
use uom::si::length::meter;
use uom::si::time::nanosecond;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // ===========================================
    // These are most likely your free parameters:
    let n_events = 100;
    let energy = Energy::new::<electronvolt>(1e18);
    let radius = Length::new::<meter>(3000.0);
    let depth = Length::new::<meter>(2700.0);
    let seed = 42;
    // ===========================================

    // ===========================================
    // Then, this is your trigger configuration:
    let threshold = ElectricPotential::new::<microvolt>(40.0);
    let coinc_window = Time::new::<nanosecond>(200.0);
    let split_event_time_diff = Time::new::<nanosecond>(1000.0);
    // ===========================================

    let mut config = Config::default();
    config.speedup.distance_cut = true;
    config.split_event_time_diff = Positive::new(split_event_time_diff.get::<nanosecond>() * NS)
        .context("split_event_time_diff must be positive")?;
    config.triggers.push(TriggerSettings {
        name: "two_fold".to_string(),
        channels: None,
        kind: TriggerKind::SimpleThreshold {
            threshold: threshold.get::<microvolt>() * 1e-6 * V,
            number_of_coincidences: 2,
            coinc_window: Positive::new(coinc_window.get::<nanosecond>() * NS)
                .context("coinc_window must be positive")?,
        },
    });

    let channel = |id: u32, z: f64, antenna: &str| ChannelDescription {
        id,
        position: [0.0, 0.0, z * M],
        antenna_model: antenna.to_string(),
        orientation_azimuth: 0.0,
        sampling_rate: 2.0 * GHZ,
        number_of_samples: 1024,
        cable_delay: 0.0,
        amplifier: AmplifierDescription::default(),
    };
    let detector = Detector::new(vec![StationDescription {
        id: 1,
        position: [0.0, 0.0, 0.0],
        channels: vec![
            channel(0, -100.0, "vpol_dipole"),
            channel(1, -98.0, "hpol_dipole"),
            channel(2, -94.0, "vpol_dipole"),
            channel(3, -92.0, "hpol_dipole"),
        ],
    }])?;

    let r_max = radius.get::<meter>() * M;
    let z_min = -depth.get::<meter>() * M;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut input = EventTable::default();
    for id in 0..n_events {
        let r = r_max * rng.random::<f64>().sqrt();
        let phi = rng.random_range(0.0..TAU);
        input.push(ShowerRow {
            event_group_id: id,
            shower_id: id,
            vertex: Vector3::new(r * phi.cos(), r * phi.sin(), rng.random_range(z_min..0.0)),
            zenith: rng.random_range(-1.0f64..1.0).acos(),
            azimuth: rng.random_range(0.0..TAU),
            energy: energy.get::<electronvolt>() * EV,
            shower_energy: 0.2 * energy.get::<electronvolt>() * EV,
            shower_type: ShowerType::Had,
            flavor: 14,
            interaction_type: "nc".to_string(),
            vertex_time: Some(0.0),
            weight: None,
        });
    }
    input.attributes = InputAttributes {
        n_events,
        volume: Some(PI * r_max * r_max * -z_min),
        fiducial_rmin: Some(0.0),
        fiducial_rmax: Some(r_max),
        fiducial_zmin: Some(z_min),
        fiducial_zmax: Some(0.0),
        ..InputAttributes::default()
    };

    let summary = Simulation::builder()
        .config(config)
        .detector(detector)
        .output_path("icesim_output.json")
        .observer(())
        .build()?
        .run(&input)?;

    println!(
        "{} of {n_events} event groups triggered, output written to icesim_output.json",
        summary.n_triggered
    );
    Ok(())
}

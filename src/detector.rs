//! Static description of the detector array.
//!
//! Positions are stored as plain arrays so the JSON description stays
//! readable; lookups hand out [`Vector3`]s.
use crate::error::{Error, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Analog band-pass of a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmplifierDescription {
    /// -3 dB point of the high-pass filter.
    pub high_pass: f64,
    /// -3 dB point of the low-pass filter.
    pub low_pass: f64,
    /// Butterworth filter order.
    pub order: u32,
    /// Linear voltage gain.
    pub gain: f64,
    #[serde(default)]
    pub extra_gain_db: f64,
}

impl Default for AmplifierDescription {
    fn default() -> Self {
        Self {
            high_pass: 0.08,
            low_pass: 0.8,
            order: 4,
            gain: 1.0,
            extra_gain_db: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescription {
    pub id: u32,
    /// Position relative to the station.
    pub position: [f64; 3],
    pub antenna_model: String,
    #[serde(default)]
    pub orientation_azimuth: f64,
    pub sampling_rate: f64,
    pub number_of_samples: usize,
    #[serde(default)]
    pub cable_delay: f64,
    #[serde(default)]
    pub amplifier: AmplifierDescription,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StationDescription {
    pub id: u32,
    pub position: [f64; 3],
    pub channels: Vec<ChannelDescription>,
}

impl StationDescription {
    pub fn channel(&self, channel_id: u32) -> Option<&ChannelDescription> {
        self.channels.iter().find(|c| c.id == channel_id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    pub stations: Vec<StationDescription>,
}

impl Detector {
    /// Fails like [`Detector::from_json`] on stations without channels and
    /// channels without samples.
    pub fn new(stations: Vec<StationDescription>) -> Result<Self> {
        let detector = Self { stations };
        detector.validate()?;
        Ok(detector)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let detector: Self = serde_json::from_str(json)?;
        detector.validate()?;
        Ok(detector)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Canonical serialization: field order is fixed by the types, so equal
    /// descriptions serialize to equal strings.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Hex encoded SHA-256 of [`Detector::to_json`].
    ///
    /// Two runs whose detectors share a hash can share ray tracing results.
    pub fn description_hash(&self) -> Result<String> {
        let digest = Sha256::digest(self.to_json()?.as_bytes());
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn validate(&self) -> Result<()> {
        for station in &self.stations {
            if station.channels.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "station {} has no channels",
                    station.id
                )));
            }
            for channel in &station.channels {
                if !(channel.sampling_rate > 0.0) || channel.number_of_samples == 0 {
                    return Err(Error::InvalidInput(format!(
                        "station {} channel {} needs a positive sampling rate and trace length",
                        station.id, channel.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn station_ids(&self) -> Vec<u32> {
        self.stations.iter().map(|s| s.id).collect()
    }

    pub fn station(&self, station_id: u32) -> Result<&StationDescription> {
        self.stations
            .iter()
            .find(|s| s.id == station_id)
            .ok_or_else(|| Error::MissingData(format!("station {station_id} is not in the detector")))
    }

    pub fn channel(&self, station_id: u32, channel_id: u32) -> Result<&ChannelDescription> {
        self.station(station_id)?.channel(channel_id).ok_or_else(|| {
            Error::MissingData(format!(
                "channel {channel_id} is not part of station {station_id}"
            ))
        })
    }

    pub fn channel_ids(&self, station_id: u32) -> Result<Vec<u32>> {
        Ok(self.station(station_id)?.channels.iter().map(|c| c.id).collect())
    }

    pub fn number_of_channels(&self, station_id: u32) -> Result<usize> {
        Ok(self.station(station_id)?.channels.len())
    }

    pub fn absolute_position(&self, station_id: u32) -> Result<Vector3<f64>> {
        Ok(Vector3::from(self.station(station_id)?.position))
    }

    pub fn relative_position(&self, station_id: u32, channel_id: u32) -> Result<Vector3<f64>> {
        Ok(Vector3::from(self.channel(station_id, channel_id)?.position))
    }

    /// Absolute position of a channel.
    pub fn channel_position(&self, station_id: u32, channel_id: u32) -> Result<Vector3<f64>> {
        Ok(self.absolute_position(station_id)? + self.relative_position(station_id, channel_id)?)
    }

    pub fn sampling_frequency(&self, station_id: u32, channel_id: u32) -> Result<f64> {
        Ok(self.channel(station_id, channel_id)?.sampling_rate)
    }

    pub fn number_of_samples(&self, station_id: u32, channel_id: u32) -> Result<usize> {
        Ok(self.channel(station_id, channel_id)?.number_of_samples)
    }

    pub fn cable_delay(&self, station_id: u32, channel_id: u32) -> Result<f64> {
        Ok(self.channel(station_id, channel_id)?.cable_delay)
    }

    /// Mean absolute position of the channels of a station.
    pub fn barycenter(&self, station_id: u32) -> Result<Vector3<f64>> {
        let station = self.station(station_id)?;
        let origin = Vector3::from(station.position);
        let sum = station
            .channels
            .iter()
            .fold(Vector3::zeros(), |acc, c| acc + Vector3::from(c.position));
        Ok(origin + sum / station.channels.len().max(1) as f64)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn two_channel_station(id: u32, position: [f64; 3]) -> StationDescription {
        let channel = |id: u32, z: f64, antenna: &str| ChannelDescription {
            id,
            position: [0.0, 0.0, z],
            antenna_model: antenna.to_string(),
            orientation_azimuth: 0.0,
            sampling_rate: 2.0,
            number_of_samples: 512,
            cable_delay: 10.0,
            amplifier: AmplifierDescription::default(),
        };
        StationDescription {
            id,
            position,
            channels: vec![channel(0, -100.0, "vpol_dipole"), channel(1, -95.0, "hpol_dipole")],
        }
    }

    #[test]
    fn lookups() {
        let detector = Detector::new(vec![two_channel_station(11, [100.0, 0.0, 0.0])]).unwrap();
        assert_eq!(detector.station_ids(), vec![11]);
        assert_eq!(detector.number_of_channels(11).unwrap(), 2);
        assert_eq!(
            detector.channel_position(11, 1).unwrap(),
            Vector3::new(100.0, 0.0, -95.0)
        );
        assert_eq!(
            detector.barycenter(11).unwrap(),
            Vector3::new(100.0, 0.0, -97.5)
        );
        assert_eq!(detector.cable_delay(11, 0).unwrap(), 10.0);
        assert!(matches!(detector.station(12), Err(Error::MissingData(_))));
        assert!(detector.channel(11, 7).is_err());
    }

    #[test]
    fn hash_tracks_content() {
        let a = Detector::new(vec![two_channel_station(11, [0.0; 3])]).unwrap();
        let json = a.to_json().unwrap();
        let b = Detector::from_json(&json).unwrap();
        assert_eq!(a.description_hash().unwrap(), b.description_hash().unwrap());
        assert_eq!(a.description_hash().unwrap().len(), 64);

        let mut c = a.clone();
        c.stations[0].channels[0].cable_delay = 11.0;
        assert_ne!(a.description_hash().unwrap(), c.description_hash().unwrap());
    }

    #[test]
    fn built_detectors_are_validated() {
        let mut station = two_channel_station(11, [0.0; 3]);
        station.channels[1].number_of_samples = 0;
        assert!(matches!(Detector::new(vec![station]), Err(Error::InvalidInput(_))));

        let mut station = two_channel_station(11, [0.0; 3]);
        station.channels.clear();
        assert!(Detector::new(vec![station]).is_err());
    }

    #[test]
    fn rejects_empty_stations() {
        let json = r#"{"stations":[{"id":1,"position":[0,0,0],"channels":[]}]}"#;
        assert!(matches!(Detector::from_json(json), Err(Error::InvalidInput(_))));
    }
}

//! Station triggers.
//!
//! A trigger is configured with [`TriggerSettings`], judges the combined
//! waveforms of one sub-event and reports a [`Trigger`] record. Records are
//! serialized with an explicit schema version so that outputs written by
//! older runs stay readable.
use crate::error::{Error, Result};
use crate::station::ChannelWaveform;
use crate::units::{Positive, NS};
use serde::{Deserialize, Serialize};

/// Current version of the serialized [`Trigger`] record.
pub const TRIGGER_SCHEMA_VERSION: u32 = 1;

fn one() -> usize {
    1
}

fn default_coinc_window() -> Positive<f64> {
    Positive::new_unchecked(200.0 * NS)
}

fn schema_version() -> u32 {
    TRIGGER_SCHEMA_VERSION
}

/// The closed set of trigger algorithms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger_type", rename_all = "snake_case")]
pub enum TriggerKind {
    /// Passes whenever any considered channel carries signal.
    Default,
    /// `|V| >= threshold` in `number_of_coincidences` channels within
    /// `coinc_window`.
    SimpleThreshold {
        threshold: f64,
        #[serde(default = "one")]
        number_of_coincidences: usize,
        #[serde(default = "default_coinc_window")]
        coinc_window: Positive<f64>,
    },
    /// A channel fires when it crosses `threshold_high` and `threshold_low`
    /// (negative) within `high_low_window`.
    HighLow {
        threshold_high: f64,
        threshold_low: f64,
        high_low_window: Positive<f64>,
        #[serde(default = "default_coinc_window")]
        coinc_window: Positive<f64>,
        #[serde(default = "one")]
        number_of_coincidences: usize,
    },
    /// Power integrated over `integration_window`, optionally normalized as
    /// `(P - power_mean) / power_std`, compared to `threshold`.
    IntegratedPower {
        threshold: f64,
        integration_window: Positive<f64>,
        #[serde(default = "default_coinc_window")]
        coinc_window: Positive<f64>,
        #[serde(default = "one")]
        number_of_coincidences: usize,
        #[serde(default)]
        power_mean: Option<f64>,
        #[serde(default)]
        power_std: Option<f64>,
    },
}

/// A named, configured trigger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerSettings {
    pub name: String,
    /// Channels considered by the trigger; all channels when absent.
    #[serde(default)]
    pub channels: Option<Vec<u32>>,
    #[serde(flatten)]
    pub kind: TriggerKind,
}

/// Outcome of one trigger on one sub-event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default = "schema_version")]
    pub schema_version: u32,
    pub name: String,
    #[serde(default)]
    pub channels: Option<Vec<u32>>,
    #[serde(flatten)]
    pub kind: TriggerKind,
    #[serde(default)]
    pub triggered: bool,
    /// Absolute time of the trigger.
    #[serde(default)]
    pub trigger_time: Option<f64>,
    #[serde(default)]
    pub triggered_channels: Vec<u32>,
}

impl Trigger {
    pub fn from_json(json: &str) -> Result<Self> {
        let trigger: Self = serde_json::from_str(json)?;
        if trigger.schema_version > TRIGGER_SCHEMA_VERSION {
            return Err(Error::InvalidInput(format!(
                "trigger `{}` has schema version {}, newest readable is {}",
                trigger.name, trigger.schema_version, TRIGGER_SCHEMA_VERSION
            )));
        }
        Ok(trigger)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decides whether a sub-event triggers.
pub trait TriggerEvaluator {
    fn name(&self) -> &str;

    fn evaluate(&self, waveforms: &[ChannelWaveform]) -> Trigger;
}

impl TriggerEvaluator for TriggerSettings {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, waveforms: &[ChannelWaveform]) -> Trigger {
        let considered: Vec<&ChannelWaveform> = waveforms
            .iter()
            .filter(|w| {
                self.channels
                    .as_ref()
                    .is_none_or(|channels| channels.contains(&w.channel_id))
            })
            .collect();

        let channel_times: Vec<(u32, Vec<f64>)> = considered
            .iter()
            .map(|w| (w.channel_id, self.channel_trigger_times(w)))
            .collect();
        let triggered_channels: Vec<u32> = channel_times
            .iter()
            .filter(|(_, times)| !times.is_empty())
            .map(|(id, _)| *id)
            .collect();

        let trigger_time = match self.kind {
            TriggerKind::Default => channel_times
                .iter()
                .flat_map(|(_, times)| times.iter().copied())
                .min_by(f64::total_cmp),
            TriggerKind::SimpleThreshold {
                number_of_coincidences,
                coinc_window,
                ..
            }
            | TriggerKind::HighLow {
                number_of_coincidences,
                coinc_window,
                ..
            }
            | TriggerKind::IntegratedPower {
                number_of_coincidences,
                coinc_window,
                ..
            } => majority_logic(&channel_times, number_of_coincidences, coinc_window.get()),
        };

        Trigger {
            schema_version: TRIGGER_SCHEMA_VERSION,
            name: self.name.clone(),
            channels: self.channels.clone(),
            kind: self.kind.clone(),
            triggered: trigger_time.is_some(),
            trigger_time,
            triggered_channels,
        }
    }
}

impl TriggerSettings {
    /// Absolute times at which one channel satisfies the trigger condition.
    fn channel_trigger_times(&self, waveform: &ChannelWaveform) -> Vec<f64> {
        let times: Vec<f64> = waveform.times().collect();
        match self.kind {
            TriggerKind::Default => times
                .iter()
                .zip(&waveform.trace)
                .filter(|(_, v)| **v != 0.0)
                .map(|(t, _)| *t)
                .take(1)
                .collect(),
            TriggerKind::SimpleThreshold { threshold, .. } => times
                .iter()
                .zip(&waveform.trace)
                .filter(|(_, v)| v.abs() >= threshold)
                .map(|(t, _)| *t)
                .collect(),
            TriggerKind::HighLow {
                threshold_high,
                threshold_low,
                high_low_window,
                ..
            } => {
                let lows: Vec<f64> = times
                    .iter()
                    .zip(&waveform.trace)
                    .filter(|(_, v)| **v < threshold_low)
                    .map(|(t, _)| *t)
                    .collect();
                times
                    .iter()
                    .zip(&waveform.trace)
                    .filter(|(_, v)| **v > threshold_high)
                    .map(|(t, _)| *t)
                    .filter(|&t| {
                        let window = high_low_window.get();
                        let first = lows.partition_point(|&l| l < t - window);
                        lows.get(first).is_some_and(|&l| l <= t + window)
                    })
                    .collect()
            }
            TriggerKind::IntegratedPower {
                threshold,
                integration_window,
                power_mean,
                power_std,
                ..
            } => {
                let dt = 1.0 / waveform.sampling_rate;
                let m = ((integration_window.get() / dt).round() as usize).max(1);
                if waveform.trace.len() < m {
                    return Vec::new();
                }
                let normalize = |p: f64| match (power_mean, power_std) {
                    (Some(mean), Some(std)) if std > 0.0 => (p - mean) / std,
                    _ => p,
                };
                let mut sum: f64 = waveform.trace[..m].iter().map(|v| v * v).sum();
                let mut fired = Vec::new();
                for end in m - 1..waveform.trace.len() {
                    if end >= m {
                        let entering = waveform.trace[end];
                        let leaving = waveform.trace[end - m];
                        sum += entering * entering - leaving * leaving;
                    }
                    if normalize(sum * dt) >= threshold {
                        fired.push(times[end]);
                    }
                }
                fired
            }
        }
    }
}

/// Earliest time `t` at which at least `n` distinct channels fired within
/// `[t - window, t]`. A negative window never triggers.
///
/// # Examples
///
/// ```
/// use icesim::trigger::majority_logic;
/// let channels = vec![(0, vec![10.0]), (1, vec![25.0]), (2, vec![500.0])];
/// assert_eq!(majority_logic(&channels, 2, 20.0), Some(25.0));
/// assert_eq!(majority_logic(&channels, 2, 10.0), None);
/// ```
pub fn majority_logic(channel_times: &[(u32, Vec<f64>)], n: usize, window: f64) -> Option<f64> {
    let n = n.max(1);
    let mut hits: Vec<(f64, usize)> = channel_times
        .iter()
        .enumerate()
        .flat_map(|(c, (_, times))| times.iter().map(move |&t| (t, c)))
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut counts = vec![0usize; channel_times.len()];
    let mut distinct = 0;
    let mut first = 0;
    for (i, &(t, channel)) in hits.iter().enumerate() {
        counts[channel] += 1;
        if counts[channel] == 1 {
            distinct += 1;
        }
        while first <= i && hits[first].0 < t - window {
            let leaving = hits[first].1;
            counts[leaving] -= 1;
            if counts[leaving] == 0 {
                distinct -= 1;
            }
            first += 1;
        }
        if distinct >= n {
            return Some(t);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waveform(channel_id: u32, start_time: f64, trace: Vec<f64>) -> ChannelWaveform {
        ChannelWaveform {
            channel_id,
            start_time,
            sampling_rate: 1.0,
            trace,
        }
    }

    fn pulse(at: usize, amplitude: f64) -> Vec<f64> {
        let mut trace = vec![0.0; 100];
        trace[at] = amplitude;
        trace[at + 1] = -amplitude;
        trace
    }

    fn simple(threshold: f64, number_of_coincidences: usize) -> TriggerSettings {
        TriggerSettings {
            name: "simple".to_string(),
            channels: None,
            kind: TriggerKind::SimpleThreshold {
                threshold,
                number_of_coincidences,
                coinc_window: Positive::new(30.0).unwrap(),
            },
        }
    }

    #[test]
    fn simple_threshold_coincidence() {
        let waveforms = vec![
            waveform(0, 1000.0, pulse(10, 1.0)),
            waveform(1, 1000.0, pulse(20, 1.0)),
            waveform(2, 1000.0, pulse(90, 0.1)),
        ];
        let trigger = simple(0.5, 2).evaluate(&waveforms);
        assert!(trigger.triggered);
        assert_eq!(trigger.trigger_time, Some(1020.0));
        assert_eq!(trigger.triggered_channels, vec![0, 1]);

        assert!(!simple(0.5, 3).evaluate(&waveforms).triggered);
        assert!(!simple(2.0, 1).evaluate(&waveforms).triggered);
    }

    #[test]
    fn channel_selection() {
        let waveforms = vec![
            waveform(0, 0.0, pulse(10, 1.0)),
            waveform(1, 0.0, vec![0.0; 100]),
        ];
        let mut settings = simple(0.5, 1);
        settings.channels = Some(vec![1]);
        let trigger = settings.evaluate(&waveforms);
        assert!(!trigger.triggered);
        assert_eq!(trigger.trigger_time, None);
    }

    #[test]
    fn high_low_needs_both_sides() {
        let settings = TriggerSettings {
            name: "hilo".to_string(),
            channels: None,
            kind: TriggerKind::HighLow {
                threshold_high: 0.5,
                threshold_low: -0.5,
                high_low_window: Positive::new(5.0).unwrap(),
                coinc_window: Positive::new(30.0).unwrap(),
                number_of_coincidences: 1,
            },
        };
        let bipolar = waveform(0, 0.0, pulse(40, 1.0));
        assert_eq!(settings.evaluate(&[bipolar]).trigger_time, Some(40.0));

        let mut unipolar = vec![0.0; 100];
        unipolar[40] = 1.0;
        assert!(!settings.evaluate(&[waveform(0, 0.0, unipolar)]).triggered);
    }

    #[test]
    fn integrated_power_window() {
        let settings = TriggerSettings {
            name: "power".to_string(),
            channels: None,
            kind: TriggerKind::IntegratedPower {
                threshold: 1.5,
                integration_window: Positive::new(4.0).unwrap(),
                coinc_window: Positive::new(30.0).unwrap(),
                number_of_coincidences: 1,
                power_mean: None,
                power_std: None,
            },
        };
        // two unit samples, power 2 once both are inside the window
        let trigger = settings.evaluate(&[waveform(0, 0.0, pulse(50, 1.0))]);
        assert!(trigger.triggered);
        assert_eq!(trigger.trigger_time, Some(51.0));
        assert!(!settings.evaluate(&[waveform(0, 0.0, pulse(50, 0.5))]).triggered);
    }

    #[test]
    fn default_trigger_sees_any_signal() {
        let settings = TriggerSettings {
            name: "default".to_string(),
            channels: None,
            kind: TriggerKind::Default,
        };
        let trigger = settings.evaluate(&[
            waveform(0, 0.0, vec![0.0; 10]),
            waveform(1, 5.0, pulse(3, 1e-9)),
        ]);
        assert!(trigger.triggered);
        assert_eq!(trigger.trigger_time, Some(8.0));
        assert!(!settings.evaluate(&[waveform(0, 0.0, vec![0.0; 10])]).triggered);
    }

    #[test]
    fn settings_from_json() {
        let json = r#"{"name": "main", "trigger_type": "simple_threshold", "threshold": 0.01}"#;
        let settings: TriggerSettings = serde_json::from_str(json).unwrap();
        assert_eq!(
            settings.kind,
            TriggerKind::SimpleThreshold {
                threshold: 0.01,
                number_of_coincidences: 1,
                coinc_window: Positive::new(200.0).unwrap(),
            }
        );
        assert!(serde_json::from_str::<TriggerSettings>(
            r#"{"name": "x", "trigger_type": "phased_array"}"#
        )
        .is_err());
    }

    #[test]
    fn windows_must_be_positive() {
        for window in ["-1.0", "0.0"] {
            let json = format!(
                r#"{{"name": "main", "trigger_type": "simple_threshold", "threshold": 1e-4, "coinc_window": {window}}}"#
            );
            assert!(serde_json::from_str::<TriggerSettings>(&json).is_err(), "{window}");
        }
        let json = r#"{"name": "p", "trigger_type": "integrated_power", "threshold": 1.0, "integration_window": -4.0}"#;
        assert!(serde_json::from_str::<TriggerSettings>(json).is_err());
    }

    #[test]
    fn majority_logic_tolerates_bad_windows() {
        let channels = vec![(0, vec![1.0]), (1, vec![2.0])];
        assert_eq!(majority_logic(&channels, 2, -10.0), None);
        assert_eq!(majority_logic(&channels, 1, -10.0), None);
        assert_eq!(majority_logic(&channels, 2, 1.0), Some(2.0));
    }

    #[test]
    fn versioned_records() {
        let trigger = simple(0.5, 1).evaluate(&[waveform(0, 0.0, pulse(10, 1.0))]);
        let back = Trigger::from_json(&trigger.to_json().unwrap()).unwrap();
        assert_eq!(trigger, back);

        // fields added after the first version may be missing
        let old = r#"{"name": "old", "trigger_type": "default", "triggered": true}"#;
        let parsed = Trigger::from_json(old).unwrap();
        assert_eq!(parsed.schema_version, TRIGGER_SCHEMA_VERSION);
        assert!(parsed.triggered_channels.is_empty());

        let newer = r#"{"schema_version": 99, "name": "new", "trigger_type": "default"}"#;
        assert!(matches!(Trigger::from_json(newer), Err(Error::InvalidInput(_))));
    }
}

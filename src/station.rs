//! Simulated voltage traces of one station and their grouping into
//! independently triggered sub-events.
use crate::fft::RealFft;
use std::collections::BTreeMap;

/// Voltage trace of one channel produced by a single ray tracing solution
/// of a single shower.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedChannelTrace {
    pub channel_id: u32,
    pub shower_id: u64,
    /// Row of the shower in the input table.
    pub shower_index: usize,
    pub solution_index: usize,
    /// Absolute time of the first sample.
    pub start_time: f64,
    pub sampling_rate: f64,
    pub trace: Vec<f64>,
}

impl SimulatedChannelTrace {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.trace.len() as f64 / self.sampling_rate
    }

    pub fn maximum_amplitude(&self) -> f64 {
        maximum_amplitude(&self.trace)
    }

    /// Peak of the Hilbert envelope and its absolute time. `fft` should be a
    /// plan for the trace length.
    pub fn peak_envelope(&self, fft: &RealFft) -> (f64, f64) {
        peak_envelope(fft, &self.trace, self.start_time, self.sampling_rate)
    }
}

/// Sum of all traces of one channel within a sub-event.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelWaveform {
    pub channel_id: u32,
    pub start_time: f64,
    pub sampling_rate: f64,
    pub trace: Vec<f64>,
}

impl ChannelWaveform {
    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.trace.len()).map(move |i| self.start_time + i as f64 / self.sampling_rate)
    }

    pub fn maximum_amplitude(&self) -> f64 {
        maximum_amplitude(&self.trace)
    }

    pub fn peak_envelope(&self, fft: &RealFft) -> (f64, f64) {
        peak_envelope(fft, &self.trace, self.start_time, self.sampling_rate)
    }
}

fn maximum_amplitude(trace: &[f64]) -> f64 {
    trace.iter().fold(0.0, |max, x| x.abs().max(max))
}

fn peak_envelope(fft: &RealFft, trace: &[f64], start_time: f64, sampling_rate: f64) -> (f64, f64) {
    if trace.is_empty() || fft.is_empty() {
        return (0.0, start_time);
    }
    let envelope = fft.envelope(trace);
    let (i, peak) = envelope
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::MIN), |best, (i, e)| if e > best.1 { (i, e) } else { best });
    (peak, start_time + i as f64 / sampling_rate)
}

/// Group trace indices into sub-events. Traces are ordered by start time and
/// a new sub-event begins wherever consecutive start times differ by more
/// than `threshold`.
///
/// # Examples
///
/// ```
/// use icesim::station::split_sub_events;
/// let groups = split_sub_events(&[0.0, 5.0, 300.0, 305.0], 100.0);
/// assert_eq!(groups, vec![vec![0, 1], vec![2, 3]]);
/// ```
pub fn split_sub_events(start_times: &[f64], threshold: f64) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..start_times.len()).collect();
    order.sort_by(|&a, &b| start_times[a].total_cmp(&start_times[b]));

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut previous: Option<f64> = None;
    for i in order {
        let t = start_times[i];
        match (previous, groups.last_mut()) {
            (Some(p), Some(group)) if t - p <= threshold => group.push(i),
            _ => groups.push(vec![i]),
        }
        previous = Some(t);
    }
    groups
}

/// Sum the traces of each channel on a common time grid. Waveforms are
/// returned in channel id order.
pub fn combine_channels<'a>(
    traces: impl IntoIterator<Item = &'a SimulatedChannelTrace>,
) -> Vec<ChannelWaveform> {
    let mut by_channel: BTreeMap<u32, Vec<&SimulatedChannelTrace>> = BTreeMap::new();
    for trace in traces {
        by_channel.entry(trace.channel_id).or_default().push(trace);
    }

    by_channel
        .into_iter()
        .map(|(channel_id, traces)| {
            let sampling_rate = traces[0].sampling_rate;
            let start_time = traces.iter().map(|t| t.start_time).fold(f64::INFINITY, f64::min);
            let end_time = traces.iter().map(|t| t.end_time()).fold(f64::NEG_INFINITY, f64::max);
            let n = ((end_time - start_time) * sampling_rate).round().max(0.0) as usize;

            let mut combined = vec![0.0; n];
            for t in traces {
                let offset = ((t.start_time - start_time) * sampling_rate).round() as usize;
                for (slot, value) in combined.iter_mut().skip(offset).zip(&t.trace) {
                    *slot += value;
                }
            }
            ChannelWaveform {
                channel_id,
                start_time,
                sampling_rate,
                trace: combined,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(channel_id: u32, start_time: f64, samples: Vec<f64>) -> SimulatedChannelTrace {
        SimulatedChannelTrace {
            channel_id,
            shower_id: 0,
            shower_index: 0,
            solution_index: 0,
            start_time,
            sampling_rate: 1.0,
            trace: samples,
        }
    }

    #[test]
    fn split_on_gaps() {
        assert_eq!(
            split_sub_events(&[300.0, 0.0, 305.0, 5.0], 100.0),
            vec![vec![1, 3], vec![0, 2]]
        );
        // a gap equal to the threshold does not split
        assert_eq!(split_sub_events(&[0.0, 100.0], 100.0), vec![vec![0, 1]]);
        assert!(split_sub_events(&[], 100.0).is_empty());
        assert_eq!(split_sub_events(&[7.0], 1.0), vec![vec![0]]);
    }

    #[test]
    fn chained_gaps_stay_together() {
        let times: Vec<f64> = (0..10).map(|i| i as f64 * 90.0).collect();
        assert_eq!(split_sub_events(&times, 100.0).len(), 1);
    }

    #[test]
    fn combine_on_common_grid() {
        let traces = [
            trace(2, 10.0, vec![1.0, 1.0, 1.0]),
            trace(1, 0.0, vec![0.5]),
            trace(2, 11.0, vec![2.0, 2.0, 2.0]),
        ];
        let combined = combine_channels(&traces);
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].channel_id, 1);
        assert_eq!(combined[1].channel_id, 2);
        assert_eq!(combined[1].start_time, 10.0);
        assert_eq!(combined[1].trace, vec![1.0, 3.0, 3.0, 2.0]);
        assert_eq!(combined[1].maximum_amplitude(), 3.0);
    }

    #[test]
    fn envelope_peak_time() {
        let mut samples = vec![0.0; 64];
        samples[20] = -4.0;
        let t = trace(0, 100.0, samples);
        assert_eq!(t.maximum_amplitude(), 4.0);
        let (peak, time) = t.peak_envelope(&RealFft::new(64));
        assert!(peak >= 4.0 - 1e-9);
        assert_eq!(time, 120.0);
        assert_eq!(t.end_time(), 164.0);

        let empty = trace(0, 5.0, Vec::new());
        assert_eq!(empty.peak_envelope(&RealFft::new(0)), (0.0, 5.0));
    }
}

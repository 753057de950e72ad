//! Wall clock bookkeeping and periodic status lines.
use std::time::{Duration, Instant};
use tracing::info;

/// Wall clock time spent in each stage of the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhaseTimes {
    pub input: Duration,
    pub weights: Duration,
    pub distance_cut: Duration,
    pub ray_tracing: Duration,
    pub askaryan: Duration,
    pub detector_simulation: Duration,
    pub output: Duration,
}

impl PhaseTimes {
    pub fn total(&self) -> Duration {
        self.phases().iter().map(|(_, d)| *d).sum()
    }

    fn phases(&self) -> [(&'static str, Duration); 7] {
        [
            ("input", self.input),
            ("weights", self.weights),
            ("distance cut", self.distance_cut),
            ("ray tracing", self.ray_tracing),
            ("askaryan", self.askaryan),
            ("detector", self.detector_simulation),
            ("output", self.output),
        ]
    }

    /// Share of `elapsed` spent in every phase, in percent.
    pub fn breakdown(&self, elapsed: Duration) -> String {
        let elapsed = elapsed.as_secs_f64();
        self.phases()
            .iter()
            .map(|(name, d)| {
                let share = if elapsed > 0.0 {
                    100.0 * d.as_secs_f64() / elapsed
                } else {
                    0.0
                };
                format!("{name} {share:.0}%")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `1d 2h 3m 4s` style rendering, leading zero units omitted.
///
/// # Examples
///
/// ```
/// use icesim::progress::pretty_time_delta;
/// use std::time::Duration;
///
/// assert_eq!(pretty_time_delta(Duration::from_secs(93_784)), "1d 2h 3m 4s");
/// assert_eq!(pretty_time_delta(Duration::from_secs(125)), "2m 5s");
/// assert_eq!(pretty_time_delta(Duration::from_millis(300)), "0s");
/// ```
pub fn pretty_time_delta(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let (days, hours, minutes, seconds) = (
        seconds / 86_400,
        seconds % 86_400 / 3600,
        seconds % 3600 / 60,
        seconds % 60,
    );
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Emits a status line whenever at least `interval` passed since the last
/// one.
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    interval: Duration,
    start: Instant,
    last: Instant,
}

impl ProgressReporter {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            start: now,
            last: now,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Status after `done` of `total` event groups.
    pub fn status(&self, done: usize, total: usize, n_triggered: usize, times: &PhaseTimes) -> String {
        let elapsed = self.elapsed();
        let fraction = if total > 0 {
            done as f64 / total as f64
        } else {
            1.0
        };
        let eta = if fraction > 0.0 {
            elapsed.mul_f64((1.0 - fraction) / fraction)
        } else {
            Duration::ZERO
        };
        format!(
            "processing event group {done}/{total} ({:.0}%), {n_triggered} triggered, ETA {} ({})",
            100.0 * fraction,
            pretty_time_delta(eta),
            times.breakdown(elapsed),
        )
    }

    /// Logs the status if the interval elapsed. Returns whether it did.
    pub fn report(&mut self, done: usize, total: usize, n_triggered: usize, times: &PhaseTimes) -> bool {
        if self.last.elapsed() < self.interval {
            return false;
        }
        self.last = Instant::now();
        info!("{}", self.status(done, total, n_triggered, times));
        true
    }

    pub fn finish(&self, total: usize, n_triggered: usize, times: &PhaseTimes) {
        let elapsed = self.elapsed();
        info!(
            "finished {total} event groups in {}, {n_triggered} triggered ({})",
            pretty_time_delta(elapsed),
            times.breakdown(elapsed),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakdown_in_percent() {
        let times = PhaseTimes {
            ray_tracing: Duration::from_secs(3),
            askaryan: Duration::from_secs(1),
            ..PhaseTimes::default()
        };
        assert_eq!(times.total(), Duration::from_secs(4));
        let line = times.breakdown(Duration::from_secs(10));
        assert!(line.contains("ray tracing 30%"), "{line}");
        assert!(line.contains("askaryan 10%"), "{line}");
        assert!(line.contains("input 0%"), "{line}");
    }

    #[test]
    fn reports_are_time_based() {
        let mut reporter = ProgressReporter::new(Duration::from_secs(3600));
        assert!(!reporter.report(1, 10, 0, &PhaseTimes::default()));

        let mut eager = ProgressReporter::new(Duration::ZERO);
        assert!(eager.report(1, 10, 0, &PhaseTimes::default()));
        assert!(eager.report(2, 10, 0, &PhaseTimes::default()));
    }

    #[test]
    fn status_line() {
        let reporter = ProgressReporter::new(Duration::from_secs(1));
        let status = reporter.status(5, 10, 2, &PhaseTimes::default());
        assert!(status.starts_with("processing event group 5/10 (50%), 2 triggered"), "{status}");
        assert!(reporter.status(0, 0, 0, &PhaseTimes::default()).contains("(100%)"));
    }
}

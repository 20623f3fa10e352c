//! Background metrics sampling task.
//!
//! [`MetricsSampler::start`] spawns a task that reads the probe on a fixed
//! interval (first reading immediately) and records a [`MetricSample`]
//! per tick. [`SamplerHandle::stop`] cancels the task, waits for it, and
//! returns every sample in order. Dropping the handle without calling
//! `stop` cancels the task and discards its samples.
//!
//! Timestamps are the wall-clock time at task start plus elapsed time on
//! the runtime's monotonic clock, so consecutive samples are at least one
//! interval apart even if the system clock steps.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use mlpromote_core::metrics::MetricSample;
use mlpromote_core::types::Timestamp;

use crate::collector::SystemProbe;
use crate::handoff::LossReader;

pub struct MetricsSampler;

impl MetricsSampler {
    /// Spawn the sampling task on the current tokio runtime.
    pub fn start<P: SystemProbe>(probe: P, interval: Duration, loss: LossReader) -> SamplerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sample_loop(probe, interval, loss, cancel.clone()));
        tracing::debug!(interval_ms = interval.as_millis() as u64, "Metrics sampler started");
        SamplerHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Owner of a running sampler. Stopped exactly once, by [`stop`](Self::stop)
/// or by drop.
pub struct SamplerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<Vec<MetricSample>>>,
}

impl SamplerHandle {
    /// Stop sampling and return the collected samples.
    ///
    /// A final sample is taken on the way out so the last reported loss is
    /// always captured.
    pub async fn stop(mut self) -> Vec<MetricSample> {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return Vec::new();
        };
        match task.await {
            Ok(samples) => {
                tracing::debug!(samples = samples.len(), "Metrics sampler stopped");
                samples
            }
            Err(e) => {
                tracing::warn!(error = %e, "Metrics sampler task ended abnormally");
                Vec::new()
            }
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

async fn sample_loop<P: SystemProbe>(
    mut probe: P,
    interval: Duration,
    loss: LossReader,
    cancel: CancellationToken,
) -> Vec<MetricSample> {
    let clock = SampleClock::start();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut samples: Vec<MetricSample> = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let last = samples.last().map(|s| s.timestamp);
                samples.push(take_sample(&mut probe, &loss, clock.now(), last));
            }
        }
    }

    let last = samples.last().map(|s| s.timestamp);
    samples.push(take_sample(&mut probe, &loss, clock.now(), last));
    samples
}

/// Wall-clock anchor advanced by the runtime's monotonic clock.
struct SampleClock {
    wall: Timestamp,
    started: Instant,
}

impl SampleClock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> Timestamp {
        let elapsed =
            TimeDelta::from_std(self.started.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
        self.wall.checked_add_signed(elapsed).unwrap_or(self.wall)
    }
}

fn take_sample<P: SystemProbe>(
    probe: &mut P,
    loss: &LossReader,
    now: Timestamp,
    last: Option<Timestamp>,
) -> MetricSample {
    let reading = probe.read();
    MetricSample {
        timestamp: next_timestamp(now, last),
        cpu_percent: reading.cpu_percent,
        memory_percent: reading.memory_percent,
        gpu_percent: reading.gpu_percent,
        loss: loss.latest(),
    }
}

/// `now`, nudged forward if the clock has not advanced past `last`.
fn next_timestamp(now: Timestamp, last: Option<Timestamp>) -> Timestamp {
    match last {
        Some(last) if now <= last => last + TimeDelta::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::collector::ProbeReading;
    use crate::handoff::loss_channel;

    /// Probe with fixed readings that counts how often it is read.
    struct CountingProbe(Arc<AtomicUsize>);

    impl SystemProbe for CountingProbe {
        fn read(&mut self) -> ProbeReading {
            self.0.fetch_add(1, Ordering::SeqCst);
            ProbeReading {
                cpu_percent: 12.5,
                memory_percent: 40.0,
                gpu_percent: None,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn samples_are_spaced_by_the_interval() {
        let reads = Arc::new(AtomicUsize::new(0));
        let interval = Duration::from_secs(10);
        let (reporter, reader) = loss_channel();
        let handle = MetricsSampler::start(CountingProbe(reads.clone()), interval, reader);

        reporter.report(0.75);
        tokio::time::sleep(Duration::from_secs(35)).await;
        let samples = handle.stop().await;

        // Ticks at 0s, 10s, 20s and 30s, then the final sample at 35s.
        assert_eq!(samples.len(), 5);
        assert_eq!(reads.load(Ordering::SeqCst), 5);

        let interval = TimeDelta::from_std(interval).unwrap();
        let gaps: Vec<TimeDelta> = samples
            .windows(2)
            .map(|pair| pair[1].timestamp - pair[0].timestamp)
            .collect();
        assert!(gaps[..3].iter().all(|gap| *gap >= interval), "{gaps:?}");
        assert_eq!(gaps[3], TimeDelta::seconds(5));
        assert_eq!(samples.last().unwrap().loss, Some(0.75));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_interval_yields_two_samples() {
        let reads = Arc::new(AtomicUsize::new(0));
        let handle = MetricsSampler::start(
            CountingProbe(reads.clone()),
            Duration::from_secs(10),
            LossReader::detached(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        let samples = handle.stop().await;

        assert_eq!(samples.len(), 2);
        assert!(samples[1].timestamp > samples[0].timestamp);
        assert!(samples.iter().all(|s| s.loss.is_none()));
    }

    #[test]
    fn timestamp_passes_through_when_clock_advances() {
        let last = Utc::now();
        let now = last + TimeDelta::milliseconds(5);
        assert_eq!(next_timestamp(now, Some(last)), now);
        assert_eq!(next_timestamp(now, None), now);
    }

    #[test]
    fn timestamp_nudged_when_clock_stalls_or_regresses() {
        let last = Utc::now();
        assert_eq!(
            next_timestamp(last, Some(last)),
            last + TimeDelta::microseconds(1)
        );
        let earlier = last - TimeDelta::seconds(1);
        assert!(next_timestamp(earlier, Some(last)) > last);
    }
}

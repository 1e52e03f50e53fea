//! Background telemetry sampling for the active session.
//!
//! The sampler runs a worker thread that pulls a [`MetricSample`] from a
//! [`MetricsSource`] once per interval and fans it out over MPSC channels
//! to every subscriber. Stopping is synchronous: once [`MetricsSampler::stop`]
//! returns, the worker has exited and nothing more is emitted.

use crate::constants::{DOWNLOAD_RANGE_MBPS, PING_RANGE_MS, UPLOAD_RANGE_MBPS};
use rand::Rng;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

/// One throughput/latency measurement of the tunnel.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    /// Download rate in Mbit/s.
    pub download_mbps: f64,
    /// Upload rate in Mbit/s.
    pub upload_mbps: f64,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u32,
    /// When the sample was taken.
    pub timestamp: SystemTime,
}

/// Produces telemetry samples on demand.
pub trait MetricsSource: Send {
    /// Takes one sample.
    fn sample(&mut self) -> MetricSample;
}

/// Mock telemetry with uniformly random values in fixed ranges.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomMetrics;

impl MetricsSource for RandomMetrics {
    fn sample(&mut self) -> MetricSample {
        let mut rng = rand::rng();
        MetricSample {
            download_mbps: one_decimal(rng.random_range(DOWNLOAD_RANGE_MBPS.0..DOWNLOAD_RANGE_MBPS.1)),
            upload_mbps: one_decimal(rng.random_range(UPLOAD_RANGE_MBPS.0..UPLOAD_RANGE_MBPS.1)),
            latency_ms: rng.random_range(PING_RANGE_MS.0..=PING_RANGE_MS.1),
            timestamp: SystemTime::now(),
        }
    }
}

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Default)]
struct SamplerState {
    running: bool,
    latest: Option<MetricSample>,
    subscribers: Vec<Sender<MetricSample>>,
}

type Shared = Arc<(Mutex<SamplerState>, Condvar)>;

/// Periodic, restartable telemetry sampler.
pub struct MetricsSampler {
    interval: Duration,
    source: Arc<Mutex<Box<dyn MetricsSource>>>,
    shared: Shared,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsSampler {
    /// Creates a stopped sampler pulling from `source` every `interval`.
    pub fn new(source: Box<dyn MetricsSource>, interval: Duration) -> Self {
        Self {
            interval,
            source: Arc::new(Mutex::new(source)),
            shared: Arc::new((Mutex::new(SamplerState::default()), Condvar::new())),
            worker: Mutex::new(None),
        }
    }

    /// Sampling interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns a receiver yielding every sample emitted from now on, across
    /// stop/start cycles. Iterating it blocks until the next sample.
    pub fn subscribe(&self) -> Receiver<MetricSample> {
        let (tx, rx) = mpsc::channel();
        lock(&self.shared.0).subscribers.push(tx);
        rx
    }

    /// Most recent sample of the current run, if any.
    pub fn latest(&self) -> Option<MetricSample> {
        lock(&self.shared.0).latest.clone()
    }

    /// Whether the worker is running.
    pub fn is_running(&self) -> bool {
        lock(&self.shared.0).running
    }

    /// Starts sampling. Does nothing if already running.
    pub fn start(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }

        lock(&self.shared.0).running = true;

        let shared = Arc::clone(&self.shared);
        let source = Arc::clone(&self.source);
        let interval = self.interval;
        *worker = Some(thread::spawn(move || run_worker(&shared, &source, interval)));
        tracing::debug!(?interval, "metrics sampler started");
    }

    /// Stops sampling and waits for the worker to exit. Does nothing if
    /// already stopped. The latest sample is discarded.
    pub fn stop(&self) {
        let mut worker = lock(&self.worker);
        {
            let (state, wake) = &*self.shared;
            let mut state = lock(state);
            state.running = false;
            state.latest = None;
            wake.notify_all();
        }

        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                tracing::warn!("metrics worker panicked");
            }
            tracing::debug!("metrics sampler stopped");
        }
    }
}

impl Drop for MetricsSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: &Shared, source: &Mutex<Box<dyn MetricsSource>>, interval: Duration) {
    let (state_lock, wake) = &**shared;
    loop {
        let sample = lock(source).sample();

        let mut state = lock(state_lock);
        // Checked under the same lock `stop` takes, so nothing is emitted
        // once the flag is cleared.
        if !state.running {
            return;
        }
        state.latest = Some(sample.clone());
        state
            .subscribers
            .retain(|tx| tx.send(sample.clone()).is_ok());

        let (state, _) = wake
            .wait_timeout_while(state, interval, |s| s.running)
            .unwrap_or_else(PoisonError::into_inner);
        if !state.running {
            return;
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        taken: Arc<AtomicUsize>,
    }

    impl MetricsSource for CountingSource {
        #[allow(clippy::cast_precision_loss)]
        fn sample(&mut self) -> MetricSample {
            let n = self.taken.fetch_add(1, Ordering::SeqCst);
            MetricSample {
                download_mbps: n as f64,
                upload_mbps: 0.0,
                latency_ms: 1,
                timestamp: SystemTime::now(),
            }
        }
    }

    fn counting(interval: Duration) -> (MetricsSampler, Arc<AtomicUsize>) {
        let taken = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            taken: Arc::clone(&taken),
        };
        (MetricsSampler::new(Box::new(source), interval), taken)
    }

    #[test]
    fn test_random_metrics_ranges() {
        let mut source = RandomMetrics;
        for _ in 0..100 {
            let s = source.sample();
            assert!((50.0..=100.0).contains(&s.download_mbps));
            assert!((20.0..=60.0).contains(&s.upload_mbps));
            assert!((10..=30).contains(&s.latency_ms));
        }
    }

    #[test]
    fn test_ping_reaches_both_range_ends() {
        let mut source = RandomMetrics;
        let pings: Vec<u32> = (0..3000).map(|_| source.sample().latency_ms).collect();
        assert!(pings.contains(&PING_RANGE_MS.0));
        assert!(pings.contains(&PING_RANGE_MS.1));
    }

    #[test]
    fn test_one_decimal() {
        assert!((one_decimal(52.349) - 52.3).abs() < 1e-9);
        assert!((one_decimal(52.36) - 52.4).abs() < 1e-9);
    }

    #[test]
    fn test_samples_are_emitted_while_running() {
        let (sampler, _) = counting(Duration::from_millis(5));
        let rx = sampler.subscribe();
        sampler.start();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(second.download_mbps > first.download_mbps);
        assert!(sampler.latest().is_some());

        sampler.stop();
    }

    #[test]
    fn test_no_samples_after_stop() {
        let (sampler, taken) = counting(Duration::from_millis(1));
        let rx = sampler.subscribe();
        sampler.start();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        sampler.stop();
        let emitted_before = rx.try_iter().count();
        let taken_at_stop = taken.load(Ordering::SeqCst);

        thread::sleep(Duration::from_millis(30));
        assert!(rx.try_recv().is_err());
        assert_eq!(taken.load(Ordering::SeqCst), taken_at_stop);
        assert!(emitted_before <= taken_at_stop);
        assert!(sampler.latest().is_none());
        assert!(!sampler.is_running());
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let (sampler, _) = counting(Duration::from_secs(60));
        assert_eq!(sampler.interval(), Duration::from_secs(60));
        let rx = sampler.subscribe();

        sampler.start();
        sampler.start();
        assert!(sampler.is_running());
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        sampler.stop();
        sampler.stop();
        assert!(!sampler.is_running());
        // A second worker would have produced a second immediate sample.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_restart_reuses_subscription() {
        let (sampler, _) = counting(Duration::from_secs(60));
        let rx = sampler.subscribe();

        sampler.start();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        sampler.stop();

        sampler.start();
        let sample = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(sample.download_mbps >= 1.0);
        sampler.stop();
    }

    #[test]
    fn test_stop_wakes_long_interval() {
        let (sampler, _) = counting(Duration::from_secs(3600));
        sampler.start();
        let started = std::time::Instant::now();
        sampler.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let (sampler, _) = counting(Duration::from_millis(1));
        drop(sampler.subscribe());
        let rx = sampler.subscribe();
        sampler.start();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        sampler.stop();
        assert_eq!(lock(&sampler.shared.0).subscribers.len(), 1);
    }
}

//! Metric instruments: counters, meters, timers and gauges.
//!
//! Instruments are shared through `Arc` between the registry and the metric
//! families that update them. Hot-path updates are atomic; only the rate
//! decay and the latency distribution sit behind short `parking_lot` locks.

use parking_lot::Mutex;
use quantiles::ckms::CKMS;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Rates decay on a fixed 5 second tick
const TICK_INTERVAL: Duration = Duration::from_secs(5);
const TICK_NANOS: u64 = 5_000_000_000;

/// Relative error of the latency quantile estimator
const QUANTILE_ERROR: f64 = 0.001;

/// Samples per estimator window; at most two windows are retained
const WINDOW_SAMPLES: usize = 1028;

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(&self) {
        self.inc_by(1);
    }

    #[inline]
    pub fn inc_by(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Exponentially weighted moving average over one window.
#[derive(Debug, Clone, Copy)]
struct Ewma {
    alpha: f64,
    rate: f64,
    uncounted: u64,
    initialized: bool,
}

impl Ewma {
    fn over_minutes(minutes: f64) -> Self {
        let alpha = 1.0 - (-TICK_INTERVAL.as_secs_f64() / 60.0 / minutes).exp();
        Self {
            alpha,
            rate: 0.0,
            uncounted: 0,
            initialized: false,
        }
    }

    fn tick(&mut self) {
        let instant_rate = self.uncounted as f64 / TICK_INTERVAL.as_secs_f64();
        self.uncounted = 0;
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }
}

/// Point-in-time view of a [`Meter`]. Rates are events per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeterSnapshot {
    pub count: u64,
    pub m1_rate: f64,
    pub m5_rate: f64,
    pub m15_rate: f64,
    pub mean_rate: f64,
}

/// Event counter with 1, 5 and 15 minute moving rates.
#[derive(Debug)]
pub struct Meter {
    count: AtomicU64,
    start: Instant,
    /// Nanoseconds since `start` at the last applied tick
    last_tick: AtomicU64,
    rates: Mutex<[Ewma; 3]>,
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

impl Meter {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            start: Instant::now(),
            last_tick: AtomicU64::new(0),
            rates: Mutex::new([
                Ewma::over_minutes(1.0),
                Ewma::over_minutes(5.0),
                Ewma::over_minutes(15.0),
            ]),
        }
    }

    #[inline]
    pub fn mark(&self) {
        self.mark_n(1);
    }

    pub fn mark_n(&self, n: u64) {
        self.tick_if_necessary();
        self.count.fetch_add(n, Ordering::Relaxed);
        let mut rates = self.rates.lock();
        for ewma in rates.iter_mut() {
            ewma.uncounted += n;
        }
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        self.tick_if_necessary();
        let count = self.count();
        let [m1, m5, m15] = *self.rates.lock();
        let elapsed = self.start.elapsed().as_secs_f64();
        let mean_rate = if count == 0 || elapsed <= 0.0 {
            0.0
        } else {
            count as f64 / elapsed
        };

        MeterSnapshot {
            count,
            m1_rate: m1.rate,
            m5_rate: m5.rate,
            m15_rate: m15.rate,
            mean_rate,
        }
    }

    fn tick_if_necessary(&self) {
        let old_tick = self.last_tick.load(Ordering::Acquire);
        let now = u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let age = now.saturating_sub(old_tick);
        if age <= TICK_NANOS {
            return;
        }

        // Only the thread that wins the swap applies the pending ticks
        let new_tick = now - age % TICK_NANOS;
        if self
            .last_tick
            .compare_exchange(old_tick, new_tick, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let required = age / TICK_NANOS;
            let mut rates = self.rates.lock();
            for _ in 0..required {
                for ewma in rates.iter_mut() {
                    ewma.tick();
                }
            }
        }
    }
}

/// Point-in-time view of a [`Timer`]. Durations are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p98: f64,
    pub p99: f64,
    pub p999: f64,
    pub rates: MeterSnapshot,
}

/// Latency distribution over the most recent samples.
///
/// Quantiles come from a pair of rotating CKMS windows so memory stays flat
/// however long the timer lives. Count, sum, min and max cover every update.
struct Histogram {
    current: CKMS<f64>,
    previous: Option<CKMS<f64>>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            current: CKMS::new(QUANTILE_ERROR),
            previous: None,
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: 0.0,
        }
    }

    fn insert(&mut self, millis: f64) {
        if self.current.count() >= WINDOW_SAMPLES {
            let full = std::mem::replace(&mut self.current, CKMS::new(QUANTILE_ERROR));
            self.previous = Some(full);
        }
        self.current.insert(millis);
        self.count += 1;
        self.sum += millis;
        self.min = self.min.min(millis);
        self.max = self.max.max(millis);
    }

    /// Query the fuller of the two windows
    fn quantile(&self, q: f64) -> f64 {
        let window = match &self.previous {
            Some(previous) if previous.count() > self.current.count() => previous,
            _ => &self.current,
        };
        window.query(q).map_or(0.0, |(_, value)| value)
    }

    fn retained(&self) -> usize {
        self.current.count() + self.previous.as_ref().map_or(0, CKMS::count)
    }
}

/// Duration distribution plus a [`Meter`] of its update rate.
pub struct Timer {
    meter: Meter,
    histogram: Mutex<Histogram>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            meter: Meter::new(),
            histogram: Mutex::new(Histogram::new()),
        }
    }

    pub fn update(&self, elapsed: Duration) {
        let millis = elapsed.as_secs_f64() * 1000.0;
        self.meter.mark();

        self.histogram.lock().insert(millis);
    }

    /// Time a closure and record its duration
    pub fn time<R>(&self, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        self.update(start.elapsed());
        result
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.meter.count()
    }

    /// Samples currently held by the quantile estimator
    pub fn retained_samples(&self) -> usize {
        self.histogram.lock().retained()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let rates = self.meter.snapshot();
        let histogram = self.histogram.lock();
        if histogram.count == 0 {
            return TimerSnapshot {
                count: 0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                p25: 0.0,
                p50: 0.0,
                p75: 0.0,
                p95: 0.0,
                p98: 0.0,
                p99: 0.0,
                p999: 0.0,
                rates,
            };
        }

        TimerSnapshot {
            count: histogram.count,
            min: histogram.min,
            max: histogram.max,
            mean: histogram.sum / histogram.count as f64,
            p25: histogram.quantile(0.25),
            p50: histogram.quantile(0.5),
            p75: histogram.quantile(0.75),
            p95: histogram.quantile(0.95),
            p98: histogram.quantile(0.98),
            p99: histogram.quantile(0.99),
            p999: histogram.quantile(0.999),
            rates,
        }
    }
}

/// Value produced by a [`Gauge`] at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GaugeValue {
    /// A plain reading
    Value(f64),
    /// Approximate event counts over the last 1, 5 and 15 minutes
    LastMinutes {
        m1_count: f64,
        m5_count: f64,
        m15_count: f64,
    },
}

impl GaugeValue {
    /// Derive last-minutes counts from a meter's moving rates
    pub fn last_minutes(meter: &MeterSnapshot) -> Self {
        GaugeValue::LastMinutes {
            m1_count: meter.m1_rate * 60.0,
            m5_count: meter.m5_rate * 300.0,
            m15_count: meter.m15_rate * 900.0,
        }
    }
}

type GaugeSupplier = Box<dyn Fn() -> GaugeValue + Send + Sync>;

/// Instrument whose value is read from a supplier when snapshotted.
pub struct Gauge {
    supplier: GaugeSupplier,
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge").finish_non_exhaustive()
    }
}

impl Gauge {
    pub fn new(supplier: impl Fn() -> GaugeValue + Send + Sync + 'static) -> Self {
        Self {
            supplier: Box::new(supplier),
        }
    }

    #[inline]
    pub fn value(&self) -> GaugeValue {
        (self.supplier)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_concurrent_increments() {
        let counter = Arc::new(Counter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.inc();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.count(), 8000);
    }

    #[test]
    fn test_meter_counts_marks() {
        let meter = Meter::new();
        meter.mark();
        meter.mark_n(4);

        let snapshot = meter.snapshot();
        assert_eq!(snapshot.count, 5);
        assert!(snapshot.mean_rate > 0.0);
        // No tick has elapsed yet
        assert_eq!(snapshot.m1_rate, 0.0);
    }

    #[test]
    fn test_ewma_first_tick_takes_instant_rate() {
        let mut ewma = Ewma::over_minutes(1.0);
        ewma.uncounted = 50;
        ewma.tick();
        assert!((ewma.rate - 10.0).abs() < f64::EPSILON);

        ewma.tick();
        assert!(ewma.rate < 10.0);
        assert!(ewma.rate > 0.0);
    }

    #[test]
    fn test_timer_distribution() {
        let timer = Timer::new();
        for ms in 1..=100 {
            timer.update(Duration::from_millis(ms));
        }

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.count, 100);
        assert!((snapshot.min - 1.0).abs() < 1e-6);
        assert!((snapshot.max - 100.0).abs() < 1e-6);
        assert!((snapshot.mean - 50.5).abs() < 1e-6);
        assert!(snapshot.p50 >= 45.0 && snapshot.p50 <= 55.0);
        assert!(snapshot.p99 >= 95.0);
        assert_eq!(snapshot.rates.count, 100);
    }

    #[test]
    fn test_timer_retains_bounded_samples() {
        let timer = Timer::new();
        for i in 0..100_000u64 {
            timer.update(Duration::from_micros(i * 7919 % 50_000));
        }

        assert!(timer.retained_samples() <= 2 * WINDOW_SAMPLES);
        let snapshot = timer.snapshot();
        assert_eq!(snapshot.count, 100_000);
        assert!(snapshot.p50 > 0.0 && snapshot.p50 < 50.0);
        assert!(snapshot.max < 50.0);
    }

    #[test]
    fn test_quantiles_follow_recent_window() {
        let timer = Timer::new();
        for _ in 0..5 * WINDOW_SAMPLES {
            timer.update(Duration::from_millis(1));
        }
        for _ in 0..3 * WINDOW_SAMPLES {
            timer.update(Duration::from_millis(200));
        }

        let snapshot = timer.snapshot();
        assert!((snapshot.p50 - 200.0).abs() < 1e-6);
        assert!((snapshot.min - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_timer_snapshot() {
        let snapshot = Timer::new().snapshot();
        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.min, 0.0);
        assert_eq!(snapshot.p999, 0.0);
    }

    #[test]
    fn test_gauge_reads_supplier_each_time() {
        let counter = Arc::new(Counter::new());
        let source = Arc::clone(&counter);
        let gauge = Gauge::new(move || GaugeValue::Value(source.count() as f64));

        assert_eq!(gauge.value(), GaugeValue::Value(0.0));
        counter.inc_by(3);
        assert_eq!(gauge.value(), GaugeValue::Value(3.0));
    }

    #[test]
    fn test_last_minutes_from_rates() {
        let rates = MeterSnapshot {
            count: 10,
            m1_rate: 1.0,
            m5_rate: 0.5,
            m15_rate: 0.1,
            mean_rate: 1.0,
        };
        let GaugeValue::LastMinutes {
            m1_count,
            m5_count,
            m15_count,
        } = GaugeValue::last_minutes(&rates)
        else {
            panic!("expected last minutes gauge");
        };
        assert!((m1_count - 60.0).abs() < 1e-9);
        assert!((m5_count - 150.0).abs() < 1e-9);
        assert!((m15_count - 90.0).abs() < 1e-9);
    }
}

//! Monotonic operation counters and periodic rate computation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Point-in-time counter values remembered by the rate computation.
#[derive(Debug, Clone, Copy)]
struct RateSnap {
    gets: u64,
    puts: u64,
    at: Instant,
}

/// Per-second rates between two consecutive `rates()` calls.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct StatsRates {
    pub gets_per_sec: f64,
    pub puts_per_sec: f64,
    pub ops_per_sec: f64,
}

/// Get/put counters shared by all request-handling paths.
///
/// The counters are lock-free atomics bumped on every batch; they are
/// monotonically non-decreasing for the process lifetime. Only the rate
/// reporter's previous snapshot sits behind a lock.
pub struct Stats {
    gets: AtomicU64,
    puts: AtomicU64,
    snap: Mutex<RateSnap>,
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            snap: Mutex::new(RateSnap {
                gets: 0,
                puts: 0,
                at: Instant::now(),
            }),
        }
    }

    /// Adds a batch's worth of completed operations to the counters.
    pub fn bump(&self, gets: u64, puts: u64) {
        self.gets.fetch_add(gets, Ordering::Relaxed);
        self.puts.fetch_add(puts, Ordering::Relaxed);
    }

    /// Current counter totals as `(gets, puts)`.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.gets.load(Ordering::Relaxed),
            self.puts.load(Ordering::Relaxed),
        )
    }

    /// Computes per-second rates since the previous `rates()` call and
    /// advances the remembered snapshot.
    pub fn rates(&self) -> StatsRates {
        let mut snap = self.snap.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(snap.at).as_secs_f64();
        if elapsed <= 0.0 {
            return StatsRates::default();
        }

        let (gets, puts) = self.totals();
        let rates = StatsRates {
            gets_per_sec: (gets - snap.gets) as f64 / elapsed,
            puts_per_sec: (puts - snap.puts) as f64 / elapsed,
            ops_per_sec: ((gets - snap.gets) + (puts - snap.puts)) as f64
                / elapsed,
        };

        snap.gets = gets;
        snap.puts = puts;
        snap.at = now;
        rates
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod stats_tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn totals_accumulate() {
        let stats = Stats::new();
        assert_eq!(stats.totals(), (0, 0));
        stats.bump(3, 2);
        stats.bump(7, 0);
        assert_eq!(stats.totals(), (10, 2));
    }

    #[test]
    fn rates_reflect_deltas() {
        let stats = Stats::new();
        stats.bump(100, 50);
        thread::sleep(Duration::from_millis(40));
        let rates = stats.rates();
        assert!(rates.gets_per_sec > 0.0);
        assert!(rates.puts_per_sec > 0.0);
        assert!(
            (rates.ops_per_sec - (rates.gets_per_sec + rates.puts_per_sec))
                .abs()
                < 1e-6
        );

        // no activity since the last call, rates drop back to zero
        thread::sleep(Duration::from_millis(20));
        let rates = stats.rates();
        assert_eq!(rates.gets_per_sec, 0.0);
        assert_eq!(rates.puts_per_sec, 0.0);
    }

    #[test]
    fn counters_shared_across_threads() {
        let stats = Stats::new();
        thread::scope(|s| {
            for _ in 0..4 {
                let stats = &stats;
                s.spawn(move || {
                    for _ in 0..1000 {
                        stats.bump(1, 1);
                    }
                });
            }
        });
        assert_eq!(stats.totals(), (4000, 4000));
    }
}

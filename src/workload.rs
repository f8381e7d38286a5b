//! Synthetic workload generation: xorshift PRNG, Zipfian-skewed key
//! sampling, and named read/write mix profiles.

use std::fmt;

use crate::utils::ShardKvError;

/// 64-bit xorshift pseudo-random number generator. Fast, deterministic for
/// a fixed seed, period 2^64 - 1 over the non-zero states.
#[derive(Debug, Clone)]
pub struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    /// Creates a new generator. The state must be non-zero, so a zero seed
    /// is substituted with 1.
    pub fn new(seed: u64) -> Self {
        Xorshift64 {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Advances the state and returns it as the next random number.
    #[inline]
    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

/// Zipfian-distributed rank sampler over `0..n`, skewed toward the lower
/// ranks; rank 0 is the most popular, rank 1 the next, etc.
///
/// Implements the core algorithm of YCSB's ZipfianGenerator, which in turn
/// follows "Quickly Generating Billion-Record Synthetic Databases" (Gray et
/// al., SIGMOD 1994): a closed-form inverse-CDF sampler that costs O(n) once
/// at construction (the harmonic sum) and O(1) per draw. Rounding at the far
/// tail may yield `n` itself; callers take the result modulo their keyspace.
#[derive(Debug, Clone)]
pub struct ZipfianGen {
    /// Range of ranks to be generated.
    n: u64,

    /// Skew parameter of the distribution, in (0, 1).
    theta: f64,

    // intermediate results used per draw
    alpha: f64,
    zetan: f64,
    eta: f64,
}

impl ZipfianGen {
    /// Creates a new sampler over ranks `0..n` with skew `theta`. This may
    /// be expensive if `n` is large.
    pub fn new(n: u64, theta: f64) -> Result<Self, ShardKvError> {
        if n == 0 {
            return logged_err!("zipfian keyspace size must be non-zero");
        }
        if !(theta > 0.0 && theta < 1.0) {
            return logged_err!("zipfian theta {} out of range (0, 1)", theta);
        }

        let zetan = Self::zeta(n, theta);
        Ok(ZipfianGen {
            n,
            theta,
            alpha: 1.0 / (1.0 - theta),
            zetan,
            eta: (1.0 - (2.0 / n as f64).powf(1.0 - theta))
                / (1.0 - Self::zeta(2, theta) / zetan),
        })
    }

    /// Returns the nth harmonic number with parameter theta, H_{n,theta}.
    fn zeta(n: u64, theta: f64) -> f64 {
        let mut sum = 0.0;
        for i in 0..n {
            sum += 1.0 / ((i + 1) as f64).powf(theta);
        }
        sum
    }

    /// Draws the next Zipfian-distributed rank, advancing the given PRNG by
    /// exactly one step.
    pub fn next(&self, gen: &mut Xorshift64) -> u64 {
        let u = gen.next() as f64 / u64::MAX as f64; // normalize to [0, 1)
        let uz = u * self.zetan;
        if uz < 1.0 {
            return 0;
        }
        if uz < 1.0 + 0.5f64.powf(self.theta) {
            return 1;
        }
        (self.n as f64 * (self.eta * u - self.eta + 1.0).powf(self.alpha))
            as u64
    }
}

/// Named workload profiles with fixed read probabilities, following the
/// YCSB convention.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WorkloadProfile {
    /// 50% reads / 50% writes.
    YcsbA,

    /// 95% reads / 5% writes.
    YcsbB,

    /// Read-only.
    YcsbC,
}

impl WorkloadProfile {
    /// Parse command line string into WorkloadProfile enum.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "YCSB-A" => Some(Self::YcsbA),
            "YCSB-B" => Some(Self::YcsbB),
            "YCSB-C" => Some(Self::YcsbC),
            _ => None,
        }
    }

    /// Fixed read probability of this profile.
    pub fn read_probability(&self) -> f64 {
        match self {
            Self::YcsbA => 0.50,
            Self::YcsbB => 0.95,
            Self::YcsbC => 1.0,
        }
    }
}

impl fmt::Display for WorkloadProfile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::YcsbA => write!(f, "YCSB-A"),
            Self::YcsbB => write!(f, "YCSB-B"),
            Self::YcsbC => write!(f, "YCSB-C"),
        }
    }
}

/// One generated workload step: which key to touch and whether to read it.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct WorkloadStep {
    /// Key as an integer rank within the record count.
    pub key: u64,

    /// True for a read operation, false for a write.
    pub is_read: bool,
}

/// Workload engine: one Zipfian key draw plus one read/write coin flip per
/// step, both off a single PRNG stream.
///
/// Not safe for concurrent callers; every concurrent connection must own its
/// own instance so that generation stays lock-free and streams stay
/// uncorrelated.
#[derive(Debug, Clone)]
pub struct Workload {
    /// Number of records in the keyspace; keys are ranks modulo this.
    records: u64,

    /// Read if the coin draw lands at or below this threshold.
    read_threshold: u64,

    /// The single PRNG behind both draws.
    gen: Xorshift64,

    /// Zipfian rank sampler for record selection.
    keygen: ZipfianGen,
}

impl Workload {
    /// Creates a new workload engine seeded from process entropy.
    pub fn new(
        profile: WorkloadProfile,
        records: u64,
        theta: f64,
    ) -> Result<Self, ShardKvError> {
        Self::with_seed(profile, records, theta, rand::random())
    }

    /// Creates a new workload engine with a fixed PRNG seed.
    pub fn with_seed(
        profile: WorkloadProfile,
        records: u64,
        theta: f64,
        seed: u64,
    ) -> Result<Self, ShardKvError> {
        if records == 0 {
            return logged_err!("workload record count must be non-zero");
        }

        // probability 1.0 saturates the threshold at u64::MAX, making every
        // step a read under the inclusive comparison below
        let read_threshold =
            (profile.read_probability() * u64::MAX as f64) as u64;

        Ok(Workload {
            records,
            read_threshold,
            gen: Xorshift64::new(seed),
            keygen: ZipfianGen::new(records, theta)?,
        })
    }

    /// Generates the next workload step.
    pub fn next_step(&mut self) -> WorkloadStep {
        let key = self.keygen.next(&mut self.gen) % self.records;
        let is_read = self.gen.next() <= self.read_threshold;
        WorkloadStep { key, is_read }
    }
}

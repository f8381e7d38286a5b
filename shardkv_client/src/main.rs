//! ShardKV benchmarking client executable.

use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use lazy_static::lazy_static;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use shardkv::{
    logger_init, parsed_config, pi_error, pi_info, pi_warn, ClusterConn,
    DispatchMode, Op, ShardKvError, Workload, WorkloadProfile, IDENT,
};
use tokio::runtime::Builder;
use tokio::time::{self, Duration, Instant};

lazy_static! {
    /// A long pre-generated printable string that value payloads are sliced
    /// from, instead of being allocated fresh per size.
    static ref VALUES_POOL: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64 * 1024)
        .map(char::from)
        .collect();
}

/// Benchmark parameters struct.
#[derive(Debug, Deserialize)]
struct BenchParams {
    /// Number of operations accumulated before each flush of per-host
    /// batches.
    pub batch_size: usize,

    /// Number of records in the keyspace; generated keys are ranks modulo
    /// this.
    pub records: u64,

    /// Size of each written value in bytes.
    pub value_size: usize,
}

#[allow(clippy::derivable_impls)]
impl Default for BenchParams {
    fn default() -> Self {
        BenchParams {
            batch_size: 5000,
            records: 1_000_000,
            value_size: 128,
        }
    }
}

impl BenchParams {
    /// Validates parameter ranges.
    fn sanitize(&self) -> Result<(), ShardKvError> {
        if self.batch_size == 0 {
            Err(ShardKvError::msg("invalid batch_size 0"))
        } else if self.records == 0 {
            Err(ShardKvError::msg("invalid records 0"))
        } else if self.value_size == 0 || self.value_size > VALUES_POOL.len()
        {
            Err(ShardKvError::msg(format!(
                "invalid value_size {} (max {})",
                self.value_size,
                VALUES_POOL.len()
            )))
        } else {
            Ok(())
        }
    }
}

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Comma-separated list of 'host:port's to connect to.
    #[arg(long, default_value_t = String::from("localhost:8080"))]
    hosts: String,

    /// Zipfian distribution skew parameter.
    #[arg(short, long, default_value_t = 0.99)]
    theta: f64,

    /// Name of workload profile to use (YCSB-A, YCSB-B, YCSB-C).
    #[arg(short, long, default_value_t = String::from("YCSB-B"))]
    workload: String,

    /// Duration in seconds to run for.
    #[arg(short, long, default_value_t = 30)]
    secs: u64,

    /// Number of concurrent connections.
    #[arg(short, long, default_value_t = 1)]
    connections: usize,

    /// Issue batch calls asynchronously instead of blocking per flush.
    #[arg(short, long, default_value_t = false)]
    asynch: bool,

    /// Benchmark parameters TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    params: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok((profile, hosts))` on
    /// success or `Err(ShardKvError)` on any error.
    fn sanitize(
        &self,
    ) -> Result<(WorkloadProfile, Vec<String>), ShardKvError> {
        if !(self.theta > 0.0 && self.theta < 1.0) {
            return Err(ShardKvError::msg(format!(
                "invalid theta {}",
                self.theta
            )));
        } else if self.secs == 0 {
            return Err(ShardKvError::msg(format!(
                "invalid duration {} secs",
                self.secs
            )));
        } else if self.connections == 0 {
            return Err(ShardKvError::msg(format!(
                "invalid number of connections {}",
                self.connections
            )));
        } else if self.threads < 2 {
            return Err(ShardKvError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )));
        }

        let hosts: Vec<String> = self
            .hosts
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if hosts.is_empty() {
            return Err(ShardKvError::msg("empty hosts list given"));
        }
        let mut host_set = HashSet::new();
        for host in hosts.iter() {
            if !host.contains(':') {
                return Err(ShardKvError::msg(format!(
                    "host address '{}' lacks a port",
                    host
                )));
            }
            if !host_set.insert(host) {
                return Err(ShardKvError::msg(format!(
                    "duplicate host address '{}' given",
                    host
                )));
            }
        }

        let profile =
            WorkloadProfile::parse_name(&self.workload).ok_or_else(|| {
                ShardKvError::msg(format!(
                    "workload profile '{}' unrecognized",
                    self.workload
                ))
            })?;
        Ok((profile, hosts))
    }
}

/// One load-generating connection's loop: draw a full batch threshold's
/// worth of operations, route and flush them, repeat until the stop flag is
/// set. The flag is checked once per batch iteration, so in-flight batches
/// always complete.
async fn connection_task(
    hosts: Vec<String>,
    profile: WorkloadProfile,
    theta: f64,
    params: Arc<BenchParams>,
    mode: DispatchMode,
    done: Arc<AtomicBool>,
) -> Result<u64, ShardKvError> {
    // every connection owns its own workload instance (and PRNG state), so
    // generation is lock-free and streams are uncorrelated
    let mut workload = Workload::new(profile, params.records, theta)?;
    let mut conn =
        ClusterConn::new_and_setup(&hosts, params.batch_size, mode).await?;
    let value = &VALUES_POOL[..params.value_size];

    while !done.load(Ordering::Relaxed) {
        while !conn.ready() {
            let step = workload.next_step();
            let key = step.key.to_string();
            conn.push(if step.is_read {
                Op::Get { key }
            } else {
                Op::Put {
                    key,
                    value: value.to_string(),
                }
            });
        }
        conn.flush().await?;
    }

    // await outstanding asynchronous calls so the completed count is exact,
    // then say goodbye to every host
    conn.leave().await?;
    Ok(conn.completed())
}

/// Actual main function of ShardKV client executable.
fn client_main() -> Result<(), ShardKvError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    let (profile, hosts) = args.sanitize()?;

    // parse optional params string if given
    let params_str = if args.params.is_empty() {
        None
    } else {
        args.params = args.params.replace('+', "\n");
        Some(&args.params[..])
    };
    let params = Arc::new(parsed_config!(params_str => BenchParams;
                                         batch_size, records, value_size)?);
    params.sanitize()?;

    let mode = DispatchMode::from_flag(args.asynch);
    pi_info!(
        "hosts {:?} theta {:.2} workload {} secs {} connections {} mode {:?}",
        hosts,
        args.theta,
        profile,
        args.secs,
        args.connections,
        mode
    );

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-client")
        .build()?;

    // enter tokio runtime, run the load-driving connections until the
    // deadline, and aggregate their completed-operation counts
    runtime.block_on(async move {
        let start = Instant::now();
        let done = Arc::new(AtomicBool::new(false));

        let mut conn_tasks = Vec::with_capacity(args.connections);
        for _ in 0..args.connections {
            conn_tasks.push(tokio::spawn(connection_task(
                hosts.clone(),
                profile,
                args.theta,
                params.clone(),
                mode,
                done.clone(),
            )));
        }

        time::sleep(Duration::from_secs(args.secs)).await;
        done.store(true, Ordering::Relaxed);

        let mut ops_completed = 0u64;
        for task in conn_tasks {
            ops_completed += task.await??;
        }
        let elapsed = start.elapsed();

        pi_info!(
            "throughput {:.2} ops/s",
            ops_completed as f64 / elapsed.as_secs_f64()
        );
        Ok::<(), ShardKvError>(()) // give type hint for this async closure
    })
}

/// Main function of ShardKV client executable.
fn main() -> ExitCode {
    IDENT.get_or_init(|| "client".into());
    logger_init();

    if let Err(ref e) = client_main() {
        pi_error!("client_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        pi_warn!("client_main exited successfully");
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    fn valid_args() -> CliArgs {
        CliArgs {
            hosts: "localhost:8080".into(),
            theta: 0.99,
            workload: "YCSB-B".into(),
            secs: 30,
            connections: 1,
            asynch: false,
            params: "".into(),
            threads: 4,
        }
    }

    #[test]
    fn sanitize_valid() -> Result<(), ShardKvError> {
        let (profile, hosts) = valid_args().sanitize()?;
        assert_eq!(profile, WorkloadProfile::YcsbB);
        assert_eq!(hosts, vec!["localhost:8080".to_string()]);
        Ok(())
    }

    #[test]
    fn sanitize_multiple_hosts() -> Result<(), ShardKvError> {
        let mut args = valid_args();
        args.hosts = "node0:8080,node1:8080,node2:8080".into();
        let (_, hosts) = args.sanitize()?;
        assert_eq!(hosts.len(), 3);
        Ok(())
    }

    #[test]
    fn sanitize_invalid_workload() {
        let mut args = valid_args();
        args.workload = "YCSB-Z".into();
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_theta() {
        let mut args = valid_args();
        args.theta = 1.0;
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_portless_host() {
        let mut args = valid_args();
        args.hosts = "localhost".into();
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_duplicate_hosts() {
        let mut args = valid_args();
        args.hosts = "node0:8080,node0:8080".into();
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_zero_connections() {
        let mut args = valid_args();
        args.connections = 0;
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn params_defaults() -> Result<(), ShardKvError> {
        let params = parsed_config!(None => BenchParams;
                                    batch_size, records, value_size)?;
        assert_eq!(params.batch_size, 5000);
        assert_eq!(params.records, 1_000_000);
        assert_eq!(params.value_size, 128);
        assert_eq!(params.sanitize(), Ok(()));
        Ok(())
    }

    #[test]
    fn params_rejects_oversized_value() -> Result<(), ShardKvError> {
        let params_str = Some("value_size = 999999999");
        let params = parsed_config!(params_str => BenchParams;
                                    batch_size, records, value_size)?;
        assert!(params.sanitize().is_err());
        Ok(())
    }
}

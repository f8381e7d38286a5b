//! ShardKV server node executable.

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{self, LevelFilter};
use serde::Deserialize;
use shardkv::{
    logger_init, parsed_config, pi_error, pi_info, pi_warn, BatchProcessor,
    ExternalApi, ShardKvError, ShardStore, Stats, IDENT,
};
use tokio::runtime::Builder;
use tokio::sync::watch;
use tokio::time::{self, Duration, MissedTickBehavior};

/// Server tuning parameters struct.
#[derive(Debug, Deserialize)]
struct ServerParams {
    /// Time-to-live attached to every stored value, in millisecs. The
    /// benchmark default is deliberately short to exercise the expiry path
    /// under load.
    pub put_ttl_ms: u64,

    /// Throughput report printing interval in millisecs.
    pub report_interval_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ServerParams {
    fn default() -> Self {
        ServerParams {
            put_ttl_ms: 100,
            report_interval_ms: 1000,
        }
    }
}

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Key-value API port open to clients.
    /// This port must be available at process launch.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Number of independently locked shards to partition keys across.
    #[arg(short, long, default_value_t = 10)]
    shards: usize,

    /// Local IP to use for binding the listening socket.
    #[arg(short, long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    bind_ip: Ipv4Addr,

    /// Tuning parameters TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    params: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 8)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(())` on success or
    /// `Err(ShardKvError)` on any error.
    fn sanitize(&self) -> Result<(), ShardKvError> {
        if self.port <= 1024 {
            Err(ShardKvError::msg(format!("invalid port {}", self.port)))
        } else if self.shards == 0 {
            Err(ShardKvError::msg(format!(
                "invalid number of shards {}",
                self.shards
            )))
        } else if self.threads < 2 {
            Err(ShardKvError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            Ok(())
        }
    }
}

/// Periodically prints the gets/s, puts/s, ops/s throughput report until
/// the termination flag flips.
async fn stats_reporter_task(
    stats: Arc<Stats>,
    interval_ms: u64,
    mut rx_term: watch::Receiver<bool>,
) {
    let mut interval = time::interval(Duration::from_millis(interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let rates = stats.rates();
                pi_info!(
                    "tput {:.0}/s gets, {:.0}/s puts, {:.2} ops/s",
                    rates.gets_per_sec,
                    rates.puts_per_sec,
                    rates.ops_per_sec
                );
            },

            _ = rx_term.changed() => break,
        }
    }
}

/// Actual main function of ShardKV server executable.
fn server_main() -> Result<(), ShardKvError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    args.sanitize()?;

    // parse optional params string if given
    let params_str = if args.params.is_empty() {
        None
    } else {
        args.params = args.params.replace('+', "\n");
        Some(&args.params[..])
    };
    let params = parsed_config!(params_str => ServerParams;
                                put_ttl_ms, report_interval_ms)?;
    if params.put_ttl_ms == 0 {
        return Err(ShardKvError::msg("invalid put_ttl_ms 0"));
    }
    if params.report_interval_ms == 0 {
        return Err(ShardKvError::msg("invalid report_interval_ms 0"));
    }

    // parse key-value API address
    let api_addr: SocketAddr = format!("{}:{}", args.bind_ip, args.port)
        .parse()
        .map_err(|e| {
            ShardKvError::msg(format!(
                "failed to parse api_addr: bind_ip {} port {}: {}",
                args.bind_ip, args.port, e
            ))
        })?;

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pi_error!("error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-server")
            .build()?;

        // enter tokio runtime, set up the store and API, and serve clients
        // until terminated
        runtime.block_on(async move {
            let store = Arc::new(ShardStore::new(args.shards)?);
            let stats = Arc::new(Stats::new());
            let processor = Arc::new(BatchProcessor::new(
                store,
                stats.clone(),
                Duration::from_millis(params.put_ttl_ms),
            ));

            pi_info!(
                "starting with {} shards, put TTL {} ms",
                args.shards,
                params.put_ttl_ms
            );
            let api = ExternalApi::new_and_setup(
                api_addr,
                processor,
                rx_term.clone(),
            )
            .await?;

            let reporter = tokio::spawn(stats_reporter_task(
                stats.clone(),
                params.report_interval_ms,
                rx_term,
            ));

            api.wait().await?;
            reporter.await?;

            let (gets, puts) = stats.totals();
            pi_info!("served {} gets, {} puts in total", gets, puts);

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), ShardKvError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of ShardKV server executable.
fn main() -> ExitCode {
    IDENT.get_or_init(|| "server".into());
    logger_init();

    if let Err(ref e) = server_main() {
        pi_error!("server_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        pi_warn!("server_main exited successfully");
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    #[test]
    fn sanitize_valid() {
        let args = CliArgs {
            port: 8080,
            shards: 10,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            params: "".into(),
            threads: 8,
        };
        assert_eq!(args.sanitize(), Ok(()));
    }

    #[test]
    fn sanitize_invalid_port() {
        let args = CliArgs {
            port: 1023,
            shards: 10,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            params: "".into(),
            threads: 8,
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_shards() {
        let args = CliArgs {
            port: 8080,
            shards: 0,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            params: "".into(),
            threads: 8,
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_threads() {
        let args = CliArgs {
            port: 8080,
            shards: 10,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            params: "".into(),
            threads: 1,
        };
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn params_defaults() -> Result<(), ShardKvError> {
        let params = parsed_config!(None => ServerParams;
                                    put_ttl_ms, report_interval_ms)?;
        assert_eq!(params.put_ttl_ms, 100);
        assert_eq!(params.report_interval_ms, 1000);
        Ok(())
    }

    #[test]
    fn params_overridden() -> Result<(), ShardKvError> {
        let params_str = Some("put_ttl_ms = 500");
        let params = parsed_config!(params_str => ServerParams;
                                    put_ttl_ms, report_interval_ms)?;
        assert_eq!(params.put_ttl_ms, 500);
        assert_eq!(params.report_interval_ms, 1000);
        Ok(())
    }
}

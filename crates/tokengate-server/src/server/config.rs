use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use core::time::Duration;
use reqwest::Url;
use std::net::SocketAddr;
use tokengate::{
    AdmissionOptions, DEFAULT_CONCURRENCY_LIMIT, DEFAULT_MAX_REQUESTS_PER_WINDOW,
    DEFAULT_MAX_TOKENS_PER_BATCH, DEFAULT_RECLAIM_PROBABILITY, GatePolicy, ReclaimPolicy,
    ValidatorOptions,
};

/// Refresh endpoint used when no authority URL is configured.
pub const DEFAULT_AUTHORITY_URL: &str = "https://token.oaifree.com/api/auth/refresh";

/// Runtime configuration for the `tokengate-server` binary.
///
/// Every value is read from a CLI flag or its environment variable (a `.env`
/// file is loaded first). Defaults match a single-instance deployment in
/// front of the public refresh endpoint.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tokengate-server",
    version,
    about = "Rate-limited batch validation of refresh tokens"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8000"))]
    pub server_addr: String,

    /// Endpoint each token is exchanged against.
    ///
    /// Receives `POST` with a form body `refresh_token=<token>` and answers
    /// `200` with `{"access_token": ...}` for a valid token.
    ///
    /// Environment variable: `AUTHORITY_URL`
    #[arg(long, env = "AUTHORITY_URL", default_value_t = String::from(DEFAULT_AUTHORITY_URL))]
    pub authority_url: String,

    /// Length of one rate-limit window, in seconds.
    ///
    /// Environment variable: `RATE_LIMIT_WINDOW_SECS`
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    pub rate_limit_window_secs: u64,

    /// Requests one client address may make per window.
    ///
    /// Environment variable: `MAX_REQUESTS_PER_WINDOW`
    #[arg(long, env = "MAX_REQUESTS_PER_WINDOW", default_value_t = DEFAULT_MAX_REQUESTS_PER_WINDOW)]
    pub max_requests_per_window: u64,

    /// Tokens accepted in one request.
    ///
    /// Environment variable: `MAX_TOKENS_PER_REQUEST`
    #[arg(long, env = "MAX_TOKENS_PER_REQUEST", default_value_t = DEFAULT_MAX_TOKENS_PER_BATCH)]
    pub max_tokens_per_request: usize,

    /// Ceiling on simultaneous calls to the authority.
    ///
    /// With `--gate-policy global` this bounds the whole process; with
    /// `per-batch` it bounds each request separately.
    ///
    /// Environment variable: `MAX_CONCURRENT_VERIFICATIONS`
    #[arg(long, env = "MAX_CONCURRENT_VERIFICATIONS", default_value_t = DEFAULT_CONCURRENCY_LIMIT)]
    pub max_concurrent_verifications: usize,

    /// Upper bound on one authority call, in seconds.
    ///
    /// Environment variable: `VERIFY_TIMEOUT_SECS`
    #[arg(long, env = "VERIFY_TIMEOUT_SECS", default_value_t = 30)]
    pub verify_timeout_secs: u64,

    /// Scope of the concurrency ceiling.
    ///
    /// Environment variable: `GATE_POLICY`
    #[arg(long, env = "GATE_POLICY", value_enum, default_value_t = GatePolicyArg::Global)]
    pub gate_policy: GatePolicyArg,

    /// How stale client buckets are reclaimed.
    ///
    /// Environment variable: `RECLAIM`
    #[arg(long, env = "RECLAIM", value_enum, default_value_t = ReclaimArg::Interval)]
    pub reclaim: ReclaimArg,

    /// Seconds between background sweeps (`--reclaim interval`).
    ///
    /// Environment variable: `RECLAIM_INTERVAL_SECS`
    #[arg(long, env = "RECLAIM_INTERVAL_SECS", default_value_t = 60)]
    pub reclaim_interval_secs: u64,

    /// Chance that a request triggers a sweep (`--reclaim probabilistic`).
    ///
    /// Environment variable: `RECLAIM_PROBABILITY`
    #[arg(long, env = "RECLAIM_PROBABILITY", default_value_t = DEFAULT_RECLAIM_PROBABILITY)]
    pub reclaim_probability: f64,

    /// Seconds in-flight requests are given to finish after a shutdown
    /// signal.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePolicyArg {
    Global,
    PerBatch,
}

impl From<GatePolicyArg> for GatePolicy {
    fn from(arg: GatePolicyArg) -> Self {
        match arg {
            GatePolicyArg::Global => Self::Global,
            GatePolicyArg::PerBatch => Self::PerBatch,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimArg {
    Interval,
    Probabilistic,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub authority_url: Url,
    pub admission: AdmissionOptions,
    pub validator: ValidatorOptions,
    pub max_tokens_per_request: usize,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr: SocketAddr = args
            .server_addr
            .parse()
            .with_context(|| format!("SERVER_ADDR ({}) is not a socket address", args.server_addr))?;

        let authority_url = Url::parse(&args.authority_url)
            .with_context(|| format!("AUTHORITY_URL ({}) is not a URL", args.authority_url))?;

        if !matches!(authority_url.scheme(), "http" | "https") {
            bail!(
                "AUTHORITY_URL must use http or https (got {})",
                authority_url.scheme()
            );
        }

        if args.rate_limit_window_secs == 0 {
            bail!("RATE_LIMIT_WINDOW_SECS must be greater than 0");
        }

        if args.max_tokens_per_request == 0 {
            bail!("MAX_TOKENS_PER_REQUEST must be greater than 0");
        }

        if args.max_concurrent_verifications == 0 {
            bail!("MAX_CONCURRENT_VERIFICATIONS must be greater than 0");
        }

        if args.verify_timeout_secs == 0 {
            bail!("VERIFY_TIMEOUT_SECS must be greater than 0");
        }

        let reclaim = match args.reclaim {
            ReclaimArg::Interval => {
                if args.reclaim_interval_secs == 0 {
                    bail!("RECLAIM_INTERVAL_SECS must be greater than 0");
                }
                ReclaimPolicy::Interval {
                    every: Duration::from_secs(args.reclaim_interval_secs),
                }
            }
            ReclaimArg::Probabilistic => {
                if !(0.0..=1.0).contains(&args.reclaim_probability) {
                    bail!(
                        "RECLAIM_PROBABILITY ({}) must be between 0 and 1",
                        args.reclaim_probability
                    );
                }
                ReclaimPolicy::Probabilistic {
                    probability: args.reclaim_probability,
                }
            }
        };

        Ok(Self {
            server_addr,
            authority_url,
            admission: AdmissionOptions {
                window: Duration::from_secs(args.rate_limit_window_secs),
                max_requests: args.max_requests_per_window,
                reclaim,
            },
            validator: ValidatorOptions {
                concurrency_limit: args.max_concurrent_verifications,
                per_call_timeout: Duration::from_secs(args.verify_timeout_secs),
                gate_policy: args.gate_policy.into(),
            },
            max_tokens_per_request: args.max_tokens_per_request,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use super::demo::demo_registry;
use crate::dispatcher::{Dispatcher, Request, Target};
use crate::logging::{init_logging, LogConfig, LogFormat};
use crate::runtime_config::RuntimeConfig;
use crate::server::{Exchange, MemoryExchange};

/// Longest the demo waits for an async response to complete.
const ASYNC_WAIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Dispatch one request through the demo module over the in-memory transport
#[derive(Debug, Parser)]
#[command(name = "jsgi-dispatch", version, about, long_about = None)]
pub struct Cli {
    /// Module id to dispatch to
    #[arg(long, default_value = super::demo::DEMO_MODULE)]
    pub module: String,

    /// Request path, optionally with a query string
    #[arg(long, default_value = "/")]
    pub path: String,

    /// Use the streaming handler instead of the synchronous one
    #[arg(long = "async", default_value_t = false)]
    pub r#async: bool,

    /// Number of chunks the streaming handler writes
    #[arg(long, default_value_t = 3)]
    pub chunks: usize,

    /// Runtime profile passed to environment-profile hooks
    #[arg(long, env = "JSGI_ENV")]
    pub profile: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Json,
    Pretty,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
        }
    }
}

/// What the transport recorded for the dispatched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoOutput {
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl fmt::Display for DemoOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => writeln!(f, "HTTP {status}")?,
            None => writeln!(f, "HTTP (no status)")?,
        }
        for (name, value) in &self.headers {
            writeln!(f, "{name}: {value}")?;
        }
        writeln!(f)?;
        write!(f, "{}", String::from_utf8_lossy(&self.body))
    }
}

/// Run the demo for parsed arguments.
///
/// # Errors
///
/// Dispatch errors, or a timeout waiting for an async response.
pub fn run(cli: &Cli) -> Result<DemoOutput> {
    let mut config = RuntimeConfig::from_env();
    config.profile = cli.profile.clone().filter(|p| !p.is_empty());

    let registry = Arc::new(demo_registry(cli.chunks));
    let dispatcher = Dispatcher::with_config(registry, config);

    let exchange = Arc::new(MemoryExchange::new());
    let request = Request::builder()
        .path(&cli.path)
        .exchange(Arc::clone(&exchange) as Arc<dyn Exchange>)
        .build();

    let target = if cli.r#async { "stream" } else { "hello" };
    info!(module = %cli.module, target, path = %cli.path, "dispatching demo request");
    dispatcher
        .handle(&cli.module, Target::from(target), &request)
        .with_context(|| format!("dispatch to {}.{target} failed", cli.module))?;

    if let Some(context) = exchange.async_context() {
        let deadline = Instant::now() + ASYNC_WAIT;
        while context.completions() == 0 {
            if Instant::now() >= deadline {
                bail!("async response did not complete within {ASYNC_WAIT:?}");
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    Ok(DemoOutput {
        status: exchange.status(),
        headers: exchange.headers(),
        body: exchange.channel().written(),
    })
}

/// Parse arguments, install logging and print the recorded response.
///
/// # Errors
///
/// Logging initialization and [`run`] errors.
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    let mut log_config = LogConfig::from_env();
    log_config.format = cli.log_format.into();
    init_logging(&log_config)?;

    let output = run(&cli)?;
    print!("{output}");
    Ok(())
}

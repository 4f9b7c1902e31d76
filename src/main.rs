//! Fetch bridge command line.
//!
//! Runs requests through a [`Dispatcher`] backed by the in-process
//! [`LocalBridge`], so routing rules, transport options and streaming
//! reassembly can be exercised from a shell.
//!
//! ```text
//! fetch-bridge fetch https://example.com/data -H 'accept: application/json'
//! fetch-bridge --config bridge.toml batch --watch < urls.txt
//! ```

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use fetch_bridge::config::{
    load_config, BridgeConfig, ConfigWatcher, DangerSettings, ProxySettings, ProxyTarget,
};
use fetch_bridge::observability::{logging, metrics};
use fetch_bridge::{Dispatcher, FetchInit, LocalBridge, ReqwestFetch};

type CliDispatcher = Dispatcher<LocalBridge, ReqwestFetch>;

#[derive(Parser)]
#[command(name = "fetch-bridge")]
#[command(about = "Forward HTTP requests through a fetch bridge", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one URL and write the body to stdout
    Fetch(FetchArgs),
    /// Fetch every `METHOD URL` line read from stdin
    Batch {
        /// Reload the config file when it changes
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Args)]
struct FetchArgs {
    url: String,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// `Name: value`, repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short = 'd', long)]
    data: Option<String>,

    /// Proxy URL for all schemes
    #[arg(long)]
    proxy: Option<String>,

    /// Connect timeout in milliseconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    #[arg(long)]
    max_redirections: Option<usize>,

    /// Accept invalid certificates and hostnames
    #[arg(short = 'k', long)]
    insecure: bool,

    #[arg(long)]
    user_agent: Option<String>,

    /// Print status line and headers before the body
    #[arg(short = 'i', long)]
    include: bool,

    /// Forward through the bridge regardless of routing rules
    #[arg(long, conflicts_with = "direct")]
    force: bool,

    /// Never forward; use the direct client
    #[arg(long)]
    direct: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BridgeConfig::default(),
    };
    logging::init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fetch-bridge starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let dispatcher = Arc::new(Dispatcher::with_config(
        Arc::new(LocalBridge::new()),
        ReqwestFetch::new(),
        &config,
    )?);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, cancelling in-flight requests");
                shutdown.cancel();
            }
        });
    }

    match cli.command {
        Commands::Fetch(args) => run_fetch(&dispatcher, args, shutdown).await?,
        Commands::Batch { watch } => {
            let _watcher = match (&cli.config, watch) {
                (Some(path), true) => Some(spawn_reload(dispatcher.clone(), path)?),
                (None, true) => {
                    tracing::warn!("--watch needs --config, ignoring");
                    None
                }
                _ => None,
            };
            run_batch(dispatcher, shutdown).await?;
        }
    }

    Ok(())
}

async fn run_fetch(
    dispatcher: &CliDispatcher,
    args: FetchArgs,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    if args.direct {
        dispatcher.enable(false);
    }

    let mut init = FetchInit::new()
        .method(args.method)
        .headers(parse_headers(&args.headers)?)
        .signal(shutdown.child_token());
    if let Some(data) = args.data {
        init = init.body(data);
    }
    if let Some(proxy) = args.proxy {
        init = init.proxy(ProxySettings {
            all: Some(ProxyTarget::Url(proxy)),
            ..Default::default()
        });
    }
    if let Some(timeout) = args.connect_timeout {
        init = init.connect_timeout(timeout);
    }
    if let Some(max) = args.max_redirections {
        init = init.max_redirections(max);
    }
    if args.insecure {
        init = init.danger(DangerSettings {
            accept_invalid_certs: true,
            accept_invalid_hostnames: true,
        });
    }
    if let Some(user_agent) = args.user_agent {
        init = init.user_agent(user_agent);
    }

    let mut response = if args.force {
        dispatcher.fetch_forced(args.url.as_str(), init).await?
    } else {
        dispatcher.fetch(args.url.as_str(), init).await?
    };

    let mut stdout = tokio::io::stdout();
    if args.include {
        let mut head = format!("{} {}\n", response.status().as_u16(), response.status_text());
        for (name, value) in response.headers() {
            head.push_str(&format!("{}: {}\n", name, String::from_utf8_lossy(value.as_bytes())));
        }
        head.push('\n');
        stdout.write_all(head.as_bytes()).await?;
    }

    if let Some(mut body) = response.take_body() {
        while let Some(chunk) = body.next().await {
            stdout.write_all(&chunk?).await?;
        }
    }
    stdout.flush().await?;
    Ok(())
}

async fn run_batch(
    dispatcher: Arc<CliDispatcher>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (method, url) = match line.split_once(char::is_whitespace) {
            Some((method, url)) => (method.to_string(), url.trim().to_string()),
            None => ("GET".to_string(), line.to_string()),
        };

        let dispatcher = dispatcher.clone();
        let signal = shutdown.child_token();
        tasks.spawn(async move {
            let routed = dispatcher.should_route(&url);
            let init = FetchInit::new().method(method.as_str()).signal(signal);
            let result = match dispatcher.fetch(url.as_str(), init).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    response.bytes().await.map(|body| (status, body.len()))
                }
                Err(e) => Err(e),
            };
            (method, url, routed, result)
        });
    }

    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (method, url, routed, result) = joined?;
        let via = if routed { "bridge" } else { "direct" };
        match result {
            Ok((status, len)) => println!("{method} {url} [{via}] {status} {len} bytes"),
            Err(e) => {
                failed += 1;
                println!("{method} {url} [{via}] error: {e}");
            }
        }
    }
    std::io::stdout().flush()?;

    if failed > 0 {
        tracing::warn!(failed, "Some requests failed");
    }
    Ok(())
}

fn spawn_reload(
    dispatcher: Arc<CliDispatcher>,
    path: &std::path::Path,
) -> Result<notify::RecommendedWatcher, notify::Error> {
    let (watcher, mut updates) = ConfigWatcher::new(path);
    let guard = watcher.run()?;
    tokio::spawn(async move {
        while let Some(reload) = updates.recv().await {
            dispatcher.apply_reload(reload);
        }
    });
    Ok(guard)
}

fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>, String> {
    raw.iter()
        .map(|header| {
            header
                .split_once(':')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| format!("invalid header {header:?}, expected `Name: value`"))
        })
        .collect()
}

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::time::Duration;
use ticker::stream::{EventReader, Incoming};

#[derive(Parser)]
#[command(name = "ticker")]
#[command(about = "Ticker CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: TICKER_CONFIG_PATH or ~/.ticker/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the HTTP server with the live event stream at /api/live.
    Serve {
        /// Config file path (default: TICKER_CONFIG_PATH or ~/.ticker/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,

        /// Bind address (default from config or 127.0.0.1)
        #[arg(long, short)]
        bind: Option<String>,
    },

    /// Connect to a live stream and print each event's message. Reconnects after the server's retry interval.
    Listen {
        /// Config file path, used to build the default URL
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Stream URL (default: http://<bind>:<port>/api/live from config)
        #[arg(long, short)]
        url: Option<String>,

        /// Stop after this many events.
        #[arg(long, short = 'n')]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("ticker {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port, bind }) => {
            if let Err(e) = run_serve(config, port, bind).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Listen { config, url, count }) => {
            if let Err(e) = run_listen(config, url, count).await {
                log::error!("listen failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(ticker::config::default_config_path);
    let dir = ticker::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
    bind: Option<String>,
) -> anyhow::Result<()> {
    let (mut config, _) = ticker::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    if let Some(b) = bind {
        config.server.bind = b;
    }
    log::info!("starting server on {}:{}", config.server.bind, config.server.port);
    ticker::server::run_server(config).await
}

/// Reconnect delay before the server has sent a `retry:` directive.
const DEFAULT_RETRY: Duration = Duration::from_millis(3000);

async fn run_listen(
    config_path: Option<std::path::PathBuf>,
    url: Option<String>,
    count: Option<usize>,
) -> anyhow::Result<()> {
    let url = match url {
        Some(u) => u,
        None => {
            let (config, _) = ticker::config::load_config(config_path)?;
            format!(
                "http://{}:{}{}",
                config.server.bind.trim(),
                config.server.port,
                ticker::server::LIVE_PATH
            )
        }
    };
    let mut seen = 0usize;
    if count_reached(seen, count) {
        return Ok(());
    }
    let client = reqwest::Client::new();
    let mut retry = DEFAULT_RETRY;

    loop {
        match listen_once(&client, &url, &mut retry, &mut seen, count).await {
            Ok(true) => return Ok(()),
            Ok(false) => log::info!("stream ended, reconnecting in {:?}", retry),
            Err(e) => log::warn!("stream error: {:#}; reconnecting in {:?}", e, retry),
        }
        tokio::time::sleep(retry).await;
    }
}

/// Read one connection to the end. Returns true once `count` events have been printed.
async fn listen_once(
    client: &reqwest::Client,
    url: &str,
    retry: &mut Duration,
    seen: &mut usize,
    count: Option<usize>,
) -> anyhow::Result<bool> {
    let resp = client.get(url).send().await?.error_for_status()?;
    log::info!("connected to {}", url);
    let mut body = Box::pin(resp.bytes_stream());
    let mut reader = EventReader::new();

    while let Some(chunk) = body.next().await {
        for item in reader.feed(&chunk?) {
            match item {
                Incoming::Retry(ms) => *retry = Duration::from_millis(ms),
                Incoming::Event(event) => {
                    match event.message() {
                        Ok(m) => println!("{}", m.msg),
                        Err(_) => println!("{}", event.data),
                    }
                    *seen += 1;
                    if count_reached(*seen, count) {
                        return Ok(true);
                    }
                }
            }
        }
    }
    Ok(false)
}

fn count_reached(seen: usize, count: Option<usize>) -> bool {
    count.is_some_and(|n| seen >= n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_count_is_reached_before_any_event() {
        assert!(count_reached(0, Some(0)));
    }

    #[test]
    fn count_reached_after_n_events() {
        assert!(!count_reached(2, Some(3)));
        assert!(count_reached(3, Some(3)));
    }

    #[test]
    fn no_count_never_reached() {
        assert!(!count_reached(0, None));
        assert!(!count_reached(usize::MAX, None));
    }
}

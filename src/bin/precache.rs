use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use precache::{
    CacheStorage, CacheWorker, DiskStorage, Fetcher, HttpFetcher, MemoryStorage, StorageBackend,
    WorkerConfig, format_bytes, format_elapsed, proxy,
};
use tokio_util::sync::CancellationToken;

fn print_usage() {
    eprintln!("Usage: precache [COMMAND] [OPTIONS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  serve               Install, activate and run the caching proxy (default)");
    eprintln!("  install             Precache the manifest and exit");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <PATH>     Config file (default: $XDG_CONFIG_HOME/precache/config.toml)");
    eprintln!("  --origin <URL>      Override the worker origin");
    eprintln!("  --listen <HOST:PORT> Override the proxy bind address");
    eprintln!("  --memory            Keep caches in memory instead of on disk");
    eprintln!("  -h, --help          Show this help");
}

#[derive(Debug, Default)]
struct Args {
    install_only: bool,
    config: Option<PathBuf>,
    origin: Option<String>,
    listen: Option<(String, u16)>,
    memory: bool,
}

fn next_value(args: &[String], i: &mut usize, flag: &str) -> String {
    *i += 1;
    args.get(*i).cloned().unwrap_or_else(|| {
        eprintln!("Error: {flag} requires a value");
        std::process::exit(1);
    })
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut parsed = Args::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "serve" => parsed.install_only = false,
            "install" => parsed.install_only = true,
            "--config" => parsed.config = Some(PathBuf::from(next_value(&args, &mut i, "--config"))),
            "--origin" => parsed.origin = Some(next_value(&args, &mut i, "--origin")),
            "--listen" => {
                let value = next_value(&args, &mut i, "--listen");
                let Some((host, port)) = value
                    .rsplit_once(':')
                    .and_then(|(h, p)| p.parse().ok().map(|p| (h.to_string(), p)))
                else {
                    eprintln!("Error: --listen expects HOST:PORT, got {value}");
                    std::process::exit(1);
                };
                parsed.listen = Some((host, port));
            }
            "--memory" => parsed.memory = true,
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Error: unknown argument {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    parsed
}

/// Cancels `token` on SIGINT or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => log::info!("Received SIGINT"),
                        _ = sigterm.recv() => log::info!("Received SIGTERM"),
                    }
                }
                Err(e) => {
                    log::warn!("Cannot listen for SIGTERM: {e}");
                    tokio::signal::ctrl_c().await.ok();
                    log::info!("Received SIGINT");
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            log::info!("Received SIGINT");
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> precache::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();
    let config_path = args.config.unwrap_or_else(WorkerConfig::default_path);
    let mut config = WorkerConfig::load_or_create(&config_path)?;
    log::info!("Loaded config from {}", config_path.display());

    if let Some(origin) = args.origin {
        config.cache.origin = origin;
    }
    if let Some((host, port)) = args.listen {
        config.proxy.host = host;
        config.proxy.port = port;
    }
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    }

    let storage: Arc<dyn CacheStorage> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::Disk => {
            log::info!("Cache directory: {}", config.storage.cache_dir.display());
            Arc::new(DiskStorage::new(&config.storage.cache_dir))
        }
    };
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.network)?);
    let worker = Arc::new(CacheWorker::new(config.cache.clone(), storage, fetcher)?);

    let report = worker.install().await?;
    println!(
        "Precached {} assets ({}) in {}",
        report.entries,
        format_bytes(report.total_bytes),
        format_elapsed(report.elapsed)
    );
    if args.install_only {
        return Ok(());
    }

    let removed = worker.activate().await?;
    if !removed.is_empty() {
        println!("Removed {} stale cache(s)", removed.len());
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());
    proxy::serve(
        worker,
        &config.proxy.host,
        config.proxy.port,
        config.proxy.max_body_bytes,
        shutdown,
    )
    .await?;
    log::info!("Shutdown complete");
    Ok(())
}

//! Command-line entry point for the apiary chunk pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use apiary_client::queue::Progress;
use apiary_client::{
    ChunkCache, HttpChunkStore, Uploader, Verifier, read_ledger, write_latency_report,
    write_ledger,
};
use apiary_core::UploadOptions;
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LEDGER_FILE: &str = "error-ledger.json";
const REPORT_FILE: &str = "latency-report.tsv";

#[derive(Parser)]
#[command(name = "apiary")]
#[command(about = "Content-addressed chunk upload pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    /// Config file path
    #[arg(long, env = "APIARY_CONFIG", default_value = "apiary.toml")]
    config: String,

    /// Remote chunk store URL (overrides config)
    #[arg(long)]
    store_url: Option<String>,

    /// Opaque stamp token passed through to the store (overrides config)
    #[arg(long)]
    stamp: Option<String>,

    /// Parallel chunk uploads (overrides config)
    #[arg(long)]
    parallelism: Option<usize>,

    /// Upload attempts per chunk (overrides config)
    #[arg(long)]
    retries: Option<u32>,

    /// Let the store finalize uploads asynchronously (overrides config)
    #[arg(long)]
    deferred: Option<bool>,

    /// Cache uploaded chunks locally
    #[arg(long)]
    cache_chunks: bool,

    /// Chunk cache directory (overrides config)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file or directory and print its manifest address
    Upload {
        /// File or directory to upload
        path: PathBuf,

        /// Suppress the progress line
        #[arg(long)]
        quiet: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Verify locally cached chunks against the remote store
    Check {
        /// Verify only the addresses in this ledger file instead of the
        /// whole cache
        #[arg(long)]
        ledger: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Upload {
            path,
            quiet,
            config,
        } => upload(&path, quiet, &config).await,
        Commands::Check { ledger, config } => check(ledger.as_deref(), &config).await,
    }
}

/// Merge the config file, `APIARY_*` environment variables and command-line
/// flags, flags winning.
fn load_options(args: &ConfigArgs) -> Result<UploadOptions> {
    let mut options: UploadOptions = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("APIARY_"))
        .extract()
        .context("failed to load configuration")?;

    if let Some(store_url) = &args.store_url {
        options.store_url = store_url.clone();
    }
    if let Some(stamp) = &args.stamp {
        options.stamp = stamp.clone();
    }
    if let Some(parallelism) = args.parallelism {
        options.parallelism = parallelism;
    }
    if let Some(retries) = args.retries {
        options.retries = retries;
    }
    if let Some(deferred) = args.deferred {
        options.deferred = deferred;
    }
    if args.cache_chunks {
        options.cache_chunks = true;
    }
    if let Some(cache_dir) = &args.cache_dir {
        options.cache_dir = cache_dir.clone();
    }

    options.validate()?;
    Ok(options)
}

async fn upload(path: &std::path::Path, quiet: bool, config: &ConfigArgs) -> Result<()> {
    let options = load_options(config)?;
    let store = HttpChunkStore::new(&options.store_url, &options.stamp, options.deferred)?;
    let uploader = Uploader::new(Arc::new(store), options)?;
    let progress = uploader.progress();

    let renderer = (!quiet).then(|| spawn_progress_renderer(progress));
    let result = uploader.upload_path(path).await;
    if let Some(renderer) = renderer {
        renderer.abort();
        eprintln!();
    }
    let result = result.context("upload failed")?;

    for (file, address) in &result.files {
        println!("{address} {file}");
    }
    println!("manifest: {}", result.manifest);
    Ok(())
}

async fn check(ledger: Option<&std::path::Path>, config: &ConfigArgs) -> Result<()> {
    let options = load_options(config)?;
    let store = HttpChunkStore::new(&options.store_url, &options.stamp, options.deferred)?;
    let cache = ChunkCache::new(&options.cache_dir, options.cache_format);
    let verifier = Verifier::new(Arc::new(store), cache, options.parallelism);

    let report = match ledger {
        Some(path) => {
            let addresses = read_ledger(path)
                .await
                .context("failed to read error ledger")?;
            verifier.verify_addresses(addresses).await?
        }
        None => verifier.verify_all().await?,
    };

    let ledger_path = options.cache_dir.join(LEDGER_FILE);
    let report_path = options.cache_dir.join(REPORT_FILE);
    write_ledger(&ledger_path, &report.ledger()).await?;
    write_latency_report(&report_path, &report).await?;

    println!(
        "chunks: {}, success: {}, error: {}",
        report.outcomes.len(),
        report.success_count(),
        report.error_count()
    );
    if report.error_count() > 0 {
        println!("error ledger written to {}", ledger_path.display());
    }
    Ok(())
}

fn spawn_progress_renderer(progress: Arc<Progress>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let started = std::time::Instant::now();
        let mut interval = tokio::time::interval(Duration::from_millis(200));
        loop {
            interval.tick().await;
            eprint!("\r{}", format_progress(&progress, started.elapsed()));
        }
    })
}

/// One-line progress indicator: percentage, chunk counts, throughput.
fn format_progress(progress: &Progress, elapsed: Duration) -> String {
    let uploaded = progress.uploaded_chunks.load(Ordering::Relaxed);
    let total = progress.total_chunks.load(Ordering::Relaxed).max(1);
    let bytes = progress.uploaded_bytes.load(Ordering::Relaxed);

    let percentage = (uploaded * 100 / total).min(100);
    let kib = bytes / 1024;
    let total_display = if kib > 1024 {
        format!("{} MB", kib / 1024)
    } else {
        format!("{kib} KB")
    };
    let rate = if elapsed.as_secs() > 0 {
        kib / elapsed.as_secs()
    } else {
        0
    };

    format!(
        " {percentage:>3}%  uploaded chunks {uploaded} / {total}, total: {total_display:>8}, {rate:>6} kB/s        "
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_args(config: &str) -> ConfigArgs {
        ConfigArgs {
            config: config.to_string(),
            store_url: None,
            stamp: None,
            parallelism: None,
            retries: None,
            deferred: None,
            cache_chunks: false,
            cache_dir: None,
        }
    }

    #[test]
    fn load_options_uses_defaults_without_a_config_file() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("missing.toml");
        let options = load_options(&bare_args(missing.to_str().unwrap())).unwrap();
        assert_eq!(options.store_url, "http://127.0.0.1:1633");
        assert_eq!(options.parallelism, 8);
        assert_eq!(options.retries, 5);
    }

    #[test]
    fn load_options_reads_the_config_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("apiary.toml");
        std::fs::write(
            &path,
            "store_url = \"http://store.example:1633\"\nparallelism = 50\nretries = 1\n",
        )
        .unwrap();

        let options = load_options(&bare_args(path.to_str().unwrap())).unwrap();
        assert_eq!(options.store_url, "http://store.example:1633");
        assert_eq!(options.parallelism, 50);
        assert_eq!(options.retries, 1);
    }

    #[test]
    fn flags_override_the_config_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("apiary.toml");
        std::fs::write(&path, "parallelism = 50\n").unwrap();

        let mut args = bare_args(path.to_str().unwrap());
        args.parallelism = Some(2);
        args.stamp = Some("feed".repeat(16));
        args.cache_chunks = true;

        let options = load_options(&args).unwrap();
        assert_eq!(options.parallelism, 2);
        assert_eq!(options.stamp, "feed".repeat(16));
        assert!(options.cache_chunks);
    }

    #[test]
    fn load_options_rejects_invalid_ranges() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("apiary.toml");
        std::fs::write(&path, "retries = 0\n").unwrap();
        assert!(load_options(&bare_args(path.to_str().unwrap())).is_err());
    }

    #[test]
    fn format_progress_renders_counts_and_percentage() {
        let progress = Progress::default();
        progress.total_chunks.store(4, Ordering::Relaxed);
        progress.uploaded_chunks.store(2, Ordering::Relaxed);
        progress.uploaded_bytes.store(8192, Ordering::Relaxed);

        let line = format_progress(&progress, Duration::from_secs(2));
        assert!(line.contains("50%"));
        assert!(line.contains("uploaded chunks 2 / 4"));
        assert!(line.contains("8 KB"));
        assert!(line.contains("4 kB/s"));
    }

    #[test]
    fn cli_parses_upload_and_check() {
        let cli = Cli::try_parse_from(["apiary", "upload", "./site", "--parallelism", "4"]).unwrap();
        match cli.command {
            Commands::Upload { path, config, .. } => {
                assert_eq!(path, PathBuf::from("./site"));
                assert_eq!(config.parallelism, Some(4));
            }
            _ => panic!("expected upload command"),
        }

        let cli = Cli::try_parse_from(["apiary", "check", "--ledger", "ledger.json"]).unwrap();
        match cli.command {
            Commands::Check { ledger, .. } => {
                assert_eq!(ledger, Some(PathBuf::from("ledger.json")));
            }
            _ => panic!("expected check command"),
        }
    }
}

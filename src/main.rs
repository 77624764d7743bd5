//! DeltaGlider CLI — `put`/`get`/`verify` against an S3-compatible bucket,
//! with transparent delta compression against a per-prefix reference.

use clap::{Parser, Subcommand};
use deltaglider::config::Config;
use deltaglider::service::DynDeltaService;
use deltaglider::types::ObjectKey;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Version string including build timestamp for --version output
fn version_long() -> &'static str {
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| format!("{} (built {})", env!("CARGO_PKG_VERSION"), env!("DG_BUILD_TIME")))
}

/// DeltaGlider — delta-aware S3 object storage wrapper
#[derive(Parser, Debug)]
#[command(name = "deltaglider")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file as a reference or delta
    Put {
        /// Local file to upload
        file: PathBuf,
        /// Destination, e.g. s3://bucket/prefix/app.zip
        s3_url: String,
        /// Max delta/file ratio (default: 0.5)
        #[arg(long)]
        max_ratio: Option<f64>,
    },
    /// Download and hydrate a delta file
    Get {
        /// Source, e.g. s3://bucket/prefix/app.zip (or .../app.zip.delta)
        s3_url: String,
        /// Output file path (default: derived from the key)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Verify the integrity of a delta file
    Verify {
        /// Source, e.g. s3://bucket/prefix/app.zip.delta
        s3_url: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let initial_filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("DG_LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| {
            if cli.debug {
                EnvFilter::new("deltaglider=debug")
            } else {
                EnvFilter::new("deltaglider=info")
            }
        });

    tracing_subscriber::registry()
        .with(initial_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> ExitCode {
    let config = Config::load();
    let service = DynDeltaService::from_config(&config).await;

    match cli.command {
        Command::Put { file, s3_url, max_ratio } => run_put(&service, &file, &s3_url, max_ratio).await,
        Command::Get { s3_url, output } => run_get(&service, &s3_url, output).await,
        Command::Verify { s3_url } => run_verify(&service, &s3_url).await,
    }
}

/// `s3://bucket/prefix...` -> `(bucket, rest)`. The trailing `/` on the
/// prefix portion is stripped, matching the reference CLI's URL handling.
fn parse_bucket_and_rest(s3_url: &str) -> Option<(String, String)> {
    let rest = s3_url.strip_prefix("s3://")?;
    let rest = rest.trim_end_matches('/');
    let mut parts = rest.splitn(2, '/');
    let bucket = parts.next()?.to_string();
    let tail = parts.next().unwrap_or("").to_string();
    if bucket.is_empty() {
        return None;
    }
    Some((bucket, tail))
}

async fn run_put(service: &DynDeltaService, file: &Path, s3_url: &str, max_ratio: Option<f64>) -> ExitCode {
    let Some((bucket, prefix)) = parse_bucket_and_rest(s3_url) else {
        eprintln!("Error: Invalid S3 URL: {s3_url}");
        return ExitCode::FAILURE;
    };
    let delta_space = deltaglider::types::DeltaSpace::new(bucket, prefix);

    match service.put(file, &delta_space, max_ratio, None).await {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error: failed to serialize summary: {e}");
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_get(service: &DynDeltaService, s3_url: &str, output: Option<PathBuf>) -> ExitCode {
    let Some((bucket, key)) = parse_bucket_and_rest(s3_url) else {
        eprintln!("Error: Invalid S3 URL: {s3_url}");
        return ExitCode::FAILURE;
    };
    if key.is_empty() {
        eprintln!("Error: Invalid S3 URL: {s3_url}");
        return ExitCode::FAILURE;
    }

    let mut key = key;

    // Probe for the object as given, then its `.delta` sibling. Any
    // unexpected error from the probe itself (not "not found") is treated as
    // non-fatal: we fall through and let `get` below surface the actual
    // failure, rather than letting a transient head error block a
    // retrievable object.
    match service.head(&bucket, &key).await {
        Ok(Some(_)) => {
            println!("Found file: s3://{bucket}/{key}");
        }
        Ok(None) => {
            if !key.ends_with(".delta") {
                let delta_key = format!("{key}.delta");
                match service.head(&bucket, &delta_key).await {
                    Ok(Some(_)) => {
                        println!("Found delta file: s3://{bucket}/{delta_key}");
                        key = delta_key;
                    }
                    Ok(None) => {
                        eprintln!("Error: File not found: s3://{bucket}/{key} (also tried .delta)");
                        return ExitCode::FAILURE;
                    }
                    Err(_) => {
                        println!("Warning: Could not check file existence, proceeding with: s3://{bucket}/{key}");
                    }
                }
            } else {
                eprintln!("Error: File not found: s3://{bucket}/{key}");
                return ExitCode::FAILURE;
            }
        }
        Err(_) => {
            println!("Warning: Could not check file existence, proceeding with: s3://{bucket}/{key}");
        }
    }

    let object_key = ObjectKey::new(bucket, key.clone());
    let output = output.unwrap_or_else(|| {
        let name = key.strip_suffix(".delta").unwrap_or(&key);
        PathBuf::from(Path::new(name).file_name().unwrap_or_default())
    });

    match service.get(&object_key, &output).await {
        Ok(()) => {
            println!("Successfully retrieved: {}", output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_verify(service: &DynDeltaService, s3_url: &str) -> ExitCode {
    let Some((bucket, key)) = parse_bucket_and_rest(s3_url) else {
        eprintln!("Error: Invalid S3 URL: {s3_url}");
        return ExitCode::FAILURE;
    };
    if key.is_empty() {
        eprintln!("Error: Invalid S3 URL: {s3_url}");
        return ExitCode::FAILURE;
    }
    let object_key = ObjectKey::new(bucket, key);

    match service.verify(&object_key).await {
        Ok(result) => {
            let valid = result.valid;
            match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error: failed to serialize result: {e}");
                    return ExitCode::FAILURE;
                }
            }
            if valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

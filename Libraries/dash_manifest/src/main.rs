use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dash_manifest::mpd::render::serialize_pretty;
use dash_manifest::{build_manifest, to_dash, Format, ManifestOptions, ReqwestFetcher};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Builds a DASH manifest from a JSON list of adaptive formats")]
struct Args {
    /// JSON file holding the adaptive formats
    input: PathBuf,
    /// Content playback nonce written into every stream URL
    #[arg(long, default_value = "")]
    cpn: String,
    /// Write the manifest here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Indent the generated XML
    #[arg(long)]
    pretty: bool,
    // Set the log level (possible values: error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: LogLevel,
    /// Timeout of the OTF probe requests
    #[arg(long, default_value_t = 10)]
    probe_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .with_filter(match args.log_level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        });
    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(fmt_layer))?;

    let raw = std::fs::read_to_string(&args.input)?;
    let formats: Vec<Format> = serde_json::from_str(&raw)?;
    info!("Loaded {} formats from {:?}", formats.len(), args.input);

    let fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(args.probe_timeout_secs))?;
    let options = ManifestOptions::new().cpn(args.cpn.as_str()).fetcher(Arc::new(fetcher));

    let result = if args.pretty {
        match build_manifest(&formats, &options) {
            Ok(tree) => serialize_pretty(tree).await,
            Err(e) => Err(e),
        }
    } else {
        to_dash(&formats, &options).await
    };

    let manifest = match result {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("Failed to build the manifest: {}", e);
            return Err(e.into());
        }
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &manifest)?;
            info!("Wrote manifest to {:?}", path);
        }
        None => println!("{manifest}"),
    }
    Ok(())
}

mod ai;
mod capture;
mod error;
mod image_meta;
mod iptc;
mod media;
mod pipeline;
mod video;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::ai::OpenAiDescriber;
use crate::pipeline::{Annotator, ProcessResult};

#[derive(Parser)]
#[command(name = "stocktag")]
#[command(
    about = "Title and keyword images and videos for stock sites using an OpenAI vision model",
    long_about = None
)]
struct Cli {
    /// Image or video file, or a directory containing them
    path: PathBuf,
    /// Where the media was captured, passed to the model as a hint
    #[arg(short, long, env = "STOCKTAG_LOCATION")]
    location: Option<String>,
    #[arg(short, long, env = "STOCKTAG_MODEL", default_value = "gpt-4o-mini")]
    model: String,
    /// Number of keywords to ask for
    #[arg(short, long, default_value_t = 49)]
    keywords: u32,
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
    /// exiftool binary used to write XMP subjects into videos
    #[arg(long, env = "STOCKTAG_EXIFTOOL", default_value = "exiftool")]
    exiftool: PathBuf,
    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let annotator = Annotator {
        describer: OpenAiDescriber::new(
            cli.model,
            cli.keywords,
            Duration::from_secs(cli.timeout_secs),
        ),
        exiftool: cli.exiftool,
    };
    let result = annotator
        .process_path(&cli.path, cli.location.as_deref())
        .await?;

    if let ProcessResult::Error { error } = &result {
        println!("{error}");
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}

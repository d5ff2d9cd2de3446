//! Minimal argv-driven driver over the client orchestrator library.
//! The interactive CLI/UX is out of scope (spec §1) — this binary exists
//! only so the orchestrator can be exercised from a terminal.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use shardmesh::client::ClientOrchestrator;
use shardmesh::config::{init_tracing, load_config};

#[derive(Parser, Debug)]
#[command(name = "shardmesh-client", version)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file.
    Upload { path: PathBuf },
    /// Download a file by name. Defaults to `[client].output_dir` when
    /// `--output` is omitted.
    Download {
        filename: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List files known to the master.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    let _log_guard = init_tracing(&config.common);

    let client = ClientOrchestrator::new(config.common);

    match args.command {
        Command::Upload { path } => {
            let outcome = client.upload_file(&path).await?;
            println!(
                "Upload complete: {}/{} chunks stored",
                outcome.stored_chunks, outcome.total_chunks
            );
        }
        Command::Download { filename, output } => {
            let output = output.unwrap_or_else(|| {
                PathBuf::from(&config.client.output_dir).join(&filename)
            });
            if let Some(parent) = output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            client.download_file(&filename, &output).await?;
            println!("Download complete: {}", output.display());
        }
        Command::List => {
            let files = client.list_files().await?;
            if files.is_empty() {
                println!("No files in storage");
            } else {
                println!("Files in storage:");
                for f in files {
                    println!("  - {}", f);
                }
            }
        }
    }

    Ok(())
}

use clap::Parser;
use shard_index::config::{IndexConfig, OutputTarget, resolve_output_path};
use shard_index::store::LocalStore;
use shard_index::{config, output, pipeline};
use std::path::PathBuf;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup — trivial, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "shard-index")]
#[command(about = "Build a global Feather index from per-shard image metadata")]
#[command(long_about = "\
Build a global Feather index from per-shard image metadata

Reads every .parquet shard metadata file under the input folder, resolves
each image's width and height by decoding only the image header, and writes
one combined Arrow IPC (Feather) table.

Dataset layout:

  dataset/
  ├── part-00000.parquet           # Shard metadata (key, caption, url, ...)
  ├── part-00001.parquet
  ├── a1b2c/
  │   ├── a1b2c3d4e5f6.jpg         # Images, sharded by key prefix
  │   └── a1b2cffee00d.jpg
  └── ...

Output columns: image_id, image_path, image_width, image_height,
aspect_ratio, status, error_message, plus every metadata column the shards
carry (placeholder width/height and hash columns are dropped).

Rows for unreadable images are kept with status=failed and an error message;
only configuration and write errors abort the run. The output file is
committed atomically — a crash never leaves a partial index behind.")]
#[command(version = version_string())]
struct Cli {
    /// Dataset root containing the shard parquet files and images
    #[arg(long)]
    input_folder: PathBuf,

    /// Output file (.feather/.fth), or a directory to receive the
    /// default filename
    #[arg(long, default_value = config::DEFAULT_OUTPUT_FILENAME)]
    output_path: PathBuf,

    /// Shard metadata column holding the per-record key
    #[arg(long, default_value = "key")]
    image_path_column: String,

    /// Image file extension, dot included
    #[arg(long, default_value = ".jpg")]
    image_extension: String,

    /// Concurrent image fetches (defaults to the number of CPU cores)
    #[arg(long)]
    num_workers: Option<usize>,

    /// Stop after this many records
    #[arg(long)]
    max_items: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let num_workers = match cli.num_workers {
        Some(n) => n,
        None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    };

    let output_path = resolve_output_path(&cli.output_path);
    let config = IndexConfig {
        key_column: cli.image_path_column,
        image_extension: cli.image_extension,
        num_workers,
        max_items: cli.max_items,
        output: OutputTarget::Local(output_path.clone()),
    };

    let store = LocalStore::new(&cli.input_folder);
    let summary = pipeline::run(&store, &config)?;
    output::print_run_summary(&summary, &output_path.display().to_string());

    Ok(())
}

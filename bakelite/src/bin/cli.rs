//! bakelite command-line interface.

use anyhow::Context;
use bakelite::{BakeliteOptions, BakeliteRuntime};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "bakelite",
    version,
    about = "Deterministic build-and-boot engine for single-process container images"
)]
struct Cli {
    /// Engine home directory (defaults to $BAKELITE_HOME or ~/.bakelite).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image from a context directory and recipe
    Build {
        /// Build context directory
        #[arg(long, default_value = ".")]
        context: PathBuf,
        /// Recipe file (defaults to bakelite.json inside the context)
        #[arg(long)]
        recipe: Option<PathBuf>,
    },
    /// Create a container from an image and run it in the foreground
    Run {
        /// Image reference
        image: String,
        /// Container name
        #[arg(long)]
        name: Option<String>,
    },
    /// Boot an existing container again (reuses its rootfs)
    Start {
        /// Container id, id prefix, or name
        container: String,
    },
    /// List built images
    Images,
    /// List containers
    Ps,
    /// Remove a container
    Rm {
        /// Container id, id prefix, or name
        container: String,
        /// Kill the foreground process first if running
        #[arg(long)]
        force: bool,
    },
    /// Remove an image record
    Rmi {
        /// Image reference
        image: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = match cli.home {
        Some(home) => BakeliteOptions::with_home(
            std::path::absolute(&home)
                .with_context(|| format!("resolving home directory {}", home.display()))?,
        ),
        None => BakeliteOptions::default(),
    };
    let runtime = BakeliteRuntime::new(options).context("initializing engine")?;

    match cli.command {
        Commands::Build { context, recipe } => {
            let record = runtime.build(&context, recipe.as_deref()).await?;
            println!(
                "Built {} ({} layers, config {})",
                record.reference,
                record.layers.len(),
                &record.config_digest[..12]
            );
        }
        Commands::Run { image, name } => {
            let container = runtime.create_container(&image, name)?;
            let code = container.run().await?;
            // The container's exit code is the CLI's exit code.
            std::process::exit(code);
        }
        Commands::Start { container } => {
            let handle = runtime.container(&container)?;
            let code = handle.run().await?;
            std::process::exit(code);
        }
        Commands::Images => {
            for record in runtime.list_images()? {
                println!(
                    "{}\t{}\t{} layers",
                    record.reference,
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.layers.len()
                );
            }
        }
        Commands::Ps => {
            for info in runtime.list_containers()? {
                println!(
                    "{}\t{}\t{}\t{}\t{}/tcp\t{}",
                    info.id,
                    info.name.as_deref().unwrap_or("-"),
                    info.image,
                    info.status,
                    info.declared_port,
                    info.exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".into()),
                );
            }
        }
        Commands::Rm { container, force } => {
            runtime.remove_container(&container, force)?;
        }
        Commands::Rmi { image } => {
            runtime.remove_image(&image)?;
        }
    }

    Ok(())
}

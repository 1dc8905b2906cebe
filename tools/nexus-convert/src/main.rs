//! nexus-convert - Nexus Buddy / CivNexus6 model converter
//!
//! Converts between NB2, BR2 and CN6 model files, applies NA2 animations and
//! runs manifest-driven batch conversions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nexus_common::FormatKind;
use nexus_common::formats::na2;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use nexus_convert::{animation, batch, config::Config, export, format_of, import, inspect};
use nexus_convert::scene::HostScene;

#[derive(Parser)]
#[command(name = "nexus-convert")]
#[command(about = "Nexus Buddy / CivNexus6 model converter")]
#[command(version)]
struct Cli {
    /// Config file (default: nexus.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a single model file
    Convert {
        /// Input .nb2/.br2/.cn6 file
        input: PathBuf,

        /// Output file (default: input with the target extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target format (nb2, br2, cn6); defaults to the output extension
        #[arg(short, long)]
        to: Option<String>,
    },

    /// Print the contents of a model or animation file
    Inspect {
        /// Input .nb2/.br2/.cn6/.na2 file
        input: PathBuf,
    },

    /// Apply an NA2 animation to a model
    Animate {
        /// Model the animation is applied to
        model: PathBuf,

        /// Input .na2 file
        animation: PathBuf,

        /// Armature to animate (default: the first one)
        #[arg(short, long)]
        armature: Option<String>,

        /// Write the keyed animation back out as .na2
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert every model listed in a manifest
    Batch {
        /// Manifest with one `model;...` line per model
        manifest: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let config = Config::discover(cli.config.as_deref())?;

    match cli.command {
        Commands::Convert { input, output, to } => {
            let kind = match (&to, &output) {
                (Some(to), _) => FormatKind::from_extension(to)
                    .with_context(|| format!("Unknown target format: {}", to))?,
                (None, Some(output)) => format_of(output)?,
                (None, None) => FormatKind::from_extension(&config.batch.target)
                    .with_context(|| format!("Unknown target format: {}", config.batch.target))?,
            };
            let output = output.unwrap_or_else(|| input.with_extension(kind.spec().extension));
            if output == input {
                anyhow::bail!("Refusing to overwrite the input file {:?}", input);
            }
            tracing::info!("Converting {:?} -> {:?}", input, output);

            let mut scene = HostScene::new();
            import::Importer::new(&config.import).import_file(&mut scene, &input)?;
            export::export_file(&scene, &output, kind, &config.export)?;
            tracing::info!("Done!");
        }

        Commands::Inspect { input } => {
            let report = inspect::inspect(&input)?;
            print!("{}", report);
        }

        Commands::Animate {
            model,
            animation: animation_path,
            armature,
            output,
        } => {
            let mut scene = HostScene::new();
            import::Importer::new(&config.import).import_file(&mut scene, &model)?;

            let file = File::open(&animation_path)
                .with_context(|| format!("Failed to open {:?}", animation_path))?;
            let clip = na2::decode(BufReader::new(file))
                .with_context(|| format!("Failed to load {:?}", animation_path))?;
            let index = match &armature {
                Some(name) => scene
                    .find_armature(name)
                    .with_context(|| format!("No armature named `{}`", name))?,
                None => 0,
            };
            animation::apply_animation(&mut scene, &clip, index)?;

            if let Some(output) = output {
                tracing::info!("Baking animation -> {:?}", output);
                let baked = animation::bake_animation(&scene.armatures[index], &scene.render)?;
                let file = File::create(&output)
                    .with_context(|| format!("Failed to create {:?}", output))?;
                na2::encode(&baked, BufWriter::new(file))?;
            }
            tracing::info!("Done!");
        }

        Commands::Batch { manifest } => {
            let summary = batch::run_manifest(&manifest, &config)?;
            if !summary.failed.is_empty() {
                anyhow::bail!(
                    "{} of {} models failed: {}",
                    summary.failed.len(),
                    summary.models,
                    summary.failed.join(", ")
                );
            }
            tracing::info!("Batch complete!");
        }
    }

    Ok(())
}

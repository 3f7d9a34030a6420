//! Rostro CLI - face identity resolution for images and video.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;
mod utils;

use commands::AppContext;
use exit_codes::ExitCode;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "rostro")]
#[command(author, version, about = "Face identity resolution for images and video", long_about = None)]
#[command(after_help = "Exit codes:
  0   Success
  1   General error
  64  Invalid arguments or configuration
  65  Reference image rejected (needs exactly one face)
  66  Input file or record not found
  69  Inference service unavailable
  74  I/O error")]
pub struct Cli {
    /// Root directory for the catalog and image folders
    #[arg(long, global = true, env = "ROSTRO_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Use the deterministic mock embedding provider
    #[arg(long, global = true)]
    pub mock: bool,

    /// Base URL of the face embedding service
    #[arg(long, global = true, env = "ROSTRO_PROVIDER_URL", value_name = "URL")]
    pub provider_url: Option<String>,

    /// Base URL of the object detection service
    #[arg(long, global = true, env = "ROSTRO_OBJECT_PROVIDER_URL", value_name = "URL")]
    pub object_provider_url: Option<String>,

    /// Maximum embedding distance accepted as a match
    #[arg(long, global = true, value_name = "DISTANCE")]
    pub threshold: Option<f32>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress human-readable output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Register a new individual, optionally with a reference image
    Create {
        /// Given name
        #[arg(value_name = "NAME")]
        given_name: String,

        /// First surname
        #[arg(long, default_value = "")]
        first_surname: String,

        /// Second surname
        #[arg(long, default_value = "")]
        second_surname: String,

        /// Reference image with exactly one face
        #[arg(long, value_name = "IMAGE")]
        reference: Option<PathBuf>,
    },

    /// List registered individuals
    List,

    /// Show one individual and its reference faces
    Show {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Replace an individual's names
    Update {
        #[arg(value_name = "ID")]
        id: String,

        #[arg(value_name = "NAME")]
        given_name: String,

        #[arg(long, default_value = "")]
        first_surname: String,

        #[arg(long, default_value = "")]
        second_surname: String,
    },

    /// Delete an individual with all its faces
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Add a reference face to an individual
    Enroll {
        #[arg(value_name = "ID")]
        id: String,

        /// Image with exactly one face
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },

    /// Remove one reference face from an individual
    RemoveFace {
        #[arg(value_name = "ID")]
        id: String,

        #[arg(value_name = "FACE_ID")]
        face_id: String,
    },

    /// Detect faces and objects in an image
    DetectImage {
        /// Image path; relative names are also looked up in the analyze directory
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Do not write the annotated copy
        #[arg(long)]
        no_save: bool,
    },

    /// Detect individuals and objects across a video
    DetectVideo {
        /// Directory of frames, or a video file when built with FFmpeg support
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Process every Nth frame
        #[arg(long, value_name = "N")]
        frame_skip: Option<usize>,

        /// Scale factor applied to sampled frames, in (0, 1]
        #[arg(long, value_name = "RATIO")]
        downscale: Option<f32>,

        /// Report each sampled frame as it is processed
        #[arg(long)]
        live: bool,
    },

    /// Rebuild the reference index and report skipped references
    Rebuild {
        /// Derive owners from reference file names instead of the catalog
        #[arg(long)]
        from_directory: bool,
    },
}

impl Cli {
    pub fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Logs go to stderr. `RUST_LOG` overrides the verbosity flags.
fn init_tracing(verbose: u8, quiet: bool) {
    let default_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "rostro_core=info,rostro=info,warn",
        (false, _) => "rostro_core=debug,rostro=debug,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .init();
}

/// Run a synchronous command on the blocking pool. Providers may block on I/O.
async fn blocking<F>(ctx: AppContext, command: F) -> Result<()>
where
    F: FnOnce(&AppContext) -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(move || command(&ctx))
        .await
        .context("Command worker terminated unexpectedly")?
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.output_format();
    let quiet = cli.quiet;
    let command = cli.command.clone();
    let ctx = tokio::task::spawn_blocking(move || AppContext::from_cli(&cli))
        .await
        .context("Startup worker terminated unexpectedly")??;

    match command {
        Commands::Create {
            given_name,
            first_surname,
            second_surname,
            reference,
        } => {
            blocking(ctx, move |ctx| {
                commands::individual::create(
                    ctx,
                    given_name,
                    first_surname,
                    second_surname,
                    reference,
                    format,
                    quiet,
                )
            })
            .await
        }
        Commands::List => {
            blocking(ctx, move |ctx| commands::individual::list(ctx, format, quiet)).await
        }
        Commands::Show { id } => {
            blocking(ctx, move |ctx| commands::individual::show(ctx, &id, format, quiet)).await
        }
        Commands::Update {
            id,
            given_name,
            first_surname,
            second_surname,
        } => {
            blocking(ctx, move |ctx| {
                commands::individual::update(
                    ctx,
                    &id,
                    given_name,
                    first_surname,
                    second_surname,
                    format,
                    quiet,
                )
            })
            .await
        }
        Commands::Delete { id } => {
            blocking(ctx, move |ctx| commands::individual::delete(ctx, &id, format, quiet)).await
        }
        Commands::Enroll { id, image } => {
            blocking(ctx, move |ctx| {
                commands::face::enroll(ctx, &id, &image, format, quiet)
            })
            .await
        }
        Commands::RemoveFace { id, face_id } => {
            blocking(ctx, move |ctx| {
                commands::face::remove(ctx, &id, &face_id, format, quiet)
            })
            .await
        }
        Commands::DetectImage { image, no_save } => {
            blocking(ctx, move |ctx| {
                commands::detect_image::execute(ctx, &image, !no_save, format, quiet)
            })
            .await
        }
        Commands::DetectVideo {
            input,
            frame_skip,
            downscale,
            live,
        } => {
            commands::detect_video::execute(ctx, input, frame_skip, downscale, live, format, quiet)
                .await
        }
        Commands::Rebuild { from_directory } => {
            blocking(ctx, move |ctx| {
                commands::rebuild::execute(ctx, from_directory, format, quiet)
            })
            .await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let exit = match run(cli).await {
        Ok(()) => ExitCode::success(),
        Err(err) => ExitCode::from_anyhow(&err),
    };

    if let Some(message) = &exit.message {
        eprintln!("{} {}", "Error:".red().bold(), message);
    }
    std::process::exit(exit.code);
}

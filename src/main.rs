//! Pipeline driver CLI.
//!
//! Exit codes: 0 success, 1 run failed (stage failure or game-ready gate),
//! 2 invalid recipe or arguments.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use gamebook_forge::config::{self, DEFAULT_OUTPUT_DIR};
use gamebook_forge::pipeline::driver::{self, DriverError, DriverOptions};

#[derive(Parser, Debug)]
#[command(
    name = "gamebook-forge",
    version,
    about = "Convert a scanned gamebook into validated engine-ready JSON"
)]
struct Cli {
    /// Recipe file (JSON or TOML)
    #[arg(long)]
    recipe: PathBuf,

    /// Run identifier; the run directory is <output-dir>/<run-id>
    #[arg(long)]
    run_id: String,

    /// Root directory for run outputs
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Override the source PDF named by the recipe
    #[arg(long)]
    input_pdf: Option<PathBuf>,

    /// Delete any existing run directory for this run id first
    #[arg(long)]
    force: bool,

    /// Resume into an existing run directory instead of refusing
    #[arg(long)]
    allow_run_id_reuse: bool,

    /// Re-execute from this stage onward, keeping earlier results
    #[arg(long)]
    start_from: Option<String>,

    /// Print the planned stage order and exit without running
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let run_dir = cli.output_dir.join(&cli.run_id);
    let file_logging = !cli.dry_run && std::fs::create_dir_all(&run_dir).is_ok();
    let _guard = config::init_tracing(file_logging.then_some(run_dir.as_path()));

    let options = DriverOptions {
        recipe_path: cli.recipe,
        run_id: cli.run_id,
        output_dir: cli.output_dir,
        input_pdf: cli.input_pdf,
        force: cli.force,
        allow_run_id_reuse: cli.allow_run_id_reuse,
        start_from: cli.start_from,
        dry_run: cli.dry_run,
    };

    match driver::run(&options).await {
        Ok(outcome) => {
            if let Some(stage) = &outcome.failed_stage {
                eprintln!("run failed at stage {stage}");
            } else if outcome.gate_failed {
                eprintln!("run completed but the game-ready gate failed");
            }
            ExitCode::from(outcome.exit_code() as u8)
        }
        Err(e) => {
            eprintln!("error: {e}");
            match e {
                // Setup problems are usage errors; anything that got past
                // setup surfaces as a failed run.
                DriverError::Recipe(_)
                | DriverError::UnknownModule { .. }
                | DriverError::UnknownStartStage(_)
                | DriverError::RunIdReuse(_) => ExitCode::from(2),
                DriverError::Artifact(_) | DriverError::Io { .. } => ExitCode::from(1),
            }
        }
    }
}

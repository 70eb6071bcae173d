//! Portable gamebook validator CLI.
//!
//! Ships independently of the pipeline: one gamebook path in, a JSON
//! report on stdout, exit 0 on pass / 1 on fail. A validator-version
//! mismatch in the document is a warning, never a failure.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use gamebook_forge::validation::portable::validate_document;

#[derive(Parser, Debug)]
#[command(
    name = "gamebook-validator",
    version,
    about = "Validate a gamebook.json for engine readiness"
)]
struct Cli {
    /// Path to gamebook.json
    gamebook: PathBuf,

    /// Section ids to treat as known-missing, comma separated
    #[arg(long, value_delimiter = ',')]
    known_missing: Vec<u32>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let contents = match std::fs::read_to_string(&cli.gamebook) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error reading {}: {e}", cli.gamebook.display());
            return ExitCode::from(1);
        }
    };
    let doc: serde_json::Value = match serde_json::from_str(&contents) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error parsing {}: {e}", cli.gamebook.display());
            return ExitCode::from(1);
        }
    };

    let report = validate_document(&doc, &cli.known_missing);
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("error serializing report: {e}");
            return ExitCode::from(1);
        }
    }

    if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
